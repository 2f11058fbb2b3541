use std::sync::Arc;

use futures::future::BoxFuture;
use futures::StreamExt;
use regex::Regex;
use tracing::{debug, warn};

use qaforge_core::config::ModelConfig;
use qaforge_core::error::{QaforgeError, Result};
use qaforge_core::traits::{AiResponder, LlmClient};
use qaforge_core::types::*;

use crate::retry::RetryPolicy;

/// Adapts a streaming [`LlmClient`] to the [`AiResponder`] contract.
///
/// Each responder owns its model configuration and retry policy, so several
/// can run side by side (the step runner and the optimizer pass, for
/// instance) without any shared "active model" state.
pub struct LlmResponder {
    client: Arc<dyn LlmClient>,
    config: ModelConfig,
    policy: RetryPolicy,
}

impl LlmResponder {
    pub fn new(client: Arc<dyn LlmClient>, config: ModelConfig) -> Self {
        let policy = RetryPolicy::from_config(&config.retry_config());
        Self {
            client,
            config,
            policy,
        }
    }

    /// Build a responder with the provider client `config` names.
    pub fn from_config(config: &ModelConfig) -> Self {
        Self::new(Arc::from(crate::create_client(config)), config.clone())
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    async fn respond_once(
        &self,
        history: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<Intent> {
        match self.collect_reply(history, tools).await {
            Ok(intent) => Ok(intent),
            Err(e) => match recover_failed_generation(&e) {
                Some(intent) => {
                    warn!(provider = %self.config.provider, "Recovered tool call from failed generation");
                    Ok(intent)
                }
                None => Err(e),
            },
        }
    }

    async fn collect_reply(
        &self,
        history: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<Intent> {
        let mut stream = self
            .client
            .chat_stream(&self.config, history.to_vec(), tools)
            .await?;

        let mut text = String::new();
        let mut calls: Vec<ToolCallAccumulator> = Vec::new();

        while let Some(delta) = stream.next().await {
            match delta? {
                StreamDelta::TextDelta(chunk) => text.push_str(&chunk),
                StreamDelta::ToolUseStart { index, id, name } => {
                    while calls.len() <= index {
                        calls.push(ToolCallAccumulator::default());
                    }
                    calls[index].id = id;
                    calls[index].name = name;
                }
                StreamDelta::ToolInputDelta { index, delta } => {
                    if let Some(call) = calls.get_mut(index) {
                        call.input_json.push_str(&delta);
                    }
                }
                StreamDelta::Usage {
                    input_tokens,
                    output_tokens,
                } => {
                    debug!(input_tokens, output_tokens, "LLM usage");
                }
                StreamDelta::Stop(_) => {}
            }
        }

        Ok(normalize_reply(text, calls))
    }
}

impl AiResponder for LlmResponder {
    fn respond<'a>(
        &'a self,
        history: &'a [ChatMessage],
        tools: &'a [ToolDefinition],
    ) -> BoxFuture<'a, Result<Intent>> {
        Box::pin(async move {
            self.policy
                .run(|attempt| {
                    debug!(attempt, model = %self.config.model_id, "Requesting model reply");
                    self.respond_once(history, tools)
                })
                .await
        })
    }
}

/// A tool call being assembled from stream deltas.
#[derive(Debug, Default, Clone)]
pub struct ToolCallAccumulator {
    pub id: String,
    pub name: String,
    pub input_json: String,
}

/// Collapse an accumulated reply into a single intent.
///
/// The first named tool call wins. Arguments that are not a JSON object turn
/// the reply into a diagnostic text intent rather than an error.
pub fn normalize_reply(text: String, calls: Vec<ToolCallAccumulator>) -> Intent {
    if let Some(call) = calls.into_iter().find(|c| !c.name.is_empty()) {
        let raw = call.input_json.trim();
        let raw = if raw.is_empty() { "{}" } else { raw };
        return match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(serde_json::Value::Object(args)) => Intent::ToolCall {
                name: call.name,
                args,
            },
            Ok(other) => Intent::text(format!(
                "Model proposed '{}' but its arguments were not a JSON object: {}",
                call.name, other
            )),
            Err(e) => Intent::text(format!(
                "Model proposed '{}' with unparseable arguments ({}): {}",
                call.name, e, raw
            )),
        };
    }

    let text = text.trim();
    if text.is_empty() {
        Intent::text("Model returned an empty reply.")
    } else {
        Intent::text(text)
    }
}

/// Groq rejects some tool calls but echoes the attempted call back as
/// `<function=NAME{...}</function>` inside a `failed_generation` error.
pub fn recover_failed_generation(err: &QaforgeError) -> Option<Intent> {
    let message = match err {
        QaforgeError::LlmRequest(m) | QaforgeError::LlmStream(m) => m,
        _ => return None,
    };
    if !message.contains("failed_generation") {
        return None;
    }

    let generation = failed_generation_text(message).unwrap_or_else(|| message.clone());
    let re = Regex::new(r"(?s)<function=(\w+)[^{}]*(\{.*?\})[^{}]*</function>").ok()?;
    let caps = re.captures(&generation)?;
    let name = caps.get(1)?.as_str();
    match serde_json::from_str::<serde_json::Value>(caps.get(2)?.as_str()) {
        Ok(serde_json::Value::Object(args)) => Some(Intent::ToolCall {
            name: name.to_string(),
            args,
        }),
        _ => None,
    }
}

/// Pull `error.failed_generation` out of an error body, unescaped.
fn failed_generation_text(message: &str) -> Option<String> {
    let start = message.find('{')?;
    let value: serde_json::Value = serde_json::from_str(&message[start..]).ok()?;
    let error = value.get("error").unwrap_or(&value);
    error
        .get("failed_generation")
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use qaforge_core::config::BackoffStrategy;
    use qaforge_test_utils::ScriptedLlm;
    use std::time::Duration;

    fn call(name: &str, json: &str) -> ToolCallAccumulator {
        ToolCallAccumulator {
            id: "c1".into(),
            name: name.into(),
            input_json: json.into(),
        }
    }

    fn model_config() -> ModelConfig {
        ModelConfig::from_env("groq", Some("test-model"))
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            strategy: BackoffStrategy::Linear,
            initial_backoff: Duration::from_secs(10),
            max_backoff: Duration::from_secs(600),
        }
    }

    #[test]
    fn test_first_tool_call_wins() {
        let intent = normalize_reply(
            "thinking".into(),
            vec![
                call("navigate", r#"{"url":"https://a.test"}"#),
                call("click", r##"{"selector":"#b"}"##),
            ],
        );
        match intent {
            Intent::ToolCall { name, args } => {
                assert_eq!(name, "navigate");
                assert_eq!(args["url"], "https://a.test");
            }
            other => panic!("unexpected intent: {:?}", other),
        }
    }

    #[test]
    fn test_non_object_args_become_diagnostic_text() {
        let intent = normalize_reply(String::new(), vec![call("click", "[1,2]")]);
        assert!(matches!(intent, Intent::Text(ref t) if t.contains("not a JSON object")));

        let intent = normalize_reply(String::new(), vec![call("click", "{oops")]);
        assert!(matches!(intent, Intent::Text(ref t) if t.contains("unparseable")));
    }

    #[test]
    fn test_empty_args_are_an_empty_object() {
        let intent = normalize_reply(String::new(), vec![call("get_content", "")]);
        assert_eq!(intent, Intent::tool_call("get_content", serde_json::json!({})));
    }

    #[test]
    fn test_empty_reply_is_diagnostic_text() {
        assert!(matches!(
            normalize_reply("  ".into(), vec![]),
            Intent::Text(ref t) if t.contains("empty")
        ));
    }

    #[test]
    fn test_recover_groq_failed_generation() {
        let body = r##"HTTP 400 Bad Request: {"error":{"code":"tool_use_failed","failed_generation":"<function=fill{\"selector\": \"#user\", \"value\": \"bob\"}</function>"}}"##;
        let intent = recover_failed_generation(&QaforgeError::LlmRequest(body.into()));
        match intent {
            Some(Intent::ToolCall { name, args }) => {
                assert_eq!(name, "fill");
                assert_eq!(args["value"], "bob");
            }
            other => panic!("unexpected recovery: {:?}", other),
        }
    }

    #[test]
    fn test_unrelated_error_is_not_recovered() {
        let err = QaforgeError::LlmRequest("HTTP 500: boom".into());
        assert!(recover_failed_generation(&err).is_none());
        assert!(recover_failed_generation(&QaforgeError::RateLimited("429".into())).is_none());
    }

    #[tokio::test]
    async fn test_respond_assembles_streamed_tool_call() {
        let llm = ScriptedLlm::new();
        llm.push_reply(vec![
            StreamDelta::ToolUseStart {
                index: 0,
                id: "c1".into(),
                name: "navigate".into(),
            },
            StreamDelta::ToolInputDelta {
                index: 0,
                delta: r#"{"url":"#.into(),
            },
            StreamDelta::ToolInputDelta {
                index: 0,
                delta: r#""https://shop.test"}"#.into(),
            },
            StreamDelta::Stop(StopReason::ToolUse),
        ]);
        let llm = Arc::new(llm);
        let responder = LlmResponder::new(llm.clone(), model_config());

        let intent = responder
            .respond(&[ChatMessage::user("open the shop")], &[])
            .await
            .unwrap();
        assert_eq!(
            intent,
            Intent::tool_call("navigate", serde_json::json!({"url": "https://shop.test"}))
        );
        assert_eq!(llm.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_is_retried_then_exhausted() {
        let llm = ScriptedLlm::new();
        for _ in 0..6 {
            llm.push_error(QaforgeError::RateLimited("429".into()));
        }
        let llm = Arc::new(llm);
        let responder = LlmResponder::new(llm.clone(), model_config()).with_policy(fast_policy());

        let result = responder.respond(&[ChatMessage::user("go")], &[]).await;
        assert!(matches!(
            result,
            Err(QaforgeError::RateLimitExhausted { attempts: 5, .. })
        ));
        assert_eq!(llm.call_count(), 5);
    }

    #[tokio::test]
    async fn test_model_not_found_is_not_retried() {
        let llm = ScriptedLlm::new();
        llm.push_error(QaforgeError::ModelNotFound("HTTP 404".into()));
        let llm = Arc::new(llm);
        let responder = LlmResponder::new(llm.clone(), model_config()).with_policy(fast_policy());

        let result = responder.respond(&[ChatMessage::user("go")], &[]).await;
        assert!(matches!(result, Err(QaforgeError::ModelNotFound(_))));
        assert_eq!(llm.call_count(), 1);
    }
}
