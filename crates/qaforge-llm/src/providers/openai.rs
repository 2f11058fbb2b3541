use futures::future::BoxFuture;
use futures::stream::{BoxStream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::warn;

use qaforge_core::config::ModelConfig;
use qaforge_core::error::{QaforgeError, Result};
use qaforge_core::traits::LlmClient;
use qaforge_core::types::*;

use super::classify_http_error;
use super::presets::{build_extra_headers, get_preset};
use crate::streaming::{SseEvent, SseStream};

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI-compatible client. Works with OpenAI, Groq, Ollama, OpenRouter, etc.
pub struct OpenAiClient {
    http: Client,
}

impl OpenAiClient {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
        }
    }
}

impl Default for OpenAiClient {
    fn default() -> Self {
        Self::new()
    }
}

// Request types
#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<OaiMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OaiTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<String>,
}

#[derive(Serialize, Debug, PartialEq)]
pub(crate) struct OaiMessage {
    role: String,
    content: String,
}

#[derive(Deserialize, Debug, Clone)]
struct OaiToolCall {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<OaiFunction>,
}

#[derive(Deserialize, Debug, Clone)]
struct OaiFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Serialize)]
pub(crate) struct OaiTool {
    r#type: String,
    function: OaiToolDef,
}

#[derive(Serialize)]
pub(crate) struct OaiToolDef {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

// Response types
#[derive(Deserialize, Debug)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<StreamUsage>,
}

#[derive(Deserialize, Debug)]
struct StreamChoice {
    delta: StreamDeltaContent,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct StreamDeltaContent {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OaiToolCall>>,
}

#[derive(Deserialize, Debug)]
struct StreamUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

pub(crate) fn convert_tools(tools: &[ToolDefinition]) -> Vec<OaiTool> {
    tools
        .iter()
        .map(|t| OaiTool {
            r#type: "function".to_string(),
            function: OaiToolDef {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.input_schema.clone(),
            },
        })
        .collect()
}

pub(crate) fn convert_messages(messages: Vec<ChatMessage>) -> Vec<OaiMessage> {
    messages
        .into_iter()
        .map(|msg| {
            let role = match msg.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            OaiMessage {
                role: role.to_string(),
                content: msg.content,
            }
        })
        .collect()
}

pub(crate) fn parse_chunk(event: SseEvent) -> Vec<Result<StreamDelta>> {
    if event.data.trim() == "[DONE]" {
        return vec![];
    }

    // Mid-stream provider errors arrive as JSON error objects.
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(&event.data) {
        if let Some(error) = value.get("error") {
            return vec![Err(QaforgeError::LlmStream(error.to_string()))];
        }
    }

    let parsed: std::result::Result<StreamChunk, _> = serde_json::from_str(&event.data);
    match parsed {
        Ok(chunk) => {
            let mut deltas = Vec::new();

            if let Some(usage) = chunk.usage {
                deltas.push(Ok(StreamDelta::Usage {
                    input_tokens: usage.prompt_tokens,
                    output_tokens: usage.completion_tokens,
                }));
            }

            let choice = match chunk.choices.into_iter().next() {
                Some(c) => c,
                None => return deltas,
            };

            if let Some(text) = choice.delta.content {
                if !text.is_empty() {
                    deltas.push(Ok(StreamDelta::TextDelta(text)));
                }
            }

            // Groq and Together send name + arguments in the same chunk.
            if let Some(tool_calls) = choice.delta.tool_calls {
                for tc in tool_calls {
                    if let Some(func) = tc.function {
                        if let Some(name) = func.name {
                            deltas.push(Ok(StreamDelta::ToolUseStart {
                                index: tc.index,
                                id: tc.id.unwrap_or_default(),
                                name,
                            }));
                        }
                        if let Some(args) = func.arguments {
                            deltas.push(Ok(StreamDelta::ToolInputDelta {
                                index: tc.index,
                                delta: args,
                            }));
                        }
                    }
                }
            }

            if let Some(reason) = choice.finish_reason {
                let stop = match reason.as_str() {
                    "stop" => StopReason::EndTurn,
                    "tool_calls" => StopReason::ToolUse,
                    "length" => StopReason::MaxTokens,
                    _ => StopReason::EndTurn,
                };
                deltas.push(Ok(StreamDelta::Stop(stop)));
            }

            deltas
        }
        Err(e) => {
            warn!(data = %event.data, error = %e, "Failed to parse OpenAI SSE chunk");
            vec![]
        }
    }
}

impl LlmClient for OpenAiClient {
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        let config = config.clone();
        let tools = tools.to_vec();

        Box::pin(async move {
            let preset = get_preset(&config.provider);
            let base_url = config
                .base_url
                .clone()
                .or_else(|| preset.as_ref().map(|p| p.default_base_url.to_string()))
                .unwrap_or_else(|| OPENAI_API_URL.to_string());

            if config.api_key.is_none() && preset.as_ref().map_or(true, |p| p.needs_api_key) {
                return Err(QaforgeError::Config(format!(
                    "{}: api_key is required",
                    config.provider
                )));
            }

            let oai_tools = convert_tools(&tools);
            let body = ChatRequest {
                model: config.model_id.clone(),
                messages: convert_messages(messages),
                max_tokens: config.max_tokens,
                temperature: if config.temperature > 0.0 {
                    Some(config.temperature)
                } else {
                    None
                },
                stream: true,
                tool_choice: if oai_tools.is_empty() {
                    None
                } else {
                    Some("auto".to_string())
                },
                tools: oai_tools,
            };

            let mut req = self.http.post(&base_url).json(&body);

            if let Some(api_key) = &config.api_key {
                req = req.header("Authorization", format!("Bearer {}", api_key));
            }

            for (k, v) in build_extra_headers(preset.as_ref(), &config.extra_headers) {
                req = req.header(k.as_str(), v.as_str());
            }

            let response = req
                .send()
                .await
                .map_err(|e| QaforgeError::LlmRequest(e.to_string()))?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "unknown".to_string());
                return Err(classify_http_error(status, &body));
            }

            let sse_stream = SseStream::new(response.bytes_stream());
            let delta_stream = sse_stream
                .map(|event| futures::stream::iter(parse_chunk(event)))
                .flatten();

            Ok(Box::pin(delta_stream) as BoxStream<'_, Result<StreamDelta>>)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(data: &str) -> SseEvent {
        SseEvent {
            event_type: None,
            data: data.to_string(),
        }
    }

    #[test]
    fn test_model_role_maps_to_assistant() {
        let msgs = convert_messages(vec![
            ChatMessage::user("open the site"),
            ChatMessage::assistant("I am calling navigate."),
        ]);
        assert_eq!(msgs[0].role, "user");
        assert_eq!(msgs[1].role, "assistant");
        assert_eq!(msgs[1].content, "I am calling navigate.");
    }

    #[test]
    fn test_parse_tool_call_in_single_chunk() {
        let deltas = parse_chunk(event(
            r##"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"click","arguments":"{\"selector\":\"#go\"}"}}]},"finish_reason":"tool_calls"}]}"##,
        ));
        assert_eq!(deltas.len(), 3);
        match deltas[0].as_ref().unwrap() {
            StreamDelta::ToolUseStart { name, id, .. } => {
                assert_eq!(name, "click");
                assert_eq!(id, "call_1");
            }
            other => panic!("unexpected delta: {:?}", other),
        }
        assert!(matches!(
            deltas[2].as_ref().unwrap(),
            StreamDelta::Stop(StopReason::ToolUse)
        ));
    }

    #[test]
    fn test_parse_done_marker() {
        assert!(parse_chunk(event("[DONE]")).is_empty());
    }

    #[test]
    fn test_parse_inline_error_object() {
        let deltas = parse_chunk(event(r#"{"error":{"message":"failed_generation"}}"#));
        assert_eq!(deltas.len(), 1);
        assert!(deltas[0].is_err());
    }
}
