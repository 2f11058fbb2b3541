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
use crate::streaming::{SseEvent, SseStream};

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Google Gemini native API client.
pub struct GeminiClient {
    http: Client,
}

impl GeminiClient {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
        }
    }
}

impl Default for GeminiClient {
    fn default() -> Self {
        Self::new()
    }
}

// ── Request types ────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<GeminiToolDecl>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Serialize, Deserialize, Debug)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(untagged)]
enum GeminiPart {
    FunctionCall {
        #[serde(rename = "functionCall")]
        function_call: GeminiFnCall,
    },
    Text {
        text: String,
    },
}

#[derive(Serialize, Deserialize, Debug)]
struct GeminiFnCall {
    name: String,
    #[serde(default)]
    args: serde_json::Value,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiToolDecl {
    function_declarations: Vec<GeminiFnDecl>,
}

#[derive(Serialize)]
struct GeminiFnDecl {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

// ── Response types ───────────────────────────────────────────────

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GeminiStreamChunk {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    usage_metadata: Option<GeminiUsage>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GeminiUsage {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

// ── Conversion ───────────────────────────────────────────────────

fn convert_messages(messages: Vec<ChatMessage>) -> (Option<GeminiContent>, Vec<GeminiContent>) {
    let mut system = None;
    let mut contents = Vec::new();

    for msg in messages {
        let role = match msg.role {
            Role::System => {
                system = Some(GeminiContent {
                    role: None,
                    parts: vec![GeminiPart::Text { text: msg.content }],
                });
                continue;
            }
            Role::User => "user",
            Role::Assistant => "model",
        };
        if msg.content.is_empty() {
            continue;
        }
        contents.push(GeminiContent {
            role: Some(role.to_string()),
            parts: vec![GeminiPart::Text { text: msg.content }],
        });
    }

    (system, contents)
}

/// Gemini rejects JSON-schema keys it does not know.
pub(crate) fn clean_schema(schema: &serde_json::Value) -> serde_json::Value {
    match schema {
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.iter()
                .filter(|(k, _)| !matches!(k.as_str(), "additionalProperties" | "title" | "$schema"))
                .map(|(k, v)| (k.clone(), clean_schema(v)))
                .collect(),
        ),
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(clean_schema).collect())
        }
        other => other.clone(),
    }
}

fn parse_gemini_chunk(event: SseEvent) -> Vec<Result<StreamDelta>> {
    if event.data.trim() == "[DONE]" {
        return vec![];
    }

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(&event.data) {
        if let Some(error) = value.get("error") {
            let text = error.to_string();
            if text.contains("RESOURCE_EXHAUSTED") || text.contains("429") {
                return vec![Err(QaforgeError::RateLimited(text))];
            }
            return vec![Err(QaforgeError::LlmStream(text))];
        }
    }

    let chunk: GeminiStreamChunk = match serde_json::from_str(&event.data) {
        Ok(chunk) => chunk,
        Err(e) => {
            warn!(data = %event.data, error = %e, "Failed to parse Gemini SSE chunk");
            return vec![];
        }
    };

    let mut deltas = Vec::new();

    if let Some(usage) = chunk.usage_metadata {
        deltas.push(Ok(StreamDelta::Usage {
            input_tokens: usage.prompt_token_count,
            output_tokens: usage.candidates_token_count,
        }));
    }

    let Some(candidate) = chunk.candidates.into_iter().next() else {
        return deltas;
    };

    let mut saw_call = false;
    if let Some(content) = candidate.content {
        for (i, part) in content.parts.into_iter().enumerate() {
            match part {
                GeminiPart::Text { text } => {
                    if !text.is_empty() {
                        deltas.push(Ok(StreamDelta::TextDelta(text)));
                    }
                }
                GeminiPart::FunctionCall { function_call } => {
                    saw_call = true;
                    deltas.push(Ok(StreamDelta::ToolUseStart {
                        index: i,
                        id: format!("call_{}", function_call.name),
                        name: function_call.name,
                    }));
                    deltas.push(Ok(StreamDelta::ToolInputDelta {
                        index: i,
                        delta: function_call.args.to_string(),
                    }));
                }
            }
        }
    }

    if let Some(reason) = candidate.finish_reason {
        let stop = match reason.as_str() {
            "MAX_TOKENS" => StopReason::MaxTokens,
            _ if saw_call => StopReason::ToolUse,
            _ => StopReason::EndTurn,
        };
        deltas.push(Ok(StreamDelta::Stop(stop)));
    }

    deltas
}

impl LlmClient for GeminiClient {
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        let config = config.clone();
        let tools = tools.to_vec();

        Box::pin(async move {
            let api_key = config
                .api_key
                .as_deref()
                .ok_or_else(|| QaforgeError::Config("Gemini: api_key is required".into()))?;

            let base = config.base_url.as_deref().unwrap_or(GEMINI_API_BASE);
            let model = config
                .model_id
                .strip_prefix("models/")
                .unwrap_or(&config.model_id);
            let url = format!("{}/models/{}:streamGenerateContent?alt=sse", base, model);

            let (system_instruction, contents) = convert_messages(messages);

            let gemini_tools = if tools.is_empty() {
                vec![]
            } else {
                vec![GeminiToolDecl {
                    function_declarations: tools
                        .iter()
                        .map(|t| GeminiFnDecl {
                            name: t.name.clone(),
                            description: t.description.clone(),
                            parameters: clean_schema(&t.input_schema),
                        })
                        .collect(),
                }]
            };

            let body = GeminiRequest {
                contents,
                system_instruction,
                tools: gemini_tools,
                generation_config: Some(GenerationConfig {
                    max_output_tokens: Some(config.max_tokens),
                    temperature: if config.temperature > 0.0 {
                        Some(config.temperature)
                    } else {
                        None
                    },
                }),
            };

            let response = self
                .http
                .post(&url)
                .header("content-type", "application/json")
                .header("x-goog-api-key", api_key)
                .json(&body)
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
                .map(|event| futures::stream::iter(parse_gemini_chunk(event)))
                .flatten();

            Ok(Box::pin(delta_stream) as BoxStream<'_, Result<StreamDelta>>)
        })
    }
}
