use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tracing::warn;

use rmcp::model::{Content, RawContent, Tool as McpTool};

use qaforge_core::error::{QaforgeError, Result};
use qaforge_core::types::{ToolDefinition, ToolOutput};

/// Text items carrying a screenshot start with this marker.
pub const IMAGE_TEXT_PREFIX: &str = "IMAGE_BASE64:";

/// A single item of a tool result, reduced to what qaforge cares about.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentPart {
    Text(String),
    /// Base64-encoded image data.
    Image(String),
    Other(String),
}

impl From<&Content> for ContentPart {
    fn from(content: &Content) -> Self {
        match &content.raw {
            RawContent::Text(t) => ContentPart::Text(t.text.to_string()),
            RawContent::Image(img) => ContentPart::Image(img.data.to_string()),
            other => ContentPart::Other(format!("{:?}", other)),
        }
    }
}

pub fn tool_definition(tool: &McpTool) -> ToolDefinition {
    let description = tool
        .description
        .as_ref()
        .map(|d| d.to_string())
        .unwrap_or_else(|| format!("Browser tool: {}", tool.name));

    let input_schema = serde_json::to_value(&*tool.input_schema)
        .unwrap_or(serde_json::json!({"type": "object"}));

    ToolDefinition {
        name: tool.name.to_string(),
        description,
        input_schema,
    }
}

/// Fold a tool result into a `ToolOutput`.
///
/// Images (native or `IMAGE_BASE64:` text) go to `image`, never into `text`.
/// A result flagged as an error becomes `ToolExecution`.
pub fn tool_output(tool: &str, parts: Vec<ContentPart>, is_error: bool) -> Result<ToolOutput> {
    let mut texts = Vec::new();
    let mut image = None;

    for part in parts {
        match part {
            ContentPart::Text(text) => match text.strip_prefix(IMAGE_TEXT_PREFIX) {
                Some(encoded) => match decode_image(encoded) {
                    Some(bytes) => image = Some(bytes),
                    None => texts.push("[undecodable image payload]".to_string()),
                },
                None => texts.push(text),
            },
            ContentPart::Image(encoded) => match decode_image(&encoded) {
                Some(bytes) => image = Some(bytes),
                None => texts.push("[undecodable image payload]".to_string()),
            },
            ContentPart::Other(desc) => texts.push(desc),
        }
    }

    let mut text = texts.join("\n");

    if is_error {
        if text.is_empty() {
            text = "tool reported an error".to_string();
        }
        return Err(QaforgeError::ToolExecution {
            tool: tool.to_string(),
            message: text,
        });
    }

    if text.is_empty() {
        if let Some(bytes) = &image {
            text = format!("[image captured: {} bytes]", bytes.len());
        }
    }

    Ok(ToolOutput { text, image })
}

fn decode_image(encoded: &str) -> Option<Vec<u8>> {
    match BASE64.decode(encoded.trim()) {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            warn!(error = %e, "Failed to decode image payload");
            None
        }
    }
}
