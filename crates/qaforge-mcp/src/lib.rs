mod client;
mod convert;
mod handler;

pub use client::{McpConnector, McpToolSession};
pub use convert::{tool_output, ContentPart, IMAGE_TEXT_PREFIX};
pub use handler::QaforgeClientHandler;
