use std::path::Path;

use futures::future::BoxFuture;
use futures::stream::BoxStream;

use crate::config::ModelConfig;
use crate::error::Result;
use crate::types::*;

/// Streaming chat client for one provider.
pub trait LlmClient: Send + Sync + 'static {
    /// Send a chat request and receive a stream of deltas.
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>>;
}

/// Turns a conversation into a single normalized intent.
///
/// Rate-limit failures must surface as `QaforgeError::RateLimited` (or
/// `RateLimitExhausted` once a retry policy has given up) so callers can
/// tell them apart from every other failure.
pub trait AiResponder: Send + Sync + 'static {
    fn respond<'a>(
        &'a self,
        history: &'a [ChatMessage],
        tools: &'a [ToolDefinition],
    ) -> BoxFuture<'a, Result<Intent>>;
}

/// A live session against the browser automation server.
pub trait ToolSession: Send + Sync {
    /// Catalogue of tools the session exposes.
    fn list_tools(&self) -> BoxFuture<'_, Result<Vec<ToolDefinition>>>;

    /// Execute a tool. A tool-level error is an `Err`, never an empty `Ok`.
    fn call_tool<'a>(
        &'a self,
        name: &'a str,
        args: serde_json::Map<String, serde_json::Value>,
    ) -> BoxFuture<'a, Result<ToolOutput>>;

    /// Release the session. Called exactly once by the owner.
    fn close(&self) -> BoxFuture<'_, Result<()>>;
}

/// Establishes tool sessions, one per workflow run.
pub trait ToolConnector: Send + Sync + 'static {
    fn connect(&self) -> BoxFuture<'_, Result<Box<dyn ToolSession>>>;
}

/// Structural checks on generated code.
pub trait CodeValidator: Send + Sync + 'static {
    /// `class_name` is the page object base name (without the `Page` suffix).
    fn validate(&self, kind: ArtifactKind, code: &str, class_name: &str) -> ValidationReport;
}

/// Destination for generated artifacts.
pub trait ArtifactSink: Send + Sync + 'static {
    fn write<'a>(&'a self, path: &'a Path, content: &'a str) -> BoxFuture<'a, Result<()>>;

    /// Read back a previously written artifact.
    fn read<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, Result<String>>;
}
