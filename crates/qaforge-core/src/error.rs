use thiserror::Error;

#[derive(Debug, Error)]
pub enum QaforgeError {
    // LLM errors
    #[error("LLM request failed: {0}")]
    LlmRequest(String),

    #[error("LLM streaming error: {0}")]
    LlmStream(String),

    #[error("LLM rate limit: {0}")]
    RateLimited(String),

    #[error("LLM rate limit persisted after {attempts} attempts: {message}")]
    RateLimitExhausted { attempts: u32, message: String },

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    // Tool errors
    #[error("Tool execution failed: {tool}: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("Tool timeout after {timeout_secs}s: {tool}")]
    ToolTimeout { tool: String, timeout_secs: u64 },

    // Session errors
    #[error("Tool session error: {0}")]
    Session(String),

    // MCP errors
    #[error("MCP error: {0}")]
    Mcp(String),

    // Workflow errors
    #[error("Fixture error: {0}")]
    Fixture(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Workflow cancelled")]
    Cancelled,

    #[error("Artifact write failed: {path}: {message}")]
    ArtifactWrite { path: String, message: String },

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QaforgeError {
    /// Whether the error is a provider-side rate limit that may clear after a wait.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }

    /// The underlying message without the category prefix.
    ///
    /// Tool failures yield exactly what the tool reported. Variants whose
    /// text is built from several fields keep their full `Display` form.
    pub fn detail(&self) -> String {
        match self {
            Self::LlmRequest(m)
            | Self::LlmStream(m)
            | Self::RateLimited(m)
            | Self::ModelNotFound(m)
            | Self::Session(m)
            | Self::Mcp(m)
            | Self::Fixture(m)
            | Self::Validation(m)
            | Self::Config(m) => m.clone(),
            Self::ToolExecution { message, .. } => message.clone(),
            Self::Io(e) => e.to_string(),
            Self::Json(e) => e.to_string(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, QaforgeError>;
