use serde::{Deserialize, Serialize};

/// Role in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    /// The model's own turns ("model" in Gemini terms).
    Assistant,
}

/// A single role-tagged turn of the conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: text.into(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: text.into(),
        }
    }

    pub fn text(&self) -> &str {
        &self.content
    }
}

/// Stop reason from the LLM.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
}

/// A streaming delta from the LLM.
#[derive(Debug, Clone)]
pub enum StreamDelta {
    /// A chunk of text content.
    TextDelta(String),

    /// Start of a tool use block.
    ToolUseStart {
        index: usize,
        id: String,
        name: String,
    },

    /// A chunk of tool use input JSON.
    ToolInputDelta { index: usize, delta: String },

    /// The response is complete.
    Stop(StopReason),

    /// Usage information.
    Usage {
        input_tokens: u64,
        output_tokens: u64,
    },
}

/// The normalized classification of a model reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    /// No action; carries an observation or comment.
    Text(String),
    /// A single proposed tool call.
    ToolCall {
        name: String,
        args: serde_json::Map<String, serde_json::Value>,
    },
}

impl Intent {
    pub fn tool_call(name: impl Into<String>, args: serde_json::Value) -> Self {
        let args = match args {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        Self::ToolCall {
            name: name.into(),
            args,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }
}

/// Tool definition as advertised by the automation session and sent to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Normalized result of a successful tool call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolOutput {
    pub text: String,
    /// Raw image bytes when the tool returned an embedded image payload.
    pub image: Option<Vec<u8>>,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            image: None,
        }
    }

    pub fn with_image(mut self, bytes: Vec<u8>) -> Self {
        self.image = Some(bytes);
        self
    }
}

/// Kind of generated source artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    /// Page object model class.
    Pom,
    /// Test spec file.
    Spec,
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pom => write!(f, "POM"),
            Self::Spec => write!(f, "Spec"),
        }
    }
}

/// Outcome of a structural check on generated code.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn from_errors(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }
}

/// Workflow progress event broadcast to all subscribers.
#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    /// Engine acquired the tool session and is about to run nodes.
    RunStarted { nodes: usize },
    /// A node started executing.
    NodeStarted { node: String },
    /// A node returned.
    NodeFinished {
        node: String,
        failed: bool,
        elapsed_ms: u64,
    },
    /// Step runner began an instruction.
    StepStarted {
        index: usize,
        total: usize,
        instruction: String,
    },
    /// The model answered with text instead of an action.
    ModelNote { text: String },
    /// A tool call is being issued.
    ToolStart {
        name: String,
        args: serde_json::Value,
    },
    /// A tool call returned successfully.
    ToolEnd { name: String, preview: String },
    /// A mutating action was appended to the recorded history.
    ActionRecorded { action: String },
    /// A generated artifact was written.
    ArtifactWritten {
        kind: ArtifactKind,
        path: String,
        valid: bool,
    },
    /// The run finished.
    RunFinished {
        succeeded: bool,
        error: Option<String>,
    },
}
