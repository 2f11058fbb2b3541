use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::error;

/// Test name used until the fixture loader derives one.
pub const UNKNOWN_TEST_NAME: &str = "UnknownTest";

/// A successful mutating browser action, kept for code generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedAction {
    /// Tool name, e.g. `click`.
    pub action: String,
    pub params: serde_json::Map<String, serde_json::Value>,
    /// The instruction that produced the action.
    pub description: String,
}

/// An image a tool returned during the run.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedImage {
    pub tool: String,
    pub instruction: String,
    pub bytes: Vec<u8>,
}

/// Shared state of one workflow run.
///
/// Owned by the engine and lent mutably to one node at a time. Apart from
/// `mark_failed`, nodes write fields directly.
#[derive(Debug, Clone)]
pub struct WorkflowContext {
    pub steps_queue: Vec<String>,
    pub recorded_history: Vec<RecordedAction>,
    pub captures: Vec<CapturedImage>,
    pub failed: bool,
    pub error_message: Option<String>,
    pub test_name: String,
    pub pom_class_name: Option<String>,
    pub pom_path: Option<PathBuf>,
    pub spec_path: Option<PathBuf>,
}

impl WorkflowContext {
    pub fn new() -> Self {
        Self {
            steps_queue: Vec::new(),
            recorded_history: Vec::new(),
            captures: Vec::new(),
            failed: false,
            error_message: None,
            test_name: UNKNOWN_TEST_NAME.to_string(),
            pom_class_name: None,
            pom_path: None,
            spec_path: None,
        }
    }

    /// Mark the run as failed. The first message sticks.
    pub fn mark_failed(&mut self, message: impl Into<String>) {
        if self.failed {
            return;
        }
        let mut message = message.into();
        if message.trim().is_empty() {
            message = "unknown error".to_string();
        }
        error!(error = %message, "Workflow failed");
        self.failed = true;
        self.error_message = Some(message);
    }

    /// `{title, steps}` payload the generators send to the model.
    pub fn steps_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "title": self.test_name,
            "steps": self.recorded_history,
        })
    }
}

impl Default for WorkflowContext {
    fn default() -> Self {
        Self::new()
    }
}
