//! Linear workflow pipeline.
//!
//! A run is an ordered list of `Node`s sharing one `WorkflowContext` and one
//! tool session. The `WorkflowEngine` executes the nodes in order and stops
//! at the first node that marks the context failed.

pub mod context;
pub mod engine;
pub mod node;

pub use context::{CapturedImage, RecordedAction, WorkflowContext};
pub use engine::{ExecutionResult, NodeResult, WorkflowEngine};
pub use node::{Node, NodeServices};
