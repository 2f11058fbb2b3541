use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use qaforge_core::error::QaforgeError;
use qaforge_core::traits::ToolConnector;
use qaforge_core::types::WorkflowEvent;

use super::context::WorkflowContext;
use super::node::{Node, NodeServices};

/// Result of executing a single node.
#[derive(Debug, Clone)]
pub struct NodeResult {
    pub node: String,
    /// Whether the context was failed when the node returned.
    pub failed: bool,
    pub elapsed_ms: u64,
}

/// Result of a whole run.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub succeeded: bool,
    pub error: Option<String>,
    /// Per-node results in execution order. Nodes after a failure are absent.
    pub node_results: Vec<NodeResult>,
    /// Final state, including generated artifact paths.
    pub context: WorkflowContext,
    pub total_elapsed_ms: u64,
}

/// Runs an ordered list of nodes against one tool session.
///
/// Nodes run strictly one after another. The first node that marks the
/// context failed halts the run. The tool session is released exactly once
/// on every path, including a panic inside a node.
pub struct WorkflowEngine {
    nodes: Vec<Node>,
    connector: Arc<dyn ToolConnector>,
    services: NodeServices,
}

impl WorkflowEngine {
    pub fn new(connector: Arc<dyn ToolConnector>, services: NodeServices) -> Self {
        Self {
            nodes: Vec::new(),
            connector,
            services,
        }
    }

    /// Append a node to the pipeline.
    pub fn add_node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    /// Token that cancels the run at the next node or instruction boundary.
    pub fn cancel_token(&self) -> CancellationToken {
        self.services.cancel.clone()
    }

    pub async fn run(self) -> ExecutionResult {
        let start = Instant::now();
        let events = self.services.events.clone();
        let mut context = WorkflowContext::new();
        let mut node_results = Vec::new();

        let session = match self.connector.connect().await {
            Ok(session) => session,
            Err(e) => {
                error!(error = %e, "Failed to connect to automation server");
                context.mark_failed(e.detail());
                return finish(context, node_results, start, &events);
            }
        };

        info!(nodes = self.nodes.len(), "Starting workflow run");
        events.publish(WorkflowEvent::RunStarted {
            nodes: self.nodes.len(),
        });

        for node in &self.nodes {
            if self.services.cancel.is_cancelled() {
                context.mark_failed(QaforgeError::Cancelled.to_string());
                break;
            }

            let name = node.name();
            info!(node = name, "Executing node");
            events.publish(WorkflowEvent::NodeStarted {
                node: name.to_string(),
            });

            let node_start = Instant::now();
            let outcome = AssertUnwindSafe(node.execute(
                &mut context,
                session.as_ref(),
                &self.services,
            ))
            .catch_unwind()
            .await;

            if let Err(panic) = outcome {
                error!(node = name, "Node panicked");
                context.mark_failed(format!("{} panicked: {}", name, panic_message(&panic)));
            }

            let elapsed_ms = node_start.elapsed().as_millis() as u64;
            debug!(node = name, failed = context.failed, elapsed_ms, "Node complete");
            events.publish(WorkflowEvent::NodeFinished {
                node: name.to_string(),
                failed: context.failed,
                elapsed_ms,
            });
            node_results.push(NodeResult {
                node: name.to_string(),
                failed: context.failed,
                elapsed_ms,
            });

            if context.failed {
                warn!(
                    node = name,
                    error = context.error_message.as_deref().unwrap_or_default(),
                    "Workflow halted"
                );
                break;
            }
        }

        if let Err(e) = session.close().await {
            warn!(error = %e, "Failed to close tool session");
        }

        finish(context, node_results, start, &events)
    }
}

fn finish(
    context: WorkflowContext,
    node_results: Vec<NodeResult>,
    start: Instant,
    events: &qaforge_core::EventBus,
) -> ExecutionResult {
    let succeeded = !context.failed;
    let error = context.error_message.clone();
    if succeeded {
        info!("Workflow completed successfully");
    }
    events.publish(WorkflowEvent::RunFinished {
        succeeded,
        error: error.clone(),
    });
    ExecutionResult {
        succeeded,
        error,
        node_results,
        context,
        total_elapsed_ms: start.elapsed().as_millis() as u64,
    }
}

fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use qaforge_core::types::Intent;
    use qaforge_test_utils::{
        call, fixture_dir, MemorySink, MockConnector, ScriptedResponder, ScriptedValidator,
    };
    use serde_json::json;

    fn engine(connector: &Arc<MockConnector>, responder: Arc<ScriptedResponder>) -> WorkflowEngine {
        let services = NodeServices::new(
            responder,
            Arc::new(ScriptedValidator::new()),
            Arc::new(MemorySink::new()),
        );
        WorkflowEngine::new(connector.clone(), services)
    }

    #[tokio::test]
    async fn test_connect_failure_is_fatal_without_close() {
        let connector = Arc::new(MockConnector::failing());
        let state = connector.state();
        let result = engine(&connector, Arc::new(ScriptedResponder::new()))
            .add_node(Node::fixture_loader("missing.md"))
            .run()
            .await;

        assert!(!result.succeeded);
        assert_eq!(result.error.as_deref(), Some("connection refused"));
        assert!(result.node_results.is_empty());
        assert_eq!(state.close_count(), 0);
    }

    #[tokio::test]
    async fn test_halts_after_failing_node() {
        let dir = fixture_dir(&[("empty.md", "# nothing\n")]);
        let connector = Arc::new(MockConnector::new());
        let state = connector.state();
        let responder = Arc::new(ScriptedResponder::new());

        let result = engine(&connector, responder.clone())
            .add_node(Node::fixture_loader(dir.path().join("empty.md")))
            .add_node(Node::step_runner(None, Duration::ZERO))
            .run()
            .await;

        assert!(!result.succeeded);
        assert_eq!(result.node_results.len(), 1);
        assert!(result.node_results[0].failed);
        assert_eq!(responder.call_count(), 0);
        assert_eq!(state.close_count(), 1);
    }

    #[tokio::test]
    async fn test_panic_in_node_is_contained() {
        let dir = fixture_dir(&[("t.md", "- Click it\n")]);
        let connector = Arc::new(MockConnector::new().panic_on("click"));
        let state = connector.state();
        let responder = Arc::new(ScriptedResponder::with_intents(vec![call(
            "click",
            json!({"selector": "#x"}),
        )]));

        let result = engine(&connector, responder)
            .add_node(Node::fixture_loader(dir.path().join("t.md")))
            .add_node(Node::step_runner(None, Duration::ZERO))
            .run()
            .await;

        assert!(!result.succeeded);
        assert!(result.error.unwrap().contains("panicked"));
        assert_eq!(state.close_count(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_node() {
        let connector = Arc::new(MockConnector::new());
        let state = connector.state();
        let engine = engine(&connector, Arc::new(ScriptedResponder::new()))
            .add_node(Node::fixture_loader("unused.md"));
        engine.cancel_token().cancel();

        let result = engine.run().await;
        assert_eq!(result.error.as_deref(), Some("Workflow cancelled"));
        assert!(result.node_results.is_empty());
        assert_eq!(state.close_count(), 1);
    }

    #[tokio::test]
    async fn test_events_trace_the_run() {
        let dir = fixture_dir(&[("t.md", "- Say hi\n")]);
        let connector = Arc::new(MockConnector::new());
        let responder = Arc::new(ScriptedResponder::with_intents(vec![Intent::text("hi")]));
        let engine = engine(&connector, responder)
            .add_node(Node::fixture_loader(dir.path().join("t.md")))
            .add_node(Node::step_runner(None, Duration::ZERO));
        let mut rx = engine.services.events.subscribe();

        let result = engine.run().await;
        assert!(result.succeeded);

        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            seen.push(event);
        }
        assert!(matches!(seen.first(), Some(WorkflowEvent::RunStarted { nodes: 2 })));
        assert!(matches!(
            seen.last(),
            Some(WorkflowEvent::RunFinished { succeeded: true, .. })
        ));
        assert!(seen
            .iter()
            .any(|e| matches!(e, WorkflowEvent::ModelNote { text } if text == "hi")));
    }
}
