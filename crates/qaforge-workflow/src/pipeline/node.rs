use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::error;

use qaforge_core::error::Result;
use qaforge_core::traits::{AiResponder, ArtifactSink, CodeValidator, ToolSession};
use qaforge_core::EventBus;

use super::context::WorkflowContext;
use crate::nodes::{FixtureLoader, PomGenerator, SpecGenerator, StepRunner};

/// Collaborators every node may use, shared across the run.
#[derive(Clone)]
pub struct NodeServices {
    pub responder: Arc<dyn AiResponder>,
    /// Separate model for the refactoring pass. `None` disables the pass.
    pub optimizer: Option<Arc<dyn AiResponder>>,
    pub validator: Arc<dyn CodeValidator>,
    pub sink: Arc<dyn ArtifactSink>,
    pub events: Arc<EventBus>,
    pub cancel: CancellationToken,
}

impl NodeServices {
    pub fn new(
        responder: Arc<dyn AiResponder>,
        validator: Arc<dyn CodeValidator>,
        sink: Arc<dyn ArtifactSink>,
    ) -> Self {
        Self {
            responder,
            optimizer: None,
            validator,
            sink,
            events: Arc::new(EventBus::default()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_optimizer(mut self, optimizer: Arc<dyn AiResponder>) -> Self {
        self.optimizer = Some(optimizer);
        self
    }

    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }
}

/// A pipeline stage. The set is closed.
pub enum Node {
    FixtureLoader(FixtureLoader),
    StepRunner(StepRunner),
    PomGenerator(PomGenerator),
    SpecGenerator(SpecGenerator),
}

impl Node {
    pub fn fixture_loader(path: impl Into<PathBuf>) -> Self {
        Self::FixtureLoader(FixtureLoader::new(path))
    }

    pub fn step_runner(system_prompt: Option<String>, step_delay: Duration) -> Self {
        Self::StepRunner(StepRunner::new(system_prompt, step_delay))
    }

    pub fn pom_generator(pages_dir: impl Into<PathBuf>) -> Self {
        Self::PomGenerator(PomGenerator::new(pages_dir))
    }

    pub fn spec_generator(specs_dir: impl Into<PathBuf>) -> Self {
        Self::SpecGenerator(SpecGenerator::new(specs_dir))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::FixtureLoader(_) => "fixture_loader",
            Self::StepRunner(_) => "step_runner",
            Self::PomGenerator(_) => "pom_generator",
            Self::SpecGenerator(_) => "spec_generator",
        }
    }

    /// Run the node once.
    ///
    /// No-op when the context is already failed. Errors never escape: their
    /// message is recorded unchanged with `mark_failed`, and the node name
    /// goes to the log.
    pub async fn execute(
        &self,
        ctx: &mut WorkflowContext,
        session: &dyn ToolSession,
        services: &NodeServices,
    ) {
        if ctx.failed {
            return;
        }
        if let Err(e) = self.dispatch(ctx, session, services).await {
            error!(node = self.name(), error = %e, "Node failed");
            ctx.mark_failed(e.detail());
        }
    }

    async fn dispatch(
        &self,
        ctx: &mut WorkflowContext,
        session: &dyn ToolSession,
        services: &NodeServices,
    ) -> Result<()> {
        match self {
            Self::FixtureLoader(node) => node.run(ctx),
            Self::StepRunner(node) => node.run(ctx, session, services).await,
            Self::PomGenerator(node) => node.run(ctx, services).await,
            Self::SpecGenerator(node) => node.run(ctx, services).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_names() {
        let nodes = [
            Node::fixture_loader("a.md"),
            Node::step_runner(None, Duration::ZERO),
            Node::pom_generator("pages"),
            Node::spec_generator("specs"),
        ];
        let names: Vec<_> = nodes.iter().map(Node::name).collect();
        assert_eq!(
            names,
            vec!["fixture_loader", "step_runner", "pom_generator", "spec_generator"]
        );
    }

    #[tokio::test]
    async fn test_node_error_is_recorded_unwrapped() {
        use qaforge_core::traits::ToolConnector;
        use qaforge_test_utils::{
            fixture_dir, MemorySink, MockConnector, ScriptedResponder, ScriptedValidator,
        };

        let dir = fixture_dir(&[("empty.md", "# Nothing yet\n")]);
        let path = dir.path().join("empty.md");
        let session = MockConnector::new().connect().await.unwrap();
        let services = NodeServices::new(
            Arc::new(ScriptedResponder::new()),
            Arc::new(ScriptedValidator::new()),
            Arc::new(MemorySink::new()),
        );

        let mut ctx = WorkflowContext::new();
        Node::fixture_loader(&path)
            .execute(&mut ctx, session.as_ref(), &services)
            .await;

        assert!(ctx.failed);
        assert_eq!(
            ctx.error_message,
            Some(format!("{} is empty or contains no steps", path.display()))
        );
    }
}
