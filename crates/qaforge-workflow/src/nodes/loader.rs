use std::path::PathBuf;

use tracing::info;

use qaforge_core::error::{QaforgeError, Result};

use crate::fixture::{read_steps, test_name_from_path};
use crate::pipeline::context::WorkflowContext;

/// Loads the step list from a Markdown fixture.
pub struct FixtureLoader {
    path: PathBuf,
}

impl FixtureLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub(crate) fn run(&self, ctx: &mut WorkflowContext) -> Result<()> {
        info!(path = %self.path.display(), "Loading test scenario");

        let steps = read_steps(&self.path)?;
        if steps.is_empty() {
            return Err(QaforgeError::Fixture(format!(
                "{} is empty or contains no steps",
                self.path.display()
            )));
        }

        info!(steps = steps.len(), "Scenario loaded");
        ctx.steps_queue = steps;
        ctx.test_name = test_name_from_path(&self.path);
        Ok(())
    }
}
