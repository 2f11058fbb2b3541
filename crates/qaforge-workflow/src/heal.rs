//! Run a generated spec and repair its page object between failed runs.

use std::path::Path;
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{info, warn};

use qaforge_core::error::{QaforgeError, Result};
use qaforge_core::traits::{AiResponder, ArtifactSink, CodeValidator};
use qaforge_core::types::{ArtifactKind, ChatMessage};

use crate::nodes::ask_for_code;
use crate::report::TestSummary;

/// Characters of failure output handed to the model.
const MAX_LOG_CHARS: usize = 4000;

/// One execution of a Playwright spec.
#[derive(Debug, Clone, Default)]
pub struct TestRun {
    pub passed: bool,
    /// Parsed JSON report, when the runner produced one.
    pub summary: Option<TestSummary>,
    /// Failure output used as healing context.
    pub log: String,
}

/// Executes a generated spec.
pub trait TestRunner: Send + Sync {
    fn run<'a>(&'a self, spec: &'a Path) -> BoxFuture<'a, Result<TestRun>>;
}

#[derive(Debug, Clone)]
pub struct HealOutcome {
    pub passed: bool,
    pub runs: u32,
    /// Page object rewrites that were applied.
    pub heals: u32,
    pub last: TestRun,
}

/// Bounded run/heal loop over one spec and its page object.
pub struct SelfHealer {
    responder: Arc<dyn AiResponder>,
    validator: Arc<dyn CodeValidator>,
    sink: Arc<dyn ArtifactSink>,
    max_runs: u32,
}

impl SelfHealer {
    pub fn new(
        responder: Arc<dyn AiResponder>,
        validator: Arc<dyn CodeValidator>,
        sink: Arc<dyn ArtifactSink>,
    ) -> Self {
        Self {
            responder,
            validator,
            sink,
            max_runs: 2,
        }
    }

    /// Total spec runs, including the first. Clamped to at least 1.
    pub fn with_max_runs(mut self, max_runs: u32) -> Self {
        self.max_runs = max_runs.max(1);
        self
    }

    /// Run `spec` until it passes or the run budget is spent, healing the
    /// page object at `pom` after every failed run but the last.
    ///
    /// A heal that fails or does not validate ends the loop early with the
    /// page object left as it was.
    pub async fn run(
        &self,
        runner: &dyn TestRunner,
        spec: &Path,
        pom: &Path,
        class_name: &str,
    ) -> Result<HealOutcome> {
        let mut heals = 0;
        let mut runs = 0;
        loop {
            runs += 1;
            info!(run = runs, max_runs = self.max_runs, spec = %spec.display(), "Running generated test");
            let last = runner.run(spec).await?;

            if last.passed || runs >= self.max_runs {
                if last.passed {
                    info!(run = runs, heals, "Generated test passed");
                } else {
                    warn!(runs, heals, "Generated test still failing");
                }
                return Ok(HealOutcome {
                    passed: last.passed,
                    runs,
                    heals,
                    last,
                });
            }

            warn!(run = runs, "Generated test failed, healing page object");
            if let Err(e) = self.heal(pom, class_name, &last.log).await {
                warn!(pom = %pom.display(), error = %e, "Healing failed");
                return Ok(HealOutcome {
                    passed: false,
                    runs,
                    heals,
                    last,
                });
            }
            heals += 1;
        }
    }

    async fn heal(&self, pom: &Path, class_name: &str, log: &str) -> Result<()> {
        let code = self.sink.read(pom).await?;
        let prompt = healer_prompt(tail(log, MAX_LOG_CHARS), &code);
        let fixed = ask_for_code(self.responder.as_ref(), vec![ChatMessage::user(prompt)]).await?;

        let report = self.validator.validate(ArtifactKind::Pom, &fixed, class_name);
        if !report.valid {
            return Err(QaforgeError::Validation(report.errors.join("; ")));
        }

        self.sink.write(pom, &fixed).await?;
        info!(pom = %pom.display(), "Page object healed");
        Ok(())
    }
}

fn healer_prompt(error_log: &str, code: &str) -> String {
    format!(
        r#"Fix Playwright selector errors in this Page Object Model.
ERROR:
{error_log}
CODE:
{code}
Task: Update the failing selectors to robust text or accessibility locators (getByRole, getByText, getByLabel). Keep the class name, constructor and method signatures.
RETURN ONLY THE FULL FIXED TYPESCRIPT CODE."#,
        error_log = error_log,
        code = code
    )
}

/// The last `max` characters of `text`.
fn tail(text: &str, max: usize) -> &str {
    let count = text.chars().count();
    if count <= max {
        return text;
    }
    let start = text
        .char_indices()
        .nth(count - max)
        .map_or(0, |(i, _)| i);
    &text[start..]
}
