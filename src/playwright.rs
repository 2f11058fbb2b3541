use std::path::{Path, PathBuf};
use std::process::Stdio;

use futures::future::BoxFuture;
use tracing::{info, warn};

use qaforge_core::error::Result;
use qaforge_workflow::report::RESULTS_FILE;
use qaforge_workflow::{parse_test_results, TestRun, TestRunner, TestSummary};

/// Runs `npx playwright test` in the automation server directory.
pub struct PlaywrightRunner {
    server_dir: PathBuf,
}

impl PlaywrightRunner {
    pub fn new(server_dir: impl Into<PathBuf>) -> Self {
        Self {
            server_dir: server_dir.into(),
        }
    }

    /// Run every spec in the server directory.
    pub async fn run_all(&self) -> Result<TestRun> {
        self.execute(None).await
    }

    async fn execute(&self, spec: Option<&Path>) -> Result<TestRun> {
        let mut cmd = tokio::process::Command::new("npx");
        cmd.args(["playwright", "test"]);
        if let Some(spec) = spec {
            // the spec path is relative to our cwd, not the server directory
            let spec = tokio::fs::canonicalize(spec)
                .await
                .unwrap_or_else(|_| spec.to_path_buf());
            cmd.arg(spec);
        }
        info!(dir = %self.server_dir.display(), "Running Playwright tests");

        let output = cmd
            .arg("--reporter=json,html")
            .current_dir(&self.server_dir)
            .env("PLAYWRIGHT_JSON_OUTPUT_NAME", RESULTS_FILE)
            .env("PLAYWRIGHT_HTML_OPEN", "never")
            .env("PW_TEST_HTML_REPORT_OPEN", "never")
            .stdin(Stdio::null())
            .output()
            .await?;

        let passed = output.status.success();
        if !passed {
            warn!(code = ?output.status.code(), "Playwright exited with failures");
        }

        let summary = match parse_test_results(&self.server_dir.join(RESULTS_FILE)) {
            Ok(summary) => Some(summary),
            Err(e) => {
                warn!(error = %e, "No Playwright JSON results");
                None
            }
        };

        let mut log = summary
            .as_ref()
            .map(|s| {
                s.failures
                    .iter()
                    .map(|f| format!("{} ({}):\n{}", f.title, f.file, f.message))
                    .collect::<Vec<_>>()
                    .join("\n\n")
            })
            .unwrap_or_default();
        if log.is_empty() && !passed {
            log = String::from_utf8_lossy(&output.stderr).into_owned();
        }

        Ok(TestRun {
            passed,
            summary,
            log,
        })
    }
}

impl TestRunner for PlaywrightRunner {
    fn run<'a>(&'a self, spec: &'a Path) -> BoxFuture<'a, Result<TestRun>> {
        Box::pin(self.execute(Some(spec)))
    }
}

pub fn print_summary(summary: &TestSummary) {
    println!(
        "\nTests: {} total, {} passed, {} failed, {} skipped",
        summary.total, summary.passed, summary.failed, summary.skipped
    );
    for failure in &summary.failures {
        println!("\n  FAIL {} ({})", failure.title, failure.file);
        for line in failure.message.lines().take(10) {
            println!("    {}", line);
        }
    }
}

pub fn print_run(run: &TestRun) {
    match &run.summary {
        Some(summary) => print_summary(summary),
        None if !run.log.is_empty() => {
            let lines: Vec<&str> = run.log.lines().collect();
            let start = lines.len().saturating_sub(20);
            for line in &lines[start..] {
                eprintln!("  {}", line);
            }
        }
        None => {}
    }
}
