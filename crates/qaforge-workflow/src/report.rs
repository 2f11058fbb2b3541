//! Summaries of Playwright JSON reporter output.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use qaforge_core::error::Result;

/// File the JSON reporter writes into the server directory.
pub const RESULTS_FILE: &str = "test-results.json";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TestSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub failures: Vec<TestFailure>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TestFailure {
    pub title: String,
    pub file: String,
    /// Error text with ANSI colour codes removed.
    pub message: String,
}

impl TestSummary {
    pub fn all_passed(&self) -> bool {
        self.total > 0 && self.failed == 0
    }
}

/// Read and summarize a Playwright JSON report.
pub fn parse_test_results(path: &Path) -> Result<TestSummary> {
    let content = std::fs::read_to_string(path)?;
    let report: Value = serde_json::from_str(&content)?;
    Ok(summarize(&report))
}

/// Walk suites recursively. Each spec counts once, by the final result of
/// its first test (later results are retries).
pub fn summarize(report: &Value) -> TestSummary {
    let mut summary = TestSummary::default();
    for suite in array(report, "suites") {
        walk_suite(suite, "", &mut summary);
    }
    summary
}

fn walk_suite(suite: &Value, parent_file: &str, summary: &mut TestSummary) {
    let file = suite
        .get("file")
        .and_then(Value::as_str)
        .unwrap_or(parent_file);

    for spec in array(suite, "specs") {
        let Some(test) = array(spec, "tests").first() else {
            continue;
        };
        let Some(result) = array(test, "results").last() else {
            continue;
        };

        summary.total += 1;
        let status = result.get("status").and_then(Value::as_str).unwrap_or("");
        match status {
            "passed" => summary.passed += 1,
            "skipped" => summary.skipped += 1,
            _ => {
                summary.failed += 1;
                summary.failures.push(TestFailure {
                    title: spec
                        .get("title")
                        .and_then(Value::as_str)
                        .unwrap_or("untitled")
                        .to_string(),
                    file: spec
                        .get("file")
                        .and_then(Value::as_str)
                        .unwrap_or(file)
                        .to_string(),
                    message: strip_ansi(&error_message(result, status)),
                });
            }
        }
    }

    for child in array(suite, "suites") {
        walk_suite(child, file, summary);
    }
}

fn array<'a>(value: &'a Value, key: &str) -> &'a [Value] {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn error_message(result: &Value, status: &str) -> String {
    result
        .get("error")
        .and_then(|e| e.get("message"))
        .or_else(|| array(result, "errors").first().and_then(|e| e.get("message")))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("test ended with status '{}'", status))
}

/// Remove ANSI escape sequences.
pub fn strip_ansi(text: &str) -> String {
    static ANSI: OnceLock<Option<Regex>> = OnceLock::new();
    match ANSI.get_or_init(|| Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]").ok()) {
        Some(re) => re.replace_all(text, "").into_owned(),
        None => text.to_string(),
    }
}
