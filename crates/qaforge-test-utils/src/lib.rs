//! Shared mocks and fixtures for qaforge tests.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use serde_json::{Map, Value};

use qaforge_core::config::{AppConfig, ModelConfig};
use qaforge_core::error::{QaforgeError, Result};
use qaforge_core::traits::*;
use qaforge_core::types::*;

/// Tool arguments, as passed to `call_tool`.
pub type Args = Map<String, Value>;

// ── LLM ──────────────────────────────────────────────────────────

/// An `LlmClient` that replays scripted delta sequences in order.
#[derive(Default)]
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<Result<Vec<StreamDelta>>>>,
    calls: AtomicU32,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_reply(&self, deltas: Vec<StreamDelta>) {
        self.replies.lock().unwrap().push_back(Ok(deltas));
    }

    pub fn push_text(&self, text: &str) {
        self.push_reply(vec![
            StreamDelta::TextDelta(text.to_string()),
            StreamDelta::Stop(StopReason::EndTurn),
        ]);
    }

    pub fn push_error(&self, err: QaforgeError) {
        self.replies.lock().unwrap().push_back(Err(err));
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl LlmClient for ScriptedLlm {
    fn chat_stream(
        &self,
        _config: &ModelConfig,
        _messages: Vec<ChatMessage>,
        _tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.replies.lock().unwrap().pop_front();
        Box::pin(async move {
            let deltas = next.unwrap_or_else(|| {
                Err(QaforgeError::LlmRequest("scripted LLM has no replies left".into()))
            })?;
            let stream = futures::stream::iter(deltas.into_iter().map(Ok));
            Ok(Box::pin(stream) as BoxStream<'_, Result<StreamDelta>>)
        })
    }
}

// ── Responder ────────────────────────────────────────────────────

type CallHook = Box<dyn Fn(usize) + Send + Sync>;

/// An `AiResponder` that returns queued intents and records what it was asked.
#[derive(Default)]
pub struct ScriptedResponder {
    queue: Mutex<VecDeque<Result<Intent>>>,
    histories: Mutex<Vec<Vec<ChatMessage>>>,
    tool_counts: Mutex<Vec<usize>>,
    hook: Option<CallHook>,
}

impl ScriptedResponder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_intents(intents: Vec<Intent>) -> Self {
        let responder = Self::new();
        for intent in intents {
            responder.push(intent);
        }
        responder
    }

    /// Run `hook` with the 1-based call number on every `respond`.
    pub fn on_call(mut self, hook: impl Fn(usize) + Send + Sync + 'static) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    pub fn push(&self, intent: Intent) {
        self.queue.lock().unwrap().push_back(Ok(intent));
    }

    pub fn push_error(&self, err: QaforgeError) {
        self.queue.lock().unwrap().push_back(Err(err));
    }

    pub fn call_count(&self) -> usize {
        self.histories.lock().unwrap().len()
    }

    /// Conversation snapshots, one per call.
    pub fn histories(&self) -> Vec<Vec<ChatMessage>> {
        self.histories.lock().unwrap().clone()
    }

    /// Number of tools offered on each call.
    pub fn tool_counts(&self) -> Vec<usize> {
        self.tool_counts.lock().unwrap().clone()
    }
}

impl AiResponder for ScriptedResponder {
    fn respond<'a>(
        &'a self,
        history: &'a [ChatMessage],
        tools: &'a [ToolDefinition],
    ) -> BoxFuture<'a, Result<Intent>> {
        let call = {
            let mut histories = self.histories.lock().unwrap();
            histories.push(history.to_vec());
            histories.len()
        };
        self.tool_counts.lock().unwrap().push(tools.len());
        if let Some(hook) = &self.hook {
            hook(call);
        }
        let next = self.queue.lock().unwrap().pop_front();
        Box::pin(async move {
            next.unwrap_or_else(|| {
                Err(QaforgeError::LlmRequest("scripted responder has no intents left".into()))
            })
        })
    }
}

// ── Tool session ─────────────────────────────────────────────────

/// State shared between a `MockConnector` and the sessions it hands out.
#[derive(Default)]
pub struct MockToolState {
    tools: Mutex<Vec<ToolDefinition>>,
    scripted: Mutex<HashMap<String, VecDeque<Result<ToolOutput>>>>,
    calls: Mutex<Vec<(String, Args)>>,
    panic_on: Mutex<Option<String>>,
    closes: AtomicU32,
    connects: AtomicU32,
}

impl MockToolState {
    /// Every `call_tool` seen, in order.
    pub fn calls(&self) -> Vec<(String, Args)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn close_count(&self) -> u32 {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn connect_count(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }
}

/// A scripted browser automation session.
///
/// Unscripted calls succeed with `"<name> ok"`.
pub struct MockToolSession {
    state: Arc<MockToolState>,
}

impl ToolSession for MockToolSession {
    fn list_tools(&self) -> BoxFuture<'_, Result<Vec<ToolDefinition>>> {
        let tools = self.state.tools.lock().unwrap().clone();
        Box::pin(async move { Ok(tools) })
    }

    fn call_tool<'a>(&'a self, name: &'a str, args: Args) -> BoxFuture<'a, Result<ToolOutput>> {
        Box::pin(async move {
            self.state
                .calls
                .lock()
                .unwrap()
                .push((name.to_string(), args));
            let should_panic = self.state.panic_on.lock().unwrap().as_deref() == Some(name);
            if should_panic {
                panic!("injected panic in tool '{}'", name);
            }
            let scripted = self
                .state
                .scripted
                .lock()
                .unwrap()
                .get_mut(name)
                .and_then(|q| q.pop_front());
            scripted.unwrap_or_else(|| Ok(ToolOutput::text(format!("{} ok", name))))
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<()>> {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }
}

/// Hands out `MockToolSession`s over one shared `MockToolState`.
#[derive(Default)]
pub struct MockConnector {
    state: Arc<MockToolState>,
    fail_connect: bool,
}

impl MockConnector {
    /// A connector whose sessions advertise the standard Playwright tools.
    pub fn new() -> Self {
        let connector = Self::default();
        *connector.state.tools.lock().unwrap() = playwright_tools();
        connector
    }

    pub fn failing() -> Self {
        Self {
            fail_connect: true,
            ..Self::default()
        }
    }

    pub fn state(&self) -> Arc<MockToolState> {
        self.state.clone()
    }

    /// Queue a result for the next call of `tool`.
    pub fn script(self, tool: &str, result: Result<ToolOutput>) -> Self {
        self.state
            .scripted
            .lock()
            .unwrap()
            .entry(tool.to_string())
            .or_default()
            .push_back(result);
        self
    }

    pub fn fail_tool(self, tool: &str, message: &str) -> Self {
        let err = QaforgeError::ToolExecution {
            tool: tool.to_string(),
            message: message.to_string(),
        };
        self.script(tool, Err(err))
    }

    pub fn panic_on(self, tool: &str) -> Self {
        *self.state.panic_on.lock().unwrap() = Some(tool.to_string());
        self
    }
}

impl ToolConnector for MockConnector {
    fn connect(&self) -> BoxFuture<'_, Result<Box<dyn ToolSession>>> {
        Box::pin(async move {
            if self.fail_connect {
                return Err(QaforgeError::Session("connection refused".into()));
            }
            self.state.connects.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(MockToolSession {
                state: self.state.clone(),
            }) as Box<dyn ToolSession>)
        })
    }
}

pub fn tool_def(name: &str) -> ToolDefinition {
    ToolDefinition {
        name: name.to_string(),
        description: format!("{} tool", name),
        input_schema: serde_json::json!({"type": "object", "properties": {}}),
    }
}

pub fn playwright_tools() -> Vec<ToolDefinition> {
    ["navigate", "click", "fill", "select_option", "press_key", "get_content", "screenshot"]
        .iter()
        .map(|n| tool_def(n))
        .collect()
}

/// Shorthand for a tool-call intent.
pub fn call(name: &str, args: Value) -> Intent {
    Intent::tool_call(name, args)
}

// ── Validator & sink ─────────────────────────────────────────────

/// A `CodeValidator` returning queued reports, then "valid".
#[derive(Default)]
pub struct ScriptedValidator {
    reports: Mutex<VecDeque<ValidationReport>>,
    calls: AtomicU32,
}

impl ScriptedValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reject(self, errors: &[&str]) -> Self {
        self.reports.lock().unwrap().push_back(ValidationReport::from_errors(
            errors.iter().map(|e| e.to_string()).collect(),
        ));
        self
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CodeValidator for ScriptedValidator {
    fn validate(&self, _kind: ArtifactKind, _code: &str, _class_name: &str) -> ValidationReport {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.reports
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| ValidationReport::from_errors(Vec::new()))
    }
}

/// An in-memory `ArtifactSink`.
#[derive(Default)]
pub struct MemorySink {
    files: Mutex<HashMap<PathBuf, String>>,
    writes: AtomicU32,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &Path) -> Option<String> {
        self.files.lock().unwrap().get(path).cloned()
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<_> = self.files.lock().unwrap().keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn write_count(&self) -> u32 {
        self.writes.load(Ordering::SeqCst)
    }
}

impl ArtifactSink for MemorySink {
    fn write<'a>(&'a self, path: &'a Path, content: &'a str) -> BoxFuture<'a, Result<()>> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.files
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), content.to_string());
        Box::pin(async { Ok(()) })
    }

    fn read<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, Result<String>> {
        let content = self.get(path);
        Box::pin(async move {
            content.ok_or_else(|| QaforgeError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                path.display().to_string(),
            )))
        })
    }
}

// ── Fixtures ─────────────────────────────────────────────────────

/// A temp directory holding the given `(file name, content)` pairs.
pub fn fixture_dir(files: &[(&str, &str)]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (name, content) in files {
        std::fs::write(dir.path().join(name), content).unwrap();
    }
    dir
}

/// A config with no step delay and paths rooted in `root`.
pub fn test_config(root: &Path) -> AppConfig {
    let mut config: AppConfig = toml::from_str(
        r#"
[model]
provider = "groq"
model_id = "test-model"

[workflow]
step_delay_ms = 0
"#,
    )
    .unwrap();
    config.workflow.fixtures_dir = root.join("fixtures");
    config.workflow.pages_dir = root.join("pages");
    config.workflow.specs_dir = root.join("specs");
    config.workflow.captures_dir = root.join("captures");
    config
}
