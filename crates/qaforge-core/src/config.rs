use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{QaforgeError, Result};

/// Top-level qaforge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub model: ModelConfig,
    /// Model used for the optional refactoring pass over generated code.
    #[serde(default)]
    pub optimizer_model: Option<ModelConfig>,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub extra_headers: HashMap<String, String>,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

fn default_provider() -> String { "gemini".to_string() }
fn default_max_tokens() -> u32 { 8192 }
fn default_temperature() -> f32 { 0.0 }

impl ModelConfig {
    /// Build a model config for `provider` from the environment.
    ///
    /// Model names come from `GEMINI_MODEL_NAME` / `OPENAI_MODEL_NAME` /
    /// `GROQ_MODEL_NAME`, keys from `GOOGLE_API_KEY` / `OPENAI_API_KEY` /
    /// `GROQ_API_KEY`.
    pub fn from_env(provider: &str, model_id: Option<&str>) -> Self {
        let (model_var, model_default, key_var) = match provider {
            "gemini" | "google" => ("GEMINI_MODEL_NAME", "gemini-1.5-flash", "GOOGLE_API_KEY"),
            "groq" => ("GROQ_MODEL_NAME", "llama-3.3-70b-versatile", "GROQ_API_KEY"),
            _ => ("OPENAI_MODEL_NAME", "gpt-4o", "OPENAI_API_KEY"),
        };
        let model_id = model_id
            .map(str::to_string)
            .or_else(|| std::env::var(model_var).ok())
            .unwrap_or_else(|| model_default.to_string());

        Self {
            provider: provider.to_string(),
            model_id,
            api_key: std::env::var(key_var).ok(),
            base_url: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            extra_headers: HashMap::new(),
            retry: None,
        }
    }

    /// Retry settings, falling back to defaults.
    pub fn retry_config(&self) -> RetryConfig {
        self.retry.clone().unwrap_or_default()
    }
}

/// How the wait between rate-limited attempts grows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// `initial_backoff_ms * attempt`.
    #[default]
    Linear,
    /// `initial_backoff_ms * 2^(attempt - 1)`.
    Exponential,
}

/// Retry configuration for rate-limited LLM requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub strategy: BackoffStrategy,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            strategy: BackoffStrategy::default(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_max_attempts() -> u32 { 5 }
fn default_initial_backoff() -> u64 { 10_000 }
fn default_max_backoff() -> u64 { 300_000 }

/// Browser automation server connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_transport")]
    pub transport: McpTransport,
    /// Per-tool-call timeout in seconds. Default: 120.
    #[serde(default = "default_tool_timeout")]
    pub timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transport: default_transport(),
            timeout_secs: default_tool_timeout(),
        }
    }
}

fn default_transport() -> McpTransport {
    McpTransport::Stdio {
        command: "npx".to_string(),
        args: vec![
            "tsx".to_string(),
            "../playwright-server/src/index.ts".to_string(),
        ],
        env: HashMap::new(),
    }
}

fn default_tool_timeout() -> u64 { 120 }

/// MCP transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum McpTransport {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
    },
    #[serde(alias = "sse")]
    Http {
        url: String,
    },
}

/// Workflow paths and knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    #[serde(default = "default_fixtures_dir")]
    pub fixtures_dir: PathBuf,
    #[serde(default = "default_server_dir")]
    pub server_dir: PathBuf,
    #[serde(default = "default_pages_dir")]
    pub pages_dir: PathBuf,
    #[serde(default = "default_specs_dir")]
    pub specs_dir: PathBuf,
    /// Where screenshots captured during the run are saved.
    #[serde(default = "default_captures_dir")]
    pub captures_dir: PathBuf,
    /// Pause between step-runner instructions. 0 disables it.
    #[serde(default = "default_step_delay")]
    pub step_delay_ms: u64,
    /// Playwright runs allowed for a generated spec. The page object is
    /// healed between failed runs. 1 disables healing.
    #[serde(default = "default_test_runs")]
    pub test_runs: u32,
    /// Run the refactoring pass after each artifact is written.
    #[serde(default)]
    pub optimize: bool,
    /// Opening instruction for the step runner's conversation.
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            fixtures_dir: default_fixtures_dir(),
            server_dir: default_server_dir(),
            pages_dir: default_pages_dir(),
            specs_dir: default_specs_dir(),
            captures_dir: default_captures_dir(),
            step_delay_ms: default_step_delay(),
            test_runs: default_test_runs(),
            optimize: false,
            system_prompt: None,
        }
    }
}

fn default_fixtures_dir() -> PathBuf { PathBuf::from("../playwright-server/fixture/tests") }
fn default_server_dir() -> PathBuf { PathBuf::from("../playwright-server") }
fn default_pages_dir() -> PathBuf { PathBuf::from("../playwright-server/tests/pages") }
fn default_specs_dir() -> PathBuf { PathBuf::from("../playwright-server/tests/specs") }
fn default_captures_dir() -> PathBuf { PathBuf::from("../playwright-server/test-captures") }
fn default_step_delay() -> u64 { 1000 }
fn default_test_runs() -> u32 { 2 }

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| QaforgeError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        toml::from_str(&expanded).map_err(|e| QaforgeError::Config(e.to_string()))
    }

    /// Build a config from the environment alone (`AI_PROVIDER`, model and key variables).
    pub fn from_env() -> Self {
        let provider = std::env::var("AI_PROVIDER").unwrap_or_else(|_| default_provider());
        Self {
            model: ModelConfig::from_env(&provider, None),
            optimizer_model: None,
            server: ServerConfig::default(),
            workflow: WorkflowConfig::default(),
        }
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TEST_QAFORGE_VAR", "hello");
        let result = expand_env_vars("key = \"${TEST_QAFORGE_VAR}\"");
        assert_eq!(result, "key = \"hello\"");
        std::env::remove_var("TEST_QAFORGE_VAR");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("key = \"${NONEXISTENT_QAFORGE_VAR}\"");
        assert_eq!(result, "key = \"${NONEXISTENT_QAFORGE_VAR}\"");
    }

    #[test]
    fn test_defaults_from_minimal_toml() {
        let toml_str = r#"
[model]
model_id = "gemini-1.5-flash"
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.model.provider, "gemini");
        assert!(config.optimizer_model.is_none());
        assert_eq!(config.workflow.step_delay_ms, 1000);
        assert_eq!(config.workflow.test_runs, 2);
        assert!(!config.workflow.optimize);
        assert_eq!(config.server.timeout_secs, 120);
        assert!(matches!(
            config.server.transport,
            McpTransport::Stdio { ref command, .. } if command == "npx"
        ));

        let retry = config.model.retry_config();
        assert_eq!(retry.max_attempts, 5);
        assert_eq!(retry.strategy, BackoffStrategy::Linear);
        assert_eq!(retry.initial_backoff_ms, 10_000);
    }

    #[test]
    fn test_http_transport_accepts_sse_alias() {
        let toml_str = r#"
[model]
model_id = "gpt-4o"
provider = "openai"

[server.transport]
type = "sse"
url = "http://localhost:8931/mcp"
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        match config.server.transport {
            McpTransport::Http { url } => assert_eq!(url, "http://localhost:8931/mcp"),
            other => panic!("unexpected transport: {:?}", other),
        }
    }

    #[test]
    fn test_model_from_env_explicit_model_wins() {
        let model = ModelConfig::from_env("groq", Some("mixtral-8x7b"));
        assert_eq!(model.provider, "groq");
        assert_eq!(model.model_id, "mixtral-8x7b");
        assert!(model.base_url.is_none());
    }
}
