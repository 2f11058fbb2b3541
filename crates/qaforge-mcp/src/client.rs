use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use rmcp::model::CallToolRequestParams;
use rmcp::service::RunningService;
use rmcp::transport::streamable_http_client::StreamableHttpClientTransport;
use rmcp::{RoleClient, ServiceExt};

use qaforge_core::config::{McpTransport, ServerConfig};
use qaforge_core::error::{QaforgeError, Result};
use qaforge_core::traits::{ToolConnector, ToolSession};
use qaforge_core::types::{ToolDefinition, ToolOutput};

use crate::convert::{tool_definition, tool_output, ContentPart};
use crate::handler::QaforgeClientHandler;

type McpConnection = RunningService<RoleClient, QaforgeClientHandler>;

/// One connection to the Playwright automation server.
///
/// The connection is taken out on `close`, so later calls fail with a
/// session error instead of reaching a dead transport.
pub struct McpToolSession {
    label: String,
    connection: Mutex<Option<McpConnection>>,
    tools: Mutex<Option<Vec<ToolDefinition>>>,
    tools_changed: Arc<AtomicBool>,
    timeout: Duration,
}

impl McpToolSession {
    /// Spawn or dial the automation server and complete the MCP handshake.
    pub async fn connect(config: &ServerConfig) -> Result<Self> {
        let tools_changed = Arc::new(AtomicBool::new(false));

        let (label, connection) = match &config.transport {
            McpTransport::Stdio { command, args, env } => {
                let label = format!("{} {}", command, args.join(" "));
                let handler = QaforgeClientHandler::new(&label, tools_changed.clone());

                let mut cmd = tokio::process::Command::new(command);
                cmd.args(args);
                for (k, v) in env {
                    cmd.env(k, v);
                }

                let transport = rmcp::transport::TokioChildProcess::new(cmd).map_err(|e| {
                    QaforgeError::Session(format!("Failed to spawn {}: {}", command, e))
                })?;

                let connection = handler.serve(transport).await.map_err(|e| {
                    QaforgeError::Session(format!(
                        "Failed to initialize MCP session with {}: {}",
                        label, e
                    ))
                })?;
                (label, connection)
            }
            McpTransport::Http { url } => {
                let handler = QaforgeClientHandler::new(url, tools_changed.clone());
                let transport = StreamableHttpClientTransport::from_uri(url.as_str());

                let connection =
                    <QaforgeClientHandler as ServiceExt<RoleClient>>::serve(handler, transport)
                        .await
                        .map_err(|e| {
                            QaforgeError::Session(format!("MCP init for '{}' failed: {}", url, e))
                        })?;
                (url.clone(), connection)
            }
        };

        info!(server = %label, "Automation server connected");

        Ok(Self {
            label,
            connection: Mutex::new(Some(connection)),
            tools: Mutex::new(None),
            tools_changed,
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    async fn fetch_tools(&self) -> Result<Vec<ToolDefinition>> {
        let conn = self.connection.lock().await;
        let client = conn
            .as_ref()
            .ok_or_else(|| QaforgeError::Session("session already closed".into()))?;

        let tools = client.list_all_tools().await.map_err(|e| {
            QaforgeError::Mcp(format!("Failed to list tools from '{}': {}", self.label, e))
        })?;

        debug!(server = %self.label, count = tools.len(), "Listed MCP tools");
        Ok(tools.iter().map(tool_definition).collect())
    }

    async fn call(
        &self,
        name: &str,
        args: serde_json::Map<String, serde_json::Value>,
    ) -> Result<ToolOutput> {
        let conn = self.connection.lock().await;
        let client = conn
            .as_ref()
            .ok_or_else(|| QaforgeError::Session("session already closed".into()))?;

        let params = CallToolRequestParams {
            name: name.to_string().into(),
            arguments: Some(args),
            meta: None,
            task: None,
        };

        debug!(server = %self.label, tool = %name, "Calling automation tool");

        let result = tokio::time::timeout(self.timeout, client.call_tool(params))
            .await
            .map_err(|_| QaforgeError::ToolTimeout {
                tool: name.to_string(),
                timeout_secs: self.timeout.as_secs(),
            })?
            .map_err(|e| QaforgeError::ToolExecution {
                tool: name.to_string(),
                message: e.to_string(),
            })?;

        let parts = result.content.iter().map(ContentPart::from).collect();
        tool_output(name, parts, result.is_error == Some(true))
    }
}

impl ToolSession for McpToolSession {
    fn list_tools(&self) -> BoxFuture<'_, Result<Vec<ToolDefinition>>> {
        Box::pin(async move {
            let stale = self.tools_changed.swap(false, Ordering::SeqCst);
            let mut cache = self.tools.lock().await;
            if let (Some(tools), false) = (cache.as_ref(), stale) {
                return Ok(tools.clone());
            }
            let tools = self.fetch_tools().await?;
            *cache = Some(tools.clone());
            Ok(tools)
        })
    }

    fn call_tool<'a>(
        &'a self,
        name: &'a str,
        args: serde_json::Map<String, serde_json::Value>,
    ) -> BoxFuture<'a, Result<ToolOutput>> {
        Box::pin(self.call(name, args))
    }

    fn close(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let taken = self.connection.lock().await.take();
            match taken {
                Some(mut connection) => {
                    if let Err(e) = connection.close().await {
                        warn!(server = %self.label, error = %e, "Automation server did not shut down cleanly");
                    }
                    info!(server = %self.label, "Automation server disconnected");
                }
                None => debug!(server = %self.label, "Session already closed"),
            }
            Ok(())
        })
    }
}

/// Opens a fresh `McpToolSession` per workflow run.
pub struct McpConnector {
    config: ServerConfig,
}

impl McpConnector {
    pub fn new(config: ServerConfig) -> Self {
        Self { config }
    }
}

impl ToolConnector for McpConnector {
    fn connect(&self) -> BoxFuture<'_, Result<Box<dyn ToolSession>>> {
        Box::pin(async move {
            let session = McpToolSession::connect(&self.config).await?;
            Ok(Box::new(session) as Box<dyn ToolSession>)
        })
    }
}
