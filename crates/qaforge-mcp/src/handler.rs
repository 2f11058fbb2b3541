use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use rmcp::handler::client::ClientHandler;
use rmcp::model::*;
use rmcp::service::{NotificationContext, RequestContext};
use rmcp::ErrorData as McpError;
use rmcp::RoleClient;

/// Client-side handler for automation server notifications.
///
/// Server log and progress notifications are forwarded to `tracing`. A
/// tools/list_changed notification raises `tools_changed` so the session
/// refreshes its cached catalogue on the next `list_tools`.
pub struct QaforgeClientHandler {
    server_label: String,
    tools_changed: Arc<AtomicBool>,
}

impl QaforgeClientHandler {
    pub fn new(server_label: &str, tools_changed: Arc<AtomicBool>) -> Self {
        Self {
            server_label: server_label.to_string(),
            tools_changed,
        }
    }
}

#[allow(clippy::manual_async_fn)]
impl ClientHandler for QaforgeClientHandler {
    fn on_tool_list_changed(
        &self,
        _ctx: NotificationContext<RoleClient>,
    ) -> impl Future<Output = ()> + Send + '_ {
        async {
            debug!(server = %self.server_label, "MCP tools/list_changed notification");
            self.tools_changed.store(true, Ordering::SeqCst);
        }
    }

    fn on_logging_message(
        &self,
        params: LoggingMessageNotificationParam,
        _ctx: NotificationContext<RoleClient>,
    ) -> impl Future<Output = ()> + Send + '_ {
        async move {
            let level = format!("{:?}", params.level);
            debug!(server = %self.server_label, level = %level, "Automation server: {}", params.data);
        }
    }

    fn on_progress(
        &self,
        params: ProgressNotificationParam,
        _ctx: NotificationContext<RoleClient>,
    ) -> impl Future<Output = ()> + Send + '_ {
        async move {
            debug!(
                server = %self.server_label,
                progress = params.progress,
                total = ?params.total,
                message = ?params.message,
                "MCP progress"
            );
        }
    }

    fn create_message(
        &self,
        _params: CreateMessageRequestParams,
        _ctx: RequestContext<RoleClient>,
    ) -> impl Future<Output = Result<CreateMessageResult, McpError>> + Send + '_ {
        async {
            warn!(server = %self.server_label, "Server requested sampling, which qaforge does not offer");
            Err(McpError::method_not_found::<CreateMessageRequestMethod>())
        }
    }

    fn get_info(&self) -> ClientInfo {
        ClientInfo {
            meta: None,
            protocol_version: Default::default(),
            capabilities: ClientCapabilities::default(),
            client_info: Implementation {
                name: "qaforge".into(),
                title: None,
                version: env!("CARGO_PKG_VERSION").into(),
                description: None,
                icons: None,
                website_url: None,
            },
        }
    }
}
