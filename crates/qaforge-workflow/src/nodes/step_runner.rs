use std::time::Duration;

use tracing::{debug, error, info};

use qaforge_core::error::{QaforgeError, Result};
use qaforge_core::traits::ToolSession;
use qaforge_core::types::{ChatMessage, Intent, WorkflowEvent};

use crate::pipeline::context::{CapturedImage, RecordedAction, WorkflowContext};
use crate::pipeline::node::NodeServices;

/// Opening turn of the step runner's conversation.
pub const DEFAULT_AGENT_PROMPT: &str =
    "You are a QA Automation Agent. Execute the test steps precisely using the provided tools.";

/// Tools whose successful calls are replayed by the generated page object.
///
/// Inspection tools (page content, screenshots) are never recorded.
pub const RECORDABLE_ACTIONS: &[&str] = &[
    "navigate",
    "click",
    "fill",
    "selectOption",
    "select_option",
    "press",
    "press_key",
];

pub fn is_recordable(tool: &str) -> bool {
    RECORDABLE_ACTIONS.contains(&tool)
}

/// Drives the browser through each instruction with the model choosing tools.
pub struct StepRunner {
    system_prompt: Option<String>,
    step_delay: Duration,
}

impl StepRunner {
    pub fn new(system_prompt: Option<String>, step_delay: Duration) -> Self {
        Self {
            system_prompt,
            step_delay,
        }
    }

    pub(crate) async fn run(
        &self,
        ctx: &mut WorkflowContext,
        session: &dyn ToolSession,
        services: &NodeServices,
    ) -> Result<()> {
        let tools = session.list_tools().await?;
        debug!(tools = tools.len(), "Fetched automation tools");

        let mut history = vec![ChatMessage::user(
            self.system_prompt.as_deref().unwrap_or(DEFAULT_AGENT_PROMPT),
        )];

        let steps = ctx.steps_queue.clone();
        let total = steps.len();

        for (i, step) in steps.iter().enumerate() {
            if ctx.failed {
                break;
            }
            if services.cancel.is_cancelled() {
                ctx.mark_failed(QaforgeError::Cancelled.to_string());
                break;
            }

            info!(step = i + 1, total, instruction = %step, "Executing step");
            services.events.publish(WorkflowEvent::StepStarted {
                index: i,
                total,
                instruction: step.clone(),
            });
            history.push(ChatMessage::user(format!("Execute this step: {}", step)));

            let intent = match services.responder.respond(&history, &tools).await {
                Ok(intent) => intent,
                Err(e) => {
                    error!(step = i + 1, instruction = %step, error = %e, "Model request failed");
                    ctx.mark_failed(e.detail());
                    break;
                }
            };

            match intent {
                Intent::Text(text) => {
                    info!(note = %text, "Model note");
                    services
                        .events
                        .publish(WorkflowEvent::ModelNote { text: text.clone() });
                    history.push(ChatMessage::assistant(text));
                }
                Intent::ToolCall { name, args } => {
                    info!(tool = %name, args = %serde_json::Value::Object(args.clone()), "Model action");
                    services.events.publish(WorkflowEvent::ToolStart {
                        name: name.clone(),
                        args: serde_json::Value::Object(args.clone()),
                    });

                    let output = match session.call_tool(&name, args.clone()).await {
                        Ok(output) => output,
                        Err(e) => {
                            error!(
                                step = i + 1,
                                instruction = %step,
                                tool = %name,
                                error = %e,
                                "Tool call failed"
                            );
                            ctx.mark_failed(e.detail());
                            break;
                        }
                    };

                    services.events.publish(WorkflowEvent::ToolEnd {
                        name: name.clone(),
                        preview: preview(&output.text),
                    });

                    if is_recordable(&name) {
                        ctx.recorded_history.push(RecordedAction {
                            action: name.clone(),
                            params: args,
                            description: step.clone(),
                        });
                        services
                            .events
                            .publish(WorkflowEvent::ActionRecorded { action: name.clone() });
                    }

                    if let Some(bytes) = output.image {
                        debug!(tool = %name, bytes = bytes.len(), "Kept image capture");
                        ctx.captures.push(CapturedImage {
                            tool: name.clone(),
                            instruction: step.clone(),
                            bytes,
                        });
                    }

                    history.push(ChatMessage::assistant(format!("I am calling {}.", name)));
                    history.push(ChatMessage::user(format!(
                        "Tool '{}' returned: {}",
                        name, output.text
                    )));
                }
            }

            if !self.step_delay.is_zero() && i + 1 < total {
                tokio::select! {
                    _ = tokio::time::sleep(self.step_delay) => {}
                    _ = services.cancel.cancelled() => {}
                }
            }
        }

        Ok(())
    }
}

fn preview(text: &str) -> String {
    let mut preview: String = text.chars().take(100).collect();
    if text.chars().nth(100).is_some() {
        preview.push_str("...");
    }
    preview
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use qaforge_core::traits::ToolConnector;
    use qaforge_core::types::{Role, ToolOutput};
    use qaforge_test_utils::{call, MemorySink, MockConnector, ScriptedResponder, ScriptedValidator};
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    fn services(responder: Arc<ScriptedResponder>) -> NodeServices {
        NodeServices::new(
            responder,
            Arc::new(ScriptedValidator::new()),
            Arc::new(MemorySink::new()),
        )
    }

    fn context(steps: &[&str]) -> WorkflowContext {
        let mut ctx = WorkflowContext::new();
        ctx.steps_queue = steps.iter().map(|s| s.to_string()).collect();
        ctx
    }

    #[test]
    fn test_inspection_tools_are_not_recordable() {
        assert!(is_recordable("click"));
        assert!(is_recordable("selectOption"));
        assert!(!is_recordable("get_content"));
        assert!(!is_recordable("screenshot"));
    }

    #[tokio::test]
    async fn test_records_only_mutating_actions() {
        let responder = Arc::new(ScriptedResponder::with_intents(vec![
            call("navigate", json!({"url": "https://shop.test"})),
            call("get_content", json!({})),
            Intent::text("The page shows a login form."),
        ]));
        let connector = MockConnector::new();
        let state = connector.state();
        let session = connector.connect().await.unwrap();
        let services = services(responder.clone());

        let mut ctx = context(&["Open the shop", "Read the page", "Describe it"]);
        StepRunner::new(None, Duration::ZERO)
            .run(&mut ctx, session.as_ref(), &services)
            .await
            .unwrap();

        assert!(!ctx.failed);
        assert_eq!(ctx.recorded_history.len(), 1);
        assert_eq!(ctx.recorded_history[0].action, "navigate");
        assert_eq!(ctx.recorded_history[0].description, "Open the shop");
        assert_eq!(state.calls().len(), 2);
        assert_eq!(responder.tool_counts(), vec![7, 7, 7]);
    }

    #[tokio::test]
    async fn test_conversation_turns() {
        let responder = Arc::new(ScriptedResponder::with_intents(vec![
            call("click", json!({"selector": "#login"})),
            Intent::text("done"),
        ]));
        let connector = MockConnector::new();
        let session = connector.connect().await.unwrap();
        let services = services(responder.clone());

        let mut ctx = context(&["Click login", "Confirm"]);
        StepRunner::new(Some("Be careful.".into()), Duration::ZERO)
            .run(&mut ctx, session.as_ref(), &services)
            .await
            .unwrap();

        let histories = responder.histories();
        assert_eq!(histories[0].len(), 2);
        assert_eq!(histories[0][0].content, "Be careful.");
        assert_eq!(histories[0][1].content, "Execute this step: Click login");

        let second = &histories[1];
        assert_eq!(second[2].role, Role::Assistant);
        assert_eq!(second[2].content, "I am calling click.");
        assert_eq!(second[3].content, "Tool 'click' returned: click ok");
        assert_eq!(second[4].content, "Execute this step: Confirm");
    }

    #[tokio::test]
    async fn test_responder_error_fails_immediately() {
        let responder = Arc::new(ScriptedResponder::new());
        responder.push_error(QaforgeError::RateLimitExhausted {
            attempts: 5,
            message: "429".into(),
        });
        let connector = MockConnector::new();
        let state = connector.state();
        let session = connector.connect().await.unwrap();
        let services = services(responder.clone());

        let mut ctx = context(&["Open", "Click"]);
        StepRunner::new(None, Duration::ZERO)
            .run(&mut ctx, session.as_ref(), &services)
            .await
            .unwrap();

        assert!(ctx.failed);
        assert!(ctx.error_message.unwrap().contains("5 attempts"));
        assert_eq!(responder.call_count(), 1);
        assert!(state.calls().is_empty());
    }

    #[tokio::test]
    async fn test_tool_failure_message_is_the_tool_text() {
        let responder = Arc::new(ScriptedResponder::with_intents(vec![call(
            "click",
            json!({"selector": "#missing"}),
        )]));
        let connector = MockConnector::new().fail_tool("click", "element not found");
        let session = connector.connect().await.unwrap();
        let services = services(responder);

        let mut ctx = context(&["Click it"]);
        StepRunner::new(None, Duration::ZERO)
            .run(&mut ctx, session.as_ref(), &services)
            .await
            .unwrap();

        assert!(ctx.failed);
        assert_eq!(ctx.error_message.as_deref(), Some("element not found"));
        assert!(ctx.recorded_history.is_empty());
    }

    #[tokio::test]
    async fn test_image_output_is_kept_as_capture() {
        let responder = Arc::new(ScriptedResponder::with_intents(vec![call(
            "screenshot",
            json!({}),
        )]));
        let connector = MockConnector::new().script(
            "screenshot",
            Ok(ToolOutput::text("[image captured: 3 bytes]").with_image(vec![1, 2, 3])),
        );
        let session = connector.connect().await.unwrap();
        let services = services(responder.clone());

        let mut ctx = context(&["Take a screenshot"]);
        StepRunner::new(None, Duration::ZERO)
            .run(&mut ctx, session.as_ref(), &services)
            .await
            .unwrap();

        assert!(ctx.recorded_history.is_empty());
        assert_eq!(ctx.captures.len(), 1);
        assert_eq!(ctx.captures[0].bytes, vec![1, 2, 3]);
        assert_eq!(ctx.captures[0].instruction, "Take a screenshot");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_between_instructions() {
        let cancel = CancellationToken::new();
        let hook_cancel = cancel.clone();
        let responder = Arc::new(
            ScriptedResponder::with_intents(vec![
                call("navigate", json!({"url": "https://a.test"})),
                call("click", json!({"selector": "#b"})),
            ])
            .on_call(move |n| {
                if n == 1 {
                    hook_cancel.cancel();
                }
            }),
        );
        let connector = MockConnector::new();
        let session = connector.connect().await.unwrap();
        let mut services = services(responder.clone());
        services.cancel = cancel;

        let mut ctx = context(&["Open", "Click"]);
        StepRunner::new(None, Duration::from_secs(1))
            .run(&mut ctx, session.as_ref(), &services)
            .await
            .unwrap();

        assert!(ctx.failed);
        assert_eq!(ctx.error_message.as_deref(), Some("Workflow cancelled"));
        assert_eq!(ctx.recorded_history.len(), 1);
        assert_eq!(responder.call_count(), 1);
    }
}
