//! Tool dispatch: runs the tool calls of one model reply.
//!
//! Every call produces exactly one `tool` message. Unknown tools get a
//! diagnostic naming the available tools; failures and timeouts become
//! `Error: ...` text. Neither aborts the turn. When the batch's last outcome
//! is a real tool result, its message is framed as an observation that
//! nudges the model towards answering.

use chrono::Utc;
use lyra_core::error::ToolError;
use lyra_core::message::{Message, ToolCall};
use lyra_core::tool::ToolRegistry;
use lyra_core::{DomainEvent, EventBus};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::conversation::ConversationState;

/// What happened to one tool call.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    /// The tool ran (or failed) and produced text.
    Completed {
        call_id: String,
        tool_name: String,
        output: String,
        success: bool,
    },
    /// The model asked for a tool that is not registered.
    UnknownTool {
        call_id: String,
        tool_name: String,
        diagnostic: String,
    },
}

impl ToolOutcome {
    pub fn call_id(&self) -> &str {
        match self {
            Self::Completed { call_id, .. } | Self::UnknownTool { call_id, .. } => call_id,
        }
    }

    pub fn tool_name(&self) -> &str {
        match self {
            Self::Completed { tool_name, .. } | Self::UnknownTool { tool_name, .. } => tool_name,
        }
    }

    /// The text reported for this call.
    pub fn text(&self) -> &str {
        match self {
            Self::Completed { output, .. } => output,
            Self::UnknownTool { diagnostic, .. } => diagnostic,
        }
    }

    pub fn success(&self) -> bool {
        matches!(self, Self::Completed { success: true, .. })
    }
}

/// Wrap the last tool result of a batch as an observation.
pub fn frame_observation(content: &str) -> String {
    format!(
        "Observation: {content}\n\nI now need to return an answer based on the previous steps if I have enough information:"
    )
}

/// Tool result recorded for a call the turn was cancelled before finishing.
pub const CANCELLED_RESULT: &str = "Error: cancelled";

/// Resolves tool calls against a registry.
#[derive(Clone)]
pub struct ToolDispatcher {
    tools: Arc<ToolRegistry>,
    timeout: Duration,
    events: Option<Arc<EventBus>>,
}

impl ToolDispatcher {
    pub fn new(tools: Arc<ToolRegistry>) -> Self {
        Self {
            tools,
            timeout: Duration::from_secs(30),
            events: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Diagnostic for a tool name the registry does not know.
    pub fn unknown_tool_diagnostic(&self, name: &str) -> String {
        format!(
            "{name} is not a valid tool, try another available tool: {}",
            self.tools.names().join(", ")
        )
    }

    /// Run `calls` in order and append one `tool` message per call.
    ///
    /// Each message is appended as soon as its call finishes. Returns the
    /// unframed outcomes. Only cancellation is an error: the calls that did
    /// not finish are answered with a cancellation notice so the request
    /// message never dangles in history.
    pub async fn resolve(
        &self,
        state: &mut ConversationState,
        calls: &[ToolCall],
        cancel: &CancellationToken,
    ) -> lyra_core::Result<Vec<ToolOutcome>> {
        let mut outcomes = Vec::with_capacity(calls.len());
        let last = calls.len().saturating_sub(1);

        for (i, call) in calls.iter().enumerate() {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(pending = calls.len() - i, "Tool dispatch cancelled");
                    for pending in &calls[i..] {
                        state.append(Message::tool_result(pending.name(), CANCELLED_RESULT));
                    }
                    return Err(lyra_core::Error::Cancelled);
                }
                outcome = self.invoke(call) => outcome,
            };

            let content = match &outcome {
                ToolOutcome::Completed { output, .. } if i == last => frame_observation(output),
                other => other.text().to_string(),
            };
            state.append(Message::tool_result(outcome.tool_name(), content));
            outcomes.push(outcome);
        }

        Ok(outcomes)
    }

    async fn invoke(&self, call: &ToolCall) -> ToolOutcome {
        let name = call.name().to_string();

        if self.tools.get(&name).is_none() {
            warn!(tool = %name, "Model requested an unknown tool");
            return ToolOutcome::UnknownTool {
                call_id: call.id.clone(),
                diagnostic: self.unknown_tool_diagnostic(&name),
                tool_name: name,
            };
        }

        debug!(tool = %name, arguments = ?call.function.arguments, "Executing tool");
        let arguments = serde_json::Value::Object(call.function.arguments.clone());
        let start = Instant::now();

        let result = match tokio::time::timeout(self.timeout, self.tools.execute(&name, arguments)).await {
            Ok(result) => result,
            Err(_) => Err(ToolError::Timeout {
                tool_name: name.clone(),
                timeout_secs: self.timeout.as_secs(),
            }),
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        let (output, success) = match result {
            Ok(result) => (result.output, result.success),
            Err(e) => {
                warn!(tool = %name, error = %e, "Tool execution failed");
                (format!("Error: {e}"), false)
            }
        };
        info!(tool = %name, success, duration_ms, "Tool finished");

        if let Some(events) = &self.events {
            events.publish(DomainEvent::ToolExecuted {
                tool_name: name.clone(),
                success,
                duration_ms,
                timestamp: Utc::now(),
            });
        }

        ToolOutcome::Completed {
            call_id: call.id.clone(),
            tool_name: name,
            output,
            success,
        }
    }
}
