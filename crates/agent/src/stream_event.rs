//! Turn-level streaming events.
//!
//! `TurnEvent` is what the orchestrator sends to a streaming client. The
//! gateway frames each event as one SSE `data:` line.
//!
//! - `chunk`: visible text (and reasoning) from the model
//! - `tool_call`: a tool is about to run
//! - `tool_result`: the tool finished
//! - `diagnostic`: the turn ended early but not in error
//! - `done`: the turn is complete
//! - `error`: the turn failed

use lyra_core::message::Role;
use serde::{Deserialize, Serialize};

/// The message part of a `chunk` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// Partial output from the model.
    Chunk { message: ChunkMessage },

    /// A tool is being invoked.
    ToolCall {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },

    /// A tool invocation completed.
    ToolResult {
        id: String,
        name: String,
        output: String,
        success: bool,
    },

    /// Non-fatal notice, e.g. the tool-round limit was reached.
    Diagnostic { message: String },

    /// The turn is complete.
    Done {
        session_id: String,
        tool_rounds: usize,
        final_marker: bool,
    },

    /// The turn failed.
    Error { message: String },
}

impl TurnEvent {
    /// An assistant chunk.
    pub fn chunk(content: impl Into<String>, thinking: Option<String>) -> Self {
        Self::Chunk {
            message: ChunkMessage {
                role: Role::Assistant,
                content: content.into(),
                thinking,
            },
        }
    }

    /// SSE event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Chunk { .. } => "chunk",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::Diagnostic { .. } => "diagnostic",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }

    /// Visible text carried by a chunk.
    pub fn chunk_content(&self) -> Option<&str> {
        match self {
            Self::Chunk { message } => Some(&message.content),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_keeps_message_shape() {
        let json = serde_json::to_value(TurnEvent::chunk("Hello", None)).unwrap();
        assert_eq!(json["type"], "chunk");
        assert_eq!(json["message"]["role"], "assistant");
        assert_eq!(json["message"]["content"], "Hello");
        assert!(json["message"].get("thinking").is_none());
    }

    #[test]
    fn tool_call_serialization() {
        let event = TurnEvent::ToolCall {
            id: "call_0".into(),
            name: "evaluateMathExpression".into(),
            arguments: serde_json::json!({"expression": "2+2"}),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"tool_call""#));
        assert!(json.contains(r#""name":"evaluateMathExpression""#));
    }

    #[test]
    fn done_serialization() {
        let event = TurnEvent::Done {
            session_id: "default".into(),
            tool_rounds: 2,
            final_marker: true,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"done""#));
        assert!(json.contains(r#""tool_rounds":2"#));
    }

    #[test]
    fn event_type_names() {
        assert_eq!(TurnEvent::chunk("x", None).event_type(), "chunk");
        assert_eq!(
            TurnEvent::ToolResult {
                id: "a".into(),
                name: "b".into(),
                output: "c".into(),
                success: true
            }
            .event_type(),
            "tool_result"
        );
        assert_eq!(TurnEvent::Diagnostic { message: "x".into() }.event_type(), "diagnostic");
        assert_eq!(TurnEvent::Error { message: "x".into() }.event_type(), "error");
    }

    #[test]
    fn event_deserialization() {
        let json = r#"{"type":"chunk","message":{"role":"assistant","content":"hi"}}"#;
        let event: TurnEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.chunk_content(), Some("hi"));
    }
}
