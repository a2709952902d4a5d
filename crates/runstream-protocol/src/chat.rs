//! Outbound chat notifications.
//!
//! Every notification shares `runId`, `sessionKey`, `seq` and `state`. The
//! state tag selects the variant-specific fields.

use serde::{Deserialize, Serialize};

use crate::messages::ChatMessage;

/// A chat notification for one client-visible run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEvent {
    /// Client-visible run identifier.
    pub run_id: String,

    pub session_key: String,

    /// Sequence number of the agent event that produced this notification.
    pub seq: u64,

    #[serde(flatten)]
    pub state: ChatState,
}

impl ChatEvent {
    pub fn new(
        run_id: impl Into<String>,
        session_key: impl Into<String>,
        seq: u64,
        state: ChatState,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            session_key: session_key.into(),
            seq,
            state,
        }
    }

    /// Whether this notification ends the run on the client.
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Whether transports may discard this notification for slow consumers.
    ///
    /// Only deltas qualify: each one carries the cumulative bubble text, so
    /// the next delta for the same index supersedes a dropped one.
    pub fn is_droppable(&self) -> bool {
        matches!(self.state, ChatState::Delta { .. })
    }
}

/// Notification state, tagged by the `state` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum ChatState {
    /// Cumulative text for one bubble.
    #[serde(rename_all = "camelCase")]
    Delta {
        /// Bubble ordinal within the run. Absent means 0.
        #[serde(default)]
        message_index: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<ChatMessage>,
    },

    /// A tool invocation began.
    ToolStart { tool: ToolRef },

    /// A tool invocation completed.
    ToolEnd { tool: ToolRef },

    /// Run completed. Clients re-fetch history.
    Final,

    /// Run failed. Clients re-fetch history and surface the message.
    #[serde(rename_all = "camelCase")]
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
    },

    /// Run was cancelled. Clients discard transient state.
    Aborted,
}

impl ChatState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Final | Self::Error { .. } | Self::Aborted)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Delta { .. } => "delta",
            Self::ToolStart { .. } => "tool-start",
            Self::ToolEnd { .. } => "tool-end",
            Self::Final => "final",
            Self::Error { .. } => "error",
            Self::Aborted => "aborted",
        }
    }
}

/// Tool reference carried by tool markers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolRef {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ToolRef {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tool_call_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_delta_shape() {
        let event = ChatEvent::new(
            "r1",
            "s1",
            4,
            ChatState::Delta {
                message_index: 1,
                message: Some(ChatMessage::assistant_text("Found it", 1000)),
            },
        );
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({
                "runId": "r1",
                "sessionKey": "s1",
                "seq": 4,
                "state": "delta",
                "messageIndex": 1,
                "message": {
                    "role": "assistant",
                    "content": [{"type": "text", "text": "Found it"}],
                    "timestamp": 1000
                }
            })
        );
        assert!(event.is_droppable());
        assert!(!event.is_terminal());
    }

    #[test]
    fn test_tool_states_are_kebab_case() {
        let event = ChatEvent::new(
            "r1",
            "s1",
            2,
            ChatState::ToolStart {
                tool: ToolRef::named("search"),
            },
        );
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["state"], "tool-start");
        assert_eq!(value["tool"], json!({"name": "search"}));
        assert!(!event.is_droppable());
    }

    #[test]
    fn test_error_message_optional() {
        let event = ChatEvent::new("r1", "s1", 5, ChatState::Error { error_message: None });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value, json!({"runId": "r1", "sessionKey": "s1", "seq": 5, "state": "error"}));
        assert!(event.is_terminal());
    }

    #[test]
    fn test_delta_without_message_index_decodes_as_zero() {
        let event: ChatEvent = serde_json::from_value(json!({
            "runId": "r1",
            "sessionKey": "s1",
            "seq": 1,
            "state": "delta",
            "message": {"role": "assistant", "content": [{"type": "text", "text": "Hi"}]}
        }))
        .unwrap();
        match event.state {
            ChatState::Delta {
                message_index,
                message,
            } => {
                assert_eq!(message_index, 0);
                assert_eq!(message.unwrap().text().as_deref(), Some("Hi"));
            }
            other => panic!("expected delta, got {}", other.name()),
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(ChatState::Final.is_terminal());
        assert!(ChatState::Aborted.is_terminal());
        assert!(
            !ChatState::ToolEnd {
                tool: ToolRef::named("x")
            }
            .is_terminal()
        );
    }
}
