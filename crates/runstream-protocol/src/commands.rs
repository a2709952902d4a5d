//! Inbound client commands.
//!
//! The engine does not execute these; it only records the run links and
//! abort markers they imply.

use serde::{Deserialize, Serialize};

/// Client request to start a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSend {
    pub session_key: String,
    pub message: String,
    /// Client-generated run identifier. Used as the idempotency key and as
    /// the initial client run id.
    pub idempotency_key: String,
}

/// Client request to cancel a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatAbort {
    pub session_key: String,
    /// Absent means "abort whatever is active for this session".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abort_without_run_id() {
        let abort: ChatAbort = serde_json::from_str(r#"{"sessionKey":"main"}"#).unwrap();
        assert_eq!(abort.session_key, "main");
        assert!(abort.run_id.is_none());
        assert_eq!(serde_json::to_string(&abort).unwrap(), r#"{"sessionKey":"main"}"#);
    }

    #[test]
    fn test_send_serialization() {
        let send = ChatSend {
            session_key: "main".to_string(),
            message: "hi".to_string(),
            idempotency_key: "run-1".to_string(),
        };
        let json = serde_json::to_string(&send).unwrap();
        assert!(json.contains("\"idempotencyKey\":\"run-1\""));
    }
}
