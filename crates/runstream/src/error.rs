//! Engine error types.

use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors surfaced by engine collaborators.
///
/// None of these cross the router boundary: upstream failures become terminal
/// chat notifications, and lookup failures degrade to defaults.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Persisted history could not be loaded.
    #[error("history load failed for session {session_key}: {message}")]
    History {
        session_key: String,
        message: String,
    },

    /// A settings lookup (e.g. verbosity) failed.
    #[error("settings lookup failed: {0}")]
    Settings(String),

    /// A client-initiated send or abort was rejected by the transport.
    #[error("transport rejected {command}: {message}")]
    Transport { command: String, message: String },

    /// A payload could not be parsed.
    #[error("failed to parse payload: {0}")]
    Parse(#[from] serde_json::Error),

    /// Generic IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn history(session_key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::History {
            session_key: session_key.into(),
            message: message.into(),
        }
    }

    pub fn transport(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            command: command.into(),
            message: message.into(),
        }
    }
}
