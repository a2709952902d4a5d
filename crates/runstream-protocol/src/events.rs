//! Raw agent events as emitted by the upstream executor.
//!
//! Every event belongs to one execution run and carries a per-run sequence
//! number. The `data` payload is stream-specific and kept as raw JSON on the
//! envelope; typed views parse it on demand and never fail hard.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Event envelope
// ============================================================================

/// A raw event from the agent executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentEvent {
    /// Internal execution run identifier.
    pub run_id: String,

    /// Per-run sequence number, starting at 1.
    pub seq: u64,

    /// Which detail stream this event belongs to.
    pub stream: AgentStream,

    /// Unix ms timestamp. Absent means 0.
    #[serde(default)]
    pub ts: i64,

    /// Stream-specific payload.
    #[serde(default)]
    pub data: Value,

    /// Session the event belongs to, when the executor knows it.
    /// The router fills this in before broadcasting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,
}

impl AgentEvent {
    pub fn new(run_id: impl Into<String>, seq: u64, stream: AgentStream, data: Value) -> Self {
        Self {
            run_id: run_id.into(),
            seq,
            stream,
            ts: 0,
            data,
            session_key: None,
        }
    }

    /// Set the timestamp.
    pub fn with_ts(mut self, ts: i64) -> Self {
        self.ts = ts;
        self
    }

    /// Set the session key.
    pub fn with_session(mut self, session_key: impl Into<String>) -> Self {
        self.session_key = Some(session_key.into());
        self
    }

    /// Assistant text payload, if this is an assistant event.
    pub fn assistant(&self) -> Option<AssistantData> {
        self.view(AgentStream::Assistant)
    }

    /// Tool marker payload, if this is a tool event.
    pub fn tool(&self) -> Option<ToolData> {
        self.view(AgentStream::Tool)
    }

    /// Lifecycle payload, if this is a lifecycle event.
    pub fn lifecycle(&self) -> Option<LifecycleData> {
        self.view(AgentStream::Lifecycle)
    }

    /// Whether this event ends its run (lifecycle `end` or `error`).
    pub fn is_terminal(&self) -> bool {
        self.lifecycle().is_some_and(|l| l.phase.is_terminal())
    }

    fn view<T: DeserializeOwned>(&self, stream: AgentStream) -> Option<T> {
        if self.stream != stream {
            return None;
        }
        serde_json::from_value(self.data.clone()).ok()
    }
}

/// Detail stream of an agent event.
///
/// Unknown stream names are preserved as `Other` so they can still be
/// broadcast on the general channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AgentStream {
    Assistant,
    Tool,
    Lifecycle,
    Error,
    Other(String),
}

impl AgentStream {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Assistant => "assistant",
            Self::Tool => "tool",
            Self::Lifecycle => "lifecycle",
            Self::Error => "error",
            Self::Other(name) => name,
        }
    }
}

impl From<String> for AgentStream {
    fn from(value: String) -> Self {
        match value.as_str() {
            "assistant" => Self::Assistant,
            "tool" => Self::Tool,
            "lifecycle" => Self::Lifecycle,
            "error" => Self::Error,
            _ => Self::Other(value),
        }
    }
}

impl From<AgentStream> for String {
    fn from(value: AgentStream) -> Self {
        value.as_str().to_string()
    }
}

impl std::fmt::Display for AgentStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Typed payload views
// ============================================================================

/// Payload of an `assistant` event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssistantData {
    /// Cumulative text of the current bubble.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Incremental text since the previous event (informational only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<String>,
}

/// Payload of a `tool` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolData {
    pub phase: ToolPhase,

    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,

    /// Partial (update) or final (result) output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

/// Tool marker phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolPhase {
    Start,
    Update,
    #[serde(alias = "end")]
    Result,
}

/// Payload of a `lifecycle` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleData {
    pub phase: LifecyclePhase,

    /// Error detail for `error` phases. Can be a string, an object with a
    /// `message`, or anything else the executor produced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

/// Lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecyclePhase {
    Start,
    End,
    Error,
}

impl LifecyclePhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::End | Self::Error)
    }
}

// ============================================================================
// Diagnostics
// ============================================================================

/// Reason string carried by sequence gap diagnostics.
pub const SEQ_GAP_REASON: &str = "seq gap";

/// General-channel diagnostic emitted when a run's sequence skips.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeqGapDiagnostic {
    pub run_id: String,

    /// Always `error`.
    pub stream: AgentStream,

    pub ts: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,

    pub data: SeqGap,
}

impl SeqGapDiagnostic {
    pub fn new(
        run_id: impl Into<String>,
        session_key: Option<String>,
        ts: i64,
        expected: u64,
        received: u64,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            stream: AgentStream::Error,
            ts,
            session_key,
            data: SeqGap {
                reason: SEQ_GAP_REASON.to_string(),
                expected,
                received,
            },
        }
    }
}

/// Body of a sequence gap diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeqGap {
    pub reason: String,
    pub expected: u64,
    pub received: u64,
}

// ============================================================================
// Verbosity
// ============================================================================

/// Per-session verbosity for tool detail broadcasts.
///
/// Only gates the general-channel copy of tool events. Chat tool markers are
/// always emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerboseLevel {
    #[default]
    Off,
    On,
    Full,
}

impl VerboseLevel {
    pub fn is_off(self) -> bool {
        matches!(self, Self::Off)
    }
}
