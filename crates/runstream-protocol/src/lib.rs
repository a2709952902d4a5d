//! Wire types for agent run streaming.
//!
//! One agent run produces a single interleaved feed of raw events. The engine
//! turns that feed into per-session chat notifications:
//!
//! ```text
//! Agent executor --[AgentEvent, seq-numbered]--> Router --[ChatEvent]--> Client
//!                                                   |
//!                                                   +--[AgentEvent / SeqGapDiagnostic]--> general channel
//! ```
//!
//! ## Design Principles
//!
//! 1. **History is persistent, notifications are ephemeral.** A client renders
//!    streaming bubbles from `ChatEvent`s and replaces them with persisted
//!    history once the run is terminal.
//! 2. **Delta text is cumulative.** Each delta carries the full text of one
//!    bubble so far, so a dropped delta is superseded by the next one.
//! 3. **Bubbles break at tool boundaries.** `messageIndex` increments when a
//!    tool starts, never on content heuristics.
//! 4. **Additive fields decode leniently.** Missing `messageIndex` means 0,
//!    missing text means "nothing to apply".

pub mod chat;
pub mod commands;
pub mod events;
pub mod messages;

pub use chat::{ChatEvent, ChatState, ToolRef};
pub use commands::{ChatAbort, ChatSend};
pub use events::{
    AgentEvent, AgentStream, AssistantData, LifecycleData, LifecyclePhase, SeqGap,
    SeqGapDiagnostic, ToolData, ToolPhase, VerboseLevel,
};
pub use messages::{ChatMessage, ContentBlock, Role};
