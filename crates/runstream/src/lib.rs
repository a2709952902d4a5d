//! Runstream engine library
//!
//! Reconciles interleaved agent run events into ordered chat notifications on
//! the host side and into stable message bubbles on the client side.

pub mod config;
pub mod context;
pub mod error;
pub mod history;
pub mod hub;
pub mod reconciler;
pub mod router;
pub mod state;
pub mod tool_cards;

pub use config::{EngineConfig, HistoryConfig, HubConfig, RouterConfig};
pub use context::{InMemoryRunContext, RunContext};
pub use error::{EngineError, EngineResult};
pub use history::{HistoryStore, JsonlHistoryStore, MemoryHistoryStore};
pub use hub::{ChatHub, ConnectionId, ConnectionReceiver, DispatchReport};
pub use reconciler::{ChatView, ClientReconciler, Reconciled, RunPhase, StreamingMessage, ViewItem};
pub use router::{EventRouter, Outbound, format_error};
pub use state::{RunLink, RunState};
pub use tool_cards::{CardStatus, PairedCard, ToolCard, group_messages, pair_cards};
