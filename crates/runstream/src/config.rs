//! Engine configuration.

use serde::{Deserialize, Serialize};

use runstream_protocol::VerboseLevel;

/// Configuration for the router, hub and history store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub router: RouterConfig,
    pub hub: HubConfig,
    pub history: HistoryConfig,
}

/// Router configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Verbosity used when a session has no explicit setting.
    pub default_verbose: VerboseLevel,
    /// Emit sequence gap diagnostics on the general channel.
    /// Gaps are still logged when disabled.
    pub emit_seq_gaps: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            default_verbose: VerboseLevel::Off,
            emit_seq_gaps: true,
        }
    }
}

/// Hub configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Queued frames at which a connection counts as slow. Deltas are
    /// dropped for slow connections; other notifications are always queued.
    pub slow_consumer_threshold: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            slow_consumer_threshold: 256,
        }
    }
}

/// Persisted history configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Directory holding one `<session>.jsonl` file per session.
    /// Unset means an in-memory store.
    pub dir: Option<String>,
}
