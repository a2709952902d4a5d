//! Collateral lookups the router needs from its host.

use dashmap::{DashMap, DashSet};
use log::debug;

use runstream_protocol::VerboseLevel;

use crate::error::EngineResult;

/// Host-side run bookkeeping the router consults but does not own.
///
/// All calls are synchronous and must not block.
pub trait RunContext: Send + Sync {
    /// Session for a run that has no registry link.
    fn session_for_run(&self, run_id: &str) -> Option<String>;

    /// Runs the host considers active for a session. Used when an abort
    /// names no run.
    fn runs_for_session(&self, _session_key: &str) -> Vec<String> {
        Vec::new()
    }

    /// Explicit verbosity for a session. `Ok(None)` means "use the default".
    fn verbose_level(&self, session_key: &str) -> EngineResult<Option<VerboseLevel>>;

    /// Called for every terminal lifecycle event, aborted or not.
    fn release_run(&self, run_id: &str);
}

/// In-process `RunContext` backed by concurrent maps.
#[derive(Debug, Default)]
pub struct InMemoryRunContext {
    run_sessions: DashMap<String, String>,
    verbose: DashMap<String, VerboseLevel>,
    released: DashSet<String>,
}

impl InMemoryRunContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a run belongs to a session.
    pub fn register_run(&self, run_id: &str, session_key: &str) {
        self.released.remove(run_id);
        self.run_sessions
            .insert(run_id.to_string(), session_key.to_string());
    }

    /// Set the verbosity of a session.
    pub fn set_verbose(&self, session_key: &str, level: VerboseLevel) {
        self.verbose.insert(session_key.to_string(), level);
    }

    /// Whether the run is registered and not yet released.
    pub fn is_active(&self, run_id: &str) -> bool {
        self.run_sessions.contains_key(run_id)
    }

    /// Whether the run was released by a terminal event.
    pub fn was_released(&self, run_id: &str) -> bool {
        self.released.contains(run_id)
    }
}

impl RunContext for InMemoryRunContext {
    fn session_for_run(&self, run_id: &str) -> Option<String> {
        self.run_sessions.get(run_id).map(|s| s.value().clone())
    }

    fn runs_for_session(&self, session_key: &str) -> Vec<String> {
        let mut runs: Vec<String> = self
            .run_sessions
            .iter()
            .filter(|entry| entry.value() == session_key)
            .map(|entry| entry.key().clone())
            .collect();
        runs.sort();
        runs
    }

    fn verbose_level(&self, session_key: &str) -> EngineResult<Option<VerboseLevel>> {
        Ok(self.verbose.get(session_key).map(|v| *v.value()))
    }

    fn release_run(&self, run_id: &str) {
        if self.run_sessions.remove(run_id).is_some() {
            debug!("Released run {}", run_id);
        }
        self.released.insert(run_id.to_string());
    }
}
