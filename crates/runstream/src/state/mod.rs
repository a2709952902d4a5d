//! Run bookkeeping owned by the router.
//!
//! All four stores live in one `RunState` so a host can run several
//! independent routers side by side and wipe one with a single `reset`.

mod progress;
mod registry;
mod sequence;

pub use progress::{AbortMarkers, RunProgress};
pub use registry::{RunLink, RunRegistry};
pub use sequence::{SeqGapInfo, SequenceGuard};

/// Registry, progress, abort markers and sequence counters for one router.
#[derive(Debug, Default)]
pub struct RunState {
    pub registry: RunRegistry,
    pub progress: RunProgress,
    pub aborts: AbortMarkers,
    pub sequence: SequenceGuard,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wipe every store.
    pub fn reset(&mut self) {
        self.registry.clear();
        self.progress.clear();
        self.aborts.clear();
        self.sequence.clear();
    }

    /// Drop progress and abort tracking for every id that referred to a run.
    pub fn release(&mut self, ids: &[&str]) {
        for id in ids {
            self.progress.remove(id);
            self.aborts.remove(id);
        }
    }

    /// Whether nothing is tracked at all.
    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
            && self.progress.is_empty()
            && self.aborts.is_empty()
            && self.sequence.is_empty()
    }
}
