//! Per-run message index counters and abort markers.

use std::collections::HashMap;

/// Message index per client run.
///
/// The index starts at 0 and advances by one per observed tool start. It
/// never decrements and is dropped when the run ends.
#[derive(Debug, Default)]
pub struct RunProgress {
    indices: HashMap<String, usize>,
}

impl RunProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current index for a run, creating the entry at 0 if unseen.
    pub fn current(&mut self, client_run_id: &str) -> usize {
        *self.indices.entry(client_run_id.to_string()).or_insert(0)
    }

    /// Advance the index at a tool boundary. Returns the new index.
    pub fn advance(&mut self, client_run_id: &str) -> usize {
        let index = self.indices.entry(client_run_id.to_string()).or_insert(0);
        *index += 1;
        *index
    }

    /// Read the index without creating an entry.
    pub fn get(&self, client_run_id: &str) -> Option<usize> {
        self.indices.get(client_run_id).copied()
    }

    pub fn remove(&mut self, client_run_id: &str) -> Option<usize> {
        self.indices.remove(client_run_id)
    }

    pub fn contains(&self, client_run_id: &str) -> bool {
        self.indices.contains_key(client_run_id)
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn clear(&mut self) {
        self.indices.clear();
    }
}

/// Runs the client asked to cancel, with the time of the request (unix ms).
#[derive(Debug, Default)]
pub struct AbortMarkers {
    markers: HashMap<String, i64>,
}

impl AbortMarkers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a run as aborted. Keeps the earliest timestamp on repeats.
    pub fn mark(&mut self, run_id: &str, ts: i64) {
        self.markers.entry(run_id.to_string()).or_insert(ts);
    }

    /// Whether any of the given ids is marked.
    pub fn is_aborted(&self, ids: &[&str]) -> bool {
        ids.iter().any(|id| self.markers.contains_key(*id))
    }


    pub fn remove(&mut self, run_id: &str) -> Option<i64> {
        self.markers.remove(run_id)
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    pub fn clear(&mut self) {
        self.markers.clear();
    }
}
