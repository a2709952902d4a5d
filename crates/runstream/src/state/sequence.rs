//! Per-run sequence tracking.

use std::collections::HashMap;

/// A detected gap: the guard expected `expected` but saw `received`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeqGapInfo {
    pub expected: u64,
    pub received: u64,
}

/// Tracks the last sequence number seen per execution run.
///
/// Reporting only: a gap never causes the event to be dropped, and the
/// counter always moves to the received value.
#[derive(Debug, Default)]
pub struct SequenceGuard {
    last: HashMap<String, u64>,
}

impl SequenceGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `seq` for a run, returning the gap if it was not `last + 1`.
    pub fn observe(&mut self, run_id: &str, seq: u64) -> Option<SeqGapInfo> {
        let last = self.last.entry(run_id.to_string()).or_insert(0);
        let expected = last.saturating_add(1);
        *last = seq;
        (seq != expected).then_some(SeqGapInfo {
            expected,
            received: seq,
        })
    }

    /// Last sequence number seen for a run (0 if none).
    pub fn last(&self, run_id: &str) -> u64 {
        self.last.get(run_id).copied().unwrap_or(0)
    }

    pub fn forget(&mut self, run_id: &str) {
        self.last.remove(run_id);
    }

    pub fn len(&self) -> usize {
        self.last.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last.is_empty()
    }

    pub fn clear(&mut self) {
        self.last.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strictly_increasing_has_no_gaps() {
        let mut guard = SequenceGuard::new();
        for seq in 1..=50 {
            assert_eq!(guard.observe("r1", seq), None);
        }
        assert_eq!(guard.last("r1"), 50);
    }

    #[test]
    fn test_single_gap_reported_once() {
        let mut guard = SequenceGuard::new();
        assert_eq!(guard.observe("r1", 1), None);
        assert_eq!(guard.observe("r1", 2), None);
        assert_eq!(
            guard.observe("r1", 5),
            Some(SeqGapInfo {
                expected: 3,
                received: 5
            })
        );
        assert_eq!(guard.observe("r1", 6), None);
    }

    #[test]
    fn test_out_of_order_is_reported_and_accepted() {
        let mut guard = SequenceGuard::new();
        guard.observe("r1", 1);
        guard.observe("r1", 2);
        guard.observe("r1", 3);
        assert_eq!(
            guard.observe("r1", 2),
            Some(SeqGapInfo {
                expected: 4,
                received: 2
            })
        );
        assert_eq!(guard.last("r1"), 2);
        assert_eq!(guard.observe("r1", 3), None);
    }

    #[test]
    fn test_first_event_must_be_one() {
        let mut guard = SequenceGuard::new();
        assert_eq!(
            guard.observe("r1", 4),
            Some(SeqGapInfo {
                expected: 1,
                received: 4
            })
        );
    }

    #[test]
    fn test_runs_are_independent() {
        let mut guard = SequenceGuard::new();
        guard.observe("r1", 1);
        assert_eq!(guard.observe("r2", 1), None);
        assert_eq!(guard.observe("r1", 2), None);
        guard.forget("r1");
        assert_eq!(guard.last("r1"), 0);
        assert_eq!(guard.len(), 1);
    }
}
