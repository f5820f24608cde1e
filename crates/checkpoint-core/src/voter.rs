//! Smooths noisy per-frame matches into confirmed decisions.

use std::collections::VecDeque;

use crate::registry::EntryId;

/// Bounded, append-only record of recently matched entry ids.
///
/// Appending past capacity evicts the oldest id.
#[derive(Debug, Clone)]
pub struct DetectionHistory {
    ids: VecDeque<EntryId>,
    capacity: usize,
}

impl DetectionHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            ids: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, id: EntryId) {
        self.ids.push_back(id);
        while self.ids.len() > self.capacity {
            self.ids.pop_front();
        }
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Oldest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &EntryId> {
        self.ids.iter()
    }

    /// Occurrences of `id` among the most recent `window` ids.
    pub fn recent_count(&self, id: EntryId, window: usize) -> usize {
        self.iter().rev().take(window).filter(|&&x| x == id).count()
    }
}

/// Whether an observation of `candidate` confirms, judged against the
/// history as it stood before the observation is appended.
///
/// Confirms when `candidate` appears at least once among the last `window`
/// ids, or when fewer than two ids were recorded (bootstrap).
pub fn is_confirmed(history: &DetectionHistory, candidate: EntryId, window: usize) -> bool {
    history.len() < 2 || history.recent_count(candidate, window) >= 1
}

/// Consistency voter owning the detection history.
#[derive(Debug, Clone)]
pub struct ConsistencyVoter {
    history: DetectionHistory,
    window: usize,
}

impl ConsistencyVoter {
    pub fn new(capacity: usize, window: usize) -> Self {
        Self {
            history: DetectionHistory::new(capacity),
            window,
        }
    }

    /// Record an above-threshold observation and report whether it confirms.
    pub fn record(&mut self, id: EntryId) -> bool {
        let confirmed = is_confirmed(&self.history, id, self.window);
        self.history.push(id);
        confirmed
    }

    /// Full reset; a miss wipes every prior vote.
    pub fn reset(&mut self) {
        self.history.clear();
    }

    pub fn history(&self) -> &DetectionHistory {
        &self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: EntryId = 1;
    const BOB: EntryId = 2;

    #[test]
    fn test_history_evicts_oldest() {
        let mut history = DetectionHistory::new(5);
        for id in 1..=7 {
            history.push(id);
        }
        assert_eq!(history.iter().copied().collect::<Vec<_>>(), vec![3, 4, 5, 6, 7]);
    }

    #[test]
    fn test_bootstrap_first_observation_confirms() {
        let mut voter = ConsistencyVoter::new(5, 3);
        assert!(voter.record(ALICE));
        assert_eq!(voter.history().len(), 1);
    }

    #[test]
    fn test_bootstrap_second_observation_confirms_any_id() {
        let mut voter = ConsistencyVoter::new(5, 3);
        voter.record(BOB);
        assert!(voter.record(ALICE));
    }

    #[test]
    fn test_unseen_id_after_bootstrap_not_confirmed() {
        let mut voter = ConsistencyVoter::new(5, 3);
        voter.record(BOB);
        voter.record(BOB);
        assert!(!voter.record(ALICE));
        // Alice is now in the window; the next Alice frame confirms.
        assert!(voter.record(ALICE));
    }

    #[test]
    fn test_window_only_looks_at_last_three() {
        let mut voter = ConsistencyVoter::new(5, 3);
        for id in [ALICE, BOB, BOB, BOB] {
            voter.record(id);
        }
        // Alice is 4th from the end: outside the window.
        assert_eq!(voter.history().recent_count(ALICE, 3), 0);
        assert!(!voter.record(ALICE));
    }

    #[test]
    fn test_reset_after_run_of_hits() {
        let mut voter = ConsistencyVoter::new(5, 3);
        for _ in 0..3 {
            voter.record(ALICE);
        }
        voter.reset();
        assert!(voter.history().is_empty());
        // Back to bootstrap behaviour.
        assert!(voter.record(BOB));
    }

    #[test]
    fn test_is_confirmed_does_not_mutate() {
        let mut history = DetectionHistory::new(5);
        history.push(BOB);
        history.push(BOB);
        assert!(!is_confirmed(&history, ALICE, 3));
        assert!(is_confirmed(&history, BOB, 3));
        assert_eq!(history.len(), 2);
    }
}
