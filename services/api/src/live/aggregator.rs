//! services/api/src/live/aggregator.rs
//!
//! The in-memory response tally for the currently active checkpoint of one
//! session. One participant contributes at most one selection; a
//! resubmission before the checkpoint closes replaces the earlier one, with
//! the counts adjusted down for the old selection and up for the new.

use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

/// Live per-option counts for one active checkpoint, keyed by option
/// ordinal (which is also letter order, so charts render deterministically).
#[derive(Debug)]
pub struct Tally {
    option_counts: Vec<u32>,
    selections: HashMap<Uuid, BTreeSet<u16>>,
}

impl Tally {
    /// An empty tally sized to the checkpoint's option list.
    pub fn new(option_count: usize) -> Self {
        Self {
            option_counts: vec![0; option_count],
            selections: HashMap::new(),
        }
    }

    /// Records a participant's selection, overwriting any prior one.
    /// Multi-select responses increment one counter per chosen option.
    pub fn record(&mut self, participant_id: Uuid, chosen: BTreeSet<u16>) {
        if let Some(previous) = self.selections.remove(&participant_id) {
            for ordinal in previous {
                if let Some(count) = self.option_counts.get_mut(ordinal as usize) {
                    *count = count.saturating_sub(1);
                }
            }
        }
        for &ordinal in &chosen {
            if let Some(count) = self.option_counts.get_mut(ordinal as usize) {
                *count += 1;
            }
        }
        self.selections.insert(participant_id, chosen);
    }

    /// The per-option counts, indexed by ordinal.
    pub fn counts(&self) -> &[u32] {
        &self.option_counts
    }

    /// The number of distinct participants who have responded.
    pub fn total_responses(&self) -> u32 {
        self.selections.len() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_start_empty() {
        let tally = Tally::new(3);
        assert_eq!(tally.counts(), &[0, 0, 0]);
        assert_eq!(tally.total_responses(), 0);
    }

    #[test]
    fn resubmission_overwrites_instead_of_duplicating() {
        let mut tally = Tally::new(3);
        let participant = Uuid::new_v4();

        tally.record(participant, BTreeSet::from([0, 1]));
        assert_eq!(tally.counts(), &[1, 1, 0]);

        tally.record(participant, BTreeSet::from([2]));
        assert_eq!(tally.counts(), &[0, 0, 1]);
        assert_eq!(tally.total_responses(), 1);
    }

    #[test]
    fn distinct_participants_accumulate() {
        let mut tally = Tally::new(2);
        tally.record(Uuid::new_v4(), BTreeSet::from([0]));
        tally.record(Uuid::new_v4(), BTreeSet::from([0, 1]));

        assert_eq!(tally.counts(), &[2, 1]);
        assert_eq!(tally.total_responses(), 2);
    }
}
