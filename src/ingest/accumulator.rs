//! In-memory opening rollups between flushes

use std::collections::BTreeMap;

use crate::model::OpeningDelta;

/// Running per-opening totals since the last drain.
///
/// Draining after every group of deltas and upserting each group yields the
/// same persisted totals as draining once, because stores apply the drained
/// map as additive increments.
#[derive(Debug, Default)]
pub struct AggregationAccumulator {
    totals: BTreeMap<String, OpeningDelta>,
    bytes: usize,
}

impl AggregationAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold `delta` into the entry for `opening_code`, creating it if absent
    pub fn merge(&mut self, opening_code: &str, delta: &OpeningDelta) {
        match self.totals.get_mut(opening_code) {
            Some(total) => total.merge(delta),
            None => {
                self.bytes += Self::entry_size(opening_code, delta);
                self.totals.insert(opening_code.to_string(), delta.clone());
            }
        }
    }

    /// Hand over the current totals and start empty
    pub fn drain(&mut self) -> BTreeMap<String, OpeningDelta> {
        self.bytes = 0;
        std::mem::take(&mut self.totals)
    }

    pub fn get(&self, opening_code: &str) -> Option<&OpeningDelta> {
        self.totals.get(opening_code)
    }

    pub fn len(&self) -> usize {
        self.totals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.totals.is_empty()
    }

    /// Approximate footprint of the held entries
    pub fn estimated_bytes(&self) -> usize {
        self.bytes
    }

    fn entry_size(opening_code: &str, delta: &OpeningDelta) -> usize {
        std::mem::size_of::<(String, OpeningDelta)>() + opening_code.len() + delta.name().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::GameResult;

    #[test]
    fn test_merge_creates_then_increments() {
        let mut acc = AggregationAccumulator::new();
        acc.merge("B01", &OpeningDelta::for_game("Scandinavian", GameResult::WhiteWin, 1500, 1600));
        acc.merge("B01", &OpeningDelta::for_game("Renamed", GameResult::Draw, 1800, 1520));
        acc.merge("C20", &OpeningDelta::for_game("King's Pawn", GameResult::BlackWin, 1400, 1450));

        assert_eq!(acc.len(), 2);
        let b01 = acc.get("B01").unwrap();
        assert_eq!(b01.name(), "Scandinavian");
        assert_eq!(b01.total_games, 2);
        assert_eq!(b01.white_wins, 1);
        assert_eq!(b01.draws, 1);
    }

    #[test]
    fn test_drain_clears() {
        let mut acc = AggregationAccumulator::new();
        acc.merge("A00", &OpeningDelta::for_game("Unknown", GameResult::Unknown, 1500, 1500));
        assert!(acc.estimated_bytes() > 0);

        let drained = acc.drain();
        assert_eq!(drained.len(), 1);
        assert!(acc.is_empty());
        assert_eq!(acc.estimated_bytes(), 0);
    }

    #[test]
    fn test_partitioned_drains_sum_to_single_drain() {
        let deltas = [
            ("B01", OpeningDelta::for_game("Scandinavian", GameResult::WhiteWin, 1500, 1600)),
            ("C20", OpeningDelta::for_game("King's Pawn", GameResult::Draw, 1700, 1700)),
            ("B01", OpeningDelta::for_game("Scandinavian", GameResult::BlackWin, 1550, 1650)),
        ];

        let mut once = AggregationAccumulator::new();
        for (code, delta) in &deltas {
            once.merge(code, delta);
        }
        let once = once.drain();

        let mut split = AggregationAccumulator::new();
        let mut combined: BTreeMap<String, OpeningDelta> = BTreeMap::new();
        for (code, delta) in &deltas {
            split.merge(code, delta);
            for (code, total) in split.drain() {
                combined.entry(code).or_default().merge(&total);
            }
        }

        assert_eq!(once, combined);
    }
}
