//! Pending records between flushes

use crate::model::GameRecord;

/// Upper bound on the up-front allocation, whatever the record threshold
const MAX_PREALLOCATED: usize = 4096;

/// Records waiting for the next bulk insert, with a running size estimate.
///
/// The estimate is updated on every push and reset on `clear`, so the flush
/// check never walks the buffer.
pub struct RecordBuffer {
    records: Vec<GameRecord>,
    bytes: usize,
    max_records: usize,
    max_bytes: usize,
}

impl RecordBuffer {
    pub fn new(max_records: usize, max_bytes: usize) -> Self {
        Self {
            records: Vec::with_capacity(max_records.min(MAX_PREALLOCATED)),
            bytes: 0,
            max_records,
            max_bytes,
        }
    }

    pub fn push(&mut self, record: GameRecord) {
        self.bytes += record.estimated_size();
        self.records.push(record);
    }

    pub fn records(&self) -> &[GameRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn estimated_bytes(&self) -> usize {
        self.bytes
    }

    /// True once either threshold is reached; `extra_bytes` covers other
    /// pending state held alongside the records
    pub fn should_flush(&self, extra_bytes: usize) -> bool {
        self.records.len() >= self.max_records || self.bytes + extra_bytes >= self.max_bytes
    }

    /// Drop the held records, keeping the allocation
    pub fn clear(&mut self) {
        self.records.clear();
        self.bytes = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PlayerId;
    use crate::pgn::parse_block;

    fn record(moves: &str) -> GameRecord {
        parse_block(&format!("[White \"a\"]\n\n{}", moves))
            .unwrap()
            .into_record(PlayerId::new("1"), PlayerId::new("2"))
    }

    #[test]
    fn test_record_threshold() {
        let mut buffer = RecordBuffer::new(2, usize::MAX);
        buffer.push(record("e4 e5"));
        assert!(!buffer.should_flush(0));
        buffer.push(record("d4 d5"));
        assert!(buffer.should_flush(0));

        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.estimated_bytes(), 0);
        assert!(!buffer.should_flush(0));
    }

    #[test]
    fn test_byte_threshold() {
        let small = record("e4 e5");
        let size = small.estimated_size();
        let mut buffer = RecordBuffer::new(100, size * 2);

        buffer.push(small.clone());
        assert!(!buffer.should_flush(0));
        assert!(buffer.should_flush(size));
        buffer.push(small);
        assert!(buffer.should_flush(0));
    }

    #[test]
    fn test_long_games_weigh_more() {
        let short = record("e4 e5");
        let long = record(&"Nf3 Nf6 Ng1 Ng8 ".repeat(50));
        assert!(long.estimated_size() > short.estimated_size());
    }
}
