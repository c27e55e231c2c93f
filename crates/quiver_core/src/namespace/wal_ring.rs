//! Bounded in-memory WAL of a namespace.

use crate::error::CoreResult;
use crate::types::Lsn;
use crate::wal::{MarkedPackedWalRecord, WalRecord};
use std::collections::VecDeque;

/// Most recent records of a namespace, oldest first.
#[derive(Debug, Clone, Default)]
pub(crate) struct WalRing {
    records: VecDeque<(Lsn, MarkedPackedWalRecord)>,
    capacity: usize,
    bytes: usize,
}

impl WalRing {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::new(),
            capacity,
            bytes: 0,
        }
    }

    pub(crate) fn push(&mut self, lsn: Lsn, record: MarkedPackedWalRecord) {
        self.bytes += record.packed.len();
        self.records.push_back((lsn, record));
        self.trim();
    }

    pub(crate) fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
        self.trim();
    }

    fn trim(&mut self) {
        while self.records.len() > self.capacity {
            if let Some((_, old)) = self.records.pop_front() {
                self.bytes -= old.packed.len();
            }
        }
    }

    pub(crate) fn clear(&mut self) {
        self.records.clear();
        self.bytes = 0;
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    pub(crate) fn bytes(&self) -> usize {
        self.bytes
    }

    /// Returns true if every record after `from` is still held.
    pub(crate) fn covers(&self, from: Lsn) -> bool {
        if from.is_empty() {
            return false;
        }
        match (self.records.front(), self.records.back()) {
            (Some((first, _)), Some((last, _))) => {
                from.as_i64() + 1 >= first.as_i64() && from <= *last
            }
            _ => false,
        }
    }

    /// Decodes the records written after `from`.
    pub(crate) fn records_after(&self, from: Lsn) -> CoreResult<Vec<(Lsn, WalRecord)>> {
        self.records
            .iter()
            .filter(|(lsn, _)| *lsn > from)
            .map(|(lsn, marked)| Ok((*lsn, marked.unpack()?)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ServerId;

    fn marked(i: i64) -> MarkedPackedWalRecord {
        MarkedPackedWalRecord::pack(ServerId::new(0), &WalRecord::put_meta("k", i.to_string()))
    }

    #[test]
    fn bounded() {
        let mut ring = WalRing::new(3);
        for i in 1..=5 {
            ring.push(Lsn::from_raw(i), marked(i));
        }
        assert_eq!(ring.len(), 3);
        assert!(!ring.covers(Lsn::from_raw(1)));
        assert!(ring.covers(Lsn::from_raw(2)));
        assert!(ring.covers(Lsn::from_raw(5)));
        assert!(!ring.covers(Lsn::from_raw(6)));
        assert!(!ring.covers(Lsn::EMPTY));

        let after = ring.records_after(Lsn::from_raw(3)).unwrap();
        assert_eq!(after.len(), 2);
        assert_eq!(after[0].1, WalRecord::put_meta("k", "4"));
    }

    #[test]
    fn bytes_follow_contents() {
        let mut ring = WalRing::new(1);
        ring.push(Lsn::from_raw(1), marked(1));
        let one = ring.bytes();
        ring.push(Lsn::from_raw(2), marked(2));
        assert_eq!(ring.bytes(), one);
        ring.clear();
        assert_eq!(ring.bytes(), 0);
    }
}
