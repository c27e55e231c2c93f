//! Replication units produced by namespace mutations.

use crate::types::Lsn;
use crate::wal::{SharedWalRecord, WalRecord};
use std::sync::OnceLock;

/// One committed record on its way to replication consumers.
///
/// The shared form is built on first use and cached, so every consumer of
/// the same update sees the same buffer.
#[derive(Debug)]
pub struct UpdateRecord {
    ns_name: String,
    lsn: Lsn,
    upstream_lsn: Lsn,
    record: WalRecord,
    shared: OnceLock<SharedWalRecord>,
}

impl UpdateRecord {
    /// Creates an update for namespace `ns_name`.
    pub fn new(ns_name: impl Into<String>, lsn: Lsn, upstream_lsn: Lsn, record: WalRecord) -> Self {
        Self {
            ns_name: ns_name.into(),
            lsn,
            upstream_lsn,
            record,
            shared: OnceLock::new(),
        }
    }

    /// Namespace name.
    #[must_use]
    pub fn ns_name(&self) -> &str {
        &self.ns_name
    }

    /// LSN assigned by the originating namespace.
    #[must_use]
    pub fn lsn(&self) -> Lsn {
        self.lsn
    }

    /// Upstream LSN, empty for locally originated records.
    #[must_use]
    pub fn upstream_lsn(&self) -> Lsn {
        self.upstream_lsn
    }

    /// The record.
    #[must_use]
    pub fn record(&self) -> &WalRecord {
        &self.record
    }

    /// Shared form, produced once.
    pub fn shared(&self) -> &SharedWalRecord {
        self.shared.get_or_init(|| {
            self.record
                .get_shared(self.lsn, self.upstream_lsn, &self.ns_name)
        })
    }

    /// Returns true once the shared form has been produced.
    #[must_use]
    pub fn has_shared(&self) -> bool {
        self.shared.get().is_some()
    }
}

/// Ordered updates of one namespace operation. Append order is replication
/// order.
#[derive(Debug, Default)]
pub struct UpdateBatch {
    records: Vec<UpdateRecord>,
}

impl UpdateBatch {
    /// Creates an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an update.
    pub fn push(&mut self, record: UpdateRecord) {
        self.records.push(record);
    }

    /// Number of updates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true when no update was appended.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterates in append order.
    pub fn iter(&self) -> std::slice::Iter<'_, UpdateRecord> {
        self.records.iter()
    }

    /// Moves the updates of `other` to the end of this batch.
    pub fn append(&mut self, other: &mut UpdateBatch) {
        self.records.append(&mut other.records);
    }
}

impl<'a> IntoIterator for &'a UpdateBatch {
    type Item = &'a UpdateRecord;
    type IntoIter = std::slice::Iter<'a, UpdateRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

impl IntoIterator for UpdateBatch {
    type Item = UpdateRecord;
    type IntoIter = std::vec::IntoIter<UpdateRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ServerId;

    #[test]
    fn shared_is_cached() {
        let update = UpdateRecord::new(
            "items",
            Lsn::new(ServerId::new(0), 1),
            Lsn::EMPTY,
            WalRecord::put_meta("a", "b"),
        );
        assert!(!update.has_shared());
        let first = update.shared().clone();
        let second = update.shared().clone();
        assert!(first.shares_buffer_with(&second));
        assert_eq!(first.unpack().unwrap().ns_name, "items");
    }

    #[test]
    fn batch_keeps_order() {
        let mut batch = UpdateBatch::new();
        for i in 0..3 {
            batch.push(UpdateRecord::new(
                "ns",
                Lsn::from_raw(i),
                Lsn::EMPTY,
                WalRecord::empty(),
            ));
        }
        let lsns: Vec<i64> = batch.iter().map(|u| u.lsn().as_i64()).collect();
        assert_eq!(lsns, vec![0, 1, 2]);
    }
}
