//! Namespace snapshots for follower synchronisation.
//!
//! A follower that is still covered by the leader's WAL ring gets a WAL
//! snapshot: a `WalSync` marker followed by the records it missed. A
//! follower that fell behind gets a full snapshot: a `ForceSync` header
//! chunk describing the namespace, then the items as `RawItem` records.

use super::definition::{IndexDef, NamespaceDef, ReplicationState, ReplicationStatus, TagsMatcher};
use super::state::NsState;
use crate::error::CoreResult;
use crate::item::{decode_document, encode_document};
use crate::replication::UpdateBatch;
use crate::types::{ItemId, Lsn};
use crate::wal::{ModifyMode, WalPayload, WalRecord};
use tracing::{debug, trace};

/// One record of a snapshot with the LSN it was logged under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRecord {
    /// Leader LSN.
    pub lsn: Lsn,
    /// The record.
    pub record: WalRecord,
}

/// A unit of snapshot transfer, applied atomically by the receiver.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotChunk {
    /// Records in apply order.
    pub records: Vec<SnapshotRecord>,
}

impl SnapshotChunk {
    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true for an empty chunk.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Snapshot of a namespace taken from a given LSN.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    /// Chunks in apply order.
    pub chunks: Vec<SnapshotChunk>,
    /// Last LSN of the source when the snapshot was taken.
    pub last_lsn: Lsn,
    /// Whether this is a WAL snapshot rather than a full one.
    pub is_wal: bool,
}

impl Snapshot {
    /// Total records over all chunks.
    #[must_use]
    pub fn records_count(&self) -> usize {
        self.chunks.iter().map(SnapshotChunk::len).sum()
    }
}

impl NsState {
    pub(crate) fn build_snapshot(&self, from: Lsn) -> CoreResult<Snapshot> {
        let last_lsn = self.repl.last_lsn;
        if self.wal.covers(from) {
            let mut records = vec![SnapshotRecord {
                lsn: last_lsn,
                record: WalRecord::wal_sync(self.repl_state().to_json()?),
            }];
            records.extend(
                self.wal
                    .records_after(from)?
                    .into_iter()
                    .map(|(lsn, record)| SnapshotRecord { lsn, record }),
            );
            trace!(ns = %self.def.name, from = %from, records = records.len(), "wal snapshot");
            return Ok(Snapshot {
                chunks: vec![SnapshotChunk { records }],
                last_lsn,
                is_wal: true,
            });
        }

        let at = |record| SnapshotRecord {
            lsn: last_lsn,
            record,
        };
        let mut header = vec![at(WalRecord::force_sync(self.def.to_json()?))];
        if self.def.has_schema() {
            header.push(at(WalRecord::set_schema(self.def.schema_json.clone())));
        }
        header.push(at(WalRecord::tags_matcher(self.tags.encode()?)));
        for (key, value) in &self.meta {
            header.push(at(WalRecord::put_meta(key.clone(), value.clone())));
        }

        let mut chunks = vec![SnapshotChunk { records: header }];
        let chunk_size = self.config.snapshot_chunk_size.max(1);
        let mut current = Vec::with_capacity(chunk_size.min(self.items_count()));
        for (i, row) in self.rows.iter().enumerate() {
            let Some(doc) = row else { continue };
            let id = ItemId::new(i32::try_from(i).unwrap_or(i32::MAX));
            current.push(at(WalRecord::raw_item(id, encode_document(doc)?)));
            if current.len() == chunk_size {
                chunks.push(SnapshotChunk {
                    records: std::mem::take(&mut current),
                });
            }
        }
        if !current.is_empty() {
            chunks.push(SnapshotChunk { records: current });
        }
        debug!(ns = %self.def.name, chunks = chunks.len(), items = self.items_count(), "full snapshot");
        Ok(Snapshot {
            chunks,
            last_lsn,
            is_wal: false,
        })
    }

    fn reset_from(&mut self, mut def: NamespaceDef) -> CoreResult<()> {
        def.name = self.def.name.clone();
        let mut fresh = NsState::new(def, self.server_id, self.config.clone())?;
        fresh.storage_path = self.storage_path.take();
        fresh.storage_dirty = true;
        fresh.lsn_counter = self.lsn_counter;
        fresh.repl = self.repl;
        fresh.wal = std::mem::take(&mut self.wal);
        fresh.wal.clear();
        *self = fresh;
        Ok(())
    }

    pub(crate) fn apply_snapshot_chunk(
        &mut self,
        chunk: &SnapshotChunk,
        updates: &mut UpdateBatch,
    ) -> CoreResult<()> {
        for SnapshotRecord { lsn, record } in &chunk.records {
            let lsn = *lsn;
            match record.payload() {
                WalPayload::ForceSync { definition } => {
                    self.reset_from(NamespaceDef::from_json(definition)?)?;
                    self.repl.status = ReplicationStatus::Syncing;
                    self.emit_from(WalRecord::reset_local_wal(), lsn, updates);
                }
                WalPayload::WalSync { state } => {
                    ReplicationState::from_json(state)?;
                    self.repl.status = ReplicationStatus::Syncing;
                }
                WalPayload::RawItem { cjson, .. } => {
                    let doc = decode_document(cjson)?;
                    self.write_document(doc, ModifyMode::Upsert, false, lsn, updates)?;
                }
                WalPayload::ItemModify { cjson, mode, .. } => {
                    let doc = decode_document(cjson)?;
                    self.write_document(doc, *mode, false, lsn, updates)?;
                }
                WalPayload::UpdateQuery { query } if query.starts_with("TRUNCATE ") => {
                    self.truncate(updates);
                }
                WalPayload::PutMeta { key, value } => self.put_meta(key, value, updates)?,
                WalPayload::SetSchema { schema } => self.set_schema(schema, updates)?,
                WalPayload::TagsMatcher { data } => {
                    self.replace_tags_matcher(TagsMatcher::decode(data)?, updates)?;
                }
                WalPayload::IndexAdd { index } => {
                    let index = IndexDef::from_json(index)?;
                    if self.def.indexes.iter().any(|i| i.name == index.name) {
                        self.update_index(index, updates)?;
                    } else {
                        self.add_index(index, updates)?;
                    }
                }
                WalPayload::IndexUpdate { index } => {
                    self.update_index(IndexDef::from_json(index)?, updates)?;
                }
                WalPayload::IndexDrop { index } => {
                    let index = IndexDef::from_json(index)?;
                    self.drop_index(&index.name, updates)?;
                }
                other => {
                    trace!(ns = %self.def.name, kind = %other.record_type(), "snapshot record skipped");
                }
            }
            if !lsn.is_empty() {
                self.repl.upstream_lsn = lsn;
            }
        }
        self.repl.status = ReplicationStatus::Idle;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NamespaceConfig;
    use crate::item::Item;
    use crate::namespace::IndexOpts;
    use crate::types::ServerId;
    use crate::wal::WalRecordType;

    fn state(server: i16, config: NamespaceConfig) -> NsState {
        let def = NamespaceDef::new("items")
            .add_index(IndexDef::new("id", "hash", "int", IndexOpts::pk()));
        NsState::new(def, ServerId::new(server), config).unwrap()
    }

    fn fill(s: &mut NsState, n: i64) {
        let mut updates = UpdateBatch::new();
        for i in 0..n {
            let mut item = Item::new().with("id", i).with("v", format!("v{i}"));
            s.modify(&mut item, ModifyMode::Upsert, false, &mut updates)
                .unwrap();
        }
    }

    #[test]
    fn full_snapshot_chunks() {
        let mut leader = state(1, NamespaceConfig::new().snapshot_chunk_size(4));
        let mut updates = UpdateBatch::new();
        leader.put_meta("k", "v", &mut updates).unwrap();
        fill(&mut leader, 10);

        let snap = leader.build_snapshot(Lsn::EMPTY).unwrap();
        assert!(!snap.is_wal);
        // header + 4 + 4 + 2
        assert_eq!(snap.chunks.len(), 4);
        assert_eq!(
            snap.chunks[0].records[0].record.record_type(),
            WalRecordType::ForceSync
        );

        let mut follower = state(2, NamespaceConfig::default());
        fill(&mut follower, 3);
        let mut updates = UpdateBatch::new();
        for chunk in &snap.chunks {
            follower.apply_snapshot_chunk(chunk, &mut updates).unwrap();
        }
        assert_eq!(follower.items_count(), 10);
        assert_eq!(follower.get_meta("k").as_deref(), Some("v"));
        assert_eq!(follower.repl_state().upstream_lsn, snap.last_lsn);
        assert_eq!(follower.repl_state().status, ReplicationStatus::Idle);
        assert!(updates
            .iter()
            .any(|u| u.record().record_type() == WalRecordType::ResetLocalWal));
    }

    #[test]
    fn wal_snapshot_after_lsn() {
        let mut leader = state(1, NamespaceConfig::default());
        fill(&mut leader, 5);
        let from = leader.repl_state().last_lsn;
        let mut updates = UpdateBatch::new();
        leader.put_meta("after", "1", &mut updates).unwrap();

        let snap = leader.build_snapshot(from).unwrap();
        assert!(snap.is_wal);
        assert_eq!(snap.records_count(), 2);
        assert_eq!(
            snap.chunks[0].records[1].record,
            WalRecord::put_meta("after", "1")
        );

        let mut follower = state(2, NamespaceConfig::default());
        let mut updates = UpdateBatch::new();
        follower
            .apply_snapshot_chunk(&snap.chunks[0], &mut updates)
            .unwrap();
        assert_eq!(follower.get_meta("after").as_deref(), Some("1"));
    }

    #[test]
    fn falls_back_to_full_when_ring_is_short() {
        let mut leader = state(1, NamespaceConfig::new().wal_size(2));
        fill(&mut leader, 5);
        let snap = leader.build_snapshot(Lsn::new(ServerId::new(1), 1)).unwrap();
        assert!(!snap.is_wal);
    }
}
