//! WAL record types.

use crate::types::ItemId;
use std::fmt;

/// Kind tag of a WAL record. The numeric values are part of the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum WalRecordType {
    /// No-op record; packs to zero bytes.
    Empty = 0,
    /// Replication state snapshot.
    ReplState = 1,
    /// Item touched by row id.
    ItemUpdate = 2,
    /// Item written or deleted, carrying its encoded document.
    ItemModify = 3,
    /// Index created.
    IndexAdd = 4,
    /// Index dropped.
    IndexDrop = 5,
    /// Index definition changed.
    IndexUpdate = 6,
    /// Metadata key stored.
    PutMeta = 7,
    /// Update or delete query executed.
    UpdateQuery = 8,
    /// Namespace created.
    NamespaceAdd = 9,
    /// Namespace dropped.
    NamespaceDrop = 10,
    /// Namespace renamed.
    NamespaceRename = 11,
    /// Transaction started.
    InitTransaction = 12,
    /// Transaction committed.
    CommitTransaction = 13,
    /// Start of a full resynchronisation.
    ForceSync = 14,
    /// Schema replaced.
    SetSchema = 15,
    /// Start of a WAL-based synchronisation.
    WalSync = 16,
    /// Tags matcher replaced.
    TagsMatcher = 17,
    /// Local WAL discarded.
    ResetLocalWal = 18,
    /// Raw stored item, used by snapshots.
    RawItem = 19,
}

impl WalRecordType {
    /// Every record type, in tag order.
    pub const ALL: [Self; 20] = [
        Self::Empty,
        Self::ReplState,
        Self::ItemUpdate,
        Self::ItemModify,
        Self::IndexAdd,
        Self::IndexDrop,
        Self::IndexUpdate,
        Self::PutMeta,
        Self::UpdateQuery,
        Self::NamespaceAdd,
        Self::NamespaceDrop,
        Self::NamespaceRename,
        Self::InitTransaction,
        Self::CommitTransaction,
        Self::ForceSync,
        Self::SetSchema,
        Self::WalSync,
        Self::TagsMatcher,
        Self::ResetLocalWal,
        Self::RawItem,
    ];

    /// Converts a tag byte to a record type.
    pub fn from_byte(b: u8) -> Option<Self> {
        Self::ALL.get(usize::from(b)).copied()
    }

    /// Converts the record type to a tag byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Name used in dumps.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Empty => "<WalEmpty>",
            Self::ReplState => "WalReplState",
            Self::ItemUpdate => "ItemUpdate",
            Self::ItemModify => "ItemModify",
            Self::IndexAdd => "IndexAdd",
            Self::IndexDrop => "IndexDrop",
            Self::IndexUpdate => "IndexUpdate",
            Self::PutMeta => "PutMeta",
            Self::UpdateQuery => "UpdateQuery",
            Self::NamespaceAdd => "NamespaceAdd",
            Self::NamespaceDrop => "NamespaceDrop",
            Self::NamespaceRename => "NamespaceRename",
            Self::InitTransaction => "InitTransaction",
            Self::CommitTransaction => "CommitTransaction",
            Self::ForceSync => "ForceSync",
            Self::SetSchema => "SetSchema",
            Self::WalSync => "WalSync",
            Self::TagsMatcher => "TagsMatcher",
            Self::ResetLocalWal => "ResetLocalWal",
            Self::RawItem => "RawItem",
        }
    }
}

impl fmt::Display for WalRecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How an `ItemModify` record changed the item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ModifyMode {
    /// Existing item overwritten.
    Update = 0,
    /// New item inserted.
    Insert = 1,
    /// Item inserted or overwritten.
    Upsert = 2,
    /// Item removed.
    Delete = 3,
}

impl ModifyMode {
    /// Converts a byte to a mode.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Update),
            1 => Some(Self::Insert),
            2 => Some(Self::Upsert),
            3 => Some(Self::Delete),
            _ => None,
        }
    }

    /// Converts the mode to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for ModifyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Update => "Update",
            Self::Insert => "Insert",
            Self::Upsert => "Upsert",
            Self::Delete => "Delete",
        };
        f.write_str(s)
    }
}

/// Kind-specific data of a WAL record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalPayload {
    /// No data.
    Empty,
    /// Replication state as JSON.
    ReplState {
        /// Serialized state.
        state: String,
    },
    /// Row touched.
    ItemUpdate {
        /// Row id.
        id: ItemId,
    },
    /// Item written or deleted.
    ItemModify {
        /// Encoded document.
        cjson: Vec<u8>,
        /// Tags matcher version the document was encoded with.
        tm_version: i32,
        /// What happened to the item.
        mode: ModifyMode,
    },
    /// Index created.
    IndexAdd {
        /// Index definition JSON.
        index: String,
    },
    /// Index dropped.
    IndexDrop {
        /// Index definition JSON.
        index: String,
    },
    /// Index changed.
    IndexUpdate {
        /// Index definition JSON.
        index: String,
    },
    /// Metadata stored.
    PutMeta {
        /// Metadata key.
        key: String,
        /// Metadata value.
        value: String,
    },
    /// Query executed.
    UpdateQuery {
        /// Query text.
        query: String,
    },
    /// Namespace created.
    NamespaceAdd {
        /// Namespace definition JSON.
        definition: String,
    },
    /// Namespace dropped.
    NamespaceDrop,
    /// Namespace renamed.
    NamespaceRename {
        /// Name after the rename.
        new_name: String,
    },
    /// Transaction started.
    InitTransaction,
    /// Transaction committed.
    CommitTransaction,
    /// Full resync start.
    ForceSync {
        /// Namespace definition JSON.
        definition: String,
    },
    /// Schema replaced.
    SetSchema {
        /// Schema JSON.
        schema: String,
    },
    /// WAL sync start.
    WalSync {
        /// Replication state JSON.
        state: String,
    },
    /// Tags matcher replaced.
    TagsMatcher {
        /// Encoded tags matcher.
        data: Vec<u8>,
    },
    /// Local WAL discarded.
    ResetLocalWal,
    /// Stored item.
    RawItem {
        /// Row id.
        id: ItemId,
        /// Encoded document.
        cjson: Vec<u8>,
    },
}

impl WalPayload {
    /// Returns the record type matching this payload.
    #[must_use]
    pub fn record_type(&self) -> WalRecordType {
        match self {
            Self::Empty => WalRecordType::Empty,
            Self::ReplState { .. } => WalRecordType::ReplState,
            Self::ItemUpdate { .. } => WalRecordType::ItemUpdate,
            Self::ItemModify { .. } => WalRecordType::ItemModify,
            Self::IndexAdd { .. } => WalRecordType::IndexAdd,
            Self::IndexDrop { .. } => WalRecordType::IndexDrop,
            Self::IndexUpdate { .. } => WalRecordType::IndexUpdate,
            Self::PutMeta { .. } => WalRecordType::PutMeta,
            Self::UpdateQuery { .. } => WalRecordType::UpdateQuery,
            Self::NamespaceAdd { .. } => WalRecordType::NamespaceAdd,
            Self::NamespaceDrop => WalRecordType::NamespaceDrop,
            Self::NamespaceRename { .. } => WalRecordType::NamespaceRename,
            Self::InitTransaction => WalRecordType::InitTransaction,
            Self::CommitTransaction => WalRecordType::CommitTransaction,
            Self::ForceSync { .. } => WalRecordType::ForceSync,
            Self::SetSchema { .. } => WalRecordType::SetSchema,
            Self::WalSync { .. } => WalRecordType::WalSync,
            Self::TagsMatcher { .. } => WalRecordType::TagsMatcher,
            Self::ResetLocalWal => WalRecordType::ResetLocalWal,
            Self::RawItem { .. } => WalRecordType::RawItem,
        }
    }
}

/// One logged mutation.
///
/// Records are built through the per-kind constructors or by decoding a
/// packed form; the payload always matches the record type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalRecord {
    pub(crate) payload: WalPayload,
    pub(crate) in_transaction: bool,
}

impl Default for WalRecord {
    fn default() -> Self {
        Self::empty()
    }
}

impl WalRecord {
    pub(crate) const fn from_parts(payload: WalPayload, in_transaction: bool) -> Self {
        Self {
            payload,
            in_transaction,
        }
    }

    const fn plain(payload: WalPayload) -> Self {
        Self::from_parts(payload, false)
    }

    /// Empty record.
    #[must_use]
    pub const fn empty() -> Self {
        Self::plain(WalPayload::Empty)
    }

    /// Replication state record.
    pub fn repl_state(state: impl Into<String>) -> Self {
        Self::plain(WalPayload::ReplState {
            state: state.into(),
        })
    }

    /// Row-touched record.
    #[must_use]
    pub const fn item_update(id: ItemId, in_transaction: bool) -> Self {
        Self::from_parts(WalPayload::ItemUpdate { id }, in_transaction)
    }

    /// Item modification record.
    pub fn item_modify(
        cjson: impl Into<Vec<u8>>,
        tm_version: i32,
        mode: ModifyMode,
        in_transaction: bool,
    ) -> Self {
        Self::from_parts(
            WalPayload::ItemModify {
                cjson: cjson.into(),
                tm_version,
                mode,
            },
            in_transaction,
        )
    }

    /// Index creation record.
    pub fn index_add(index: impl Into<String>) -> Self {
        Self::plain(WalPayload::IndexAdd {
            index: index.into(),
        })
    }

    /// Index drop record.
    pub fn index_drop(index: impl Into<String>) -> Self {
        Self::plain(WalPayload::IndexDrop {
            index: index.into(),
        })
    }

    /// Index update record.
    pub fn index_update(index: impl Into<String>) -> Self {
        Self::plain(WalPayload::IndexUpdate {
            index: index.into(),
        })
    }

    /// Metadata record.
    pub fn put_meta(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::plain(WalPayload::PutMeta {
            key: key.into(),
            value: value.into(),
        })
    }

    /// Query record.
    pub fn update_query(query: impl Into<String>, in_transaction: bool) -> Self {
        Self::from_parts(
            WalPayload::UpdateQuery {
                query: query.into(),
            },
            in_transaction,
        )
    }

    /// Namespace creation record.
    pub fn namespace_add(definition: impl Into<String>) -> Self {
        Self::plain(WalPayload::NamespaceAdd {
            definition: definition.into(),
        })
    }

    /// Namespace drop record.
    #[must_use]
    pub const fn namespace_drop() -> Self {
        Self::plain(WalPayload::NamespaceDrop)
    }

    /// Namespace rename record.
    pub fn namespace_rename(new_name: impl Into<String>) -> Self {
        Self::plain(WalPayload::NamespaceRename {
            new_name: new_name.into(),
        })
    }

    /// Transaction start marker.
    #[must_use]
    pub const fn init_transaction() -> Self {
        Self::plain(WalPayload::InitTransaction)
    }

    /// Transaction commit marker.
    #[must_use]
    pub const fn commit_transaction() -> Self {
        Self::plain(WalPayload::CommitTransaction)
    }

    /// Full resync marker.
    pub fn force_sync(definition: impl Into<String>) -> Self {
        Self::plain(WalPayload::ForceSync {
            definition: definition.into(),
        })
    }

    /// Schema record.
    pub fn set_schema(schema: impl Into<String>) -> Self {
        Self::plain(WalPayload::SetSchema {
            schema: schema.into(),
        })
    }

    /// WAL sync marker.
    pub fn wal_sync(state: impl Into<String>) -> Self {
        Self::plain(WalPayload::WalSync {
            state: state.into(),
        })
    }

    /// Tags matcher record.
    pub fn tags_matcher(data: impl Into<Vec<u8>>) -> Self {
        Self::plain(WalPayload::TagsMatcher { data: data.into() })
    }

    /// Local WAL reset marker.
    #[must_use]
    pub const fn reset_local_wal() -> Self {
        Self::plain(WalPayload::ResetLocalWal)
    }

    /// Raw item record.
    pub fn raw_item(id: ItemId, cjson: impl Into<Vec<u8>>) -> Self {
        Self::plain(WalPayload::RawItem {
            id,
            cjson: cjson.into(),
        })
    }

    /// Returns the record type.
    #[must_use]
    pub fn record_type(&self) -> WalRecordType {
        self.payload.record_type()
    }

    /// Returns the kind-specific data.
    #[must_use]
    pub fn payload(&self) -> &WalPayload {
        &self.payload
    }

    /// Returns true if the record was written inside a transaction.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_type_tags() {
        for (i, t) in WalRecordType::ALL.iter().enumerate() {
            assert_eq!(usize::from(t.as_byte()), i);
            assert_eq!(WalRecordType::from_byte(t.as_byte()), Some(*t));
        }
        assert_eq!(WalRecordType::from_byte(20), None);
        assert_eq!(WalRecordType::RawItem.as_byte(), 19);
    }

    #[test]
    fn constructors_match_types() {
        assert_eq!(WalRecord::empty().record_type(), WalRecordType::Empty);
        assert_eq!(
            WalRecord::put_meta("k", "v").record_type(),
            WalRecordType::PutMeta
        );
        let r = WalRecord::item_modify(vec![1, 2], 3, ModifyMode::Upsert, true);
        assert_eq!(r.record_type(), WalRecordType::ItemModify);
        assert!(r.in_transaction());
        assert!(!WalRecord::commit_transaction().in_transaction());
    }

    #[test]
    fn modify_mode_values() {
        assert_eq!(ModifyMode::Update.as_byte(), 0);
        assert_eq!(ModifyMode::Delete.as_byte(), 3);
        assert_eq!(ModifyMode::from_byte(2), Some(ModifyMode::Upsert));
        assert_eq!(ModifyMode::from_byte(4), None);
    }
}
