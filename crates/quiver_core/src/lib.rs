//! # QuiverDB Core
//!
//! Namespace access layer of QuiverDB.
//!
//! This crate provides:
//! - [`MutationContext`] for cancelable, deadline-bound operations
//! - the WAL record model with its packed, marked and shared encodings
//! - computed field values (`now`, `serial`) evaluated at write time
//! - the [`Namespace`] facade with copy-on-write transaction commits,
//!   retry on invalidated implementations, and rename
//! - a [`Database`] registry feeding committed updates into a
//!   [`ReplicationHub`] and an optional on-disk journal

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod context;
mod database;
mod error;
mod functions;
mod item;
mod namespace;
mod replication;
mod stats;
mod types;
mod wal;

pub use config::{Config, ConfigProvider, NamespaceConfig, DEFAULT_NAMESPACE_KEY};
pub use context::{
    lock_with_context, read_with_context, write_with_context, Activity, ActivityRegistry,
    ActivitySnapshot, ActivityState, CancelHandle, ContextedCondvar, MutationContext,
};
pub use database::Database;
pub use error::{CancelReason, CoreError, CoreResult, ErrorKind};
pub use functions::{
    now, serial_meta_key, FunctionCall, FunctionExecutor, SerialSource, SERIAL_META_PREFIX,
};
pub use item::{
    cjson_viewer, decode_document, document_to_json, encode_document, Document, Item, PkValue,
    Variant,
};
pub use namespace::{
    is_system_name, CopyPolicy, EnumNamespacesOpts, IndexDef, IndexOpts, Namespace, NamespaceDef,
    ReplicationState, ReplicationStatus, Snapshot, SnapshotChunk, SnapshotRecord, StorageOpts,
    TagsMatcher, Transaction, TxResult, TxStep,
};
pub use replication::{
    NoopReplicator, NsDataReplicator, ReplicationHub, UpdateBatch, UpdateRecord, UpdatesFilter,
    UpdatesObservers, UpdatesSubscription, DEFAULT_SUBSCRIBER_QUEUE_CAPACITY,
};
pub use stats::{NamespaceCounters, NamespaceMemStat, NamespacePerfStat, TxStat};
pub use types::{ItemId, Lsn, LsnPair, ServerId};
pub use wal::{
    read_journal, JournalContents, MarkedPackedWalRecord, ModifyMode, PackedWalRecord,
    SharedWalRecord, SharedWalRecordView, WalJournal, WalPayload, WalRecord, WalRecordType,
    IN_TRANSACTION_FLAG,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
