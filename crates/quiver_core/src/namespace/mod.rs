//! Namespaces: definitions, the swappable implementation and its facade.

mod copy_policy;
mod definition;
mod facade;
mod implementation;
mod snapshot;
mod state;
mod transaction;
mod wal_ring;

pub use copy_policy::CopyPolicy;
pub use definition::{
    is_system_name, EnumNamespacesOpts, IndexDef, IndexOpts, NamespaceDef, ReplicationState,
    ReplicationStatus, StorageOpts, TagsMatcher,
};
pub use facade::Namespace;
pub use snapshot::{Snapshot, SnapshotChunk, SnapshotRecord};
pub use transaction::{Transaction, TxResult, TxStep};

use crate::error::CoreResult;
use std::path::Path;

/// Reads the definition stored under `root/<name>`, if any.
pub(crate) fn stored_definition(root: &Path, name: &str) -> CoreResult<Option<NamespaceDef>> {
    state::NsState::stored_definition(root, name)
}
