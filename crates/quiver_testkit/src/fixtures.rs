//! Test fixtures and database helpers.
//!
//! Provides convenience functions for setting up test databases,
//! namespaces and replicators.

use parking_lot::Mutex;
use quiver_core::{
    Config, CoreError, CoreResult, Database, IndexDef, IndexOpts, Item, Lsn, MutationContext,
    Namespace, NamespaceConfig, NamespaceDef, NoopReplicator, NsDataReplicator, ServerId,
    UpdateBatch, WalRecord,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// Definition with an `id` primary key and a `value` index.
pub fn items_def(name: &str) -> NamespaceDef {
    NamespaceDef::new(name)
        .add_index(IndexDef::new("id", "hash", "int", IndexOpts::pk()))
        .add_index(IndexDef::new("value", "tree", "string", IndexOpts::default()))
}

/// Item with primary key `id` and a derived `value`.
pub fn item(id: i64) -> Item {
    Item::new().with("id", id).with("value", format!("value-{id}"))
}

/// Creates a standalone namespace over [`items_def`].
pub fn items_namespace(name: &str, config: NamespaceConfig) -> Namespace {
    items_namespace_with(name, config, Arc::new(NoopReplicator))
}

/// Creates a standalone namespace reporting to `replicator`.
pub fn items_namespace_with(
    name: &str,
    config: NamespaceConfig,
    replicator: Arc<dyn NsDataReplicator>,
) -> Namespace {
    Namespace::new(items_def(name), ServerId::new(1), config, replicator)
        .expect("Failed to create namespace")
}

/// Runs a test with a fresh `items` namespace and a plain context.
pub fn with_items_namespace<F, R>(f: F) -> R
where
    F: FnOnce(&Namespace, &MutationContext) -> R,
{
    let ns = items_namespace("items", NamespaceConfig::default());
    f(&ns, &MutationContext::new())
}

/// A test database with automatic cleanup.
pub struct TestDatabase {
    /// The database instance.
    pub db: Database,
    /// The temporary directory (kept alive to prevent cleanup).
    temp_dir: Option<TempDir>,
}

impl TestDatabase {
    /// Creates a new in-memory test database.
    pub fn memory() -> Self {
        Self {
            db: Database::new(Config::default()),
            temp_dir: None,
        }
    }

    /// Creates a database storing namespaces under a temporary directory.
    pub fn with_storage() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db = Database::new(Config::default()).with_storage_root(temp_dir.path().join("data"));
        Self {
            db,
            temp_dir: Some(temp_dir),
        }
    }

    /// Creates a database with a journal in a temporary directory.
    pub fn with_journal() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db = Database::with_journal(Config::default(), temp_dir.path().join("journal.wal"))
            .expect("Failed to open journal");
        Self {
            db,
            temp_dir: Some(temp_dir),
        }
    }

    /// Temporary directory, if any.
    pub fn dir(&self) -> Option<&Path> {
        self.temp_dir.as_ref().map(TempDir::path)
    }

    /// Journal path for databases created by [`TestDatabase::with_journal`].
    pub fn journal_path(&self) -> Option<PathBuf> {
        self.dir().map(|d| d.join("journal.wal"))
    }
}

impl std::ops::Deref for TestDatabase {
    type Target = Database;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

/// Runs a test with a temporary in-memory database.
pub fn with_temp_db<F, R>(f: F) -> R
where
    F: FnOnce(&Database) -> R,
{
    let test_db = TestDatabase::memory();
    f(&test_db.db)
}

/// One update captured by a [`RecordingReplicator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedUpdate {
    /// Namespace name.
    pub ns_name: String,
    /// Assigned LSN.
    pub lsn: Lsn,
    /// The record.
    pub record: WalRecord,
}

/// Replicator that keeps every update it receives.
#[derive(Debug, Default)]
pub struct RecordingReplicator {
    updates: Mutex<Vec<RecordedUpdate>>,
    fail: AtomicBool,
}

impl RecordingReplicator {
    /// Creates an empty recorder.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes subsequent hand-offs fail after recording.
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::Relaxed);
    }

    /// Everything recorded so far.
    pub fn updates(&self) -> Vec<RecordedUpdate> {
        self.updates.lock().clone()
    }

    /// Recorded records only.
    pub fn records(&self) -> Vec<WalRecord> {
        self.updates.lock().iter().map(|u| u.record.clone()).collect()
    }

    /// Forgets everything recorded so far.
    pub fn clear(&self) {
        self.updates.lock().clear();
    }
}

impl NsDataReplicator for RecordingReplicator {
    fn replicate(&self, batch: UpdateBatch) -> CoreResult<()> {
        let mut updates = self.updates.lock();
        for update in &batch {
            updates.push(RecordedUpdate {
                ns_name: update.ns_name().to_string(),
                lsn: update.lsn(),
                record: update.record().clone(),
            });
        }
        if self.fail.load(Ordering::Relaxed) {
            return Err(CoreError::logic("replication target unavailable"));
        }
        Ok(())
    }
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;
    use quiver_core::Transaction;

    /// Namespace pre-populated with `count` items.
    pub fn populated_namespace(count: i64, config: NamespaceConfig) -> Namespace {
        let ns = items_namespace("items", config);
        let ctx = MutationContext::new();
        for id in 0..count {
            ns.upsert(&mut item(id), &ctx).expect("Failed to populate namespace");
        }
        ns
    }

    /// Transaction upserting ids `start..start + count`.
    pub fn upsert_transaction(ns_name: &str, start: i64, count: i64) -> Transaction {
        let mut tx = Transaction::new(ns_name);
        for id in start..start + count {
            tx.upsert(item(id));
        }
        tx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_replicator_captures_updates() {
        let recorder = RecordingReplicator::new();
        let ns = items_namespace_with("items", NamespaceConfig::default(), recorder.clone());
        let ctx = MutationContext::new();
        ns.put_meta("k", "v", &ctx).unwrap();
        assert_eq!(recorder.records(), vec![WalRecord::put_meta("k", "v")]);
    }

    #[test]
    fn storage_database_uses_temp_dir() {
        let db = TestDatabase::with_storage();
        assert!(db.storage_root().unwrap().starts_with(db.dir().unwrap()));
    }
}
