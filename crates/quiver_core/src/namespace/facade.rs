//! Stable handle to a namespace whose implementation can be swapped.
//!
//! Callers hold a [`Namespace`] for the lifetime of the namespace. Behind it
//! sits a published implementation that large transactions replace with a
//! modified copy and renames replace with a moved one. Every forwarded call
//! re-resolves the published implementation and retries when the one it
//! resolved was superseded in the meantime.

use super::copy_policy::CopyPolicy;
use super::definition::{
    is_system_name, IndexDef, NamespaceDef, ReplicationState, StorageOpts, TagsMatcher,
};
use super::implementation::NamespaceImpl;
use super::snapshot::{Snapshot, SnapshotChunk};
use super::state::NsState;
use super::transaction::{Transaction, TxResult};
use crate::config::{ConfigProvider, NamespaceConfig};
use crate::context::{lock_with_context, MutationContext};
use crate::error::{CoreError, CoreResult};
use crate::item::{Item, Variant};
use crate::replication::{NsDataReplicator, UpdateBatch};
use crate::stats::{NamespaceCounters, NamespaceMemStat, NamespacePerfStat};
use crate::types::{ItemId, Lsn, LsnPair, ServerId};
use crate::wal::{ModifyMode, WalRecord};
use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error};

/// Clears the copy-in-progress flag when the copy attempt ends.
struct CopyInProgress<'a>(&'a AtomicBool);

impl<'a> CopyInProgress<'a> {
    fn set(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        Self(flag)
    }
}

impl Drop for CopyInProgress<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Access facade of one namespace.
///
/// # Concurrency
///
/// - Reads run against whatever implementation is published when they
///   start.
/// - Mutations wait for an in-progress copy to be published first.
/// - At most one copy of the namespace exists at any time.
#[derive(Debug)]
pub struct Namespace {
    current: RwLock<Arc<NamespaceImpl>>,
    has_copy: AtomicBool,
    cloner: Mutex<()>,
    copy_policy: Mutex<CopyPolicy>,
    max_retries: AtomicU32,
    check_interval_ms: AtomicU64,
    counters: NamespaceCounters,
}

impl Namespace {
    /// Creates a namespace from its definition.
    pub fn new(
        def: NamespaceDef,
        server_id: ServerId,
        config: NamespaceConfig,
        replicator: Arc<dyn NsDataReplicator>,
    ) -> CoreResult<Self> {
        let imp = NamespaceImpl::new(def, server_id, config.clone(), replicator)?;
        Ok(Self {
            current: RwLock::new(Arc::new(imp)),
            has_copy: AtomicBool::new(false),
            cloner: Mutex::new(()),
            copy_policy: Mutex::new(CopyPolicy::from(&config)),
            max_retries: AtomicU32::new(config.max_invalidation_retries.max(1)),
            check_interval_ms: AtomicU64::new(config.cond_check_interval_ms),
            counters: NamespaceCounters::new(),
        })
    }

    fn resolve(&self) -> Arc<NamespaceImpl> {
        Arc::clone(&self.current.read())
    }

    fn publish(&self, imp: NamespaceImpl) {
        *self.current.write() = Arc::new(imp);
    }

    fn interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms.load(Ordering::Relaxed))
    }

    fn await_main(&self, ctx: &MutationContext) -> CoreResult<()> {
        if self.has_copy.load(Ordering::Acquire) {
            let _wait = lock_with_context(
                &self.cloner,
                ctx,
                self.interval(),
                "waiting for namespace copy",
            )?;
        }
        Ok(())
    }

    fn with_retry<R>(
        &self,
        ctx: &MutationContext,
        mutating: bool,
        mut f: impl FnMut(&NamespaceImpl) -> CoreResult<R>,
    ) -> CoreResult<R> {
        let max = self.max_retries.load(Ordering::Relaxed);
        let mut attempts = 0u32;
        loop {
            if mutating {
                self.await_main(ctx)?;
            }
            let imp = self.resolve();
            match f(&imp) {
                Err(e) if e.is_invalidated() => {
                    attempts += 1;
                    self.counters.record_retry();
                    if attempts >= max {
                        error!(attempts, "namespace implementation kept being invalidated");
                        return Err(CoreError::RetryExhausted { attempts });
                    }
                    thread::yield_now();
                }
                other => return other,
            }
        }
    }

    fn read<R>(
        &self,
        ctx: &MutationContext,
        what: &str,
        mut f: impl FnMut(&NsState) -> CoreResult<R>,
    ) -> CoreResult<R> {
        self.with_retry(ctx, false, |imp| imp.inspect(ctx, what, &mut f))
    }

    fn write<R>(
        &self,
        ctx: &MutationContext,
        what: &str,
        mut f: impl FnMut(&mut NsState, &mut UpdateBatch) -> CoreResult<R>,
    ) -> CoreResult<R> {
        let result = self.with_retry(ctx, true, |imp| imp.mutate(ctx, what, &mut f))?;
        self.counters.record_commit();
        Ok(result)
    }

    /// Identity of the published implementation. Changes whenever a copy
    /// or a rename is published.
    #[must_use]
    pub fn implementation_id(&self) -> usize {
        Arc::as_ptr(&self.resolve()) as usize
    }

    /// Returns true while a copy-on-write commit is running.
    #[must_use]
    pub fn copy_in_progress(&self) -> bool {
        self.has_copy.load(Ordering::Acquire)
    }

    /// Namespace name.
    pub fn name(&self, ctx: &MutationContext) -> CoreResult<String> {
        self.read(ctx, "name", |s| Ok(s.name().to_string()))
    }

    /// Returns true for system namespaces.
    pub fn is_system(&self, ctx: &MutationContext) -> CoreResult<bool> {
        self.read(ctx, "is system", |s| Ok(is_system_name(s.name())))
    }

    /// Returns true for temporary namespaces.
    pub fn is_temporary(&self, ctx: &MutationContext) -> CoreResult<bool> {
        self.read(ctx, "is temporary", |s| Ok(s.def.is_temporary))
    }

    /// Binds the namespace to `root/<name>`.
    pub fn enable_storage(
        &self,
        root: &Path,
        opts: StorageOpts,
        ctx: &MutationContext,
    ) -> CoreResult<()> {
        self.write(ctx, "enable storage", |s, _| s.enable_storage(root, opts))
    }

    /// Flushes and unbinds storage.
    pub fn close_storage(&self, ctx: &MutationContext) -> CoreResult<()> {
        self.write(ctx, "close storage", |s, _| s.close_storage())
    }

    /// Removes the storage directory.
    pub fn delete_storage(&self, ctx: &MutationContext) -> CoreResult<()> {
        self.write(ctx, "delete storage", |s, _| s.delete_storage())
    }

    /// Storage options.
    pub fn storage_opts(&self, ctx: &MutationContext) -> CoreResult<StorageOpts> {
        self.read(ctx, "storage opts", |s| Ok(s.storage_opts()))
    }

    /// Bound storage directory.
    pub fn storage_path(&self, ctx: &MutationContext) -> CoreResult<Option<PathBuf>> {
        self.read(ctx, "storage path", |s| Ok(s.storage_path().map(Path::to_path_buf)))
    }

    /// Number of stored items.
    pub fn items_count(&self, ctx: &MutationContext) -> CoreResult<usize> {
        self.read(ctx, "items count", |s| Ok(s.items_count()))
    }

    /// Every stored item in row order.
    pub fn items(&self, ctx: &MutationContext) -> CoreResult<Vec<Item>> {
        self.read(ctx, "items", |s| Ok(s.items()))
    }

    /// Adds an index.
    pub fn add_index(&self, index: &IndexDef, ctx: &MutationContext) -> CoreResult<()> {
        self.write(ctx, "add index", |s, u| s.add_index(index.clone(), u))
    }

    /// Replaces the index with the same name.
    pub fn update_index(&self, index: &IndexDef, ctx: &MutationContext) -> CoreResult<()> {
        self.write(ctx, "update index", |s, u| s.update_index(index.clone(), u))
    }

    /// Drops an index by name.
    pub fn drop_index(&self, name: &str, ctx: &MutationContext) -> CoreResult<()> {
        self.write(ctx, "drop index", |s, u| s.drop_index(name, u))
    }

    /// Replaces the JSON schema.
    pub fn set_schema(&self, schema: &str, ctx: &MutationContext) -> CoreResult<()> {
        self.write(ctx, "set schema", |s, u| s.set_schema(schema, u))
    }

    /// Current JSON schema.
    pub fn schema(&self, ctx: &MutationContext) -> CoreResult<String> {
        self.read(ctx, "schema", |s| Ok(s.def.schema_json.clone()))
    }

    fn modify(
        &self,
        item: &mut Item,
        mode: ModifyMode,
        ctx: &MutationContext,
    ) -> CoreResult<Option<ItemId>> {
        self.write(ctx, "modify item", |s, u| s.modify(item, mode, false, u))
    }

    /// Inserts an item. Returns `None` when the primary key already exists.
    ///
    /// Precepts are evaluated first and their values written into `item`.
    pub fn insert(&self, item: &mut Item, ctx: &MutationContext) -> CoreResult<Option<ItemId>> {
        self.modify(item, ModifyMode::Insert, ctx)
    }

    /// Updates an existing item. Returns `None` when it does not exist.
    pub fn update(&self, item: &mut Item, ctx: &MutationContext) -> CoreResult<Option<ItemId>> {
        self.modify(item, ModifyMode::Update, ctx)
    }

    /// Inserts or overwrites an item.
    pub fn upsert(&self, item: &mut Item, ctx: &MutationContext) -> CoreResult<Option<ItemId>> {
        self.modify(item, ModifyMode::Upsert, ctx)
    }

    /// Deletes the item with the primary key of `item`.
    pub fn delete(&self, item: &mut Item, ctx: &MutationContext) -> CoreResult<Option<ItemId>> {
        self.modify(item, ModifyMode::Delete, ctx)
    }

    /// Looks an item up by primary key.
    pub fn get(&self, pk: &Variant, ctx: &MutationContext) -> CoreResult<Option<Item>> {
        self.read(ctx, "get item", |s| s.get(pk))
    }

    /// Removes every item.
    pub fn truncate(&self, ctx: &MutationContext) -> CoreResult<()> {
        self.write(ctx, "truncate", |s, u| {
            s.truncate(u);
            Ok(())
        })
    }

    /// Replaces every item with `items`.
    pub fn refill(&self, items: &[Item], ctx: &MutationContext) -> CoreResult<()> {
        self.write(ctx, "refill", |s, u| s.refill(items.to_vec(), u))
    }

    /// Namespace definition.
    pub fn definition(&self, ctx: &MutationContext) -> CoreResult<NamespaceDef> {
        self.read(ctx, "definition", |s| Ok(s.definition()))
    }

    /// Memory statistics.
    pub fn mem_stat(&self, ctx: &MutationContext) -> CoreResult<NamespaceMemStat> {
        self.read(ctx, "mem stat", |s| Ok(s.mem_stat()))
    }

    /// Performance statistics.
    #[must_use]
    pub fn perf_stat(&self) -> NamespacePerfStat {
        self.counters.snapshot(self.resolve().replication_errors())
    }

    /// Clears performance statistics.
    pub fn reset_perf_stat(&self) {
        self.counters.reset();
    }

    /// Metadata keys.
    pub fn enum_meta(&self, ctx: &MutationContext) -> CoreResult<Vec<String>> {
        self.read(ctx, "enum meta", |s| Ok(s.enum_meta()))
    }

    /// Metadata value.
    pub fn get_meta(&self, key: &str, ctx: &MutationContext) -> CoreResult<Option<String>> {
        self.read(ctx, "get meta", |s| Ok(s.get_meta(key)))
    }

    /// Stores a metadata value.
    pub fn put_meta(&self, key: &str, value: &str, ctx: &MutationContext) -> CoreResult<()> {
        self.write(ctx, "put meta", |s, u| s.put_meta(key, value, u))
    }

    /// Periodic maintenance. Does nothing while a copy is in progress.
    pub fn background_routine(&self, ctx: &MutationContext) -> CoreResult<()> {
        if self.has_copy.load(Ordering::Acquire) {
            return Ok(());
        }
        self.with_retry(ctx, false, |imp| {
            imp.mutate(ctx, "background routine", |s, _| s.flush_storage())
        })
    }

    /// Starts a transaction against this namespace.
    pub fn new_transaction(&self, ctx: &MutationContext) -> CoreResult<Transaction> {
        Ok(Transaction::new(self.name(ctx)?))
    }

    /// Commits a transaction, through a copy when the copy policy says so.
    pub fn commit_transaction(
        &self,
        tx: &Transaction,
        ctx: &MutationContext,
    ) -> CoreResult<TxResult> {
        let steps = tx.len();
        let policy = *self.copy_policy.lock();
        let result = self.with_retry(ctx, true, |imp| {
            let items = imp.inspect(ctx, "items count", |s| Ok(s.items_count()))?;
            if policy.need_copy(steps, items) {
                self.commit_with_copy(imp, tx, ctx)
            } else {
                imp.mutate(ctx, "commit transaction", |s, u| s.commit_transaction(tx, u))
            }
        })?;
        self.counters.record_tx(steps, result.copied);
        Ok(result)
    }

    fn commit_with_copy(
        &self,
        imp: &NamespaceImpl,
        tx: &Transaction,
        ctx: &MutationContext,
    ) -> CoreResult<TxResult> {
        let _cloner = lock_with_context(&self.cloner, ctx, self.interval(), "namespace copy")?;
        // Another copy may have been published while this call waited.
        if !std::ptr::eq(Arc::as_ptr(&self.resolve()), imp) {
            return Err(CoreError::Invalidated);
        }
        let _flag = CopyInProgress::set(&self.has_copy);

        let (source, copy) = imp.begin_copy(ctx)?;
        self.counters.copy_started();
        match copy.mutate(ctx, "commit transaction on copy", |s, u| {
            s.commit_transaction(tx, u)
        }) {
            Ok(mut result) => {
                self.publish(copy);
                source.invalidate();
                self.counters.copy_finished(true);
                debug!(steps = tx.len(), "transaction committed through a copy");
                result.copied = true;
                Ok(result)
            }
            Err(e) => {
                drop(source);
                self.counters.copy_finished(false);
                Err(e)
            }
        }
    }

    /// Replication state.
    pub fn repl_state(&self, ctx: &MutationContext) -> CoreResult<ReplicationState> {
        self.read(ctx, "repl state", |s| Ok(s.repl_state()))
    }

    /// Sets the upstream and origin LSNs.
    pub fn set_repl_lsns(&self, lsns: LsnPair, ctx: &MutationContext) -> CoreResult<()> {
        self.write(ctx, "set repl lsns", |s, _| {
            s.set_repl_lsns(lsns);
            Ok(())
        })
    }

    /// Current tags matcher.
    pub fn tags_matcher(&self, ctx: &MutationContext) -> CoreResult<TagsMatcher> {
        self.read(ctx, "tags matcher", |s| Ok(s.tags_matcher().clone()))
    }

    /// Replaces the tags matcher.
    pub fn replace_tags_matcher(&self, tags: &TagsMatcher, ctx: &MutationContext) -> CoreResult<()> {
        self.write(ctx, "replace tags matcher", |s, u| {
            s.replace_tags_matcher(tags.clone(), u)
        })
    }

    /// Moves this namespace's contents into `dst`.
    ///
    /// The contents take `dst`'s name and storage location and replace
    /// whatever `dst` held. This facade is left dropped. `None` or `self`
    /// as the destination does nothing.
    pub fn rename_to(&self, dst: Option<&Namespace>, ctx: &MutationContext) -> CoreResult<()> {
        let Some(dst) = dst else {
            return Ok(());
        };
        if std::ptr::eq(self, dst) {
            return Ok(());
        }
        // Both cloners in address order, so opposite renames cannot cross.
        let (first, second) = if std::ptr::from_ref(self) < std::ptr::from_ref(dst) {
            (self, dst)
        } else {
            (dst, self)
        };
        let _first = lock_with_context(&first.cloner, ctx, first.interval(), "rename namespace")?;
        let _second =
            lock_with_context(&second.cloner, ctx, second.interval(), "rename namespace")?;
        self.with_retry(ctx, true, |imp| {
            let dst_imp = dst.resolve();
            let (new_name, target) = dst_imp.inspect(ctx, "rename target", |s| {
                Ok((s.name().to_string(), s.storage_path().map(Path::to_path_buf)))
            })?;
            let (source, fresh) = imp.rename_into(ctx, &new_name, target)?;
            dst.publish(fresh);
            dst_imp.invalidate();
            self.publish(source.tombstone());
            source.invalidate();
            Ok(())
        })?;
        self.counters.record_commit();
        Ok(())
    }

    /// Renames the namespace in place. An empty name does nothing.
    ///
    /// With `storage_root` the storage directory moves to
    /// `storage_root/new_name`, otherwise next to its current location.
    pub fn rename(
        &self,
        new_name: &str,
        storage_root: Option<&Path>,
        ctx: &MutationContext,
    ) -> CoreResult<()> {
        if new_name.is_empty() {
            return Ok(());
        }
        self.with_retry(ctx, true, |imp| {
            let (source, fresh) =
                imp.rename_into(ctx, new_name, storage_root.map(|r| r.join(new_name)))?;
            self.publish(fresh);
            source.invalidate();
            Ok(())
        })?;
        self.counters.record_commit();
        Ok(())
    }

    /// Re-reads this namespace's configuration from `provider`.
    pub fn on_config_updated(
        &self,
        provider: &ConfigProvider,
        ctx: &MutationContext,
    ) -> CoreResult<()> {
        let config = provider.get_namespace_config(&self.name(ctx)?);
        *self.copy_policy.lock() = CopyPolicy::from(&config);
        self.max_retries
            .store(config.max_invalidation_retries.max(1), Ordering::Relaxed);
        self.check_interval_ms
            .store(config.cond_check_interval_ms, Ordering::Relaxed);
        self.with_retry(ctx, true, |imp| imp.on_config_updated(ctx, config.clone()))
    }

    /// Snapshot of everything after `from`.
    pub fn snapshot(&self, from: Lsn, ctx: &MutationContext) -> CoreResult<Snapshot> {
        self.read(ctx, "snapshot", |s| s.build_snapshot(from))
    }

    /// Applies one chunk of a snapshot taken from another namespace.
    pub fn apply_snapshot_chunk(
        &self,
        chunk: &SnapshotChunk,
        ctx: &MutationContext,
    ) -> CoreResult<()> {
        self.write(ctx, "apply snapshot chunk", |s, u| s.apply_snapshot_chunk(chunk, u))
    }

    pub(crate) fn log_added(&self, ctx: &MutationContext) -> CoreResult<()> {
        self.write(ctx, "add namespace", |s, u| {
            let definition = s.definition().to_json()?;
            s.emit(WalRecord::namespace_add(definition), u);
            Ok(())
        })
    }

    /// Logs the drop and deletes storage. Later calls fail with
    /// [`CoreError::NamespaceNotFound`].
    pub fn mark_dropped(&self, ctx: &MutationContext) -> CoreResult<()> {
        self.with_retry(ctx, true, |imp| imp.mark_dropped(ctx))
    }
}
