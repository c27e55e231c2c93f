//! The namespace implementation object published by a [`super::Namespace`].
//!
//! An implementation is never mutated after it has been superseded: the
//! facade publishes a replacement, then flags the old object as
//! invalidated while holding its lock. Every access takes the lock first
//! and checks the flags second, so a caller either finishes on the old
//! object before the switch or observes [`CoreError::Invalidated`].

use super::state::NsState;
use crate::config::NamespaceConfig;
use crate::context::{read_with_context, write_with_context, MutationContext};
use crate::error::{CoreError, CoreResult};
use crate::namespace::NamespaceDef;
use crate::replication::{NsDataReplicator, UpdateBatch};
use crate::types::ServerId;
use crate::wal::WalRecord;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// State shared by every implementation a facade ever publishes.
struct ImplShared {
    replicator: Arc<dyn NsDataReplicator>,
    replication_errors: AtomicU64,
}

impl fmt::Debug for ImplShared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImplShared")
            .field("replicator", &self.replicator)
            .field(
                "replication_errors",
                &self.replication_errors.load(Ordering::Relaxed),
            )
            .finish()
    }
}

#[derive(Debug)]
pub(crate) struct NamespaceImpl {
    state: RwLock<NsState>,
    invalidated: AtomicBool,
    dropped: AtomicBool,
    shared: Arc<ImplShared>,
    check_interval_ms: AtomicU64,
}

/// Read access to an implementation that is being copied.
///
/// Holding it keeps writers off the original until the copy is either
/// published or abandoned.
pub(crate) struct CopySource<'a> {
    owner: &'a NamespaceImpl,
    _guard: RwLockReadGuard<'a, NsState>,
}

impl CopySource<'_> {
    /// Marks the original superseded, then releases it.
    pub(crate) fn invalidate(self) {
        self.owner.invalidated.store(true, Ordering::Release);
    }
}

/// Exclusive access to an implementation whose state was moved out by a
/// rename.
pub(crate) struct RenameSource<'a> {
    owner: &'a NamespaceImpl,
    old_name: String,
    _guard: RwLockWriteGuard<'a, NsState>,
}

impl RenameSource<'_> {
    /// Dropped placeholder carrying the name the state was moved away from.
    pub(crate) fn tombstone(&self) -> NamespaceImpl {
        NamespaceImpl::tombstone(&self.old_name, Arc::clone(&self.owner.shared))
    }

    /// Marks the original superseded, then releases it.
    pub(crate) fn invalidate(self) {
        self.owner.invalidated.store(true, Ordering::Release);
    }
}

impl NamespaceImpl {
    pub(crate) fn new(
        def: NamespaceDef,
        server_id: ServerId,
        config: NamespaceConfig,
        replicator: Arc<dyn NsDataReplicator>,
    ) -> CoreResult<Self> {
        let shared = Arc::new(ImplShared {
            replicator,
            replication_errors: AtomicU64::new(0),
        });
        Ok(Self::from_state(NsState::new(def, server_id, config)?, shared))
    }

    fn from_state(state: NsState, shared: Arc<ImplShared>) -> Self {
        let interval = state.config.cond_check_interval_ms;
        Self {
            state: RwLock::new(state),
            invalidated: AtomicBool::new(false),
            dropped: AtomicBool::new(false),
            shared,
            check_interval_ms: AtomicU64::new(interval),
        }
    }

    fn tombstone(name: &str, shared: Arc<ImplShared>) -> Self {
        let mut state = NsState::default();
        state.set_name(name);
        let tombstone = Self::from_state(state, shared);
        tombstone.dropped.store(true, Ordering::Release);
        tombstone
    }

    fn interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms.load(Ordering::Relaxed))
    }

    fn ensure_live(&self, state: &NsState) -> CoreResult<()> {
        if self.invalidated.load(Ordering::Acquire) {
            return Err(CoreError::Invalidated);
        }
        if self.dropped.load(Ordering::Acquire) {
            return Err(CoreError::namespace_not_found(state.name()));
        }
        Ok(())
    }

    /// Runs `f` under the shared lock.
    pub(crate) fn inspect<R>(
        &self,
        ctx: &MutationContext,
        what: &str,
        f: impl FnOnce(&NsState) -> CoreResult<R>,
    ) -> CoreResult<R> {
        let guard = read_with_context(&self.state, ctx, self.interval(), what)?;
        self.ensure_live(&guard)?;
        f(&guard)
    }

    /// Runs `f` under the exclusive lock. When it succeeds, whatever it
    /// logged goes to the replicator before the lock is released; a failed
    /// mutation replicates nothing.
    pub(crate) fn mutate<R>(
        &self,
        ctx: &MutationContext,
        what: &str,
        f: impl FnOnce(&mut NsState, &mut UpdateBatch) -> CoreResult<R>,
    ) -> CoreResult<R> {
        let mut guard = write_with_context(&self.state, ctx, self.interval(), what)?;
        self.ensure_live(&guard)?;
        let mut updates = UpdateBatch::new();
        match f(&mut guard, &mut updates) {
            Ok(result) => {
                self.replicate(guard.name(), updates);
                Ok(result)
            }
            Err(e) => {
                if !updates.is_empty() {
                    warn!(
                        ns = guard.name(),
                        what,
                        discarded = updates.len(),
                        error = %e,
                        "mutation failed after logging"
                    );
                }
                Err(e)
            }
        }
    }

    fn replicate(&self, ns_name: &str, updates: UpdateBatch) {
        if updates.is_empty() {
            return;
        }
        if let Err(e) = self.shared.replicator.replicate(updates) {
            self.shared
                .replication_errors
                .fetch_add(1, Ordering::Relaxed);
            warn!(ns = ns_name, error = %e, "replication of committed updates failed");
        }
    }

    pub(crate) fn replication_errors(&self) -> u64 {
        self.shared.replication_errors.load(Ordering::Relaxed)
    }

    /// Clones the state for a copy-on-write commit.
    pub(crate) fn begin_copy(
        &self,
        ctx: &MutationContext,
    ) -> CoreResult<(CopySource<'_>, NamespaceImpl)> {
        let guard = read_with_context(&self.state, ctx, self.interval(), "copy namespace")?;
        self.ensure_live(&guard)?;
        let copy = Self::from_state(guard.clone(), Arc::clone(&self.shared));
        debug!(ns = guard.name(), items = guard.items_count(), "namespace copied");
        Ok((
            CopySource {
                owner: self,
                _guard: guard,
            },
            copy,
        ))
    }

    /// Moves the state into a fresh implementation named `new_name`.
    ///
    /// When `target` is `None` a bound storage directory moves next to its
    /// current location.
    pub(crate) fn rename_into(
        &self,
        ctx: &MutationContext,
        new_name: &str,
        target: Option<PathBuf>,
    ) -> CoreResult<(RenameSource<'_>, NamespaceImpl)> {
        let mut guard = write_with_context(&self.state, ctx, self.interval(), "rename namespace")?;
        self.ensure_live(&guard)?;
        let old_name = guard.name().to_string();

        let target = target.or_else(|| {
            guard
                .storage_path()
                .and_then(|p| p.parent())
                .map(|parent| parent.join(new_name))
        });
        guard.move_storage(target)?;

        let mut updates = UpdateBatch::new();
        guard.emit(WalRecord::namespace_rename(new_name), &mut updates);
        self.replicate(&old_name, updates);

        let mut moved = std::mem::take(&mut *guard);
        moved.set_name(new_name);
        debug!(from = %old_name, to = new_name, "namespace renamed");
        Ok((
            RenameSource {
                owner: self,
                old_name,
                _guard: guard,
            },
            Self::from_state(moved, Arc::clone(&self.shared)),
        ))
    }

    /// Marks an implementation superseded once in-flight calls are done.
    pub(crate) fn invalidate(&self) {
        let _guard = self.state.write();
        self.invalidated.store(true, Ordering::Release);
    }

    /// Logs the drop, deletes storage and refuses any further access.
    pub(crate) fn mark_dropped(&self, ctx: &MutationContext) -> CoreResult<()> {
        self.mutate(ctx, "drop namespace", |state, updates| {
            state.emit(WalRecord::namespace_drop(), updates);
            self.dropped.store(true, Ordering::Release);
            state.delete_storage()
        })
    }

    pub(crate) fn on_config_updated(
        &self,
        ctx: &MutationContext,
        config: NamespaceConfig,
    ) -> CoreResult<()> {
        self.check_interval_ms
            .store(config.cond_check_interval_ms, Ordering::Relaxed);
        self.mutate(ctx, "update namespace config", |state, _| {
            state.on_config_updated(config);
            Ok(())
        })
    }

    pub(crate) fn is_invalidated(&self) -> bool {
        self.invalidated.load(Ordering::Acquire)
    }
}
