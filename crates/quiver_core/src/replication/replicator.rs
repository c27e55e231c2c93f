//! Hand-off of committed updates to replication consumers.

use super::batch::UpdateBatch;
use super::observers::{UpdatesFilter, UpdatesObservers, UpdatesSubscription};
use crate::error::CoreResult;
use crate::wal::WalJournal;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::trace;

/// Receives the updates of every committed namespace operation.
///
/// Called after the local commit, in commit order per namespace.
pub trait NsDataReplicator: Send + Sync + fmt::Debug {
    /// Consumes one operation's updates.
    fn replicate(&self, batch: UpdateBatch) -> CoreResult<()>;
}

/// Replicator that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReplicator;

impl NsDataReplicator for NoopReplicator {
    fn replicate(&self, _batch: UpdateBatch) -> CoreResult<()> {
        Ok(())
    }
}

/// Fans committed updates out to subscribers and an optional journal.
///
/// The shared form of each update is built at most once, and only when
/// somebody consumes it.
#[derive(Debug)]
pub struct ReplicationHub {
    observers: UpdatesObservers,
    journal: Option<WalJournal>,
    replicated: AtomicU64,
    deliveries: AtomicU64,
}

impl ReplicationHub {
    /// Creates a hub without a journal.
    #[must_use]
    pub fn new(check_interval: Duration) -> Self {
        Self {
            observers: UpdatesObservers::new(check_interval),
            journal: None,
            replicated: AtomicU64::new(0),
            deliveries: AtomicU64::new(0),
        }
    }

    /// Creates a hub that also appends every update to `journal`.
    #[must_use]
    pub fn with_journal(check_interval: Duration, journal: WalJournal) -> Self {
        Self {
            journal: Some(journal),
            ..Self::new(check_interval)
        }
    }

    /// Bounds the queue of every subscription created afterwards.
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.observers = self.observers.with_queue_capacity(capacity);
        self
    }

    /// Registers a subscriber.
    pub fn subscribe(&self, filter: UpdatesFilter) -> UpdatesSubscription {
        self.observers.subscribe(filter)
    }

    /// Updates seen so far.
    #[must_use]
    pub fn replicated_count(&self) -> u64 {
        self.replicated.load(Ordering::Relaxed)
    }

    /// Subscriber deliveries so far.
    #[must_use]
    pub fn delivery_count(&self) -> u64 {
        self.deliveries.load(Ordering::Relaxed)
    }

    /// The journal, when configured.
    #[must_use]
    pub fn journal(&self) -> Option<&WalJournal> {
        self.journal.as_ref()
    }

    /// Flushes the journal, when configured.
    pub fn flush(&self) -> CoreResult<()> {
        match &self.journal {
            Some(journal) => journal.flush(),
            None => Ok(()),
        }
    }
}

impl NsDataReplicator for ReplicationHub {
    fn replicate(&self, batch: UpdateBatch) -> CoreResult<()> {
        let has_subscribers = self.observers.has_subscribers();
        for update in &batch {
            self.replicated.fetch_add(1, Ordering::Relaxed);
            if !has_subscribers && self.journal.is_none() {
                continue;
            }
            let shared = update.shared();
            if has_subscribers {
                let n = self.observers.dispatch(update.ns_name(), shared);
                self.deliveries.fetch_add(n as u64, Ordering::Relaxed);
            }
            if let Some(journal) = &self.journal {
                journal.append(shared)?;
            }
            trace!(
                ns = update.ns_name(),
                lsn = %update.lsn(),
                kind = %update.record().record_type(),
                "replicated"
            );
        }
        Ok(())
    }
}
