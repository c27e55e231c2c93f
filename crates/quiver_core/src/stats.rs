//! Namespace statistics.
//!
//! Counters are atomic and can be read while operations are in progress.
//! [`NamespaceCounters::snapshot`] produces the plain [`NamespacePerfStat`]
//! value returned to callers.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Transaction statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TxStat {
    /// Committed transactions.
    pub count: u64,
    /// Steps over all committed transactions.
    pub steps_total: u64,
    /// Transactions committed through a namespace copy.
    pub copy_count: u64,
    /// Average steps per transaction.
    pub avg_steps: f64,
}

/// Performance statistics of one namespace.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NamespacePerfStat {
    /// Transaction statistics.
    pub tx: TxStat,
    /// Successful mutating calls, transactions included.
    pub commits: u64,
    /// Published copies.
    pub copies: u64,
    /// Calls retried because the implementation was superseded.
    pub invalidation_retries: u64,
    /// Most copies observed in progress at once.
    pub peak_concurrent_copies: u64,
    /// Replication hand-offs that failed after the local commit.
    pub replication_errors: u64,
}

/// Memory statistics of one namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceMemStat {
    /// Namespace name.
    pub name: String,
    /// Stored items.
    pub items: usize,
    /// Defined indexes.
    pub indexes: usize,
    /// Metadata keys.
    pub meta_keys: usize,
    /// Records in the local WAL ring.
    pub wal_records: usize,
    /// Bytes held by the local WAL ring.
    pub wal_bytes: usize,
    /// Bound storage directory.
    pub storage_path: Option<PathBuf>,
}

/// Live counters kept by a namespace facade.
#[derive(Debug, Default)]
pub struct NamespaceCounters {
    tx_count: AtomicU64,
    tx_steps: AtomicU64,
    tx_copies: AtomicU64,
    commits: AtomicU64,
    copies: AtomicU64,
    invalidation_retries: AtomicU64,
    active_copies: AtomicUsize,
    peak_copies: AtomicU64,
}

impl NamespaceCounters {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_commit(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_tx(&self, steps: usize, copied: bool) {
        self.tx_count.fetch_add(1, Ordering::Relaxed);
        self.tx_steps.fetch_add(steps as u64, Ordering::Relaxed);
        if copied {
            self.tx_copies.fetch_add(1, Ordering::Relaxed);
        }
        self.record_commit();
    }

    pub(crate) fn record_retry(&self) {
        self.invalidation_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn copy_started(&self) {
        let active = self.active_copies.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak_copies.fetch_max(active as u64, Ordering::AcqRel);
    }

    pub(crate) fn copy_finished(&self, published: bool) {
        self.active_copies.fetch_sub(1, Ordering::AcqRel);
        if published {
            self.copies.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Copies currently in progress.
    #[must_use]
    pub fn active_copies(&self) -> usize {
        self.active_copies.load(Ordering::Acquire)
    }

    /// Clears every counter except copies in progress.
    pub fn reset(&self) {
        for counter in [
            &self.tx_count,
            &self.tx_steps,
            &self.tx_copies,
            &self.commits,
            &self.copies,
            &self.invalidation_retries,
            &self.peak_copies,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    /// Returns a consistent-enough snapshot of the counters.
    #[must_use]
    pub fn snapshot(&self, replication_errors: u64) -> NamespacePerfStat {
        let count = self.tx_count.load(Ordering::Relaxed);
        let steps_total = self.tx_steps.load(Ordering::Relaxed);
        NamespacePerfStat {
            tx: TxStat {
                count,
                steps_total,
                copy_count: self.tx_copies.load(Ordering::Relaxed),
                avg_steps: if count == 0 {
                    0.0
                } else {
                    steps_total as f64 / count as f64
                },
            },
            commits: self.commits.load(Ordering::Relaxed),
            copies: self.copies.load(Ordering::Relaxed),
            invalidation_retries: self.invalidation_retries.load(Ordering::Relaxed),
            peak_concurrent_copies: self.peak_copies.load(Ordering::Relaxed),
            replication_errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tx_averages() {
        let c = NamespaceCounters::new();
        c.record_tx(10, false);
        c.record_tx(30, true);
        let s = c.snapshot(0);
        assert_eq!(s.tx.count, 2);
        assert_eq!(s.tx.steps_total, 40);
        assert_eq!(s.tx.copy_count, 1);
        assert!((s.tx.avg_steps - 20.0).abs() < f64::EPSILON);
        assert_eq!(s.commits, 2);
    }

    #[test]
    fn peak_copies() {
        let c = NamespaceCounters::new();
        c.copy_started();
        c.copy_finished(true);
        c.copy_started();
        c.copy_finished(false);
        let s = c.snapshot(0);
        assert_eq!(s.copies, 1);
        assert_eq!(s.peak_concurrent_copies, 1);
        assert_eq!(c.active_copies(), 0);
    }

    #[test]
    fn reset_clears() {
        let c = NamespaceCounters::new();
        c.record_retry();
        c.record_commit();
        c.reset();
        assert_eq!(c.snapshot(0), NamespacePerfStat::default());
    }
}
