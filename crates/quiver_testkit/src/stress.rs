//! Stress runs for QuiverDB.
//!
//! These runs drive transactions that go through namespace copies while
//! readers query the namespace concurrently.

use crate::fixtures::item;
use quiver_core::{MutationContext, Namespace, Transaction, Variant};
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Committed transactions.
    pub transactions: usize,
    /// Items written by those transactions.
    pub items_written: usize,
    /// Reads completed by the reader threads.
    pub reads: u64,
    /// Reads that failed.
    pub failed_reads: u64,
    /// Times a reader saw the item count go backwards.
    pub monotonic_violations: u64,
    /// Copies published by the namespace.
    pub copies: u64,
    /// Calls retried on an invalidated implementation.
    pub retries: u64,
    /// Total duration.
    pub duration: Duration,
}

impl StressTestResult {
    /// Items written per second.
    pub fn items_per_second(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.items_written as f64 / secs
        } else {
            0.0
        }
    }

    /// Prints a summary of the run.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Transactions: {}", self.transactions);
        println!("Items written: {}", self.items_written);
        println!("Reads: {} ({} failed)", self.reads, self.failed_reads);
        println!("Copies: {}", self.copies);
        println!("Retries: {}", self.retries);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} items/sec", self.items_per_second());
    }
}

/// Configuration for a copy stress run.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Committed transactions.
    pub transactions: usize,
    /// Items per transaction.
    pub tx_size: usize,
    /// Concurrent reader threads.
    pub readers: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            transactions: 4,
            tx_size: 10_000,
            readers: 2,
        }
    }
}

/// Commits `config.transactions` transactions of fresh items while reader
/// threads poll the item count and look up random items.
pub fn stress_copy_commits(ns: &Namespace, config: &StressConfig) -> StressTestResult {
    let done = AtomicBool::new(false);
    let reads = AtomicU64::new(0);
    let failed_reads = AtomicU64::new(0);
    let violations = AtomicU64::new(0);
    let before = ns.perf_stat();
    let start = Instant::now();

    let written = thread::scope(|scope| {
        for _ in 0..config.readers {
            scope.spawn(|| {
                let ctx = MutationContext::new();
                let mut rng = rand::thread_rng();
                let mut last = 0usize;
                while !done.load(Ordering::Acquire) {
                    match ns.items_count(&ctx) {
                        Ok(count) => {
                            if count < last {
                                violations.fetch_add(1, Ordering::Relaxed);
                            }
                            last = count;
                            if count > 0 {
                                let id = rng.gen_range(0..count as i64);
                                if ns.get(&Variant::Int(id), &ctx).is_err() {
                                    failed_reads.fetch_add(1, Ordering::Relaxed);
                                }
                            }
                            reads.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(_) => {
                            failed_reads.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            });
        }

        let ctx = MutationContext::new();
        let mut written = 0usize;
        let mut committed = 0usize;
        for t in 0..config.transactions {
            let mut tx = Transaction::new("stress");
            let base = (t * config.tx_size) as i64;
            for id in base..base + config.tx_size as i64 {
                tx.insert(item(id));
            }
            if let Ok(result) = ns.commit_transaction(&tx, &ctx) {
                written += result.affected;
                committed += 1;
            }
        }
        done.store(true, Ordering::Release);
        (committed, written)
    });

    let after = ns.perf_stat();
    StressTestResult {
        transactions: written.0,
        items_written: written.1,
        reads: reads.load(Ordering::Relaxed),
        failed_reads: failed_reads.load(Ordering::Relaxed),
        monotonic_violations: violations.load(Ordering::Relaxed),
        copies: after.copies.saturating_sub(before.copies),
        retries: after
            .invalidation_retries
            .saturating_sub(before.invalidation_retries),
        duration: start.elapsed(),
    }
}
