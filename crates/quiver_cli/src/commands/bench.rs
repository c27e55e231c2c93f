//! Bench command implementation.

use quiver_core::{
    Config, CoreResult, Database, IndexDef, IndexOpts, Item, MutationContext, Namespace, NamespaceDef,
    StorageOpts, Transaction, Variant,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::info;

/// Workload parameters.
#[derive(Debug, Clone)]
pub struct BenchOptions {
    /// Items per transaction.
    pub items: usize,
    /// Number of transactions.
    pub transactions: usize,
    /// Concurrent reader threads.
    pub readers: usize,
    /// Optional journal path.
    pub journal: Option<PathBuf>,
}

/// Outcome of a run.
#[derive(Debug)]
pub struct BenchReport {
    /// Items committed.
    pub items: usize,
    /// Wall time of the commits.
    pub elapsed: Duration,
    /// Reads served while committing.
    pub reads: u64,
    /// Copy-on-write commits.
    pub copies: u64,
    /// Calls retried on a superseded implementation.
    pub retries: u64,
}

/// Runs the bench command.
pub fn run(options: &BenchOptions) -> Result<(), Box<dyn std::error::Error>> {
    let report = execute(options)?;
    let secs = report.elapsed.as_secs_f64();
    println!("Items:      {}", report.items);
    println!("Duration:   {:?}", report.elapsed);
    if secs > 0.0 {
        println!("Throughput: {:.0} items/sec", report.items as f64 / secs);
    }
    println!("Reads:      {}", report.reads);
    println!("Copies:     {}", report.copies);
    println!("Retries:    {}", report.retries);
    Ok(())
}

/// Commits the workload while readers poll the namespace.
pub fn execute(options: &BenchOptions) -> CoreResult<BenchReport> {
    let db = match &options.journal {
        Some(path) => Database::with_journal(Config::default(), path)?,
        None => Database::new(Config::default()),
    };
    let ctx = MutationContext::new();
    let def = NamespaceDef::new("bench")
        .add_index(IndexDef::new("id", "hash", "int", IndexOpts::pk()))
        .storage(StorageOpts::disabled());
    let ns = db.add_namespace(def, &ctx)?;

    let done = AtomicBool::new(false);
    let reads = AtomicU64::new(0);
    let start = Instant::now();

    let committed = thread::scope(|scope| {
        for _ in 0..options.readers {
            scope.spawn(|| {
                let ctx = MutationContext::new();
                let mut lookup = 0i64;
                while !done.load(Ordering::Acquire) {
                    if ns.get(&Variant::Int(lookup), &ctx).is_ok() {
                        reads.fetch_add(1, Ordering::Relaxed);
                    }
                    lookup = (lookup + 7919) % (options.items.max(1) as i64);
                }
            });
        }

        let result = commit_all(&ns, options, &ctx);
        done.store(true, Ordering::Release);
        result
    })?;

    let elapsed = start.elapsed();
    db.background_routine(&ctx)?;
    let stat = ns.perf_stat();
    info!(items = committed, ?elapsed, copies = stat.copies, "bench finished");

    Ok(BenchReport {
        items: committed,
        elapsed,
        reads: reads.load(Ordering::Relaxed),
        copies: stat.copies,
        retries: stat.invalidation_retries,
    })
}

fn commit_all(ns: &Namespace, options: &BenchOptions, ctx: &MutationContext) -> CoreResult<usize> {
    let mut committed = 0usize;
    for t in 0..options.transactions {
        let mut tx = Transaction::new("bench");
        let base = (t * options.items) as i64;
        for id in base..base + options.items as i64 {
            tx.insert(Item::new().with("id", id).with("payload", format!("item-{id}")));
        }
        committed += ns.commit_transaction(&tx, ctx)?.affected;
    }
    Ok(committed)
}
