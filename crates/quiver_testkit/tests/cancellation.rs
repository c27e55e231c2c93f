//! Waits on a busy namespace give up when the caller's context does.

use parking_lot::{Condvar, Mutex};
use quiver_core::{
    CancelHandle, CancelReason, CoreError, CoreResult, ErrorKind, MutationContext,
    NamespaceConfig, NsDataReplicator, UpdateBatch, UpdatesFilter,
};
use quiver_testkit::{item, items_namespace_with, TestDatabase};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const INTERVAL_MS: u64 = 20;

/// Replicator that parks the committing thread until released.
#[derive(Debug, Default)]
struct GateReplicator {
    state: Mutex<(bool, bool)>,
    cond: Condvar,
}

impl GateReplicator {
    fn wait_entered(&self) {
        let mut state = self.state.lock();
        while !state.0 {
            self.cond.wait(&mut state);
        }
    }

    fn release(&self) {
        self.state.lock().1 = true;
        self.cond.notify_all();
    }
}

impl NsDataReplicator for GateReplicator {
    fn replicate(&self, _batch: UpdateBatch) -> CoreResult<()> {
        let mut state = self.state.lock();
        state.0 = true;
        self.cond.notify_all();
        while !state.1 {
            self.cond.wait(&mut state);
        }
        Ok(())
    }
}

fn config() -> NamespaceConfig {
    NamespaceConfig::new().cond_check_interval_ms(INTERVAL_MS)
}

#[test]
fn canceled_reader_stops_waiting_for_writer() {
    let gate = Arc::new(GateReplicator::default());
    let ns = items_namespace_with("items", config(), gate.clone());

    thread::scope(|scope| {
        scope.spawn(|| {
            ns.upsert(&mut item(1), &MutationContext::new()).unwrap();
        });
        gate.wait_entered();

        let handle = CancelHandle::new();
        let ctx = MutationContext::new().with_cancel(handle.clone());
        let canceler = {
            let handle = handle.clone();
            scope.spawn(move || {
                thread::sleep(Duration::from_millis(50));
                handle.cancel();
            })
        };

        let started = Instant::now();
        let err = ns.items_count(&ctx).unwrap_err();
        let waited = started.elapsed();
        assert_eq!(err.kind(), ErrorKind::Canceled);
        assert!(matches!(
            err,
            CoreError::Canceled { reason: CancelReason::Explicit, .. }
        ));
        assert!(waited < Duration::from_millis(50 + 10 * INTERVAL_MS));

        canceler.join().unwrap();
        gate.release();
    });

    assert_eq!(ns.items_count(&MutationContext::new()).unwrap(), 1);
}

#[test]
fn deadline_bounds_writer_wait() {
    let gate = Arc::new(GateReplicator::default());
    let ns = items_namespace_with("items", config(), gate.clone());

    thread::scope(|scope| {
        scope.spawn(|| {
            ns.put_meta("k", "first", &MutationContext::new()).unwrap();
        });
        gate.wait_entered();

        let ctx = MutationContext::new().with_timeout(Duration::from_millis(60));
        let err = ns.put_meta("k", "second", &ctx).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Canceled { reason: CancelReason::DeadlineExceeded, .. }
        ));
        gate.release();
    });

    let ctx = MutationContext::new();
    assert_eq!(ns.get_meta("k", &ctx).unwrap().as_deref(), Some("first"));
}

#[test]
fn already_canceled_context_fails_fast() {
    let gate = Arc::new(GateReplicator::default());
    gate.release();
    let ns = items_namespace_with("items", config(), gate);
    let handle = CancelHandle::new();
    handle.cancel();
    let ctx = MutationContext::new().with_cancel(handle);
    let err = ns.upsert(&mut item(1), &ctx).unwrap_err();
    assert!(err.is_canceled());
    assert_eq!(ns.items_count(&MutationContext::new()).unwrap(), 0);
}

#[test]
fn subscription_wait_is_cancelable() {
    let db = TestDatabase::memory();
    let sub = db.subscribe_updates(UpdatesFilter::All);
    let ctx = MutationContext::new().with_timeout(Duration::from_millis(40));
    let err = sub.recv(&ctx).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Canceled);
}

