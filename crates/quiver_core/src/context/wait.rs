//! Lock acquisition and condition waits that honour a [`MutationContext`].
//!
//! With a cancelable context every wait is sliced into timed attempts of
//! `interval`; the context is checked before each attempt. A non-cancelable
//! context (or a zero interval) waits plainly.

use super::{ActivityState, MutationContext};
use crate::error::CoreResult;
use parking_lot::{Condvar, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

fn sliced(ctx: &MutationContext, interval: Duration) -> bool {
    ctx.is_cancelable() && !interval.is_zero()
}

fn acquire<G>(
    ctx: &MutationContext,
    interval: Duration,
    what: &str,
    mut attempt: impl FnMut(Duration) -> Option<G>,
) -> CoreResult<G> {
    ctx.check(what)?;
    if let Some(guard) = attempt(Duration::ZERO) {
        return Ok(guard);
    }
    ctx.set_state(ActivityState::WaitLock);
    let result = loop {
        if let Err(e) = ctx.check(what) {
            break Err(e);
        }
        if let Some(guard) = attempt(interval) {
            break Ok(guard);
        }
    };
    ctx.set_state(ActivityState::InProgress);
    result
}

/// Locks `mutex`, giving up when `ctx` is canceled.
pub fn lock_with_context<'a, T>(
    mutex: &'a Mutex<T>,
    ctx: &MutationContext,
    interval: Duration,
    what: &str,
) -> CoreResult<MutexGuard<'a, T>> {
    if !sliced(ctx, interval) {
        return Ok(mutex.lock());
    }
    acquire(ctx, interval, what, |d| mutex.try_lock_for(d))
}

/// Takes a shared lock on `lock`, giving up when `ctx` is canceled.
pub fn read_with_context<'a, T>(
    lock: &'a RwLock<T>,
    ctx: &MutationContext,
    interval: Duration,
    what: &str,
) -> CoreResult<RwLockReadGuard<'a, T>> {
    if !sliced(ctx, interval) {
        return Ok(lock.read());
    }
    acquire(ctx, interval, what, |d| lock.try_read_for(d))
}

/// Takes an exclusive lock on `lock`, giving up when `ctx` is canceled.
pub fn write_with_context<'a, T>(
    lock: &'a RwLock<T>,
    ctx: &MutationContext,
    interval: Duration,
    what: &str,
) -> CoreResult<RwLockWriteGuard<'a, T>> {
    if !sliced(ctx, interval) {
        return Ok(lock.write());
    }
    acquire(ctx, interval, what, |d| lock.try_write_for(d))
}

/// Condition variable whose waits can be abandoned through a context.
#[derive(Debug, Default)]
pub struct ContextedCondvar {
    inner: Condvar,
    interval: Duration,
}

impl ContextedCondvar {
    /// Creates a condition variable that re-checks cancellation every
    /// `interval`.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            inner: Condvar::new(),
            interval,
        }
    }

    /// Blocks while `condition` holds.
    ///
    /// Returns `Canceled` if the context stops the operation before the
    /// condition clears. Spurious wakeups are absorbed.
    pub fn wait_while<T>(
        &self,
        guard: &mut MutexGuard<'_, T>,
        mut condition: impl FnMut(&mut T) -> bool,
        ctx: &MutationContext,
        what: &str,
    ) -> CoreResult<()> {
        if !condition(&mut **guard) {
            return Ok(());
        }
        ctx.set_state(ActivityState::WaitCondition);
        let result = if sliced(ctx, self.interval) {
            loop {
                if let Err(e) = ctx.check(what) {
                    break Err(e);
                }
                self.inner.wait_for(guard, self.interval);
                if !condition(&mut **guard) {
                    break Ok(());
                }
            }
        } else {
            while condition(&mut **guard) {
                self.inner.wait(guard);
            }
            Ok(())
        };
        ctx.set_state(ActivityState::InProgress);
        result
    }

    /// Wakes one waiter.
    pub fn notify_one(&self) {
        self.inner.notify_one();
    }

    /// Wakes every waiter.
    pub fn notify_all(&self) {
        self.inner.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CancelHandle;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    const TICK: Duration = Duration::from_millis(20);

    #[test]
    fn uncontended_lock() {
        let m = Mutex::new(5);
        let ctx = MutationContext::new().with_timeout(Duration::from_secs(5));
        let guard = lock_with_context(&m, &ctx, TICK, "lock").unwrap();
        assert_eq!(*guard, 5);
    }

    #[test]
    fn canceled_lock_wait() {
        let m = Arc::new(Mutex::new(()));
        let held = m.lock();

        let handle = CancelHandle::new();
        let ctx = MutationContext::new().with_cancel(handle.clone());
        let m2 = Arc::clone(&m);
        let waiter = thread::spawn(move || {
            let started = Instant::now();
            let res = lock_with_context(&m2, &ctx, TICK, "ns lock").map(|_| ());
            (res, started.elapsed())
        });

        thread::sleep(Duration::from_millis(50));
        handle.cancel();
        let (res, _) = waiter.join().unwrap();
        assert!(res.unwrap_err().is_canceled());
        drop(held);
    }

    #[test]
    fn rwlock_deadline() {
        let lock = RwLock::new(1);
        let _w = lock.write();
        let ctx = MutationContext::new().with_timeout(Duration::from_millis(30));
        let err = read_with_context(&lock, &ctx, TICK, "read").unwrap_err();
        assert!(err.is_canceled());
    }

    #[test]
    fn condvar_signal() {
        let pair = Arc::new((Mutex::new(false), ContextedCondvar::new(TICK)));
        let pair2 = Arc::clone(&pair);
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            *pair2.0.lock() = true;
            pair2.1.notify_all();
        });

        let ctx = MutationContext::new().with_timeout(Duration::from_secs(5));
        let mut guard = pair.0.lock();
        pair.1
            .wait_while(&mut guard, |ready| !*ready, &ctx, "ready")
            .unwrap();
        assert!(*guard);
        drop(guard);
        t.join().unwrap();
    }

    #[test]
    fn condvar_cancel_within_interval() {
        let pair = Arc::new((Mutex::new(()), ContextedCondvar::new(TICK)));
        let handle = CancelHandle::new();
        let ctx = MutationContext::new().with_cancel(handle.clone());

        let canceler = {
            let handle = handle.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(40));
                handle.cancel();
                Instant::now()
            })
        };

        let mut guard = pair.0.lock();
        let err = pair
            .1
            .wait_while(&mut guard, |_| true, &ctx, "never")
            .unwrap_err();
        let returned = Instant::now();
        let canceled_at = canceler.join().unwrap();
        assert!(err.is_canceled());
        assert!(returned.saturating_duration_since(canceled_at) < TICK * 5);
    }

    #[test]
    fn condition_already_clear() {
        let m = Mutex::new(());
        let cv = ContextedCondvar::new(TICK);
        let handle = CancelHandle::new();
        handle.cancel();
        let ctx = MutationContext::new().with_cancel(handle);
        let mut guard = m.lock();
        assert!(cv.wait_while(&mut guard, |_| false, &ctx, "x").is_ok());
    }
}
