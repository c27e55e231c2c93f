//! Per-call mutation context.
//!
//! A [`MutationContext`] travels by reference through every namespace
//! operation. It carries an optional deadline, an optional cancel handle and
//! an optional activity used for diagnostics. Every blocking wait inside the
//! engine consults the context so a canceled caller is released within one
//! polling interval.

mod activity;
mod wait;

pub use activity::{Activity, ActivityRegistry, ActivitySnapshot, ActivityState};
pub use wait::{lock_with_context, read_with_context, write_with_context, ContextedCondvar};

use crate::error::{CancelReason, CoreError, CoreResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    /// Creates a handle that is not canceled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels every context holding a clone of this handle.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Returns true once [`cancel`](Self::cancel) has been called.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Context of a single namespace call.
#[derive(Debug, Clone, Default)]
pub struct MutationContext {
    deadline: Option<Instant>,
    cancel: Option<CancelHandle>,
    activity: Option<Arc<Activity>>,
}

impl MutationContext {
    /// Creates a context that can never be canceled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets an absolute deadline.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Sets a deadline relative to now. A timeout too large to represent
    /// leaves the context without a deadline.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Instant::now().checked_add(timeout);
        self
    }

    /// Attaches a cancel handle.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelHandle) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Attaches an activity for diagnostics.
    #[must_use]
    pub fn with_activity(mut self, activity: Arc<Activity>) -> Self {
        self.activity = Some(activity);
        self
    }

    /// Returns true when the context can stop an operation.
    #[must_use]
    pub fn is_cancelable(&self) -> bool {
        self.deadline.is_some() || self.cancel.is_some()
    }

    /// Returns the reason this context stops operations, if any.
    #[must_use]
    pub fn cancel_reason(&self) -> Option<CancelReason> {
        if self.cancel.as_ref().is_some_and(CancelHandle::is_canceled) {
            return Some(CancelReason::Explicit);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(CancelReason::DeadlineExceeded),
            _ => None,
        }
    }

    /// Fails with [`CoreError::Canceled`] if the context was canceled or
    /// its deadline elapsed. `what` names the interrupted operation.
    pub fn check(&self, what: &str) -> CoreResult<()> {
        match self.cancel_reason() {
            Some(reason) => Err(CoreError::canceled(what, reason)),
            None => Ok(()),
        }
    }

    /// Records the current blocking state in the attached activity.
    pub fn set_state(&self, state: ActivityState) {
        if let Some(activity) = &self.activity {
            activity.set_state(state);
        }
    }

    /// Returns the attached activity.
    #[must_use]
    pub fn activity(&self) -> Option<&Arc<Activity>> {
        self.activity.as_ref()
    }
}
