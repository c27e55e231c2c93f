//! Registry of in-flight operations.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// What an activity is currently doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ActivityState {
    /// Running.
    InProgress = 0,
    /// Blocked acquiring a lock.
    WaitLock = 1,
    /// Blocked on a condition variable.
    WaitCondition = 2,
}

impl ActivityState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::WaitLock,
            2 => Self::WaitCondition,
            _ => Self::InProgress,
        }
    }
}

impl fmt::Display for ActivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InProgress => "in_progress",
            Self::WaitLock => "wait_lock",
            Self::WaitCondition => "wait_condition",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Default)]
struct RegistryInner {
    next_id: AtomicU64,
    active: Mutex<BTreeMap<u64, Weak<Activity>>>,
}

/// One tracked operation. Removed from its registry on drop.
#[derive(Debug)]
pub struct Activity {
    id: u64,
    description: String,
    started: Instant,
    state: AtomicU8,
    registry: Weak<RegistryInner>,
}

impl Activity {
    /// Registry-unique id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Human readable description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ActivityState {
        ActivityState::from_u8(self.state.load(Ordering::Relaxed))
    }

    /// Updates the current state.
    pub fn set_state(&self, state: ActivityState) {
        self.state.store(state as u8, Ordering::Relaxed);
    }

    /// Time since the activity began.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

impl Drop for Activity {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.active.lock().remove(&self.id);
        }
    }
}

/// Point-in-time view of an activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivitySnapshot {
    /// Activity id.
    pub id: u64,
    /// Description passed to [`ActivityRegistry::begin`].
    pub description: String,
    /// State at the time of the snapshot.
    pub state: ActivityState,
    /// Running time at the time of the snapshot.
    pub elapsed: Duration,
}

/// Tracks in-flight operations for diagnostics.
#[derive(Debug, Clone, Default)]
pub struct ActivityRegistry {
    inner: Arc<RegistryInner>,
}

impl ActivityRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new activity.
    pub fn begin(&self, description: impl Into<String>) -> Arc<Activity> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let activity = Arc::new(Activity {
            id,
            description: description.into(),
            started: Instant::now(),
            state: AtomicU8::new(ActivityState::InProgress as u8),
            registry: Arc::downgrade(&self.inner),
        });
        self.inner
            .active
            .lock()
            .insert(id, Arc::downgrade(&activity));
        activity
    }

    /// Lists the live activities in start order.
    #[must_use]
    pub fn list(&self) -> Vec<ActivitySnapshot> {
        let active = self.inner.active.lock();
        active
            .values()
            .filter_map(Weak::upgrade)
            .map(|a| ActivitySnapshot {
                id: a.id,
                description: a.description.clone(),
                state: a.state(),
                elapsed: a.elapsed(),
            })
            .collect()
    }

    /// Number of live activities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.active.lock().len()
    }

    /// Returns true when nothing is in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_and_drop() {
        let registry = ActivityRegistry::new();
        let a = registry.begin("select");
        let b = registry.begin("upsert");
        assert_eq!(registry.len(), 2);

        let list = registry.list();
        assert_eq!(list[0].description, "select");
        assert_eq!(list[1].id, b.id());

        drop(a);
        assert_eq!(registry.len(), 1);
        drop(b);
        assert!(registry.is_empty());
    }

    #[test]
    fn outlives_registry() {
        let registry = ActivityRegistry::new();
        let a = registry.begin("late");
        drop(registry);
        a.set_state(ActivityState::WaitCondition);
        assert_eq!(a.state(), ActivityState::WaitCondition);
    }
}
