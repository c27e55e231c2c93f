//! Subscribers to the stream of replicated records.
//!
//! Each subscription owns a queue guarded by a mutex and a
//! [`ContextedCondvar`]. The dispatcher keeps only weak references, so a
//! dropped subscription disappears on the next dispatch.
//!
//! Queues are bounded. When a subscriber falls behind by more than its
//! capacity, the oldest queued records are dropped and counted in
//! [`UpdatesSubscription::lagged`].

use crate::context::{ContextedCondvar, MutationContext};
use crate::error::{CoreError, CoreResult};
use crate::wal::SharedWalRecord;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::debug;

/// Records a subscriber may hold before the oldest ones are dropped.
pub const DEFAULT_SUBSCRIBER_QUEUE_CAPACITY: usize = 65_536;

/// Which namespaces a subscriber wants to hear about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum UpdatesFilter {
    /// Every namespace.
    #[default]
    All,
    /// Only the listed namespaces.
    Namespaces(BTreeSet<String>),
}

impl UpdatesFilter {
    /// Builds a filter for the given names.
    pub fn namespaces<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Namespaces(names.into_iter().map(Into::into).collect())
    }

    /// Returns true if records of `ns_name` pass the filter.
    #[must_use]
    pub fn matches(&self, ns_name: &str) -> bool {
        match self {
            Self::All => true,
            Self::Namespaces(names) => names.contains(ns_name),
        }
    }
}

#[derive(Debug)]
struct SubscriberQueue {
    filter: UpdatesFilter,
    queue: Mutex<VecDeque<SharedWalRecord>>,
    capacity: usize,
    lagged: AtomicU64,
    signal: ContextedCondvar,
}

impl SubscriberQueue {
    fn push(&self, record: &SharedWalRecord) {
        let mut queue = self.queue.lock();
        if queue.len() >= self.capacity {
            queue.pop_front();
            if self.lagged.fetch_add(1, Ordering::Relaxed) == 0 {
                debug!(capacity = self.capacity, "subscriber lagging, dropping oldest updates");
            }
        }
        queue.push_back(record.clone());
    }
}

/// Receiving end of a subscription.
#[derive(Debug)]
pub struct UpdatesSubscription {
    inner: Arc<SubscriberQueue>,
}

impl UpdatesSubscription {
    /// Blocks until a record arrives or `ctx` is canceled.
    pub fn recv(&self, ctx: &MutationContext) -> CoreResult<SharedWalRecord> {
        let mut queue = self.inner.queue.lock();
        self.inner
            .signal
            .wait_while(&mut queue, |q| q.is_empty(), ctx, "waiting for updates")?;
        // The wait only returns Ok with a non-empty queue.
        queue
            .pop_front()
            .ok_or_else(|| CoreError::logic("updates queue empty after wakeup"))
    }

    /// Returns the next record if one is queued.
    pub fn try_recv(&self) -> Option<SharedWalRecord> {
        self.inner.queue.lock().pop_front()
    }

    /// Takes every queued record.
    pub fn drain(&self) -> Vec<SharedWalRecord> {
        self.inner.queue.lock().drain(..).collect()
    }

    /// Number of queued records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Returns true when nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records dropped because the queue was full.
    #[must_use]
    pub fn lagged(&self) -> u64 {
        self.inner.lagged.load(Ordering::Relaxed)
    }

    /// The subscription's filter.
    #[must_use]
    pub fn filter(&self) -> &UpdatesFilter {
        &self.inner.filter
    }
}

/// Set of live subscriptions.
#[derive(Debug)]
pub struct UpdatesObservers {
    subscribers: RwLock<Vec<Weak<SubscriberQueue>>>,
    check_interval: Duration,
    queue_capacity: usize,
}

impl Default for UpdatesObservers {
    fn default() -> Self {
        Self::new(Duration::from_millis(20))
    }
}

impl UpdatesObservers {
    /// Creates an empty set. Blocking receives poll their context every
    /// `check_interval`.
    #[must_use]
    pub fn new(check_interval: Duration) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            check_interval,
            queue_capacity: DEFAULT_SUBSCRIBER_QUEUE_CAPACITY,
        }
    }

    /// Sets the queue capacity of subscriptions created afterwards.
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Adds a subscriber.
    pub fn subscribe(&self, filter: UpdatesFilter) -> UpdatesSubscription {
        let inner = Arc::new(SubscriberQueue {
            filter,
            queue: Mutex::new(VecDeque::new()),
            capacity: self.queue_capacity,
            lagged: AtomicU64::new(0),
            signal: ContextedCondvar::new(self.check_interval),
        });
        self.subscribers.write().push(Arc::downgrade(&inner));
        UpdatesSubscription { inner }
    }

    /// Delivers `record` of namespace `ns_name` to every matching
    /// subscriber and prunes dropped ones. Returns the number of deliveries.
    pub fn dispatch(&self, ns_name: &str, record: &SharedWalRecord) -> usize {
        let mut delivered = 0;
        let mut stale = false;
        {
            let subscribers = self.subscribers.read();
            for weak in subscribers.iter() {
                let Some(sub) = weak.upgrade() else {
                    stale = true;
                    continue;
                };
                if sub.filter.matches(ns_name) {
                    sub.push(record);
                    sub.signal.notify_all();
                    delivered += 1;
                }
            }
        }
        if stale {
            self.subscribers.write().retain(|w| w.strong_count() > 0);
        }
        delivered
    }

    /// Number of registered subscribers, including ones not yet pruned.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Returns true if at least one live subscriber exists.
    #[must_use]
    pub fn has_subscribers(&self) -> bool {
        self.subscribers
            .read()
            .iter()
            .any(|w| w.strong_count() > 0)
    }
}
