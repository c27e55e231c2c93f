//! Replication funnel.
//!
//! Namespace mutations collect [`UpdateRecord`]s into an [`UpdateBatch`]
//! and hand it to an [`NsDataReplicator`] once the local commit is done.

mod batch;
mod observers;
mod replicator;

pub use batch::{UpdateBatch, UpdateRecord};
pub use observers::{
    UpdatesFilter, UpdatesObservers, UpdatesSubscription, DEFAULT_SUBSCRIBER_QUEUE_CAPACITY,
};
pub use replicator::{NoopReplicator, NsDataReplicator, ReplicationHub};
