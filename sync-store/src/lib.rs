//! # sync-store
//!
//! Durable on-device storage for fleetsync.
//!
//! Two concerns share one SQLite database so they can be written in a single
//! transaction:
//! - [`LocalStore`] - cached copies of remote entities, queried locally
//! - [`SyncQueue`] - ordered, durable list of pending mutations
//!
//! [`OfflineStore`] ties them together: a local write and its queue entry
//! land atomically or not at all.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod sqlite;

pub use error::{StoreError, StoreResult};
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use std::time::Duration;
use sync_types::{
    Collection, EngineId, EntityId, EntityRecord, Mutation, QueueCounts, QueueEntry,
    QueueStatus, RecordFilter, Sequence,
};

/// Cached entity records, keyed by (collection, id).
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Insert or replace a record by identifier.
    async fn put(&self, collection: &Collection, record: &EntityRecord) -> StoreResult<()>;

    /// Insert or replace many records in one transaction.
    async fn bulk_put(&self, collection: &Collection, records: &[EntityRecord])
        -> StoreResult<()>;

    /// Remove a record.
    ///
    /// Returns whether a row was removed; deleting a missing id is not an error.
    async fn delete(&self, collection: &Collection, id: &EntityId) -> StoreResult<bool>;

    /// Look up one record.
    async fn get(&self, collection: &Collection, id: &EntityId)
        -> StoreResult<Option<EntityRecord>>;

    /// Snapshot of the records matching `filter`, in insertion order.
    async fn query(
        &self,
        collection: &Collection,
        filter: &RecordFilter,
    ) -> StoreResult<Vec<EntityRecord>>;

    /// Replace the whole cached collection with `records`.
    async fn replace_collection(
        &self,
        collection: &Collection,
        records: &[EntityRecord],
    ) -> StoreResult<()>;
}

/// Durable queue of pending mutations.
///
/// Entries are processed in ascending [`Sequence`] order and deleted on
/// success, so the queue only ever holds outstanding work.
///
/// Several processes may open the same database. Only the holder of the
/// drain lease may move entries to SYNCING or recover them.
#[async_trait]
pub trait SyncQueue: Send + Sync {
    /// Append a PENDING entry with `retry_count = 0`.
    async fn enqueue(&self, target: &Collection, mutation: &Mutation) -> StoreResult<QueueEntry>;

    /// All PENDING entries, oldest first.
    async fn list_pending(&self) -> StoreResult<Vec<QueueEntry>>;

    /// Entries in any state (or only `status`), oldest first.
    async fn list_entries(&self, status: Option<QueueStatus>) -> StoreResult<Vec<QueueEntry>>;

    /// Number of entries per status.
    async fn counts(&self) -> StoreResult<QueueCounts>;

    /// PENDING → SYNCING.
    ///
    /// Returns whether this call claimed the entry; `false` when it is no
    /// longer PENDING.
    async fn mark_syncing(&self, sequence: Sequence) -> StoreResult<bool>;

    /// Remove an entry whose mutation reached the remote.
    async fn mark_succeeded(&self, sequence: Sequence) -> StoreResult<()>;

    /// Back to PENDING with `retry_count + 1`; returns the new count.
    async fn mark_retry(&self, sequence: Sequence) -> StoreResult<u32>;

    /// Mark an entry FAILED with a diagnostic.
    async fn mark_failed(&self, sequence: Sequence, reason: &str) -> StoreResult<()>;

    /// Reset SYNCING entries left by an interrupted run to PENDING.
    ///
    /// Call only while holding the drain lease: any SYNCING entry then
    /// belongs to a run that is gone. Retry counts are untouched. Returns the
    /// number of entries reset.
    async fn requeue_in_flight(&self) -> StoreResult<u64>;

    /// Take or renew the drain lease for `holder` until `ttl` from now.
    ///
    /// Returns `false` while another holder's lease is unexpired.
    async fn acquire_lease(&self, holder: &EngineId, ttl: Duration) -> StoreResult<bool>;

    /// Give the drain lease up, if `holder` owns it.
    async fn release_lease(&self, holder: &EngineId) -> StoreResult<()>;

    /// Delete every FAILED entry; returns rows removed.
    async fn purge_failed(&self) -> StoreResult<u64>;

    /// Delete every entry regardless of state; returns rows removed.
    async fn purge_all(&self) -> StoreResult<u64>;

    /// FAILED → PENDING with `retry_count = 0` and no diagnostic.
    async fn resubmit_failed(&self, sequence: Sequence) -> StoreResult<QueueEntry>;
}

/// A local store and sync queue sharing one transactional backend.
#[async_trait]
pub trait OfflineStore: LocalStore + SyncQueue {
    /// Apply `mutation` to the local cache and enqueue it, atomically.
    async fn apply_and_enqueue(
        &self,
        target: &Collection,
        mutation: &Mutation,
    ) -> StoreResult<QueueEntry>;

    /// PENDING and SYNCING entries for `collection`, oldest first.
    async fn outstanding(&self, collection: &Collection) -> StoreResult<Vec<QueueEntry>>;

    /// Overwrite the cached collection with a remote snapshot.
    ///
    /// Outstanding (PENDING or SYNCING) mutations for the collection are
    /// re-applied on top, in queue order, so optimistic writes stay visible.
    /// So are entries of `outstanding_at_fetch` (the [`outstanding`] list
    /// taken before the snapshot was requested) that have since been drained:
    /// the snapshot may predate them. Returns the resulting cache contents.
    ///
    /// [`outstanding`]: OfflineStore::outstanding
    async fn refresh_from_remote(
        &self,
        collection: &Collection,
        records: &[EntityRecord],
        outstanding_at_fetch: &[QueueEntry],
    ) -> StoreResult<Vec<EntityRecord>>;
}
