//! Remote data store abstraction.
//!
//! The engine only needs five calls against the server of record:
//! - `insert()` creates a record with its client-assigned id
//! - `update()` replaces fields, matching by id
//! - `upsert()` inserts or merges, matching on a declared natural key
//! - `delete()` removes by id
//! - `list()` reads a whole collection (network-first reads)
//!
//! Failures come back as a structured [`RemoteError`] so the engine can tell
//! permanent rejections from transient ones.

mod http;
mod mock;

pub use http::HttpRemote;
pub use mock::{MockRemote, RemoteCall, RemoteMethod};

use async_trait::async_trait;
use sync_types::{Collection, EntityId, EntityRecord, RemoteError};

/// Remote store trait for pushing mutations and reading collections.
///
/// Implementations handle the wire protocol (PostgREST over HTTP, in-memory
/// mock, etc).
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Insert a record, keeping its client-assigned id.
    ///
    /// Returns the record as stored remotely.
    async fn insert(
        &self,
        collection: &Collection,
        record: &EntityRecord,
    ) -> Result<EntityRecord, RemoteError>;

    /// Update an existing record by id.
    ///
    /// Returns [`RemoteError::NotFound`] if no row matched.
    async fn update(
        &self,
        collection: &Collection,
        record: &EntityRecord,
    ) -> Result<EntityRecord, RemoteError>;

    /// Insert or merge a record on the given natural/composite key.
    async fn upsert(
        &self,
        collection: &Collection,
        record: &EntityRecord,
        conflict_key: &[String],
    ) -> Result<EntityRecord, RemoteError>;

    /// Delete a record by id.
    ///
    /// Returns [`RemoteError::NotFound`] if no row matched.
    async fn delete(&self, collection: &Collection, id: &EntityId) -> Result<(), RemoteError>;

    /// Fetch every record of a collection.
    async fn list(&self, collection: &Collection) -> Result<Vec<EntityRecord>, RemoteError>;
}
