//! Per-collection read/write façade.
//!
//! Writes land in the local store and the sync queue in one transaction and
//! return immediately; the network is never on the write path. Reads are
//! network-first with the local cache as fallback.

use std::sync::Arc;
use std::time::Duration;
use sync_store::OfflineStore;
use sync_types::{Collection, EntityId, Mutation, QueueEntry, RecordFilter};

use crate::connectivity::ConnectivitySignal;
use crate::error::ClientError;
use crate::mapper::EntityMapper;
use crate::remote::RemoteStore;
use crate::scheduler::{RunTrigger, SyncTrigger};

/// Default bound for network-first reads.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Offline-first repository for one collection.
pub struct EntityRepository<S, R, M> {
    collection: Collection,
    mapper: M,
    store: Arc<S>,
    remote: Arc<R>,
    connectivity: ConnectivitySignal,
    conflict_key: Vec<String>,
    trigger: Option<SyncTrigger>,
    read_timeout: Duration,
}

impl<S, R, M> EntityRepository<S, R, M>
where
    S: OfflineStore,
    R: RemoteStore,
    M: EntityMapper,
{
    /// Create a repository for `collection`.
    pub fn new(
        collection: Collection,
        mapper: M,
        store: Arc<S>,
        remote: Arc<R>,
        connectivity: ConnectivitySignal,
    ) -> Self {
        Self {
            collection,
            mapper,
            store,
            remote,
            connectivity,
            conflict_key: Vec::new(),
            trigger: None,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    /// Declare the natural/composite key used by [`upsert`](Self::upsert).
    pub fn with_conflict_key(mut self, fields: Vec<String>) -> Self {
        self.conflict_key = fields;
        self
    }

    /// Request a sync run through `trigger` after each write made online.
    pub fn with_trigger(mut self, trigger: SyncTrigger) -> Self {
        self.trigger = Some(trigger);
        self
    }

    /// Bound for the remote fetch in [`list`](Self::list).
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// The collection this repository serves.
    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    /// Network-first read of the whole collection.
    ///
    /// Online, the remote snapshot replaces the cache (outstanding local
    /// mutations are re-applied on top) and the result is returned. Offline,
    /// or when the remote fails or times out, the cache is returned as is.
    ///
    /// Mutations drained by a concurrent run while the snapshot was in flight
    /// are re-applied as well, since the snapshot may not include them.
    pub async fn list(&self) -> Result<Vec<M::Entity>, ClientError> {
        if self.connectivity.is_online() {
            let outstanding = self.store.outstanding(&self.collection).await?;
            let fetched =
                tokio::time::timeout(self.read_timeout, self.remote.list(&self.collection)).await;
            match fetched {
                Ok(Ok(records)) => {
                    self.connectivity.record_success();
                    let merged = self
                        .store
                        .refresh_from_remote(&self.collection, &records, &outstanding)
                        .await?;
                    tracing::debug!(
                        "Refreshed {} from remote: {} records ({} cached after merge)",
                        self.collection,
                        records.len(),
                        merged.len()
                    );
                    return self.map_all(&merged);
                }
                Ok(Err(e)) => {
                    self.connectivity.record_failure();
                    tracing::warn!("Remote read of {} failed, using cache: {}", self.collection, e);
                }
                Err(_) => {
                    self.connectivity.record_failure();
                    tracing::warn!(
                        "Remote read of {} timed out after {:?}, using cache",
                        self.collection,
                        self.read_timeout
                    );
                }
            }
        }

        self.list_cached(&RecordFilter::Any).await
    }

    /// Cached records matching `filter`. Never touches the network.
    pub async fn list_cached(&self, filter: &RecordFilter) -> Result<Vec<M::Entity>, ClientError> {
        let records = self.store.query(&self.collection, filter).await?;
        self.map_all(&records)
    }

    /// Cached record by id.
    pub async fn get(&self, id: &EntityId) -> Result<Option<M::Entity>, ClientError> {
        self.store
            .get(&self.collection, id)
            .await?
            .map(|record| self.mapper.from_record(&record))
            .transpose()
    }

    /// Create a new entity.
    pub async fn create(&self, entity: &M::Entity) -> Result<QueueEntry, ClientError> {
        let record = self.mapper.to_record(entity)?;
        self.write(Mutation::Create(record)).await
    }

    /// Update an existing entity by id.
    pub async fn update(&self, entity: &M::Entity) -> Result<QueueEntry, ClientError> {
        let record = self.mapper.to_record(entity)?;
        self.write(Mutation::Update(record)).await
    }

    /// Insert or merge on the declared conflict key.
    pub async fn upsert(&self, entity: &M::Entity) -> Result<QueueEntry, ClientError> {
        if self.conflict_key.is_empty() {
            return Err(ClientError::MissingConflictKey(self.collection.clone()));
        }
        let record = self.mapper.to_record(entity)?;
        self.write(Mutation::Upsert {
            record,
            conflict_key: self.conflict_key.clone(),
        })
        .await
    }

    /// Delete an entity by id.
    pub async fn delete(&self, id: &EntityId) -> Result<QueueEntry, ClientError> {
        self.write(Mutation::Delete(id.clone())).await
    }

    async fn write(&self, mutation: Mutation) -> Result<QueueEntry, ClientError> {
        let entry = self
            .store
            .apply_and_enqueue(&self.collection, &mutation)
            .await?;

        if self.connectivity.is_online() {
            if let Some(trigger) = &self.trigger {
                trigger.request(RunTrigger::LocalWrite);
            }
        }
        Ok(entry)
    }

    fn map_all(
        &self,
        records: &[sync_types::EntityRecord],
    ) -> Result<Vec<M::Entity>, ClientError> {
        records
            .iter()
            .map(|record| self.mapper.from_record(record))
            .collect()
    }
}
