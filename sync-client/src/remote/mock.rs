//! Mock remote store for testing.
//!
//! Keeps tables in memory, logs every call, and can be told to fail the next
//! calls or to enforce the constraints a PostgreSQL schema would (UUID keys,
//! foreign keys, unique ids).

use super::RemoteStore;
use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use sync_types::{codes, Collection, EntityId, EntityRecord, RemoteError};

/// Which remote call was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteMethod {
    /// `insert()`
    Insert,
    /// `update()`
    Update,
    /// `upsert()`
    Upsert,
    /// `delete()`
    Delete,
    /// `list()`
    List,
}

/// One logged remote call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCall {
    /// The call made.
    pub method: RemoteMethod,
    /// Target collection.
    pub collection: String,
    /// Targeted record, absent for `list()`.
    pub id: Option<EntityId>,
}

#[derive(Debug, Clone)]
struct ForeignKey {
    collection: String,
    field: String,
    references: String,
}

/// Mock remote store for testing.
///
/// Clones share state, so a test can keep a handle while the engine owns
/// another.
#[derive(Debug, Default, Clone)]
pub struct MockRemote {
    inner: Arc<Mutex<MockRemoteInner>>,
}

#[derive(Debug, Default)]
struct MockRemoteInner {
    tables: BTreeMap<String, Vec<EntityRecord>>,
    calls: Vec<RemoteCall>,
    fail_next: VecDeque<RemoteError>,
    uuid_ids: bool,
    foreign_keys: Vec<ForeignKey>,
    latency: Option<Duration>,
}

impl MockRemote {
    /// Create a new, empty mock remote.
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, MockRemoteInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Reject ids that are not UUIDs with `22P02`, like a `uuid` primary key.
    pub fn require_uuid_ids(&self) {
        self.inner().uuid_ids = true;
    }

    /// Declare that `collection.field` must reference an existing id in
    /// `references` (`23503` otherwise).
    pub fn add_foreign_key(&self, collection: &str, field: &str, references: &str) {
        self.inner().foreign_keys.push(ForeignKey {
            collection: collection.to_string(),
            field: field.to_string(),
            references: references.to_string(),
        });
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.inner().latency = Some(latency);
    }

    /// Cause the next call to fail with the given error.
    pub fn fail_next(&self, error: RemoteError) {
        self.inner().fail_next.push_back(error);
    }

    /// Cause the next `count` calls to fail with the given error.
    pub fn fail_next_n(&self, count: usize, error: RemoteError) {
        let mut inner = self.inner();
        for _ in 0..count {
            inner.fail_next.push_back(error.clone());
        }
    }

    /// Put records straight into a remote table, bypassing all checks.
    pub fn seed(&self, collection: &str, records: Vec<EntityRecord>) {
        self.inner()
            .tables
            .entry(collection.to_string())
            .or_default()
            .extend(records);
    }

    /// Current contents of a remote table.
    pub fn records(&self, collection: &str) -> Vec<EntityRecord> {
        self.inner()
            .tables
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Every call made so far, oldest first.
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.inner().calls.clone()
    }

    /// Number of calls that targeted the given record id.
    pub fn calls_for(&self, id: &str) -> usize {
        self.inner()
            .calls
            .iter()
            .filter(|c| c.id.as_ref().map(EntityId::as_str) == Some(id))
            .count()
    }

    /// Log the call, apply latency, and return any injected failure.
    async fn begin(
        &self,
        method: RemoteMethod,
        collection: &Collection,
        id: Option<&EntityId>,
    ) -> Result<(), RemoteError> {
        let latency = {
            let mut inner = self.inner();
            inner.calls.push(RemoteCall {
                method,
                collection: collection.to_string(),
                id: id.cloned(),
            });
            inner.latency
        };

        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        match self.inner().fail_next.pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl MockRemoteInner {
    fn check_id(&self, id: &EntityId) -> Result<(), RemoteError> {
        if self.uuid_ids && !id.is_uuid() {
            return Err(RemoteError::Api {
                status: 400,
                code: Some(codes::INVALID_TEXT_REPRESENTATION.to_string()),
                message: format!("invalid input syntax for type uuid: \"{}\"", id),
            });
        }
        Ok(())
    }

    fn check_references(
        &self,
        collection: &Collection,
        record: &EntityRecord,
    ) -> Result<(), RemoteError> {
        for fk in self
            .foreign_keys
            .iter()
            .filter(|fk| fk.collection == collection.as_str())
        {
            let Some(value) = record.field_value(&fk.field) else {
                continue;
            };
            let Some(target) = value.as_str() else {
                continue;
            };
            let exists = self
                .tables
                .get(&fk.references)
                .is_some_and(|rows| rows.iter().any(|r| r.id.as_str() == target));
            if !exists {
                return Err(RemoteError::Api {
                    status: 409,
                    code: Some(codes::FOREIGN_KEY_VIOLATION.to_string()),
                    message: format!(
                        "insert or update on table \"{}\" violates foreign key constraint \"{}_{}_fkey\"",
                        fk.collection, fk.collection, fk.field
                    ),
                });
            }
        }
        Ok(())
    }

    fn table(&mut self, collection: &Collection) -> &mut Vec<EntityRecord> {
        self.tables.entry(collection.to_string()).or_default()
    }
}

#[async_trait]
impl RemoteStore for MockRemote {
    async fn insert(
        &self,
        collection: &Collection,
        record: &EntityRecord,
    ) -> Result<EntityRecord, RemoteError> {
        self.begin(RemoteMethod::Insert, collection, Some(&record.id))
            .await?;

        let mut inner = self.inner();
        inner.check_id(&record.id)?;
        inner.check_references(collection, record)?;

        let table = inner.table(collection);
        if table.iter().any(|r| r.id == record.id) {
            return Err(RemoteError::Api {
                status: 409,
                code: Some(codes::UNIQUE_VIOLATION.to_string()),
                message: format!(
                    "duplicate key value violates unique constraint \"{}_pkey\"",
                    collection
                ),
            });
        }
        table.push(record.clone());
        Ok(record.clone())
    }

    async fn update(
        &self,
        collection: &Collection,
        record: &EntityRecord,
    ) -> Result<EntityRecord, RemoteError> {
        self.begin(RemoteMethod::Update, collection, Some(&record.id))
            .await?;

        let mut inner = self.inner();
        inner.check_id(&record.id)?;
        inner.check_references(collection, record)?;

        let existing = inner
            .table(collection)
            .iter_mut()
            .find(|r| r.id == record.id)
            .ok_or(RemoteError::NotFound)?;
        *existing = record.clone();
        Ok(record.clone())
    }

    async fn upsert(
        &self,
        collection: &Collection,
        record: &EntityRecord,
        conflict_key: &[String],
    ) -> Result<EntityRecord, RemoteError> {
        self.begin(RemoteMethod::Upsert, collection, Some(&record.id))
            .await?;

        let mut inner = self.inner();
        inner.check_id(&record.id)?;
        inner.check_references(collection, record)?;

        let table = inner.table(collection);
        let matches_key = |other: &EntityRecord| {
            conflict_key.iter().all(|field| {
                let ours = record.field_value(field);
                ours.is_some() && other.field_value(field) == ours
            })
        };
        match table.iter_mut().find(|r| matches_key(&**r)) {
            Some(existing) => *existing = record.clone(),
            None => table.push(record.clone()),
        }
        Ok(record.clone())
    }

    async fn delete(&self, collection: &Collection, id: &EntityId) -> Result<(), RemoteError> {
        self.begin(RemoteMethod::Delete, collection, Some(id)).await?;

        let mut inner = self.inner();
        inner.check_id(id)?;

        let table = inner.table(collection);
        let position = table
            .iter()
            .position(|r| &r.id == id)
            .ok_or(RemoteError::NotFound)?;
        table.remove(position);
        Ok(())
    }

    async fn list(&self, collection: &Collection) -> Result<Vec<EntityRecord>, RemoteError> {
        self.begin(RemoteMethod::List, collection, None).await?;
        Ok(self.records(collection.as_str()))
    }
}
