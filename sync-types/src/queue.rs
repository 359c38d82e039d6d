//! Sync queue entries: pending mutations awaiting transmission.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::TypesError;
use crate::ids::{Collection, EntityId, Sequence};
use crate::record::{EntityRecord, ID_FIELD};

/// Kind of mutation carried by a queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    /// Remote insert with the client-supplied identifier.
    Create,
    /// Remote update matching by identifier.
    Update,
    /// Remote delete matching by identifier.
    Delete,
    /// Remote upsert matching by a declared natural/composite key.
    Upsert,
}

impl Operation {
    /// Stable name used in storage and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Upsert => "UPSERT",
        }
    }
}

impl FromStr for Operation {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATE" => Ok(Self::Create),
            "UPDATE" => Ok(Self::Update),
            "DELETE" => Ok(Self::Delete),
            "UPSERT" => Ok(Self::Upsert),
            other => Err(TypesError::UnknownOperation(other.to_string())),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A mutation together with its payload snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Insert the full record.
    Create(EntityRecord),
    /// Replace the record's fields, matching by id.
    Update(EntityRecord),
    /// Insert or merge the record, matching on `conflict_key`.
    Upsert {
        /// Full record snapshot.
        record: EntityRecord,
        /// Field names forming the natural/composite key.
        conflict_key: Vec<String>,
    },
    /// Delete by identifier.
    Delete(EntityId),
}

impl Mutation {
    /// The operation kind.
    pub fn operation(&self) -> Operation {
        match self {
            Self::Create(_) => Operation::Create,
            Self::Update(_) => Operation::Update,
            Self::Upsert { .. } => Operation::Upsert,
            Self::Delete(_) => Operation::Delete,
        }
    }

    /// Identifier of the record this mutation targets.
    pub fn record_id(&self) -> &EntityId {
        match self {
            Self::Create(record) | Self::Update(record) | Self::Upsert { record, .. } => &record.id,
            Self::Delete(id) => id,
        }
    }

    /// The record snapshot, absent for deletes.
    pub fn record(&self) -> Option<&EntityRecord> {
        match self {
            Self::Create(record) | Self::Update(record) | Self::Upsert { record, .. } => {
                Some(record)
            }
            Self::Delete(_) => None,
        }
    }

    /// The declared conflict key, for upserts only.
    pub fn conflict_key(&self) -> Option<&[String]> {
        match self {
            Self::Upsert { conflict_key, .. } => Some(conflict_key),
            _ => None,
        }
    }

    /// Payload as persisted: the record snapshot, or `{"id": ...}` for deletes.
    pub fn payload(&self) -> Value {
        match self {
            Self::Create(record) | Self::Update(record) | Self::Upsert { record, .. } => {
                record.to_value()
            }
            Self::Delete(id) => serde_json::json!({ "id": id.as_str() }),
        }
    }

    /// Rebuild a mutation from its persisted parts.
    pub fn from_parts(
        operation: Operation,
        payload: Value,
        conflict_key: Option<Vec<String>>,
    ) -> Result<Self, TypesError> {
        match operation {
            Operation::Create => Ok(Self::Create(EntityRecord::from_value(payload)?)),
            Operation::Update => Ok(Self::Update(EntityRecord::from_value(payload)?)),
            Operation::Upsert => {
                let conflict_key = conflict_key
                    .filter(|k| !k.is_empty())
                    .ok_or_else(|| TypesError::InvalidRecord("upsert without conflict key".into()))?;
                Ok(Self::Upsert {
                    record: EntityRecord::from_value(payload)?,
                    conflict_key,
                })
            }
            Operation::Delete => {
                let id = payload
                    .get(ID_FIELD)
                    .and_then(Value::as_str)
                    .ok_or_else(|| TypesError::InvalidRecord("delete payload without id".into()))?;
                Ok(Self::Delete(EntityId::parse(id)?))
            }
        }
    }
}

/// Processing state of a queue entry.
///
/// `Pending → Syncing → (removed) | Pending (retry) | Failed (permanent)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueStatus {
    /// Waiting for the next engine run.
    Pending,
    /// Currently being transmitted.
    Syncing,
    /// Permanently failed; needs operator action.
    Failed,
}

impl QueueStatus {
    /// Stable name used in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Syncing => "SYNCING",
            Self::Failed => "FAILED",
        }
    }
}

impl FromStr for QueueStatus {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "SYNCING" => Ok(Self::Syncing),
            "FAILED" => Ok(Self::Failed),
            other => Err(TypesError::UnknownStatus(other.to_string())),
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a logical record across collections.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RecordKey {
    /// Matched by identifier.
    Id {
        /// Collection the record lives in.
        collection: Collection,
        /// Record identifier.
        id: EntityId,
    },
    /// Matched by the values of a natural/composite key.
    Natural {
        /// Collection the record lives in.
        collection: Collection,
        /// `(field, value)` pairs in key order, values as compact JSON.
        fields: Vec<(String, String)>,
    },
}

impl RecordKey {
    /// Key of the record with identifier `id`.
    pub fn by_id(collection: &Collection, id: &EntityId) -> Self {
        Self::Id {
            collection: collection.clone(),
            id: id.clone(),
        }
    }

    /// Key of `record` under the natural key `conflict_key`.
    ///
    /// A missing field counts as `null`.
    pub fn natural(
        collection: &Collection,
        record: &EntityRecord,
        conflict_key: &[String],
    ) -> Self {
        let fields = conflict_key
            .iter()
            .map(|field| {
                let value = record.field_value(field).unwrap_or(Value::Null);
                (field.clone(), value.to_string())
            })
            .collect();
        Self::Natural {
            collection: collection.clone(),
            fields,
        }
    }

    /// Collection the key belongs to.
    pub fn collection(&self) -> &Collection {
        match self {
            Self::Id { collection, .. } | Self::Natural { collection, .. } => collection,
        }
    }
}

/// One durable pending mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    /// Store-assigned processing order.
    pub sequence: Sequence,
    /// Collection the mutation applies to.
    pub target: Collection,
    /// The mutation and its payload snapshot.
    pub mutation: Mutation,
    /// Unix timestamp (milliseconds) when the entry was queued.
    pub enqueued_at: i64,
    /// Number of transient failures so far.
    pub retry_count: u32,
    /// Processing state.
    pub status: QueueStatus,
    /// Diagnostic, present only when `status` is `Failed`.
    pub last_error: Option<String>,
}

impl QueueEntry {
    /// The operation kind.
    pub fn operation(&self) -> Operation {
        self.mutation.operation()
    }

    /// Identifier of the targeted record.
    pub fn record_id(&self) -> &EntityId {
        self.mutation.record_id()
    }

    /// Every key identifying the targeted logical record.
    ///
    /// Upserts are matched remotely by their natural key, so they carry it
    /// next to the id; an entry conflicts with another when any key is shared.
    pub fn record_keys(&self) -> Vec<RecordKey> {
        let by_id = RecordKey::by_id(&self.target, self.record_id());
        match &self.mutation {
            Mutation::Upsert {
                record,
                conflict_key,
            } => vec![by_id, RecordKey::natural(&self.target, record, conflict_key)],
            _ => vec![by_id],
        }
    }
}

/// Number of queue entries per status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct QueueCounts {
    /// Entries waiting for a run.
    pub pending: u64,
    /// Entries currently in flight.
    pub syncing: u64,
    /// Entries that failed permanently.
    pub failed: u64,
}

impl QueueCounts {
    /// Entries that will still be sent automatically.
    pub fn outstanding(&self) -> u64 {
        self.pending + self.syncing
    }

    /// All entries in the queue.
    pub fn total(&self) -> u64 {
        self.pending + self.syncing + self.failed
    }
}
