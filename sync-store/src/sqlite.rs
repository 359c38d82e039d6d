//! SQLite storage backend for sync-store.

use crate::error::{StoreError, StoreResult};
use crate::{LocalStore, OfflineStore, SyncQueue};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
    SqliteSynchronous,
};
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use sync_types::{
    Collection, EngineId, EntityId, EntityRecord, Mutation, Operation, QueueCounts, QueueEntry,
    QueueStatus, RecordFilter, Sequence,
};

const ENTRY_COLUMNS: &str =
    "sequence, target, operation, payload, conflict_key, enqueued_at, retry_count, status, last_error";

/// SQLite-backed local store and sync queue.
///
/// Uses WAL mode for concurrent reads/writes. Cheap to clone (shares the pool).
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database file at `path`.
    pub async fn new(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.is_dir() {
                return Err(StoreError::InvalidPath {
                    path: path.to_path_buf(),
                });
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(StoreError::Database)?;

        let store = Self { pool };
        store.run_migrations().await?;
        tracing::debug!("Opened local store at {}", path.display());
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    ///
    /// A single connection that is never recycled, since every connection to
    /// `:memory:` is a separate database.
    pub async fn in_memory() -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(":memory:")
            .map_err(StoreError::Database)?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .connect_with(options)
            .await
            .map_err(StoreError::Database)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                owner_id TEXT,
                data TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (collection, id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StoreError::Database)?;

        // AUTOINCREMENT: sequences are never reused, even after the newest
        // entry is deleted
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sync_queue (
                sequence INTEGER PRIMARY KEY AUTOINCREMENT,
                target TEXT NOT NULL,
                operation TEXT NOT NULL,
                record_id TEXT NOT NULL,
                payload TEXT NOT NULL,
                conflict_key TEXT,
                enqueued_at INTEGER NOT NULL,
                retry_count INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'PENDING',
                last_error TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StoreError::Database)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_sync_queue_status ON sync_queue(status, sequence)",
        )
        .execute(&self.pool)
        .await
        .map_err(StoreError::Database)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_sync_queue_target ON sync_queue(target, record_id)",
        )
        .execute(&self.pool)
        .await
        .map_err(StoreError::Database)?;

        // At most one row: the engine currently allowed to drain the queue
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sync_lease (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                holder TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StoreError::Database)?;

        Ok(())
    }

    async fn update_entry(&self, sql: &str, sequence: Sequence) -> StoreResult<()> {
        let result = sqlx::query(sql)
            .bind(sequence.value() as i64)
            .execute(&self.pool)
            .await
            .map_err(StoreError::Database)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::EntryNotFound(sequence));
        }
        Ok(())
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn decode_record(data: &str) -> StoreResult<EntityRecord> {
    let value: Value = serde_json::from_str(data)?;
    Ok(EntityRecord::from_value(value)?)
}

async fn upsert_record(
    conn: &mut SqliteConnection,
    collection: &Collection,
    record: &EntityRecord,
) -> StoreResult<()> {
    let data = serde_json::to_string(&record.to_value())?;

    sqlx::query(
        r#"
        INSERT INTO records (collection, id, owner_id, data, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        ON CONFLICT(collection, id) DO UPDATE SET
            owner_id = excluded.owner_id,
            data = excluded.data,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(collection.as_str())
    .bind(record.id.as_str())
    .bind(record.owner_id.as_deref())
    .bind(data)
    .bind(now_millis())
    .execute(&mut *conn)
    .await
    .map_err(StoreError::Database)?;

    Ok(())
}

async fn delete_record(
    conn: &mut SqliteConnection,
    collection: &Collection,
    id: &EntityId,
) -> StoreResult<bool> {
    let result = sqlx::query("DELETE FROM records WHERE collection = ?1 AND id = ?2")
        .bind(collection.as_str())
        .bind(id.as_str())
        .execute(&mut *conn)
        .await
        .map_err(StoreError::Database)?;

    Ok(result.rows_affected() > 0)
}

async fn fetch_records(
    conn: &mut SqliteConnection,
    collection: &Collection,
) -> StoreResult<Vec<EntityRecord>> {
    let rows: Vec<String> =
        sqlx::query_scalar("SELECT data FROM records WHERE collection = ?1 ORDER BY rowid")
            .bind(collection.as_str())
            .fetch_all(&mut *conn)
            .await
            .map_err(StoreError::Database)?;

    rows.iter().map(|data| decode_record(data)).collect()
}

/// Apply a mutation to the cached copy of its collection.
async fn apply_mutation(
    conn: &mut SqliteConnection,
    target: &Collection,
    mutation: &Mutation,
) -> StoreResult<()> {
    match mutation {
        Mutation::Create(record) | Mutation::Update(record) => {
            upsert_record(conn, target, record).await
        }
        Mutation::Upsert {
            record,
            conflict_key,
        } => {
            upsert_record(conn, target, record).await?;
            // The remote merges on the natural key, so a cached row with the
            // same key but another id is the same logical entity
            for other in fetch_records(conn, target).await? {
                let same_key = conflict_key.iter().all(|field| {
                    let ours = record.field_value(field);
                    ours.is_some() && other.field_value(field) == ours
                });
                if other.id != record.id && same_key {
                    delete_record(conn, target, &other.id).await?;
                }
            }
            Ok(())
        }
        Mutation::Delete(id) => delete_record(conn, target, id).await.map(|_| ()),
    }
}

async fn fetch_outstanding(
    conn: &mut SqliteConnection,
    collection: &Collection,
) -> StoreResult<Vec<QueueEntry>> {
    let sql = format!(
        "SELECT {} FROM sync_queue WHERE target = ?1 AND status IN ('PENDING', 'SYNCING') ORDER BY sequence ASC",
        ENTRY_COLUMNS
    );
    sqlx::query_as::<_, QueueRow>(&sql)
        .bind(collection.as_str())
        .fetch_all(&mut *conn)
        .await
        .map_err(StoreError::Database)?
        .into_iter()
        .map(QueueEntry::try_from)
        .collect()
}

async fn insert_entry(
    conn: &mut SqliteConnection,
    target: &Collection,
    mutation: &Mutation,
) -> StoreResult<QueueEntry> {
    let enqueued_at = now_millis();
    let payload = serde_json::to_string(&mutation.payload())?;
    let conflict_key = mutation
        .conflict_key()
        .map(serde_json::to_string)
        .transpose()?;

    let sequence: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO sync_queue (target, operation, record_id, payload, conflict_key, enqueued_at, retry_count, status)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)
        RETURNING sequence
        "#,
    )
    .bind(target.as_str())
    .bind(mutation.operation().as_str())
    .bind(mutation.record_id().as_str())
    .bind(payload)
    .bind(conflict_key)
    .bind(enqueued_at)
    .bind(QueueStatus::Pending.as_str())
    .fetch_one(&mut *conn)
    .await
    .map_err(StoreError::Database)?;

    tracing::debug!(
        "Queued {} {}/{} as #{}",
        mutation.operation(),
        target,
        mutation.record_id(),
        sequence
    );

    Ok(QueueEntry {
        sequence: Sequence::new(sequence as u64),
        target: target.clone(),
        mutation: mutation.clone(),
        enqueued_at,
        retry_count: 0,
        status: QueueStatus::Pending,
        last_error: None,
    })
}

#[async_trait]
impl LocalStore for SqliteStore {
    async fn put(&self, collection: &Collection, record: &EntityRecord) -> StoreResult<()> {
        let mut conn = self.pool.acquire().await.map_err(StoreError::Database)?;
        upsert_record(&mut conn, collection, record).await
    }

    async fn bulk_put(
        &self,
        collection: &Collection,
        records: &[EntityRecord],
    ) -> StoreResult<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(StoreError::Database)?;
        for record in records {
            upsert_record(&mut tx, collection, record).await?;
        }
        tx.commit().await.map_err(StoreError::Database)?;
        Ok(())
    }

    async fn delete(&self, collection: &Collection, id: &EntityId) -> StoreResult<bool> {
        let mut conn = self.pool.acquire().await.map_err(StoreError::Database)?;
        delete_record(&mut conn, collection, id).await
    }

    async fn get(
        &self,
        collection: &Collection,
        id: &EntityId,
    ) -> StoreResult<Option<EntityRecord>> {
        let data: Option<String> =
            sqlx::query_scalar("SELECT data FROM records WHERE collection = ?1 AND id = ?2")
                .bind(collection.as_str())
                .bind(id.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(StoreError::Database)?;

        data.as_deref().map(decode_record).transpose()
    }

    async fn query(
        &self,
        collection: &Collection,
        filter: &RecordFilter,
    ) -> StoreResult<Vec<EntityRecord>> {
        let mut conn = self.pool.acquire().await.map_err(StoreError::Database)?;
        let records = fetch_records(&mut conn, collection).await?;
        Ok(records.into_iter().filter(|r| filter.matches(r)).collect())
    }

    async fn replace_collection(
        &self,
        collection: &Collection,
        records: &[EntityRecord],
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(StoreError::Database)?;

        sqlx::query("DELETE FROM records WHERE collection = ?1")
            .bind(collection.as_str())
            .execute(&mut *tx)
            .await
            .map_err(StoreError::Database)?;

        for record in records {
            upsert_record(&mut tx, collection, record).await?;
        }

        tx.commit().await.map_err(StoreError::Database)?;
        Ok(())
    }
}

#[async_trait]
impl SyncQueue for SqliteStore {
    async fn enqueue(&self, target: &Collection, mutation: &Mutation) -> StoreResult<QueueEntry> {
        let mut conn = self.pool.acquire().await.map_err(StoreError::Database)?;
        insert_entry(&mut conn, target, mutation).await
    }

    async fn list_pending(&self) -> StoreResult<Vec<QueueEntry>> {
        self.list_entries(Some(QueueStatus::Pending)).await
    }

    async fn list_entries(&self, status: Option<QueueStatus>) -> StoreResult<Vec<QueueEntry>> {
        let rows = match status {
            Some(status) => {
                let sql = format!(
                    "SELECT {} FROM sync_queue WHERE status = ?1 ORDER BY sequence ASC",
                    ENTRY_COLUMNS
                );
                sqlx::query_as::<_, QueueRow>(&sql)
                    .bind(status.as_str())
                    .fetch_all(&self.pool)
                    .await
            }
            None => {
                let sql = format!("SELECT {} FROM sync_queue ORDER BY sequence ASC", ENTRY_COLUMNS);
                sqlx::query_as::<_, QueueRow>(&sql)
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(StoreError::Database)?;

        rows.into_iter().map(|row| row.try_into()).collect()
    }

    async fn counts(&self) -> StoreResult<QueueCounts> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM sync_queue GROUP BY status")
                .fetch_all(&self.pool)
                .await
                .map_err(StoreError::Database)?;

        let mut counts = QueueCounts::default();
        for (status, count) in rows {
            let count = count as u64;
            match status.parse::<QueueStatus>()? {
                QueueStatus::Pending => counts.pending = count,
                QueueStatus::Syncing => counts.syncing = count,
                QueueStatus::Failed => counts.failed = count,
            }
        }
        Ok(counts)
    }

    async fn mark_syncing(&self, sequence: Sequence) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE sync_queue SET status = 'SYNCING' WHERE sequence = ?1 AND status = 'PENDING'",
        )
        .bind(sequence.value() as i64)
        .execute(&self.pool)
        .await
        .map_err(StoreError::Database)?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_succeeded(&self, sequence: Sequence) -> StoreResult<()> {
        self.update_entry("DELETE FROM sync_queue WHERE sequence = ?1", sequence)
            .await
    }

    async fn mark_retry(&self, sequence: Sequence) -> StoreResult<u32> {
        let retry_count: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE sync_queue
            SET status = 'PENDING', retry_count = retry_count + 1
            WHERE sequence = ?1
            RETURNING retry_count
            "#,
        )
        .bind(sequence.value() as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::Database)?;

        retry_count
            .map(|count| count as u32)
            .ok_or(StoreError::EntryNotFound(sequence))
    }

    async fn mark_failed(&self, sequence: Sequence, reason: &str) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE sync_queue SET status = 'FAILED', last_error = ?2 WHERE sequence = ?1",
        )
        .bind(sequence.value() as i64)
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(StoreError::Database)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::EntryNotFound(sequence));
        }
        Ok(())
    }

    async fn requeue_in_flight(&self) -> StoreResult<u64> {
        let result =
            sqlx::query("UPDATE sync_queue SET status = 'PENDING' WHERE status = 'SYNCING'")
                .execute(&self.pool)
                .await
                .map_err(StoreError::Database)?;

        Ok(result.rows_affected())
    }

    async fn acquire_lease(&self, holder: &EngineId, ttl: Duration) -> StoreResult<bool> {
        let now = now_millis();
        let expires_at = now.saturating_add(ttl.as_millis() as i64);
        // One statement, so the check and the write share SQLite's write lock
        let result = sqlx::query(
            r#"
            INSERT INTO sync_lease (id, holder, expires_at) VALUES (1, ?1, ?2)
            ON CONFLICT(id) DO UPDATE
            SET holder = excluded.holder, expires_at = excluded.expires_at
            WHERE sync_lease.holder = excluded.holder OR sync_lease.expires_at <= ?3
            "#,
        )
        .bind(holder.as_str())
        .bind(expires_at)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(StoreError::Database)?;

        Ok(result.rows_affected() == 1)
    }

    async fn release_lease(&self, holder: &EngineId) -> StoreResult<()> {
        sqlx::query("DELETE FROM sync_lease WHERE holder = ?1")
            .bind(holder.as_str())
            .execute(&self.pool)
            .await
            .map_err(StoreError::Database)?;
        Ok(())
    }

    async fn purge_failed(&self) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM sync_queue WHERE status = 'FAILED'")
            .execute(&self.pool)
            .await
            .map_err(StoreError::Database)?;

        tracing::info!("Purged {} failed queue entries", result.rows_affected());
        Ok(result.rows_affected())
    }

    async fn purge_all(&self) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM sync_queue")
            .execute(&self.pool)
            .await
            .map_err(StoreError::Database)?;

        tracing::info!("Purged all {} queue entries", result.rows_affected());
        Ok(result.rows_affected())
    }

    async fn resubmit_failed(&self, sequence: Sequence) -> StoreResult<QueueEntry> {
        let sql = format!(
            r#"
            UPDATE sync_queue
            SET status = 'PENDING', retry_count = 0, last_error = NULL
            WHERE sequence = ?1 AND status = 'FAILED'
            RETURNING {}
            "#,
            ENTRY_COLUMNS
        );
        let row = sqlx::query_as::<_, QueueRow>(&sql)
            .bind(sequence.value() as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::Database)?;

        match row {
            Some(row) => row.try_into(),
            None => Err(StoreError::EntryNotFound(sequence)),
        }
    }
}

#[async_trait]
impl OfflineStore for SqliteStore {
    async fn apply_and_enqueue(
        &self,
        target: &Collection,
        mutation: &Mutation,
    ) -> StoreResult<QueueEntry> {
        // Dropping the transaction on error rolls the local write back
        let mut tx = self.pool.begin().await.map_err(StoreError::Database)?;
        apply_mutation(&mut tx, target, mutation).await?;
        let entry = insert_entry(&mut tx, target, mutation).await?;
        tx.commit().await.map_err(StoreError::Database)?;
        Ok(entry)
    }

    async fn outstanding(&self, collection: &Collection) -> StoreResult<Vec<QueueEntry>> {
        let mut conn = self.pool.acquire().await.map_err(StoreError::Database)?;
        fetch_outstanding(&mut conn, collection).await
    }

    async fn refresh_from_remote(
        &self,
        collection: &Collection,
        records: &[EntityRecord],
        outstanding_at_fetch: &[QueueEntry],
    ) -> StoreResult<Vec<EntityRecord>> {
        let mut tx = self.pool.begin().await.map_err(StoreError::Database)?;

        sqlx::query("DELETE FROM records WHERE collection = ?1")
            .bind(collection.as_str())
            .execute(&mut *tx)
            .await
            .map_err(StoreError::Database)?;

        for record in records {
            upsert_record(&mut tx, collection, record).await?;
        }

        let mut replay = fetch_outstanding(&mut tx, collection).await?;

        // Entries drained while the snapshot was in flight are gone from the
        // queue (FAILED ones stay and are not replayed)
        let queued: HashSet<i64> =
            sqlx::query_scalar("SELECT sequence FROM sync_queue WHERE target = ?1")
                .bind(collection.as_str())
                .fetch_all(&mut *tx)
                .await
                .map_err(StoreError::Database)?
                .into_iter()
                .collect();
        replay.extend(
            outstanding_at_fetch
                .iter()
                .filter(|entry| {
                    entry.target == *collection
                        && !queued.contains(&(entry.sequence.value() as i64))
                })
                .cloned(),
        );
        replay.sort_by_key(|entry| entry.sequence);

        for entry in &replay {
            apply_mutation(&mut tx, collection, &entry.mutation).await?;
        }

        let merged = fetch_records(&mut tx, collection).await?;
        tx.commit().await.map_err(StoreError::Database)?;
        Ok(merged)
    }
}

/// Internal row type for queue queries.
#[derive(sqlx::FromRow)]
struct QueueRow {
    sequence: i64,
    target: String,
    operation: String,
    payload: String,
    conflict_key: Option<String>,
    enqueued_at: i64,
    retry_count: i64,
    status: String,
    last_error: Option<String>,
}

impl TryFrom<QueueRow> for QueueEntry {
    type Error = StoreError;

    fn try_from(row: QueueRow) -> Result<Self, Self::Error> {
        let operation = Operation::from_str(&row.operation)?;
        let payload: Value = serde_json::from_str(&row.payload)?;
        let conflict_key: Option<Vec<String>> = row
            .conflict_key
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;

        Ok(QueueEntry {
            sequence: Sequence::new(row.sequence as u64),
            target: Collection::new(row.target)?,
            mutation: Mutation::from_parts(operation, payload, conflict_key)?,
            enqueued_at: row.enqueued_at,
            retry_count: u32::try_from(row.retry_count)
                .map_err(|_| StoreError::InvalidRow(format!("retry_count {}", row.retry_count)))?,
            status: QueueStatus::from_str(&row.status)?,
            last_error: row.last_error,
        })
    }
}
