//! SyncEngine - drains the sync queue against the remote store.
//!
//! # Architecture
//!
//! The engine uses pure logic from sync-core for every decision (may a run
//! start, what to do after a failure, may this entry go now) and performs
//! the I/O itself through the [`SyncQueue`] and [`RemoteStore`] traits.
//!
//! ```text
//! SyncLoop → SyncEngine → RemoteStore → Network
//!                ↓    ↘
//!     sync-core     SyncQueue (SQLite)
//! ```
//!
//! A run first takes the drain lease in the database, so only one engine
//! drains a queue even when several processes share it. It then requeues
//! entries left SYNCING by an interrupted run, takes a snapshot of the
//! PENDING entries and dispatches them one at a time, in sequence order. A
//! failing entry never aborts the run.

use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use sync_core::{
    Disposition, EngineAction, EngineEvent, EngineState, RecordGate, RetryPolicy, RunReport,
    SkipReason, DEFAULT_MAX_RETRIES,
};
use sync_store::{StoreError, SyncQueue};
use sync_types::{
    EngineId, Mutation, QueueCounts, QueueEntry, QueueStatus, RemoteError, Sequence,
};

use crate::connectivity::ConnectivitySignal;
use crate::error::ClientError;
use crate::remote::RemoteStore;

/// Configuration for SyncEngine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Transient failures tolerated before an entry is marked FAILED.
    pub max_retries: u32,
    /// Upper bound for every remote call.
    pub remote_timeout: Duration,
    /// Interval of the periodic trigger, if any.
    pub periodic_interval: Option<Duration>,
    /// How long the drain lease outlives its last renewal. Renewed before
    /// every entry, so it must exceed `remote_timeout`.
    pub lease_ttl: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            remote_timeout: Duration::from_secs(10),
            periodic_interval: Some(Duration::from_secs(60)),
            lease_ttl: Duration::from_secs(60),
        }
    }
}

impl EngineConfig {
    /// Set the retry bound for transient failures.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the timeout applied to each remote call.
    pub fn with_remote_timeout(mut self, timeout: Duration) -> Self {
        self.remote_timeout = timeout;
        self
    }

    /// Set (or disable) the periodic trigger.
    pub fn with_periodic_interval(mut self, interval: Option<Duration>) -> Self {
        self.periodic_interval = interval;
        self
    }

    /// Set the drain lease lifetime.
    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }
}

/// Explicit confirmation for irreversible maintenance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirm {
    /// The caller confirmed.
    Yes,
    /// The caller did not confirm.
    No,
}

impl From<bool> for Confirm {
    fn from(confirmed: bool) -> Self {
        if confirmed {
            Self::Yes
        } else {
            Self::No
        }
    }
}

/// Result of asking the engine to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The snapshot was drained (or cut short by lost connectivity).
    Completed {
        /// What the run did.
        report: RunReport,
        /// Delay before a follow-up run, when work was left for retry.
        retry_after: Option<Duration>,
    },
    /// The run did not start; not an error.
    Skipped(SkipReason),
}

impl RunOutcome {
    /// The run report, if the run happened.
    pub fn report(&self) -> Option<&RunReport> {
        match self {
            Self::Completed { report, .. } => Some(report),
            Self::Skipped(_) => None,
        }
    }
}

/// Pollable sync state for the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    /// Whether a run is draining the queue right now.
    pub running: bool,
    /// Current connectivity.
    pub online: bool,
    /// Remote failures since the last success or reconnection.
    pub recent_failures: u32,
    /// Queue entries per status.
    pub counts: QueueCounts,
}

/// The sync engine. One instance per process.
pub struct SyncEngine<S, R> {
    id: EngineId,
    store: Arc<S>,
    remote: Arc<R>,
    connectivity: ConnectivitySignal,
    config: EngineConfig,
    policy: RetryPolicy,
    state: Mutex<EngineState>,
}

/// Returns the engine to `Idle` if a run ends without `finish()` (error or
/// cancellation).
struct RunGuard<'a, S, R> {
    engine: &'a SyncEngine<S, R>,
    armed: bool,
}

impl<S, R> RunGuard<'_, S, R> {
    fn finish(mut self, retry_pending: bool) -> Option<Duration> {
        self.armed = false;
        self.engine
            .transition(EngineEvent::RunFinished { retry_pending })
            .into_iter()
            .find_map(|action| match action {
                EngineAction::ScheduleRetry { delay } => Some(delay),
                _ => None,
            })
    }
}

impl<S, R> Drop for RunGuard<'_, S, R> {
    fn drop(&mut self) {
        if self.armed {
            self.engine.transition(EngineEvent::RunFinished {
                retry_pending: false,
            });
        }
    }
}

impl<S, R> SyncEngine<S, R> {
    fn state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn transition(&self, event: EngineEvent) -> Vec<EngineAction> {
        let mut state = self.state();
        let (next, actions) = state.on_event(event);
        *state = next;
        actions
    }

    /// Identity written to the drain lease.
    pub fn id(&self) -> &EngineId {
        &self.id
    }

    /// Whether a run is in progress.
    pub fn is_running(&self) -> bool {
        self.state().is_running()
    }

    /// The connectivity signal consulted before every run.
    pub fn connectivity(&self) -> &ConnectivitySignal {
        &self.connectivity
    }

    /// The engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The queue this engine drains.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// The remote this engine pushes to.
    pub fn remote(&self) -> &Arc<R> {
        &self.remote
    }
}

impl<S: SyncQueue, R: RemoteStore> SyncEngine<S, R> {
    /// Create a new SyncEngine.
    pub fn new(
        store: Arc<S>,
        remote: Arc<R>,
        connectivity: ConnectivitySignal,
        config: EngineConfig,
    ) -> Self {
        Self {
            id: EngineId::generate(),
            store,
            remote,
            connectivity,
            policy: RetryPolicy::new(config.max_retries),
            config,
            state: Mutex::new(EngineState::new()),
        }
    }

    /// Run the engine once.
    ///
    /// Returns `Skipped` without touching the queue when a run is already in
    /// progress, connectivity is down, or another engine holds the drain
    /// lease. Remote failures never surface here; only local storage errors
    /// do.
    pub async fn run_once(&self) -> Result<RunOutcome, ClientError> {
        let online = self.connectivity.is_online();
        let actions = self.transition(EngineEvent::RunRequested { online });

        if let Some(reason) = actions.iter().find_map(|action| match action {
            EngineAction::SkipRun(reason) => Some(*reason),
            _ => None,
        }) {
            tracing::debug!("Sync run skipped: {}", reason);
            return Ok(RunOutcome::Skipped(reason));
        }

        let guard = RunGuard {
            engine: self,
            armed: true,
        };
        if !self
            .store
            .acquire_lease(&self.id, self.config.lease_ttl)
            .await?
        {
            guard.finish(false);
            tracing::debug!("Sync run skipped: {}", SkipReason::LeaseHeld);
            return Ok(RunOutcome::Skipped(SkipReason::LeaseHeld));
        }

        let drained = self.drain().await;
        if let Err(e) = self.store.release_lease(&self.id).await {
            tracing::warn!("Failed to release drain lease: {}", e);
        }
        let report = drained?;
        let retry_after = guard.finish(report.needs_retry());

        if report.attempted > 0 || report.deferred > 0 || report.interrupted {
            tracing::info!("Sync run finished: {}", report);
        } else {
            tracing::debug!("Sync run finished: queue empty");
        }
        Ok(RunOutcome::Completed {
            report,
            retry_after,
        })
    }

    async fn drain(&self) -> Result<RunReport, ClientError> {
        let requeued = self.store.requeue_in_flight().await?;
        if requeued > 0 {
            tracing::warn!(
                "Requeued {} entries left in flight by an interrupted run",
                requeued
            );
        }

        let snapshot = self.store.list_pending().await?;
        let mut report = RunReport::default();
        let mut gate = RecordGate::new();

        for entry in snapshot {
            if !self.connectivity.is_online() {
                tracing::info!("Connectivity lost; leaving remaining entries pending");
                report.interrupted = true;
                break;
            }
            if !self
                .store
                .acquire_lease(&self.id, self.config.lease_ttl)
                .await?
            {
                tracing::warn!("Drain lease taken over by another engine; stopping run");
                report.interrupted = true;
                break;
            }

            let keys = entry.record_keys();
            if !gate.admits(&keys) {
                tracing::debug!(
                    "Deferring #{} {} {}/{}: earlier entry awaits retry",
                    entry.sequence,
                    entry.operation(),
                    entry.target,
                    entry.record_id()
                );
                report.record_deferred();
                continue;
            }

            if !self.store.mark_syncing(entry.sequence).await? {
                tracing::debug!("Skipping #{}: no longer pending", entry.sequence);
                continue;
            }

            let result = self.dispatch(&entry).await;
            match self.complete(&entry, result).await {
                Ok(None) => report.record_success(),
                Ok(Some(disposition)) => {
                    if matches!(disposition, Disposition::Retry { .. }) {
                        gate.hold(keys);
                    }
                    report.record(&disposition);
                }
                Err(ClientError::Store(StoreError::EntryNotFound(sequence))) => {
                    // Requeued or removed by an engine that took the lease over
                    tracing::warn!(
                        "#{} changed hands while in flight; stopping run",
                        sequence
                    );
                    report.interrupted = true;
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(report)
    }

    /// Record a dispatch result on the entry. Returns the disposition of a
    /// failure, `None` on success.
    async fn complete(
        &self,
        entry: &QueueEntry,
        result: Result<(), RemoteError>,
    ) -> Result<Option<Disposition>, ClientError> {
        match result {
            Ok(()) => {
                self.connectivity.record_success();
                self.store.mark_succeeded(entry.sequence).await?;
                tracing::debug!(
                    "Synced #{} {} {}/{}",
                    entry.sequence,
                    entry.operation(),
                    entry.target,
                    entry.record_id()
                );
                Ok(None)
            }
            Err(err) => {
                self.connectivity.record_failure();
                let disposition = self
                    .policy
                    .on_failure(entry.operation(), entry.retry_count, &err);
                self.settle(entry, &disposition, &err).await?;
                Ok(Some(disposition))
            }
        }
    }

    /// Record the outcome of a failed dispatch on the entry.
    async fn settle(
        &self,
        entry: &QueueEntry,
        disposition: &Disposition,
        err: &RemoteError,
    ) -> Result<(), ClientError> {
        match disposition {
            Disposition::Applied => {
                self.store.mark_succeeded(entry.sequence).await?;
                tracing::info!(
                    "#{} {} {}/{} already applied remotely ({})",
                    entry.sequence,
                    entry.operation(),
                    entry.target,
                    entry.record_id(),
                    err
                );
            }
            Disposition::Retry { .. } => {
                let retry_count = self.store.mark_retry(entry.sequence).await?;
                tracing::warn!(
                    "#{} {} {}/{} failed, will retry ({}/{}): {}",
                    entry.sequence,
                    entry.operation(),
                    entry.target,
                    entry.record_id(),
                    retry_count,
                    self.policy.max_retries(),
                    err
                );
            }
            Disposition::Failed { reason, .. } => {
                self.store.mark_failed(entry.sequence, reason).await?;
                tracing::error!(
                    "#{} {} {}/{} marked FAILED: {}",
                    entry.sequence,
                    entry.operation(),
                    entry.target,
                    entry.record_id(),
                    reason
                );
            }
        }
        Ok(())
    }

    /// Send one entry to the remote, bounded by the remote timeout.
    async fn dispatch(&self, entry: &QueueEntry) -> Result<(), RemoteError> {
        let target = &entry.target;
        let call = async {
            match &entry.mutation {
                Mutation::Create(record) => self.remote.insert(target, record).await.map(|_| ()),
                Mutation::Update(record) => self.remote.update(target, record).await.map(|_| ()),
                Mutation::Upsert {
                    record,
                    conflict_key,
                } => self
                    .remote
                    .upsert(target, record, conflict_key)
                    .await
                    .map(|_| ()),
                Mutation::Delete(id) => self.remote.delete(target, id).await,
            }
        };

        match tokio::time::timeout(self.config.remote_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout(self.config.remote_timeout)),
        }
    }

    /// Current sync state, for polling by the application.
    pub async fn status(&self) -> Result<SyncStatus, ClientError> {
        Ok(SyncStatus {
            running: self.is_running(),
            online: self.connectivity.is_online(),
            recent_failures: self.connectivity.recent_failures(),
            counts: self.store.counts().await?,
        })
    }

    /// Queue entries for inspection, optionally only one status.
    pub async fn entries(&self, status: Option<QueueStatus>) -> Result<Vec<QueueEntry>, ClientError> {
        Ok(self.store.list_entries(status).await?)
    }

    /// Delete every FAILED entry. Irreversible.
    pub async fn purge_failed(&self, confirm: Confirm) -> Result<u64, ClientError> {
        if confirm != Confirm::Yes {
            return Err(ClientError::ConfirmationRequired {
                operation: "purge_failed",
            });
        }
        let removed = self.store.purge_failed().await?;
        tracing::warn!("Operator purged {} failed entries", removed);
        Ok(removed)
    }

    /// Delete the entire queue, including unsynced work. Irreversible.
    pub async fn purge_all(&self, confirm: Confirm) -> Result<u64, ClientError> {
        if confirm != Confirm::Yes {
            return Err(ClientError::ConfirmationRequired {
                operation: "purge_all",
            });
        }
        let removed = self.store.purge_all().await?;
        tracing::warn!("Operator purged the whole queue ({} entries)", removed);
        Ok(removed)
    }

    /// Put a FAILED entry back in line with a fresh retry budget.
    pub async fn resubmit_failed(&self, sequence: Sequence) -> Result<QueueEntry, ClientError> {
        let entry = self.store.resubmit_failed(sequence).await?;
        tracing::info!(
            "Resubmitted #{} {} {}/{}",
            entry.sequence,
            entry.operation(),
            entry.target,
            entry.record_id()
        );
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{MockRemote, RemoteMethod};
    use async_trait::async_trait;
    use serde_json::json;
    use sync_store::{LocalStore, OfflineStore, SqliteStore};
    use sync_types::{codes, Collection, EntityId, EntityRecord};

    fn missions() -> Collection {
        Collection::new("missions").unwrap()
    }

    fn record(value: serde_json::Value) -> EntityRecord {
        EntityRecord::from_value(value).unwrap()
    }

    fn mission(id: &str, status: &str) -> EntityRecord {
        record(json!({ "id": id, "status": status }))
    }

    async fn setup() -> (Arc<SqliteStore>, MockRemote, SyncEngine<SqliteStore, MockRemote>) {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let remote = MockRemote::new();
        let engine = SyncEngine::new(
            Arc::clone(&store),
            Arc::new(remote.clone()),
            ConnectivitySignal::new(true),
            EngineConfig::default().with_remote_timeout(Duration::from_secs(2)),
        );
        (store, remote, engine)
    }

    fn completed(outcome: RunOutcome) -> RunReport {
        match outcome {
            RunOutcome::Completed { report, .. } => report,
            other => panic!("expected a completed run, got {:?}", other),
        }
    }

    fn transient() -> RemoteError {
        RemoteError::Api {
            status: 503,
            code: None,
            message: "service unavailable".into(),
        }
    }

    // ===========================================
    // Happy path
    // ===========================================

    #[tokio::test]
    async fn empty_queue_run_completes() {
        let (_store, _remote, engine) = setup().await;
        let report = completed(engine.run_once().await.unwrap());
        assert_eq!(report, RunReport::default());
        assert!(!engine.is_running());
    }

    #[tokio::test]
    async fn offline_created_record_keeps_its_identity() {
        let (store, remote, engine) = setup().await;
        engine.connectivity().set_online(false);

        let id = EntityId::generate();
        let mut created = EntityRecord::new(id.clone());
        created.insert_field("status", json!("PLANNED")).unwrap();
        store
            .apply_and_enqueue(&missions(), &Mutation::Create(created))
            .await
            .unwrap();

        assert_eq!(
            engine.run_once().await.unwrap(),
            RunOutcome::Skipped(SkipReason::Offline)
        );

        engine.connectivity().set_online(true);
        completed(engine.run_once().await.unwrap());

        let remote_rows = remote.records("missions");
        assert_eq!(remote_rows.len(), 1);
        assert_eq!(remote_rows[0].id, id);
        assert!(store.get(&missions(), &id).await.unwrap().is_some());
        assert_eq!(store.counts().await.unwrap().total(), 0);
    }

    #[tokio::test]
    async fn every_operation_is_dispatched() {
        let (store, remote, engine) = setup().await;
        remote.seed("missions", vec![mission("m-old", "DONE")]);
        let rates = Collection::new("trip_rates").unwrap();

        store
            .enqueue(&missions(), &Mutation::Create(mission("m-1", "PLANNED")))
            .await
            .unwrap();
        store
            .enqueue(&missions(), &Mutation::Update(mission("m-1", "IN_PROGRESS")))
            .await
            .unwrap();
        store
            .enqueue(
                &rates,
                &Mutation::Upsert {
                    record: record(json!({"id": "r-1", "driver_id": "d-1", "route_id": "x"})),
                    conflict_key: vec!["driver_id".into(), "route_id".into()],
                },
            )
            .await
            .unwrap();
        store
            .enqueue(
                &missions(),
                &Mutation::Delete(EntityId::parse("m-old").unwrap()),
            )
            .await
            .unwrap();

        let report = completed(engine.run_once().await.unwrap());
        assert_eq!(report.succeeded, 4);

        let methods: Vec<RemoteMethod> = remote.calls().iter().map(|c| c.method).collect();
        assert_eq!(
            methods,
            vec![
                RemoteMethod::Insert,
                RemoteMethod::Update,
                RemoteMethod::Upsert,
                RemoteMethod::Delete
            ]
        );
        assert_eq!(remote.records("missions"), vec![mission("m-1", "IN_PROGRESS")]);
        assert_eq!(remote.records("trip_rates").len(), 1);
    }

    // ===========================================
    // Scenarios
    // ===========================================

    #[tokio::test]
    async fn mission_m1_concurrent_runs_process_each_entry_once() {
        let (store, remote, engine) = setup().await;
        remote.set_latency(Duration::from_millis(20));

        store
            .apply_and_enqueue(&missions(), &Mutation::Create(mission("m-1", "PLANNED")))
            .await
            .unwrap();
        engine.connectivity().set_online(false);
        store
            .apply_and_enqueue(&missions(), &Mutation::Update(mission("m-1", "IN_PROGRESS")))
            .await
            .unwrap();
        engine.connectivity().set_online(true);

        let (first, second) = tokio::join!(engine.run_once(), engine.run_once());
        let outcomes = [first.unwrap(), second.unwrap()];

        let skipped = outcomes
            .iter()
            .filter(|o| **o == RunOutcome::Skipped(SkipReason::AlreadyRunning))
            .count();
        assert_eq!(skipped, 1);

        let calls = remote.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].method, RemoteMethod::Insert);
        assert_eq!(calls[1].method, RemoteMethod::Update);
        assert!(calls.iter().all(|c| c.id.as_ref().map(EntityId::as_str) == Some("m-1")));

        assert_eq!(remote.records("missions"), vec![mission("m-1", "IN_PROGRESS")]);
        assert_eq!(store.counts().await.unwrap().total(), 0);
    }

    #[tokio::test]
    async fn delete_of_missing_remote_record_is_success() {
        let (store, remote, engine) = setup().await;
        store
            .enqueue(&missions(), &Mutation::Delete(EntityId::parse("ghost").unwrap()))
            .await
            .unwrap();

        let report = completed(engine.run_once().await.unwrap());
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(remote.calls_for("ghost"), 1);
        assert_eq!(store.counts().await.unwrap().total(), 0);
    }

    // ===========================================
    // Failure classification
    // ===========================================

    #[tokio::test]
    async fn transient_failures_are_bounded() {
        let (store, remote, engine) = setup().await;
        remote.fail_next_n(10, transient());
        let entry = store
            .enqueue(&missions(), &Mutation::Create(mission("m-1", "PLANNED")))
            .await
            .unwrap();

        for expected in 1..=3 {
            let outcome = engine.run_once().await.unwrap();
            assert!(matches!(
                outcome,
                RunOutcome::Completed { retry_after: Some(_), .. }
            ));
            let pending = store.list_pending().await.unwrap();
            assert_eq!(pending[0].retry_count, expected);
        }

        let report = completed(engine.run_once().await.unwrap());
        assert_eq!(report.failed, 1);

        let failed = store.list_entries(Some(QueueStatus::Failed)).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].sequence, entry.sequence);
        assert_eq!(failed[0].retry_count, 3);
        assert_eq!(failed[0].last_error.as_deref(), Some(transient().to_string().as_str()));

        // FAILED entries are never picked up again
        completed(engine.run_once().await.unwrap());
        assert_eq!(remote.calls_for("m-1"), 4);
    }

    #[tokio::test]
    async fn malformed_identifier_fails_on_first_attempt() {
        let (store, remote, engine) = setup().await;
        remote.require_uuid_ids();
        store
            .enqueue(&missions(), &Mutation::Create(mission("m-1", "PLANNED")))
            .await
            .unwrap();

        let report = completed(engine.run_once().await.unwrap());
        assert_eq!(report.failed, 1);
        assert_eq!(report.retried, 0);

        let failed = store.list_entries(Some(QueueStatus::Failed)).await.unwrap();
        assert_eq!(failed[0].retry_count, 0);
        let reason = failed[0].last_error.as_deref().unwrap();
        assert!(reason.contains("malformed identifier"));
        assert!(reason.contains(codes::INVALID_TEXT_REPRESENTATION));
        assert_eq!(remote.calls_for("m-1"), 1);
    }

    #[tokio::test]
    async fn dangling_reference_fails_on_first_attempt() {
        let (store, remote, engine) = setup().await;
        remote.add_foreign_key("missions", "vehicle_id", "vehicles");
        store
            .enqueue(
                &missions(),
                &Mutation::Create(record(json!({"id": "m-1", "vehicle_id": "v-never-synced"}))),
            )
            .await
            .unwrap();

        completed(engine.run_once().await.unwrap());

        let failed = store.list_entries(Some(QueueStatus::Failed)).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].retry_count, 0);
        assert!(failed[0]
            .last_error
            .as_deref()
            .unwrap()
            .contains("referential integrity"));
    }

    #[tokio::test]
    async fn permanent_failure_does_not_block_healthy_entry() {
        let (store, remote, engine) = setup().await;
        remote.require_uuid_ids();
        let healthy = EntityRecord::new(EntityId::generate());

        store
            .enqueue(&missions(), &Mutation::Create(mission("bad-id", "PLANNED")))
            .await
            .unwrap();
        store
            .enqueue(&missions(), &Mutation::Create(healthy.clone()))
            .await
            .unwrap();

        let report = completed(engine.run_once().await.unwrap());
        assert_eq!(report.failed, 1);
        assert_eq!(report.succeeded, 1);
        assert_eq!(remote.records("missions"), vec![healthy]);
        assert_eq!(
            store.counts().await.unwrap(),
            QueueCounts {
                pending: 0,
                syncing: 0,
                failed: 1
            }
        );
    }

    // ===========================================
    // Ordering
    // ===========================================

    #[tokio::test]
    async fn retried_record_holds_its_later_entries() {
        let (store, remote, engine) = setup().await;
        remote.fail_next(RemoteError::Network("connection reset".into()));

        store
            .enqueue(&missions(), &Mutation::Create(mission("m-1", "PLANNED")))
            .await
            .unwrap();
        store
            .enqueue(&missions(), &Mutation::Update(mission("m-1", "IN_PROGRESS")))
            .await
            .unwrap();
        store
            .enqueue(&missions(), &Mutation::Create(mission("m-2", "PLANNED")))
            .await
            .unwrap();

        let report = completed(engine.run_once().await.unwrap());
        assert_eq!(report.retried, 1);
        assert_eq!(report.deferred, 1);
        assert_eq!(report.succeeded, 1);
        // The update must not reach the remote before its create
        assert_eq!(remote.calls_for("m-1"), 1);
        assert_eq!(remote.records("missions"), vec![mission("m-2", "PLANNED")]);

        let report = completed(engine.run_once().await.unwrap());
        assert_eq!(report.succeeded, 2);
        let methods: Vec<RemoteMethod> = remote
            .calls()
            .iter()
            .filter(|c| c.id.as_ref().map(EntityId::as_str) == Some("m-1"))
            .map(|c| c.method)
            .collect();
        assert_eq!(
            methods,
            vec![RemoteMethod::Insert, RemoteMethod::Insert, RemoteMethod::Update]
        );
        assert_eq!(store.counts().await.unwrap().total(), 0);
    }

    #[tokio::test]
    async fn failed_entry_does_not_hold_same_record() {
        let (store, remote, engine) = setup().await;
        remote.seed("missions", vec![mission("m-1", "PLANNED")]);
        remote.fail_next(RemoteError::Api {
            status: 409,
            code: Some(codes::FOREIGN_KEY_VIOLATION.into()),
            message: "violates foreign key constraint".into(),
        });

        store
            .enqueue(&missions(), &Mutation::Update(mission("m-1", "ASSIGNED")))
            .await
            .unwrap();
        store
            .enqueue(&missions(), &Mutation::Update(mission("m-1", "DONE")))
            .await
            .unwrap();

        let report = completed(engine.run_once().await.unwrap());
        assert_eq!(report.failed, 1);
        assert_eq!(report.succeeded, 1);
        assert_eq!(remote.records("missions"), vec![mission("m-1", "DONE")]);
    }

    #[tokio::test]
    async fn retried_upsert_holds_later_upserts_with_same_natural_key() {
        let (store, remote, engine) = setup().await;
        let rates = Collection::new("trip_rates").unwrap();
        let rate = |id: &str, value: i64| Mutation::Upsert {
            record: record(json!({"id": id, "driver_id": "d-1", "route_id": "x", "rate": value})),
            conflict_key: vec!["driver_id".into(), "route_id".into()],
        };
        remote.fail_next(RemoteError::Network("connection reset".into()));

        store.enqueue(&rates, &rate("r-1", 10)).await.unwrap();
        store.enqueue(&rates, &rate("r-2", 12)).await.unwrap();

        let report = completed(engine.run_once().await.unwrap());
        assert_eq!(report.retried, 1);
        assert_eq!(report.deferred, 1);
        assert_eq!(remote.calls_for("r-2"), 0);

        let report = completed(engine.run_once().await.unwrap());
        assert_eq!(report.succeeded, 2);
        let rows = remote.records("trip_rates");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id.as_str(), "r-2");
        assert_eq!(rows[0].field_value("rate"), Some(json!(12)));
    }

    // ===========================================
    // Interruption and timeouts
    // ===========================================

    #[tokio::test]
    async fn interrupted_run_resumes_without_duplicates() {
        let (store, remote, engine) = setup().await;
        let entry = store
            .apply_and_enqueue(&missions(), &Mutation::Create(mission("m-1", "PLANNED")))
            .await
            .unwrap();

        // A previous process sent the create, the remote applied it, and the
        // process died before recording success
        store.mark_syncing(entry.sequence).await.unwrap();
        remote.seed("missions", vec![mission("m-1", "PLANNED")]);

        let report = completed(engine.run_once().await.unwrap());
        assert_eq!(report.succeeded, 1);
        assert_eq!(remote.records("missions").len(), 1);
        assert_eq!(store.counts().await.unwrap().total(), 0);
    }

    async fn shared_file_engines(
        dir: &tempfile::TempDir,
        remote: &MockRemote,
        config: EngineConfig,
    ) -> [(Arc<SqliteStore>, SyncEngine<SqliteStore, MockRemote>); 2] {
        let path = dir.path().join("fleetsync.db");
        let mut engines = Vec::new();
        for _ in 0..2 {
            let store = Arc::new(SqliteStore::new(&path).await.unwrap());
            let engine = SyncEngine::new(
                Arc::clone(&store),
                Arc::new(remote.clone()),
                ConnectivitySignal::new(true),
                config.clone(),
            );
            engines.push((store, engine));
        }
        let second = engines.pop().unwrap();
        let first = engines.pop().unwrap();
        [first, second]
    }

    #[tokio::test]
    async fn second_process_does_not_take_over_entry_in_flight() {
        let dir = tempfile::tempdir().unwrap();
        let remote = MockRemote::new();
        remote.seed("missions", vec![mission("m-1", "PLANNED")]);
        remote.set_latency(Duration::from_millis(200));
        let [(store_a, engine_a), (_store_b, engine_b)] =
            shared_file_engines(&dir, &remote, EngineConfig::default()).await;
        assert_ne!(engine_a.id(), engine_b.id());

        store_a
            .enqueue(&missions(), &Mutation::Update(mission("m-1", "DONE")))
            .await
            .unwrap();

        let (a, b) = tokio::join!(engine_a.run_once(), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            engine_b.run_once().await
        });

        assert_eq!(completed(a.unwrap()).succeeded, 1);
        assert_eq!(b.unwrap(), RunOutcome::Skipped(SkipReason::LeaseHeld));
        assert_eq!(remote.calls_for("m-1"), 1);
        assert_eq!(store_a.counts().await.unwrap().total(), 0);

        // The lease is released once the drain ends
        assert_eq!(completed(engine_b.run_once().await.unwrap()).attempted, 0);
    }

    #[tokio::test]
    async fn entry_that_changed_hands_ends_the_run_without_error() {
        let dir = tempfile::tempdir().unwrap();
        let remote = MockRemote::new();
        remote.seed("missions", vec![mission("m-1", "PLANNED")]);
        remote.set_latency(Duration::from_millis(200));
        // A lease that expires at once lets the second engine recover the
        // first one's entry while its call is still in flight
        let config = EngineConfig::default().with_lease_ttl(Duration::ZERO);
        let [(store_a, engine_a), (_store_b, engine_b)] =
            shared_file_engines(&dir, &remote, config).await;

        store_a
            .enqueue(&missions(), &Mutation::Update(mission("m-1", "DONE")))
            .await
            .unwrap();

        let (a, b) = tokio::join!(engine_a.run_once(), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            engine_b.run_once().await
        });

        let a = completed(a.unwrap());
        let b = completed(b.unwrap());
        assert!(!a.interrupted);
        assert!(b.interrupted);
        assert_eq!(store_a.counts().await.unwrap().total(), 0);
        assert_eq!(remote.records("missions"), vec![mission("m-1", "DONE")]);
    }

    /// Remote that drops connectivity after its first call.
    struct DropsConnection {
        inner: MockRemote,
        signal: ConnectivitySignal,
    }

    #[async_trait]
    impl RemoteStore for DropsConnection {
        async fn insert(
            &self,
            collection: &Collection,
            record: &EntityRecord,
        ) -> Result<EntityRecord, RemoteError> {
            let result = self.inner.insert(collection, record).await;
            self.signal.set_online(false);
            result
        }

        async fn update(
            &self,
            collection: &Collection,
            record: &EntityRecord,
        ) -> Result<EntityRecord, RemoteError> {
            self.inner.update(collection, record).await
        }

        async fn upsert(
            &self,
            collection: &Collection,
            record: &EntityRecord,
            conflict_key: &[String],
        ) -> Result<EntityRecord, RemoteError> {
            self.inner.upsert(collection, record, conflict_key).await
        }

        async fn delete(&self, collection: &Collection, id: &EntityId) -> Result<(), RemoteError> {
            self.inner.delete(collection, id).await
        }

        async fn list(&self, collection: &Collection) -> Result<Vec<EntityRecord>, RemoteError> {
            self.inner.list(collection).await
        }
    }

    #[tokio::test]
    async fn losing_connectivity_stops_the_run() {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let signal = ConnectivitySignal::new(true);
        let remote = MockRemote::new();
        let engine = SyncEngine::new(
            Arc::clone(&store),
            Arc::new(DropsConnection {
                inner: remote.clone(),
                signal: signal.clone(),
            }),
            signal.clone(),
            EngineConfig::default(),
        );

        for n in 1..=3 {
            store
                .enqueue(
                    &missions(),
                    &Mutation::Create(mission(&format!("m-{}", n), "PLANNED")),
                )
                .await
                .unwrap();
        }

        let outcome = engine.run_once().await.unwrap();
        let report = outcome.report().copied().unwrap();
        assert!(report.interrupted);
        assert_eq!(report.succeeded, 1);
        assert!(matches!(
            outcome,
            RunOutcome::Completed { retry_after: Some(_), .. }
        ));

        // Remaining entries were not charged a retry
        let pending = store.list_pending().await.unwrap();
        assert_eq!(pending.len(), 2);
        assert!(pending.iter().all(|e| e.retry_count == 0));
    }

    #[tokio::test]
    async fn hung_remote_call_times_out_and_releases_the_engine() {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let remote = MockRemote::new();
        remote.set_latency(Duration::from_secs(5));
        let engine = SyncEngine::new(
            Arc::clone(&store),
            Arc::new(remote.clone()),
            ConnectivitySignal::new(true),
            EngineConfig::default().with_remote_timeout(Duration::from_millis(50)),
        );
        store
            .enqueue(&missions(), &Mutation::Create(mission("m-1", "PLANNED")))
            .await
            .unwrap();

        let report = completed(engine.run_once().await.unwrap());
        assert_eq!(report.retried, 1);
        assert!(!engine.is_running());
        assert_eq!(engine.connectivity().recent_failures(), 1);
    }

    #[tokio::test]
    async fn cancelled_run_returns_engine_to_idle() {
        let (store, remote, engine) = setup().await;
        remote.set_latency(Duration::from_secs(5));
        store
            .enqueue(&missions(), &Mutation::Create(mission("m-1", "PLANNED")))
            .await
            .unwrap();

        let cancelled =
            tokio::time::timeout(Duration::from_millis(50), engine.run_once()).await;
        assert!(cancelled.is_err());
        assert!(!engine.is_running());

        // The entry left SYNCING is recovered by the next run
        assert_eq!(store.counts().await.unwrap().syncing, 1);
        remote.set_latency(Duration::from_millis(0));
        let report = completed(engine.run_once().await.unwrap());
        assert_eq!(report.succeeded, 1);
    }

    // ===========================================
    // Status and maintenance
    // ===========================================

    #[tokio::test]
    async fn status_reports_counts_and_connectivity() {
        let (store, remote, engine) = setup().await;
        remote.fail_next(transient());
        store
            .enqueue(&missions(), &Mutation::Create(mission("m-1", "PLANNED")))
            .await
            .unwrap();
        completed(engine.run_once().await.unwrap());

        let status = engine.status().await.unwrap();
        assert!(!status.running);
        assert!(status.online);
        assert_eq!(status.recent_failures, 1);
        assert_eq!(status.counts.pending, 1);
    }

    #[tokio::test]
    async fn purge_requires_confirmation() {
        let (store, _remote, engine) = setup().await;
        let entry = store
            .enqueue(&missions(), &Mutation::Create(mission("m-1", "PLANNED")))
            .await
            .unwrap();
        store.mark_failed(entry.sequence, "22P02").await.unwrap();

        assert!(matches!(
            engine.purge_failed(Confirm::No).await,
            Err(ClientError::ConfirmationRequired { .. })
        ));
        assert!(matches!(
            engine.purge_all(false.into()).await,
            Err(ClientError::ConfirmationRequired { .. })
        ));
        assert_eq!(store.counts().await.unwrap().failed, 1);

        assert_eq!(engine.purge_failed(Confirm::Yes).await.unwrap(), 1);
        assert_eq!(store.counts().await.unwrap().total(), 0);
    }

    #[tokio::test]
    async fn resubmitted_entry_is_synced_by_next_run() {
        let (store, remote, engine) = setup().await;
        remote.add_foreign_key("missions", "vehicle_id", "vehicles");
        let entry = store
            .enqueue(
                &missions(),
                &Mutation::Create(record(json!({"id": "m-1", "vehicle_id": "v-1"}))),
            )
            .await
            .unwrap();
        completed(engine.run_once().await.unwrap());
        assert_eq!(store.counts().await.unwrap().failed, 1);

        // The operator fixes the dangling reference and resubmits
        remote.seed("vehicles", vec![record(json!({"id": "v-1"}))]);
        let resubmitted = engine.resubmit_failed(entry.sequence).await.unwrap();
        assert_eq!(resubmitted.retry_count, 0);

        let report = completed(engine.run_once().await.unwrap());
        assert_eq!(report.succeeded, 1);
        assert_eq!(remote.records("missions").len(), 1);
    }

    #[test]
    fn engine_config_builder() {
        let config = EngineConfig::default()
            .with_max_retries(5)
            .with_remote_timeout(Duration::from_secs(3))
            .with_periodic_interval(None)
            .with_lease_ttl(Duration::from_secs(30));
        assert_eq!(config.lease_ttl, Duration::from_secs(30));
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.remote_timeout, Duration::from_secs(3));
        assert!(config.periodic_interval.is_none());
    }
}
