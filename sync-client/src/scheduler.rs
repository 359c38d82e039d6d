//! Sync loop: one consumer task that turns run requests into engine runs.
//!
//! Requests arrive on a capacity-1 channel. While a request is already
//! waiting, further ones are dropped; the pending run will pick up their
//! work anyway. The loop also wakes on its own when connectivity returns,
//! on the periodic interval, and when a run asked for a follow-up retry.

use std::fmt;
use std::future::pending;
use std::sync::Arc;
use sync_core::SkipReason;
use sync_store::SyncQueue;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::engine::{RunOutcome, SyncEngine};
use crate::remote::RemoteStore;

/// Why a run was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunTrigger {
    /// A repository write landed locally.
    LocalWrite,
    /// Connectivity went from offline to online.
    ConnectivityRestored,
    /// The periodic interval elapsed.
    Periodic,
    /// The previous run left entries for retry.
    RetryBackoff,
    /// Explicit request by the application or operator.
    Manual,
}

impl fmt::Display for RunTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::LocalWrite => "local write",
            Self::ConnectivityRestored => "connectivity restored",
            Self::Periodic => "periodic",
            Self::RetryBackoff => "retry backoff",
            Self::Manual => "manual",
        };
        f.write_str(name)
    }
}

/// Fire-and-forget handle for requesting engine runs.
#[derive(Debug, Clone)]
pub struct SyncTrigger {
    tx: mpsc::Sender<RunTrigger>,
}

impl SyncTrigger {
    pub(crate) fn channel() -> (Self, mpsc::Receiver<RunTrigger>) {
        let (tx, rx) = mpsc::channel(1);
        (Self { tx }, rx)
    }

    /// Ask for a run. Never waits.
    ///
    /// Returns `false` if the request was folded into one already waiting,
    /// or if the sync loop has stopped.
    pub fn request(&self, trigger: RunTrigger) -> bool {
        match self.tx.try_send(trigger) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!("Run request ({}) collapsed into a pending one", trigger);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("Run request ({}) dropped: sync loop stopped", trigger);
                false
            }
        }
    }
}

/// Spawn the sync loop for `engine`.
///
/// The loop stops once every clone of the returned [`SyncTrigger`] is
/// dropped.
pub fn spawn_sync_loop<S, R>(engine: Arc<SyncEngine<S, R>>) -> (SyncTrigger, JoinHandle<()>)
where
    S: SyncQueue + 'static,
    R: RemoteStore + 'static,
{
    let (trigger, rx) = SyncTrigger::channel();
    let handle = tokio::spawn(run_loop(engine, rx));
    (trigger, handle)
}

async fn run_loop<S, R>(engine: Arc<SyncEngine<S, R>>, mut rx: mpsc::Receiver<RunTrigger>)
where
    S: SyncQueue,
    R: RemoteStore,
{
    let mut online_rx = engine.connectivity().subscribe();
    let mut was_online = *online_rx.borrow_and_update();
    let mut periodic = engine.config().periodic_interval.map(|period| {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });
    let mut retry_at: Option<Instant> = None;

    tracing::info!("Sync loop started");

    loop {
        let trigger = tokio::select! {
            request = rx.recv() => match request {
                Some(trigger) => trigger,
                None => break,
            },
            changed = online_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let online = *online_rx.borrow_and_update();
                let restored = online && !was_online;
                was_online = online;
                if !restored {
                    continue;
                }
                RunTrigger::ConnectivityRestored
            }
            _ = next_tick(&mut periodic) => RunTrigger::Periodic,
            _ = retry_due(retry_at) => {
                retry_at = None;
                RunTrigger::RetryBackoff
            }
        };

        tracing::debug!("Sync run requested: {}", trigger);
        match engine.run_once().await {
            Ok(RunOutcome::Completed { retry_after, .. }) => {
                retry_at = retry_after.map(|delay| {
                    tracing::debug!("Follow-up run in {:?}", delay);
                    Instant::now() + delay
                });
            }
            Ok(RunOutcome::Skipped(reason)) => {
                tracing::debug!("Sync run ({}) skipped: {}", trigger, reason);
                // Poll until the other engine's drain ends
                if reason == SkipReason::LeaseHeld && retry_at.is_none() {
                    retry_at = Some(Instant::now() + engine.config().remote_timeout);
                }
            }
            Err(e) => {
                tracing::error!("Sync run ({}) failed: {}", trigger, e);
            }
        }
    }

    tracing::info!("Sync loop stopped");
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending().await,
    }
}

async fn retry_due(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => pending().await,
    }
}
