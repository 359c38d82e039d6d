//! Sync engine run state machine.
//!
//! This module provides a pure, side-effect-free state machine for the
//! engine's `Idle → Running → Idle` cycle. It takes events as input and
//! produces a new state plus a list of actions to execute.
//!
//! The actual I/O (draining the queue, arming timers) is performed by
//! sync-client, not by this module. The state is owned by one engine
//! instance; overlapping run requests collapse into a skip.

use std::time::Duration;

/// Engine run state - NO I/O, just state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineState {
    /// No run in progress.
    #[default]
    Idle,
    /// A drain is in progress.
    Running {
        /// Consecutive runs so far that ended with retryable work left.
        attempt: u32,
    },
    /// No run in progress; a follow-up run is scheduled because the last
    /// run sent entries back for retry.
    Backoff {
        /// Consecutive runs that ended with retryable work left.
        attempt: u32,
    },
}

impl EngineState {
    /// Create a new state machine in the Idle state.
    pub fn new() -> Self {
        Self::Idle
    }

    /// Process an event and return the new state plus actions to execute.
    ///
    /// This is a pure function - no side effects. The caller (sync-client)
    /// is responsible for executing the returned actions.
    pub fn on_event(self, event: EngineEvent) -> (Self, Vec<EngineAction>) {
        match (self, event) {
            // A run is already draining: collapse into it
            (Self::Running { attempt }, EngineEvent::RunRequested { .. }) => (
                Self::Running { attempt },
                vec![EngineAction::SkipRun(SkipReason::AlreadyRunning)],
            ),

            // Offline: nothing to do until connectivity returns
            (state, EngineEvent::RunRequested { online: false }) => {
                (state, vec![EngineAction::SkipRun(SkipReason::Offline)])
            }

            (Self::Idle, EngineEvent::RunRequested { online: true }) => (
                Self::Running { attempt: 0 },
                vec![EngineAction::StartDrain],
            ),
            (Self::Backoff { attempt }, EngineEvent::RunRequested { online: true }) => {
                (Self::Running { attempt }, vec![EngineAction::StartDrain])
            }

            // From Running
            (Self::Running { attempt }, EngineEvent::RunFinished { retry_pending: true }) => {
                let next_attempt = attempt.saturating_add(1);
                (
                    Self::Backoff {
                        attempt: next_attempt,
                    },
                    vec![EngineAction::ScheduleRetry {
                        delay: calculate_backoff(next_attempt),
                    }],
                )
            }
            (Self::Running { .. }, EngineEvent::RunFinished { retry_pending: false }) => {
                (Self::Idle, vec![])
            }

            // Invalid transitions - stay in current state
            (state, _) => (state, vec![]),
        }
    }

    /// Check if a drain is in progress.
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. })
    }
}

/// Events that drive the engine state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    /// Something asked for a run (write, connectivity flip, timer, operator).
    RunRequested {
        /// Whether the remote is currently considered reachable.
        online: bool,
    },
    /// The drain finished (or was cut short).
    RunFinished {
        /// Whether entries were sent back to PENDING for retry.
        retry_pending: bool,
    },
}

/// Actions to be executed by the sync engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineAction {
    /// Begin draining the pending queue.
    StartDrain,
    /// Do not run; not an error.
    SkipRun(SkipReason),
    /// Request another run after the given delay.
    ScheduleRetry {
        /// Delay before the follow-up run.
        delay: Duration,
    },
}

/// Why a run request did not start a drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another run is draining the queue.
    AlreadyRunning,
    /// Connectivity is down.
    Offline,
    /// Another engine sharing the database holds the drain lease.
    LeaseHeld,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyRunning => f.write_str("already running"),
            Self::Offline => f.write_str("offline"),
            Self::LeaseHeld => f.write_str("queue is being drained by another engine"),
        }
    }
}

/// Calculate follow-up run backoff with jitter.
///
/// Formula: min(60s, 2^attempt seconds) + random(0..1000ms)
fn calculate_backoff(attempt: u32) -> Duration {
    let base_secs = 2u64.pow(attempt.min(6)).min(60);
    Duration::from_secs(base_secs) + Duration::from_millis(random_jitter_ms())
}

/// Generate random jitter between 0 and 1000 milliseconds.
fn random_jitter_ms() -> u64 {
    let mut bytes = [0u8; 8];
    match getrandom::getrandom(&mut bytes) {
        Ok(()) => u64::from_le_bytes(bytes) % 1001,
        Err(_) => 0,
    }
}
