//! Connectivity signal.
//!
//! The platform's network event source calls [`ConnectivitySignal::set_online`];
//! everything else only reads. An offline → online transition is published
//! on a `watch` channel, which wakes the sync loop. The signal never retries
//! anything itself.

use std::sync::{Arc, Mutex, MutexGuard};
use sync_core::{ConnectivityAction, ConnectivityEvent, ConnectivityTracker};
use tokio::sync::watch;

/// Shared online/offline flag with a recent-failure counter.
///
/// Cheap to clone; clones observe the same state.
#[derive(Debug, Clone)]
pub struct ConnectivitySignal {
    tracker: Arc<Mutex<ConnectivityTracker>>,
    online_tx: Arc<watch::Sender<bool>>,
}

impl ConnectivitySignal {
    /// Create a signal with the given initial state.
    pub fn new(online: bool) -> Self {
        let (online_tx, _) = watch::channel(online);
        Self {
            tracker: Arc::new(Mutex::new(ConnectivityTracker::new(online))),
            online_tx: Arc::new(online_tx),
        }
    }

    fn tracker(&self) -> MutexGuard<'_, ConnectivityTracker> {
        self.tracker.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn apply(&self, event: ConnectivityEvent) -> bool {
        let actions = {
            let mut tracker = self.tracker();
            let (next, actions) = tracker.on_event(event);
            *tracker = next;
            actions
        };

        let mut sync_requested = false;
        for action in actions {
            match action {
                ConnectivityAction::Notify(online) => {
                    self.online_tx.send_replace(online);
                }
                ConnectivityAction::TriggerSync => sync_requested = true,
            }
        }
        sync_requested
    }

    /// Feed a platform connectivity report.
    ///
    /// Returns `true` when this was an offline → online transition.
    pub fn set_online(&self, online: bool) -> bool {
        let event = if online {
            ConnectivityEvent::WentOnline
        } else {
            ConnectivityEvent::WentOffline
        };
        let restored = self.apply(event);
        if restored {
            tracing::info!("Connectivity restored");
        } else if !online {
            tracing::info!("Connectivity lost");
        }
        restored
    }

    /// Whether the remote is currently considered reachable.
    pub fn is_online(&self) -> bool {
        self.tracker().is_online()
    }

    /// Subscribe to online flag changes.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.online_tx.subscribe()
    }

    /// Count a failed remote call.
    pub fn record_failure(&self) {
        self.apply(ConnectivityEvent::RemoteFailed);
    }

    /// Count a successful remote call (resets the failure counter).
    pub fn record_success(&self) {
        self.apply(ConnectivityEvent::RemoteSucceeded);
    }

    /// Remote failures since the last success or reconnection.
    pub fn recent_failures(&self) -> u32 {
        self.tracker().consecutive_failures()
    }
}

impl Default for ConnectivitySignal {
    fn default() -> Self {
        Self::new(true)
    }
}
