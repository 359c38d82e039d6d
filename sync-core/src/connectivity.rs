//! Connectivity tracking.
//!
//! Pure bookkeeping behind the client's connectivity signal: the current
//! online flag and the number of consecutive remote failures. It never
//! retries anything; an offline → online edge only asks for a sync run.

/// Online/offline state plus a recent-failure counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectivityTracker {
    online: bool,
    consecutive_failures: u32,
}

/// Inputs to the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    /// The platform reported network availability.
    WentOnline,
    /// The platform reported network loss.
    WentOffline,
    /// A remote call succeeded.
    RemoteSucceeded,
    /// A remote call failed.
    RemoteFailed,
}

/// Side effects requested by the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityAction {
    /// Ask the engine for a run (offline → online edge).
    TriggerSync,
    /// Publish the new online flag to subscribers.
    Notify(bool),
}

impl ConnectivityTracker {
    /// Create a tracker with the given initial online flag.
    pub fn new(online: bool) -> Self {
        Self {
            online,
            consecutive_failures: 0,
        }
    }

    /// Current online flag.
    pub fn is_online(&self) -> bool {
        self.online
    }

    /// Remote failures since the last success or online transition.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Process an event and return the new tracker plus actions to execute.
    pub fn on_event(self, event: ConnectivityEvent) -> (Self, Vec<ConnectivityAction>) {
        match event {
            ConnectivityEvent::WentOnline if !self.online => (
                Self {
                    online: true,
                    consecutive_failures: 0,
                },
                vec![
                    ConnectivityAction::Notify(true),
                    ConnectivityAction::TriggerSync,
                ],
            ),
            ConnectivityEvent::WentOffline if self.online => (
                Self {
                    online: false,
                    ..self
                },
                vec![ConnectivityAction::Notify(false)],
            ),
            // Repeated platform reports are not transitions
            ConnectivityEvent::WentOnline | ConnectivityEvent::WentOffline => (self, vec![]),
            ConnectivityEvent::RemoteSucceeded => (
                Self {
                    consecutive_failures: 0,
                    ..self
                },
                vec![],
            ),
            ConnectivityEvent::RemoteFailed => (
                Self {
                    consecutive_failures: self.consecutive_failures.saturating_add(1),
                    ..self
                },
                vec![],
            ),
        }
    }
}

impl Default for ConnectivityTracker {
    fn default() -> Self {
        Self::new(true)
    }
}
