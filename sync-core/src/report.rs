//! Per-run outcome counters.

use serde::Serialize;

use crate::classify::Disposition;

/// What one drain did with its snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RunReport {
    /// Entries dispatched to the remote.
    pub attempted: u32,
    /// Entries removed from the queue (including already-applied ones).
    pub succeeded: u32,
    /// Entries sent back to PENDING with a bumped retry count.
    pub retried: u32,
    /// Entries marked FAILED.
    pub failed: u32,
    /// Entries left PENDING because an earlier entry for the same record
    /// is waiting for a retry.
    pub deferred: u32,
    /// Whether the run stopped early because connectivity dropped or the
    /// drain lease was lost.
    pub interrupted: bool,
}

impl RunReport {
    /// Count a dispatched entry that succeeded outright.
    pub fn record_success(&mut self) {
        self.attempted += 1;
        self.succeeded += 1;
    }

    /// Count a dispatched entry that failed, by its disposition.
    pub fn record(&mut self, disposition: &Disposition) {
        self.attempted += 1;
        match disposition {
            Disposition::Applied => self.succeeded += 1,
            Disposition::Retry { .. } => self.retried += 1,
            Disposition::Failed { .. } => self.failed += 1,
        }
    }

    /// Count an entry held back by the per-record gate.
    pub fn record_deferred(&mut self) {
        self.deferred += 1;
    }

    /// Whether work was left for a follow-up run.
    pub fn needs_retry(&self) -> bool {
        self.retried > 0 || self.deferred > 0 || self.interrupted
    }
}

impl std::fmt::Display for RunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "attempted={} succeeded={} retried={} failed={} deferred={}",
            self.attempted, self.succeeded, self.retried, self.failed, self.deferred
        )?;
        if self.interrupted {
            f.write_str(" (interrupted)")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::FailureClass;

    #[test]
    fn counts_dispositions() {
        let mut report = RunReport::default();
        report.record_success();
        report.record(&Disposition::Applied);
        report.record(&Disposition::Retry { retry_count: 1 });
        report.record(&Disposition::Failed {
            class: FailureClass::ReferentialIntegrity,
            reason: "fk".into(),
        });
        report.record_deferred();

        assert_eq!(report.attempted, 4);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.retried, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.deferred, 1);
    }

    #[test]
    fn clean_run_needs_no_retry() {
        let mut report = RunReport::default();
        report.record_success();
        report.record(&Disposition::Failed {
            class: FailureClass::MalformedIdentifier,
            reason: "22P02".into(),
        });
        assert!(!report.needs_retry());
    }

    #[test]
    fn leftovers_need_retry() {
        let retried = RunReport {
            retried: 1,
            ..Default::default()
        };
        let interrupted = RunReport {
            interrupted: true,
            ..Default::default()
        };
        assert!(retried.needs_retry());
        assert!(interrupted.needs_retry());
    }

    #[test]
    fn report_serializes() {
        let report = RunReport {
            attempted: 2,
            succeeded: 2,
            ..Default::default()
        };
        let json = serde_json::to_value(report).unwrap();
        assert_eq!(json["succeeded"], 2);
        assert_eq!(json["interrupted"], false);
        assert_eq!(report.to_string(), "attempted=2 succeeded=2 retried=0 failed=0 deferred=0");
    }
}
