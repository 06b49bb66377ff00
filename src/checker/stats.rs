//! Cumulative scheduler statistics.

use super::RunSummary;
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

/// Counters shared between the scheduler and its readers.
#[derive(Debug, Default)]
pub struct RunStats {
    checks_completed: AtomicU64,
    checks_failed: AtomicU64,
    alerts_sent: AtomicU64,
    /// Unix ms of the last finished run; 0 when none.
    last_run_at: AtomicI64,
    is_running: AtomicBool,
    max_concurrency: AtomicU64,
}

/// Point-in-time view of [`RunStats`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    /// Every settled check, failed ones included.
    pub checks_completed: u64,
    pub checks_failed: u64,
    pub alerts_sent: u64,
    pub last_run_at: Option<DateTime<Utc>>,
    pub is_running: bool,
    pub max_concurrency_observed: u64,
}

impl RunStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_running(&self, running: bool) {
        self.is_running.store(running, Ordering::SeqCst);
    }

    /// Fold a finished run into the totals.
    pub fn record(&self, summary: &RunSummary) {
        self.checks_completed
            .fetch_add(summary.checks_succeeded + summary.checks_failed, Ordering::SeqCst);
        self.checks_failed
            .fetch_add(summary.checks_failed, Ordering::SeqCst);
        self.alerts_sent
            .fetch_add(summary.alerts_sent, Ordering::SeqCst);
        self.last_run_at
            .fetch_max(summary.finished_at, Ordering::SeqCst);
        self.max_concurrency
            .fetch_max(summary.peak_concurrency, Ordering::SeqCst);
    }

    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        let last = self.last_run_at.load(Ordering::SeqCst);
        StatsSnapshot {
            checks_completed: self.checks_completed.load(Ordering::SeqCst),
            checks_failed: self.checks_failed.load(Ordering::SeqCst),
            alerts_sent: self.alerts_sent.load(Ordering::SeqCst),
            last_run_at: (last > 0)
                .then(|| Utc.timestamp_millis_opt(last).single())
                .flatten(),
            is_running: self.is_running.load(Ordering::SeqCst),
            max_concurrency_observed: self.max_concurrency.load(Ordering::SeqCst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn summary(ok: u64, failed: u64, alerts: u64, peak: u64, finished_at: i64) -> RunSummary {
        RunSummary {
            started_at: finished_at - 10,
            finished_at,
            duration: Duration::from_millis(10),
            checks_succeeded: ok,
            checks_failed: failed,
            alerts_sent: alerts,
            peak_concurrency: peak,
        }
    }

    #[test]
    fn test_counters_accumulate() {
        let stats = RunStats::new();
        assert_eq!(stats.snapshot().last_run_at, None);

        stats.record(&summary(5, 2, 1, 3, 1_700_000_000_000));
        stats.record(&summary(4, 0, 0, 2, 1_700_000_300_000));

        let snap = stats.snapshot();
        assert_eq!(snap.checks_completed, 11);
        assert_eq!(snap.checks_failed, 2);
        assert_eq!(snap.alerts_sent, 1);
        assert_eq!(snap.max_concurrency_observed, 3);
        assert_eq!(
            snap.last_run_at.map(|t| t.timestamp_millis()),
            Some(1_700_000_300_000)
        );
    }

    #[test]
    fn test_snapshot_serializes_camel_case() {
        let stats = RunStats::new();
        stats.set_running(true);
        let json = serde_json::to_value(stats.snapshot()).unwrap();
        assert_eq!(json["isRunning"], true);
        assert_eq!(json["checksCompleted"], 0);
        assert!(json.get("maxConcurrencyObserved").is_some());
    }
}
