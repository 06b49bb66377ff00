//! Periodic check runs.

use super::{Orchestrator, RunStats, RunSummary, StatsSnapshot};
use crate::error::{Error, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

/// Triggers the orchestrator on a fixed interval, one run at a time.
#[derive(Clone)]
pub struct Scheduler {
    orchestrator: Arc<Orchestrator>,
    interval: Duration,
    /// Single permit; held for the duration of a run.
    slot: Arc<Semaphore>,
    stats: Arc<RunStats>,
}

/// Clears the running flag even if the run unwinds.
struct RunningFlag<'a>(&'a RunStats);

impl Drop for RunningFlag<'_> {
    fn drop(&mut self) {
        self.0.set_running(false);
    }
}

impl Scheduler {
    #[must_use]
    pub fn new(orchestrator: Arc<Orchestrator>, interval: Duration) -> Self {
        Self {
            orchestrator,
            interval,
            slot: Arc::new(Semaphore::new(1)),
            stats: Arc::new(RunStats::new()),
        }
    }

    /// Start a run unless one is already in flight.
    ///
    /// Returns `None` when skipped. Otherwise returns the run result, which
    /// has already been folded into the statistics.
    pub async fn try_run(&self) -> Option<Result<RunSummary>> {
        let Ok(_permit) = self.slot.try_acquire() else {
            warn!("Check run already in progress, skipping");
            return None;
        };

        self.stats.set_running(true);
        let _flag = RunningFlag(&self.stats);

        let result = self.orchestrator.run().await;
        match &result {
            Ok(summary) => self.stats.record(summary),
            Err(Error::RunInProgress { started_at }) => {
                warn!(started_at, "Another process is running checks, skipping");
                return None;
            }
            Err(e) => error!(error = %e, "Check run failed"),
        }
        Some(result)
    }

    /// Wait for `ready`, then run on every tick until `shutdown` resolves.
    ///
    /// The first run starts as soon as the system is ready. Ticks that land
    /// while a run is still going are skipped. On shutdown the current run,
    /// if any, is allowed to finish.
    pub async fn run_until(&self, mut ready: watch::Receiver<bool>, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);

        tokio::select! {
            signalled = async { ready.wait_for(|r| *r).await.is_ok() } => {
                if !signalled {
                    warn!("Readiness signal dropped, starting anyway");
                }
            }
            () = &mut shutdown => {
                info!("Shutdown requested before first run");
                return;
            }
        }

        info!(interval_secs = self.interval.as_secs(), "Scheduler started");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let this = self.clone();
                    tokio::spawn(async move {
                        this.try_run().await;
                    });
                }
                () = &mut shutdown => break,
            }
        }

        info!("Shutting down, waiting for active run");
        let _drained = self.slot.acquire().await.ok();
        info!("Scheduler stopped");
    }

    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::AlertEngine;
    use crate::checker::orchestrator::RUN_LEASE_TTL;
    use crate::checker::Lane;
    use crate::model::{Money, Retailer};
    use crate::notify::testing::RecordingNotifier;
    use crate::notify::BoxedNotifier;
    use crate::probe::testing::ScriptedProbe;
    use crate::probe::{BoxedProbe, ProbeRunner, RetryPolicy};
    use crate::storage::{self, SharedStorage, SqliteStorage};

    fn slow_runner(retailer: Retailer, delay: Duration) -> ProbeRunner {
        let probe = ScriptedProbe {
            delay,
            ..ScriptedProbe::new(retailer)
        };
        ProbeRunner::new(BoxedProbe::new(probe), RetryPolicy::immediate(1), Duration::from_secs(5))
    }

    fn scheduler(delay: Duration, interval: Duration) -> Scheduler {
        scheduler_with_storage(delay, interval).0
    }

    /// One user tracking one Target product; every probe is unanswered.
    fn scheduler_with_storage(delay: Duration, interval: Duration) -> (Scheduler, SharedStorage) {
        let mut db = SqliteStorage::open_memory().unwrap();
        let user = db.create_user("1001", "alice", "5678", "10001").unwrap();
        db.track_product(
            user.id,
            "https://www.target.com/p/lamp/-/A-1",
            Retailer::Target,
            None,
            Money::from_cents(2_000),
        )
        .unwrap();

        let storage = storage::shared(db);
        let notifier = Arc::new(BoxedNotifier::new(RecordingNotifier::default()));
        let engine = AlertEngine::new(Arc::clone(&storage), notifier, Duration::from_secs(3600));
        let orchestrator = Orchestrator::new(
            Arc::clone(&storage),
            engine,
            Lane::new(slow_runner(Retailer::Walmart, delay), 4),
            Lane::new(slow_runner(Retailer::Target, delay), 2),
        );
        (Scheduler::new(Arc::new(orchestrator), interval), storage)
    }

    #[tokio::test]
    async fn test_tick_skipped_while_another_process_runs() {
        let (scheduler, storage) = scheduler_with_storage(Duration::from_millis(1), Duration::from_secs(3600));
        let now = chrono::Utc::now().timestamp_millis();
        storage::lock(&storage)
            .unwrap()
            .try_acquire_run_lease("manual-check", now, RUN_LEASE_TTL)
            .unwrap();

        assert!(scheduler.try_run().await.is_none());
        let stats = scheduler.stats();
        assert_eq!(stats.checks_completed, 0);
        assert!(!stats.is_running);
    }

    #[tokio::test]
    async fn test_overlapping_run_is_skipped() {
        let scheduler = scheduler(Duration::from_millis(100), Duration::from_secs(3600));

        let (first, second) = tokio::join!(scheduler.try_run(), scheduler.try_run());
        let skipped = [first.is_none(), second.is_none()];
        assert_eq!(skipped.iter().filter(|s| **s).count(), 1);

        let stats = scheduler.stats();
        assert_eq!(stats.checks_completed, 1);
        assert_eq!(stats.checks_failed, 1);
        assert!(!stats.is_running);
        assert!(stats.last_run_at.is_some());

        // The slot is free again once the run is over.
        assert!(scheduler.try_run().await.is_some());
        assert_eq!(scheduler.stats().checks_completed, 2);
    }

    #[tokio::test]
    async fn test_waits_for_readiness_then_stops_on_shutdown() {
        let scheduler = scheduler(Duration::ZERO, Duration::from_secs(3600));
        let (ready_tx, ready_rx) = watch::channel(false);
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

        let handle = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move {
                scheduler
                    .run_until(ready_rx, async {
                        let _ = stop_rx.await;
                    })
                    .await;
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(scheduler.stats().last_run_at.is_none());

        ready_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while scheduler.stats().last_run_at.is_none() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        stop_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(scheduler.stats().checks_completed, 1);
    }

    #[tokio::test]
    async fn test_shutdown_before_ready_never_runs() {
        let scheduler = scheduler(Duration::ZERO, Duration::from_secs(3600));
        let (_ready_tx, ready_rx) = watch::channel(false);

        scheduler.run_until(ready_rx, async {}).await;
        assert_eq!(scheduler.stats().checks_completed, 0);
    }
}
