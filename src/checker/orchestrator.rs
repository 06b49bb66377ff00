//! Check orchestrator.
//!
//! One run loads every active tracking request, expands it into one check
//! per shipping location and (Walmart) pickup store, and runs all checks
//! concurrently. Each check passes through its retailer's gate, probes the
//! page, and hands the observation to the alert engine. A failing check is
//! counted and never aborts the run.
//!
//! Runs against one database are exclusive across processes: each run holds
//! the database's run lease, so `check` refuses while a daemon cycle is busy.

use super::RunSummary;
use crate::alerts::{AlertEngine, AlertOutcome, CheckSite};
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::gate::ConcurrencyGate;
use crate::locations;
use crate::model::{ActiveTracking, AlertType, LocationContext, PickupStore, Retailer};
use crate::notify::BoxedNotifier;
use crate::probe::{BoxedProbe, ProbeRunner, ProbeTarget, TargetProbe, WalmartProbe};
use crate::storage::{self, NewCheckRun, SharedStorage};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Lease lifetime; a run that crashes without releasing blocks others this long.
pub const RUN_LEASE_TTL: Duration = Duration::from_secs(30 * 60);

/// Probe runner and gate for one retailer.
pub struct Lane {
    pub runner: ProbeRunner,
    pub gate: Arc<ConcurrencyGate>,
}

impl Lane {
    #[must_use]
    pub fn new(runner: ProbeRunner, limit: usize) -> Arc<Self> {
        let gate = ConcurrencyGate::new(runner.retailer().as_str(), limit);
        Arc::new(Self { runner, gate })
    }
}

/// One unit of work in a run.
#[derive(Debug, Clone)]
pub enum CheckTask {
    Shipping {
        tracking: Arc<ActiveTracking>,
        context: LocationContext,
    },
    Pickup {
        tracking: Arc<ActiveTracking>,
        store: PickupStore,
    },
}

impl CheckTask {
    #[must_use]
    pub fn tracking(&self) -> &ActiveTracking {
        match self {
            Self::Shipping { tracking, .. } | Self::Pickup { tracking, .. } => tracking,
        }
    }

    #[must_use]
    pub fn retailer(&self) -> Retailer {
        self.tracking().product.retailer
    }

    #[must_use]
    pub fn site(&self) -> CheckSite {
        match self {
            Self::Shipping { tracking, context } => CheckSite {
                store_key: context.store_key(tracking.product.retailer),
                alert_type: AlertType::Shipping,
                zip_code: context.zip_code.clone(),
                store_id: context.store_id.clone(),
            },
            Self::Pickup { store, .. } => CheckSite {
                store_key: store.store_key(),
                alert_type: AlertType::Pickup,
                zip_code: store.zip_code.clone(),
                store_id: Some(store.store_id.clone()),
            },
        }
    }

    #[must_use]
    pub fn probe_target(&self) -> ProbeTarget {
        let site = self.site();
        ProbeTarget {
            zip_code: site.zip_code,
            store_id: match self {
                Self::Shipping { tracking, .. } if tracking.product.retailer == Retailer::Target => None,
                _ => site.store_id,
            },
            store_key: site.store_key,
        }
    }
}

/// Probes in flight across all lanes during one run.
#[derive(Default)]
struct InFlight {
    active: AtomicUsize,
    peak: AtomicUsize,
}

struct InFlightGuard<'a>(&'a InFlight);

impl InFlight {
    fn enter(&self) -> InFlightGuard<'_> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        InFlightGuard(self)
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

enum CheckResult {
    Succeeded { alerted: bool },
    Failed,
}

/// Runs check cycles.
pub struct Orchestrator {
    storage: SharedStorage,
    engine: AlertEngine,
    walmart: Arc<Lane>,
    target: Arc<Lane>,
    lease_holder: String,
}

impl Orchestrator {
    #[must_use]
    pub fn new(storage: SharedStorage, engine: AlertEngine, walmart: Arc<Lane>, target: Arc<Lane>) -> Self {
        Self {
            storage,
            engine,
            walmart,
            target,
            lease_holder: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Wire the HTTP probes, gates and alert engine from settings.
    ///
    /// # Errors
    ///
    /// Returns an error if an HTTP client cannot be built.
    pub fn from_settings(
        settings: &Settings,
        storage: SharedStorage,
        notifier: Arc<BoxedNotifier>,
    ) -> Result<Self> {
        let walmart = ProbeRunner::new(
            BoxedProbe::new(WalmartProbe::new(settings.request_timeout)?),
            settings.retry_policy(),
            settings.request_timeout,
        );
        let target = ProbeRunner::new(
            BoxedProbe::new(TargetProbe::new(settings.request_timeout)?),
            settings.retry_policy(),
            settings.request_timeout,
        );
        let engine = AlertEngine::new(Arc::clone(&storage), notifier, settings.alert_cooldown);

        Ok(Self::new(
            storage,
            engine,
            Lane::new(walmart, settings.walmart_max_concurrency),
            Lane::new(target, settings.target_max_concurrency),
        ))
    }

    fn lane(&self, retailer: Retailer) -> Arc<Lane> {
        match retailer {
            Retailer::Walmart => Arc::clone(&self.walmart),
            Retailer::Target => Arc::clone(&self.target),
        }
    }

    /// Expand active tracking into checks. Users whose locations cannot be
    /// read are skipped and reported in the second value.
    fn plan(&self) -> Result<(Vec<CheckTask>, u64)> {
        let db = storage::lock(&self.storage)?;
        let active = db.list_active_tracking()?;

        let mut tasks = Vec::new();
        let mut unresolved = 0;
        for tracking in active {
            let resolved = match locations::resolve(&db, &tracking.user, tracking.product.retailer) {
                Ok(r) => r,
                Err(e) => {
                    warn!(user = %tracking.user.discord_id, error = %e, "Could not resolve locations");
                    unresolved += 1;
                    continue;
                }
            };

            let tracking = Arc::new(tracking);
            for context in resolved.shipping {
                tasks.push(CheckTask::Shipping {
                    tracking: Arc::clone(&tracking),
                    context,
                });
            }
            for store in resolved.pickup {
                tasks.push(CheckTask::Pickup {
                    tracking: Arc::clone(&tracking),
                    store,
                });
            }
        }

        Ok((tasks, unresolved))
    }

    /// Run one full check cycle.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RunInProgress`] if another orchestrator holds the
    /// run lease, or an error if the tracking list cannot be loaded. Faults
    /// inside individual checks are counted as failed checks.
    pub async fn run(&self) -> Result<RunSummary> {
        let now = chrono::Utc::now().timestamp_millis();
        let held = storage::lock(&self.storage)?.try_acquire_run_lease(&self.lease_holder, now, RUN_LEASE_TTL)?;
        if let Some(started_at) = held {
            return Err(Error::RunInProgress { started_at });
        }

        let result = self.run_cycle().await;

        if let Err(e) = storage::lock(&self.storage).and_then(|mut db| db.release_run_lease(&self.lease_holder)) {
            warn!(error = %e, "Could not release run lease");
        }
        result
    }

    async fn run_cycle(&self) -> Result<RunSummary> {
        let started_at = chrono::Utc::now().timestamp_millis();
        let clock = Instant::now();

        let (tasks, unresolved) = self.plan()?;
        info!(checks = tasks.len(), "Starting check run");

        let in_flight = Arc::new(InFlight::default());
        let mut set = JoinSet::new();

        for task in tasks {
            let lane = self.lane(task.retailer());
            let engine = self.engine.clone();
            let in_flight = Arc::clone(&in_flight);

            set.spawn(async move {
                let target = task.probe_target();
                let url = task.tracking().product.url.clone();

                let observation = lane
                    .gate
                    .run(async {
                        let _slot = in_flight.enter();
                        lane.runner.probe(&url, &target).await
                    })
                    .await;

                if !observation.is_success() {
                    return CheckResult::Failed;
                }

                let now = chrono::Utc::now().timestamp_millis();
                match engine.handle(task.tracking(), &task.site(), &observation, now).await {
                    Ok(outcome) => CheckResult::Succeeded {
                        alerted: outcome == AlertOutcome::Delivered,
                    },
                    Err(e) => {
                        warn!(
                            url = %url,
                            store_key = %target.store_key,
                            error = %e,
                            "Alert handling failed, skipping check"
                        );
                        CheckResult::Failed
                    }
                }
            });
        }

        let mut succeeded = 0u64;
        let mut failed = unresolved;
        let mut alerts = 0u64;

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(CheckResult::Succeeded { alerted }) => {
                    succeeded += 1;
                    if alerted {
                        alerts += 1;
                    }
                }
                Ok(CheckResult::Failed) => failed += 1,
                Err(e) => {
                    warn!(error = %e, "Check task aborted");
                    failed += 1;
                }
            }
        }

        let summary = RunSummary {
            started_at,
            finished_at: chrono::Utc::now().timestamp_millis(),
            duration: clock.elapsed(),
            checks_succeeded: succeeded,
            checks_failed: failed,
            alerts_sent: alerts,
            peak_concurrency: u64::try_from(in_flight.peak.load(Ordering::SeqCst)).unwrap_or(u64::MAX),
        };

        let persisted = storage::lock(&self.storage).and_then(|mut db| {
            db.record_check_run(&NewCheckRun {
                started_at: summary.started_at,
                finished_at: summary.finished_at,
                checks_succeeded: summary.checks_succeeded,
                checks_failed: summary.checks_failed,
                alerts_sent: summary.alerts_sent,
                peak_concurrency: summary.peak_concurrency,
            })
        });
        if let Err(e) = persisted {
            warn!(error = %e, "Could not record check run");
        }

        info!(
            succeeded = summary.checks_succeeded,
            failed = summary.checks_failed,
            alerts = summary.alerts_sent,
            peak_concurrency = summary.peak_concurrency,
            duration_ms = u64::try_from(summary.duration.as_millis()).unwrap_or(u64::MAX),
            "Check run complete"
        );

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProbeError;
    use crate::model::{AlertKey, Money, Observation};
    use crate::notify::testing::RecordingNotifier;
    use crate::probe::testing::ScriptedProbe;
    use crate::probe::{RetailerProbe, RetryPolicy};
    use crate::storage::SqliteStorage;

    const DAY: Duration = Duration::from_secs(24 * 3600);

    fn runner<P: RetailerProbe + 'static>(probe: P) -> ProbeRunner {
        ProbeRunner::new(BoxedProbe::new(probe), RetryPolicy::immediate(1), Duration::from_secs(2))
    }

    fn orchestrator(
        storage: &SharedStorage,
        notifier: &Arc<BoxedNotifier>,
        walmart: ProbeRunner,
        target: ProbeRunner,
    ) -> Orchestrator {
        let engine = AlertEngine::new(Arc::clone(storage), Arc::clone(notifier), DAY);
        Orchestrator::new(
            Arc::clone(storage),
            engine,
            Lane::new(walmart, 4),
            Lane::new(target, 2),
        )
    }

    fn priced(cents: i64, shipping: bool, pickup: bool) -> std::result::Result<Observation, ProbeError> {
        Ok(Observation {
            price: Some(Money::from_cents(cents)),
            name: Some("Ninja Air Fryer".into()),
            shipping_available: shipping,
            pickup_available: pickup,
            in_stock: true,
            error: None,
        })
    }

    #[tokio::test]
    async fn test_timeouts_counted_as_failed_checks() {
        let mut db = SqliteStorage::open_memory().unwrap();
        let user = db.create_user("1001", "alice", "5678", "10001").unwrap();

        let mut probe = ScriptedProbe::new(Retailer::Target);
        for i in 0..5 {
            let url = format!("https://www.target.com/p/item-{i}/-/A-{i}");
            db.track_product(user.id, &url, Retailer::Target, None, Money::from_cents(10_000))
                .unwrap();
            // Items 3 and 4 get no answer and time out.
            if i < 3 {
                probe = probe.answer(&url, "target-10001", priced(5_000, true, false));
            }
        }

        let storage = storage::shared(db);
        let notifier = Arc::new(BoxedNotifier::new(RecordingNotifier::default()));
        let orch = orchestrator(
            &storage,
            &notifier,
            runner(ScriptedProbe::new(Retailer::Walmart)),
            runner(probe),
        );

        let summary = orch.run().await.unwrap();
        assert_eq!(summary.checks_failed, 2);
        assert_eq!(summary.checks_succeeded, 3);
        assert_eq!(summary.alerts_sent, 3);
        assert!(summary.peak_concurrency <= 2);
        assert!(storage::lock(&storage).unwrap().last_check_run().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_pickup_alert_end_to_end() {
        let url = "https://www.walmart.com/ip/ninja-air-fryer/123456";
        let mut db = SqliteStorage::open_memory().unwrap();
        let user = db.create_user("1001", "alice", "5678", "10001").unwrap();
        db.add_pickup_store(user.id, "2280", "72712").unwrap();
        let (_, product) = db
            .track_product(user.id, url, Retailer::Walmart, None, Money::from_cents(5_000))
            .unwrap();

        let probe = ScriptedProbe::new(Retailer::Walmart)
            .answer(url, "5678", priced(4_500, false, false))
            .answer(url, "2280", priced(4_500, false, true));

        let storage = storage::shared(db);
        let recorder = RecordingNotifier::default();
        let notifier = Arc::new(BoxedNotifier::new(recorder));
        let orch = orchestrator(
            &storage,
            &notifier,
            runner(probe),
            runner(ScriptedProbe::new(Retailer::Target)),
        );

        let first = orch.run().await.unwrap();
        assert_eq!(first.checks_succeeded, 2);
        assert_eq!(first.alerts_sent, 1);

        {
            let db = storage::lock(&storage).unwrap();
            let history = db.list_alert_history(user.id, 10).unwrap();
            assert_eq!(history.len(), 1);
            assert_eq!(history[0].alert_type, AlertType::Pickup);
            assert_eq!(history[0].store_key, "2280");

            let pickup_state = db
                .get_alert_state(&AlertKey {
                    user_id: user.id,
                    product_id: product.id,
                    store_key: "2280".into(),
                    alert_type: AlertType::Pickup,
                })
                .unwrap()
                .unwrap();
            assert_eq!(pickup_state.last_alerted_price, Money::from_cents(4_500));

            let named = db.get_product(product.id).unwrap().unwrap();
            assert_eq!(named.name.as_deref(), Some("Ninja Air Fryer"));
        }

        let second = orch.run().await.unwrap();
        assert_eq!(second.alerts_sent, 0);
        assert_eq!(notifier.stats().sent, 1);
        assert_eq!(
            storage::lock(&storage).unwrap().list_alert_history(user.id, 10).unwrap().len(),
            1
        );
    }

    struct PanickingProbe;

    impl RetailerProbe for PanickingProbe {
        fn retailer(&self) -> Retailer {
            Retailer::Target
        }

        async fn fetch(&self, _url: &str, _target: &ProbeTarget) -> std::result::Result<Observation, ProbeError> {
            panic!("parser bug");
        }
    }

    #[tokio::test]
    async fn test_panicking_check_does_not_abort_run() {
        let mut db = SqliteStorage::open_memory().unwrap();
        let user = db.create_user("1001", "alice", "5678", "10001").unwrap();
        db.add_location_context(user.id, "90210", None, "Work", false)
            .unwrap();
        db.track_product(user.id, "https://www.target.com/p/x/-/A-1", Retailer::Target, None, Money::from_cents(100))
            .unwrap();

        let storage = storage::shared(db);
        let notifier = Arc::new(BoxedNotifier::new(RecordingNotifier::default()));
        let walmart = runner(ScriptedProbe::new(Retailer::Walmart));
        let target = Lane::new(runner(PanickingProbe), 2);
        let gate = Arc::clone(&target.gate);
        let engine = AlertEngine::new(Arc::clone(&storage), Arc::clone(&notifier), DAY);
        let orch = Orchestrator::new(Arc::clone(&storage), engine, Lane::new(walmart, 4), target);

        let summary = orch.run().await.unwrap();
        assert_eq!(summary.checks_failed, 2);
        assert_eq!(summary.checks_succeeded, 0);
        assert_eq!(gate.active(), 0);
        assert_eq!(gate.available_permits(), 2);
    }

    #[tokio::test]
    async fn test_muted_users_are_not_checked() {
        let mut db = SqliteStorage::open_memory().unwrap();
        let user = db.create_user("1001", "alice", "5678", "10001").unwrap();
        db.track_product(user.id, "https://www.target.com/p/x/-/A-1", Retailer::Target, None, Money::from_cents(100))
            .unwrap();
        db.set_notifications_enabled("1001", false).unwrap();

        let storage = storage::shared(db);
        let notifier = Arc::new(BoxedNotifier::new(RecordingNotifier::default()));
        let orch = orchestrator(
            &storage,
            &notifier,
            runner(ScriptedProbe::new(Retailer::Walmart)),
            runner(ScriptedProbe::new(Retailer::Target)),
        );

        let summary = orch.run().await.unwrap();
        assert_eq!(summary.checks_total(), 0);
    }

    #[tokio::test]
    async fn test_run_refused_while_another_holds_the_lease() {
        let mut db = SqliteStorage::open_memory().unwrap();
        db.create_user("1001", "alice", "5678", "10001").unwrap();
        let now = chrono::Utc::now().timestamp_millis();
        assert_eq!(db.try_acquire_run_lease("daemon", now, RUN_LEASE_TTL).unwrap(), None);

        let storage = storage::shared(db);
        let notifier = Arc::new(BoxedNotifier::new(RecordingNotifier::default()));
        let orch = orchestrator(
            &storage,
            &notifier,
            runner(ScriptedProbe::new(Retailer::Walmart)),
            runner(ScriptedProbe::new(Retailer::Target)),
        );

        let err = orch.run().await.unwrap_err();
        assert!(matches!(err, Error::RunInProgress { started_at } if started_at == now));
        assert!(storage::lock(&storage).unwrap().last_check_run().unwrap().is_none());

        storage::lock(&storage).unwrap().release_run_lease("daemon").unwrap();
        orch.run().await.unwrap();
        // Released after the run, so the next one is not blocked by it.
        orch.run().await.unwrap();
        let later = chrono::Utc::now().timestamp_millis();
        assert_eq!(
            storage::lock(&storage).unwrap().try_acquire_run_lease("daemon", later, RUN_LEASE_TTL).unwrap(),
            None
        );
    }
}
