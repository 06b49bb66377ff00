//! `check` (one run now) and `run` (scheduler daemon).

use super::open_storage;
use crate::checker::{Orchestrator, RunSummary, Scheduler, StatsSnapshot};
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::notify::{BoxedNotifier, DeliveryStats, DiscordNotifier, LogNotifier};
use crate::storage::{self, SharedStorage};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// Longest wait between readiness probes of the notifier.
const READY_BACKOFF_MAX: Duration = Duration::from_secs(60);

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CheckOutput {
    started_at: i64,
    finished_at: i64,
    duration_ms: u64,
    checks_succeeded: u64,
    checks_failed: u64,
    alerts_sent: u64,
    peak_concurrency: u64,
    notifier: &'static str,
    deliveries: DeliveryStats,
}

impl CheckOutput {
    fn new(summary: &RunSummary, notifier: &BoxedNotifier) -> Self {
        Self {
            started_at: summary.started_at,
            finished_at: summary.finished_at,
            duration_ms: u64::try_from(summary.duration.as_millis()).unwrap_or(u64::MAX),
            checks_succeeded: summary.checks_succeeded,
            checks_failed: summary.checks_failed,
            alerts_sent: summary.alerts_sent,
            peak_concurrency: summary.peak_concurrency,
            notifier: notifier.name(),
            deliveries: notifier.stats(),
        }
    }
}

/// Discord when a bot token is configured, the log otherwise.
fn build_notifier(settings: &Settings) -> Result<BoxedNotifier> {
    match &settings.discord_bot_token {
        Some(token) => Ok(BoxedNotifier::new(DiscordNotifier::new(
            token.clone(),
            settings.fallback_channel_id.clone(),
            settings.request_timeout,
        )?)),
        None => {
            warn!("DISCORD_BOT_TOKEN not set, alerts will only be logged");
            Ok(BoxedNotifier::new(LogNotifier))
        }
    }
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?)
}

fn prepare(db_path: Option<&PathBuf>, config: Option<&PathBuf>) -> Result<(Settings, SharedStorage)> {
    let settings = Settings::load(config.map(PathBuf::as_path))?;
    let storage = storage::shared(open_storage(db_path)?);
    Ok((settings, storage))
}

/// Execute one check cycle and report it.
///
/// # Errors
///
/// Returns config, storage or client-construction errors. Individual
/// failing checks are reported in the summary instead.
pub fn execute_check(db_path: Option<&PathBuf>, config: Option<&PathBuf>, json: bool) -> Result<()> {
    let (settings, storage) = prepare(db_path, config)?;

    runtime()?.block_on(async move {
        let notifier = Arc::new(build_notifier(&settings)?);
        let orchestrator = Orchestrator::from_settings(&settings, storage, Arc::clone(&notifier))?;
        let summary = orchestrator.run().await?;
        let output = CheckOutput::new(&summary, &notifier);

        if json {
            println!("{}", serde_json::to_string(&output)?);
        } else {
            println!(
                "Checked {} locations in {:.1}s: {} ok, {} failed, {} alerts sent",
                summary.checks_total(),
                summary.duration.as_secs_f64(),
                summary.checks_succeeded,
                summary.checks_failed,
                summary.alerts_sent
            );
            if output.deliveries.failed > 0 {
                println!("  {} alerts could not be delivered", output.deliveries.failed);
            }
        }
        Ok::<(), Error>(())
    })
}

/// Run the scheduler until Ctrl-C.
///
/// # Errors
///
/// Returns config, storage or client-construction errors. Failed runs are
/// logged and the scheduler keeps going.
pub fn execute_run(db_path: Option<&PathBuf>, config: Option<&PathBuf>, json: bool) -> Result<()> {
    let (settings, storage) = prepare(db_path, config)?;

    let snapshot: StatsSnapshot = runtime()?.block_on(async move {
        let notifier = Arc::new(build_notifier(&settings)?);
        let orchestrator = Orchestrator::from_settings(&settings, storage, Arc::clone(&notifier))?;
        let scheduler = Scheduler::new(Arc::new(orchestrator), settings.check_interval);

        let (ready_tx, ready_rx) = watch::channel(false);
        tokio::spawn(wait_until_ready(notifier, ready_tx));

        scheduler.run_until(ready_rx, shutdown_signal()).await;
        Ok::<_, Error>(scheduler.stats())
    })?;

    if json {
        println!("{}", serde_json::to_string(&snapshot)?);
    } else {
        println!(
            "Stopped after {} checks ({} failed), {} alerts sent",
            snapshot.checks_completed, snapshot.checks_failed, snapshot.alerts_sent
        );
    }
    Ok(())
}

/// Poll the notifier until it reports ready, then flip the signal.
async fn wait_until_ready(notifier: Arc<BoxedNotifier>, ready: watch::Sender<bool>) {
    let mut delay = Duration::from_secs(1);
    loop {
        if notifier.is_ready().await {
            info!(notifier = notifier.name(), "Notification channel ready");
            let _ = ready.send(true);
            return;
        }
        warn!(
            notifier = notifier.name(),
            retry_in_secs = delay.as_secs(),
            "Notification channel not ready"
        );
        tokio::time::sleep(delay).await;
        delay = (delay * 2).min(READY_BACKOFF_MAX);
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl-C"),
        Err(e) => {
            warn!(error = %e, "Could not listen for Ctrl-C, running until killed");
            std::future::pending::<()>().await;
        }
    }
}
