//! `stats` and `alerts` reporting commands.

use super::{format_time, open_storage};
use crate::error::Result;
use crate::model::{AlertHistoryEntry, CheckRun};
use crate::storage::DatabaseCounts;
use colored::Colorize;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatsOutput {
    last_run: Option<CheckRun>,
    counts: DatabaseCounts,
}

#[derive(Serialize)]
struct AlertsOutput {
    discord_id: String,
    alerts: Vec<AlertHistoryEntry>,
    count: usize,
}

/// Show the last persisted run and table totals.
///
/// # Errors
///
/// Returns an error if the database cannot be read.
pub fn execute(db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    let storage = open_storage(db_path)?;
    let output = StatsOutput {
        last_run: storage.last_check_run()?,
        counts: storage.database_counts()?,
    };

    if json {
        println!("{}", serde_json::to_string(&output)?);
        return Ok(());
    }

    println!("{}", "Last run".cyan().bold());
    match &output.last_run {
        Some(run) => {
            println!("  Finished:     {}", format_time(run.finished_at));
            println!("  Duration:     {} ms", run.duration_ms);
            println!(
                "  Checks:       {} ok, {} failed",
                run.checks_succeeded, run.checks_failed
            );
            println!("  Alerts sent:  {}", run.alerts_sent);
            println!("  Peak probes:  {}", run.peak_concurrency);
        }
        None => println!("  No runs yet. Try 'pricewatch check'."),
    }

    let c = &output.counts;
    println!();
    println!("{}", "Database".cyan().bold());
    println!("  Users:          {}", c.users);
    println!("  Products:       {}", c.products);
    println!("  Active tracks:  {}", c.active_tracking);
    println!("  Price points:   {}", c.price_observations);
    println!("  Alerts sent:    {}", c.alerts_sent);

    Ok(())
}

/// Show alert history for one user.
///
/// # Errors
///
/// Returns `UserNotFound` or storage errors.
pub fn execute_alerts(discord_id: &str, limit: u32, db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    let storage = open_storage(db_path)?;
    let user = storage.require_user(discord_id)?;
    let alerts = storage.list_alert_history(user.id, limit)?;

    if json {
        let output = AlertsOutput {
            discord_id: user.discord_id,
            count: alerts.len(),
            alerts,
        };
        println!("{}", serde_json::to_string(&output)?);
        return Ok(());
    }

    if alerts.is_empty() {
        println!("No alerts sent to {} yet.", user.name);
        return Ok(());
    }

    for alert in &alerts {
        let name = storage
            .get_product(alert.product_id)?
            .map_or_else(|| format!("product {}", alert.product_id), |p| p.display_name());
        println!(
            "  {}  {:<8} {:<14} {:>10}  {name}",
            format_time(alert.sent_at),
            alert.alert_type.as_str(),
            alert.store_key,
            alert.price.to_string()
        );
    }

    Ok(())
}
