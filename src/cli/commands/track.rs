//! Tracking command implementations.

use super::{format_time, open_storage};
use crate::cli::TrackCommands;
use crate::error::{Error, Result};
use crate::model::{PriceHistoryEntry, Product, ProductUrl, TrackingRequest};
use crate::validate::{normalize_retailer, parse_threshold};
use colored::Colorize;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Serialize)]
struct TrackedItem {
    #[serde(flatten)]
    tracking: TrackingRequest,
    product: Product,
    display_name: String,
}

#[derive(Serialize)]
struct TrackListOutput {
    items: Vec<TrackedItem>,
    count: usize,
}

#[derive(Serialize)]
struct HistoryOutput {
    tracking_id: i64,
    product_id: i64,
    entries: Vec<PriceHistoryEntry>,
}

/// Execute tracking commands.
///
/// # Errors
///
/// Returns validation, not-found, or storage errors.
pub fn execute(command: &TrackCommands, db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    match command {
        TrackCommands::Add {
            discord_id,
            url,
            threshold,
            name,
        } => add(discord_id, url, threshold, name.as_deref(), db_path, json),
        TrackCommands::List {
            discord_id,
            retailer,
            all,
        } => list(discord_id, retailer.as_deref(), *all, db_path, json),
        TrackCommands::Remove { discord_id, id } => remove(discord_id, *id, db_path, json),
        TrackCommands::History {
            discord_id,
            id,
            limit,
        } => history(discord_id, *id, *limit, db_path, json),
    }
}

fn add(
    discord_id: &str,
    url: &str,
    threshold: &str,
    name: Option<&str>,
    db_path: Option<&PathBuf>,
    json: bool,
) -> Result<()> {
    let parsed = ProductUrl::parse(url)?;
    let threshold = parse_threshold(threshold)?;
    let name = name.map(str::trim).filter(|n| !n.is_empty());

    let mut storage = open_storage(db_path)?;
    let user = storage.require_user(discord_id)?;
    let (tracking, product) =
        storage.track_product(user.id, &parsed.url, parsed.retailer, name, threshold)?;

    if json {
        let output = TrackedItem {
            display_name: product.display_name(),
            tracking,
            product,
        };
        println!("{}", serde_json::to_string(&output)?);
    } else {
        println!(
            "Tracking #{} {} at {} below {}",
            tracking.id,
            product.display_name().bold(),
            product.retailer.display_name(),
            tracking.threshold
        );
        if product.retailer.supports_pickup() {
            println!("  Pickup is checked at the user's stores (see 'pricewatch store list').");
        }
    }

    Ok(())
}

fn list(
    discord_id: &str,
    retailer: Option<&str>,
    all: bool,
    db_path: Option<&PathBuf>,
    json: bool,
) -> Result<()> {
    let retailer = retailer
        .map(|r| {
            normalize_retailer(r).map_err(|(input, suggestion)| {
                let msg = suggestion.map_or_else(
                    || format!("Unknown retailer '{input}'"),
                    |s| format!("Unknown retailer '{input}'. Did you mean '{s}'?"),
                );
                Error::InvalidArgument(msg)
            })
        })
        .transpose()?;

    let storage = open_storage(db_path)?;
    let user = storage.require_user(discord_id)?;

    let items: Vec<TrackedItem> = storage
        .list_tracking_for_user(user.id)?
        .into_iter()
        .filter(|(t, p)| (all || t.active) && retailer.is_none_or(|r| p.retailer == r))
        .map(|(tracking, product)| TrackedItem {
            display_name: product.display_name(),
            tracking,
            product,
        })
        .collect();

    if json {
        let output = TrackListOutput {
            count: items.len(),
            items,
        };
        println!("{}", serde_json::to_string(&output)?);
        return Ok(());
    }

    if items.is_empty() {
        println!("{} is not tracking anything.", user.name);
        return Ok(());
    }

    println!("{}", format!("Tracked by {} ({}):", user.name, items.len()).bold());
    for item in &items {
        let state = if item.tracking.active {
            String::new()
        } else {
            format!(" {}", "(stopped)".dimmed())
        };
        println!(
            "  #{:<5} {:<8} below {:<10} {}{state}",
            item.tracking.id,
            item.product.retailer.as_str(),
            item.tracking.threshold.to_string(),
            item.display_name
        );
        println!("         {}", item.product.url.dimmed());
    }

    Ok(())
}

fn remove(discord_id: &str, id: i64, db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    let mut storage = open_storage(db_path)?;
    let user = storage.require_user(discord_id)?;
    storage.deactivate_tracking(user.id, id)?;

    if json {
        println!("{}", serde_json::json!({ "id": id, "active": false }));
    } else {
        println!("Stopped tracking #{id}");
    }

    Ok(())
}

fn history(
    discord_id: &str,
    id: i64,
    limit: u32,
    db_path: Option<&PathBuf>,
    json: bool,
) -> Result<()> {
    let storage = open_storage(db_path)?;
    let user = storage.require_user(discord_id)?;
    let (tracking, product) = storage
        .list_tracking_for_user(user.id)?
        .into_iter()
        .find(|(t, _)| t.id == id)
        .ok_or(Error::TrackingNotFound { id })?;

    let entries = storage.list_price_history(product.id, limit)?;

    if json {
        let output = HistoryOutput {
            tracking_id: tracking.id,
            product_id: product.id,
            entries,
        };
        println!("{}", serde_json::to_string(&output)?);
        return Ok(());
    }

    println!(
        "{}",
        format!("{} (threshold {})", product.display_name(), tracking.threshold).bold()
    );
    if entries.is_empty() {
        println!("  No prices recorded yet.");
        return Ok(());
    }

    for entry in &entries {
        let price = if entry.price <= tracking.threshold {
            entry.price.to_string().green()
        } else {
            entry.price.to_string().normal()
        };
        let mut flags = Vec::new();
        if entry.shipping_available {
            flags.push("ship");
        }
        if entry.pickup_available {
            flags.push("pickup");
        }
        println!(
            "  {}  {:<14} {:>10}  {}",
            format_time(entry.observed_at),
            entry.store_key,
            price,
            flags.join(",")
        );
    }

    Ok(())
}
