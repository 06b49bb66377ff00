//! Location (ZIP code) command implementations.

use super::open_storage;
use crate::cli::ZipCommands;
use crate::error::Result;
use crate::model::{LocationContext, Retailer};
use crate::validate::{validate_store_id, validate_zip};
use colored::Colorize;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Serialize)]
struct ZipListOutput {
    discord_id: String,
    locations: Vec<LocationContext>,
    count: usize,
}

/// Execute ZIP commands.
///
/// # Errors
///
/// Returns validation, not-found, or storage errors.
pub fn execute(command: &ZipCommands, db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    match command {
        ZipCommands::Add {
            discord_id,
            zip,
            store,
            label,
            primary,
        } => add(discord_id, zip, store.as_deref(), label.as_deref(), *primary, db_path, json),
        ZipCommands::Remove { discord_id, zip } => remove(discord_id, zip, db_path, json),
        ZipCommands::Primary { discord_id, zip } => primary(discord_id, zip, db_path, json),
        ZipCommands::List { discord_id } => list(discord_id, db_path, json),
    }
}

fn add(
    discord_id: &str,
    zip: &str,
    store: Option<&str>,
    label: Option<&str>,
    primary: bool,
    db_path: Option<&PathBuf>,
    json: bool,
) -> Result<()> {
    let zip = validate_zip(zip)?;
    let store = store.map(validate_store_id).transpose()?;
    let label = label.map(str::trim).filter(|l| !l.is_empty()).unwrap_or(zip.as_str());

    let mut storage = open_storage(db_path)?;
    let user = storage.require_user(discord_id)?;
    let context = storage.add_location_context(user.id, &zip, store.as_deref(), label, primary)?;

    if json {
        println!("{}", serde_json::to_string(&context)?);
    } else {
        let marker = if context.is_primary { " (primary)" } else { "" };
        println!("Added ZIP {} \"{}\"{marker}", context.zip_code, context.label);
    }

    Ok(())
}

fn remove(discord_id: &str, zip: &str, db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    let zip = validate_zip(zip)?;
    let mut storage = open_storage(db_path)?;
    let user = storage.require_user(discord_id)?;
    storage.remove_location_context(user.id, &zip)?;

    if json {
        println!("{}", serde_json::json!({ "zip_code": zip, "removed": true }));
    } else {
        println!("Removed ZIP {zip}");
    }

    Ok(())
}

fn primary(discord_id: &str, zip: &str, db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    let zip = validate_zip(zip)?;
    let mut storage = open_storage(db_path)?;
    let user = storage.require_user(discord_id)?;
    storage.set_primary_location(user.id, &zip)?;

    if json {
        println!("{}", serde_json::json!({ "zip_code": zip, "is_primary": true }));
    } else {
        println!("ZIP {zip} is now the primary location");
    }

    Ok(())
}

fn list(discord_id: &str, db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    let storage = open_storage(db_path)?;
    let user = storage.require_user(discord_id)?;
    let locations = storage.list_location_contexts(user.id)?;

    if json {
        let output = ZipListOutput {
            discord_id: user.discord_id,
            count: locations.len(),
            locations,
        };
        println!("{}", serde_json::to_string(&output)?);
        return Ok(());
    }

    if locations.is_empty() {
        println!("No ZIP codes configured; checks use {} from the user record.", user.zip_code);
        return Ok(());
    }

    println!("{}", format!("Locations for {}:", user.name).bold());
    for context in &locations {
        let marker = if context.is_primary {
            "*".green().to_string()
        } else {
            " ".to_string()
        };
        println!(
            "  {marker} {:<6} {:<20} walmart key {}",
            context.zip_code,
            context.label,
            context.store_key(Retailer::Walmart)
        );
    }

    Ok(())
}
