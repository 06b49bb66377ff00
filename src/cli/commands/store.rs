//! Pickup store command implementations.

use super::{format_time, open_storage};
use crate::cli::StoreCommands;
use crate::error::{Error, Result};
use crate::model::PickupStore;
use crate::validate::{find_similar, validate_store_id, validate_zip};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Serialize)]
struct StoreListOutput {
    stores: Vec<PickupStore>,
    count: usize,
}

/// Execute store commands.
///
/// # Errors
///
/// Returns validation, not-found, or storage errors.
pub fn execute(command: &StoreCommands, db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    match command {
        StoreCommands::Add {
            discord_id,
            store_id,
            zip,
        } => add(discord_id, store_id, zip.as_deref(), db_path, json),
        StoreCommands::Remove {
            discord_id,
            store_id,
        } => remove(discord_id, store_id, db_path, json),
        StoreCommands::List { discord_id } => list(discord_id, db_path, json),
    }
}

fn add(
    discord_id: &str,
    store_id: &str,
    zip: Option<&str>,
    db_path: Option<&PathBuf>,
    json: bool,
) -> Result<()> {
    let store_id = validate_store_id(store_id)?;
    let zip = zip.map(validate_zip).transpose()?;

    let mut storage = open_storage(db_path)?;
    let user = storage.require_user(discord_id)?;
    let zip = zip.unwrap_or_else(|| user.zip_code.clone());
    let store = storage.add_pickup_store(user.id, &store_id, &zip)?;

    if json {
        println!("{}", serde_json::to_string(&store)?);
    } else {
        println!("Watching Walmart store {} (ZIP {}) for pickup", store.store_id, store.zip_code);
    }

    Ok(())
}

fn remove(discord_id: &str, store_id: &str, db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    let mut storage = open_storage(db_path)?;
    let user = storage.require_user(discord_id)?;

    if !storage.remove_pickup_store(user.id, store_id)? {
        let known: Vec<String> = storage
            .list_pickup_stores(user.id)?
            .into_iter()
            .map(|s| s.store_id)
            .collect();
        let similar = find_similar(store_id, &known, 3);
        let msg = if similar.is_empty() {
            format!("Store {store_id} is not on the pickup list")
        } else {
            format!(
                "Store {store_id} is not on the pickup list. Did you mean: {}?",
                similar.join(", ")
            )
        };
        return Err(Error::InvalidArgument(msg));
    }

    if json {
        println!("{}", serde_json::json!({ "store_id": store_id, "removed": true }));
    } else {
        println!("Stopped watching store {store_id}");
    }

    Ok(())
}

fn list(discord_id: &str, db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    let storage = open_storage(db_path)?;
    let user = storage.require_user(discord_id)?;
    let stores = storage.list_pickup_stores(user.id)?;

    if json {
        let output = StoreListOutput {
            count: stores.len(),
            stores,
        };
        println!("{}", serde_json::to_string(&output)?);
        return Ok(());
    }

    if stores.is_empty() {
        println!("No pickup stores. Add one with 'pricewatch store add'.");
        return Ok(());
    }

    println!("Pickup stores for {}:", user.name);
    for store in &stores {
        println!(
            "  {:<6} ZIP {}  added {}",
            store.store_id,
            store.zip_code,
            format_time(store.created_at)
        );
    }

    Ok(())
}
