//! User command implementations.

use super::{format_time, open_storage};
use crate::cli::{Toggle, UserCommands};
use crate::error::Result;
use crate::model::User;
use crate::validate::{validate_discord_id, validate_store_id, validate_zip};
use colored::Colorize;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Serialize)]
struct UserListOutput {
    users: Vec<User>,
    count: usize,
}

#[derive(Serialize)]
struct UserChangeOutput<'a> {
    discord_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    removed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    notifications_enabled: Option<bool>,
}

/// Execute user commands.
///
/// # Errors
///
/// Returns validation, not-found, or storage errors.
pub fn execute(command: &UserCommands, db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    match command {
        UserCommands::Add {
            discord_id,
            name,
            store,
            zip,
        } => add(discord_id, name, store, zip, db_path, json),
        UserCommands::List => list(db_path, json),
        UserCommands::Remove { discord_id } => remove(discord_id, db_path, json),
        UserCommands::Notify { discord_id, state } => notify(discord_id, *state, db_path, json),
    }
}

fn add(
    discord_id: &str,
    name: &str,
    store: &str,
    zip: &str,
    db_path: Option<&PathBuf>,
    json: bool,
) -> Result<()> {
    let discord_id = validate_discord_id(discord_id)?;
    let store = validate_store_id(store)?;
    let zip = validate_zip(zip)?;

    let mut storage = open_storage(db_path)?;
    let user = storage.create_user(&discord_id, name.trim(), &store, &zip)?;

    if json {
        println!("{}", serde_json::to_string(&user)?);
    } else {
        println!(
            "Registered {} ({}) at store {} / ZIP {}",
            user.name.bold(),
            user.discord_id,
            user.primary_store_id,
            user.zip_code
        );
    }

    Ok(())
}

fn list(db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    let storage = open_storage(db_path)?;
    let users = storage.list_users()?;

    if json {
        let output = UserListOutput {
            count: users.len(),
            users,
        };
        println!("{}", serde_json::to_string(&output)?);
        return Ok(());
    }

    if users.is_empty() {
        println!("No users registered.");
        return Ok(());
    }

    println!("{}", format!("Users ({}):", users.len()).bold());
    for user in &users {
        let alerts = if user.notifications_enabled {
            "alerts on".green()
        } else {
            "alerts off".yellow()
        };
        println!(
            "  {:<20} {:<16} store {:<6} ZIP {}  [{alerts}]  since {}",
            user.discord_id,
            user.name,
            user.primary_store_id,
            user.zip_code,
            format_time(user.created_at)
        );
    }

    Ok(())
}

fn remove(discord_id: &str, db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    let mut storage = open_storage(db_path)?;
    storage.delete_user(discord_id)?;

    if json {
        let output = UserChangeOutput {
            discord_id,
            removed: Some(true),
            notifications_enabled: None,
        };
        println!("{}", serde_json::to_string(&output)?);
    } else {
        println!("Removed user {discord_id}");
    }

    Ok(())
}

fn notify(discord_id: &str, state: Toggle, db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    let enabled = state == Toggle::On;
    let mut storage = open_storage(db_path)?;
    storage.set_notifications_enabled(discord_id, enabled)?;

    if json {
        let output = UserChangeOutput {
            discord_id,
            removed: None,
            notifications_enabled: Some(enabled),
        };
        println!("{}", serde_json::to_string(&output)?);
    } else if enabled {
        println!("Alerts enabled for {discord_id}");
    } else {
        println!("Alerts paused for {discord_id}; their products will not be checked");
    }

    Ok(())
}
