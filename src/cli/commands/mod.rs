//! Command implementations.

pub mod check;
pub mod completions;
pub mod init;
pub mod stats;
pub mod store;
pub mod track;
pub mod user;
pub mod version;
pub mod zip;

use crate::config::resolve_db_path;
use crate::error::{Error, Result};
use crate::storage::SqliteStorage;
use chrono::{TimeZone, Utc};
use std::path::PathBuf;

/// Open the database, which must already exist.
pub(crate) fn open_storage(db_path: Option<&PathBuf>) -> Result<SqliteStorage> {
    let db_path = resolve_db_path(db_path.map(PathBuf::as_path)).ok_or(Error::NotInitialized)?;

    if !db_path.exists() {
        return Err(Error::NotInitialized);
    }

    SqliteStorage::open(&db_path)
}

/// Format a unix-ms timestamp for tables.
pub(crate) fn format_time(ms: i64) -> String {
    Utc.timestamp_millis_opt(ms)
        .single()
        .map_or_else(|| "-".to_string(), |t| t.format("%Y-%m-%d %H:%M").to_string())
}
