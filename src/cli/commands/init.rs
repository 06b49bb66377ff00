//! Create the pricewatch database.

use crate::config::resolve_db_path;
use crate::error::{Error, Result};
use crate::storage::SqliteStorage;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Serialize)]
struct InitOutput {
    database: PathBuf,
    reinitialized: bool,
}

/// Execute the init command.
///
/// # Errors
///
/// Returns `AlreadyInitialized` if the database exists and `force` is not
/// set, or an error if it cannot be created.
pub fn execute(db_path: Option<&PathBuf>, force: bool, json: bool) -> Result<()> {
    let db_path = resolve_db_path(db_path.map(PathBuf::as_path)).ok_or_else(|| {
        Error::Config("Could not determine the pricewatch data directory".to_string())
    })?;

    let existed = db_path.exists();
    if existed && !force {
        return Err(Error::AlreadyInitialized { path: db_path });
    }
    if existed {
        remove_database(&db_path)?;
    }

    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    // Opening applies the schema.
    drop(SqliteStorage::open(&db_path)?);

    if json {
        let output = InitOutput {
            database: db_path,
            reinitialized: existed,
        };
        println!("{}", serde_json::to_string(&output)?);
    } else {
        println!("Initialized pricewatch database");
        println!("  Database: {}", db_path.display());
        println!();
        println!("Next: register a user with 'pricewatch user add'.");
    }

    Ok(())
}

/// Remove a database file along with its WAL and shared-memory files.
fn remove_database(path: &Path) -> Result<()> {
    fs::remove_file(path)?;
    for suffix in ["-wal", "-shm"] {
        let mut side = path.as_os_str().to_owned();
        side.push(suffix);
        let side = PathBuf::from(side);
        if side.exists() {
            fs::remove_file(side)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_creates_database() {
        let temp = TempDir::new().unwrap();
        let db = temp.path().join("nested").join("pricewatch.db");

        execute(Some(&db), false, false).unwrap();
        assert!(db.exists());

        let storage = SqliteStorage::open(&db).unwrap();
        assert_eq!(storage.database_counts().unwrap().users, 0);
    }

    #[test]
    fn test_init_fails_if_already_initialized() {
        let temp = TempDir::new().unwrap();
        let db = temp.path().join("pricewatch.db");

        execute(Some(&db), false, false).unwrap();
        let result = execute(Some(&db), false, false);
        assert!(matches!(result, Err(Error::AlreadyInitialized { .. })));
    }

    #[test]
    fn test_init_force_starts_fresh() {
        let temp = TempDir::new().unwrap();
        let db = temp.path().join("pricewatch.db");

        execute(Some(&db), false, false).unwrap();
        {
            let mut storage = SqliteStorage::open(&db).unwrap();
            storage.create_user("1001", "alice", "5678", "10001").unwrap();
        }

        execute(Some(&db), true, false).unwrap();
        let storage = SqliteStorage::open(&db).unwrap();
        assert_eq!(storage.database_counts().unwrap().users, 0);
    }
}
