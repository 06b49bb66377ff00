//! SQLite storage layer for pricewatch.
//!
//! This module provides the persistence layer using SQLite with:
//! - WAL mode for concurrent reads
//! - IMMEDIATE transactions for multi-statement writes
//! - Inline versioned migrations
//!
//! # Submodules
//!
//! - [`schema`] - Database schema definitions
//! - [`migrations`] - Data migrations for older databases
//! - [`sqlite`] - Main SQLite storage implementation

pub mod migrations;
pub mod schema;
pub mod sqlite;

pub use sqlite::{DatabaseCounts, NewCheckRun, SqliteStorage};

use crate::error::{Error, Result};
use std::sync::{Arc, Mutex, MutexGuard};

/// Storage handle shared between concurrently running checks.
pub type SharedStorage = Arc<Mutex<SqliteStorage>>;

/// Wrap a storage backend for sharing across tasks.
#[must_use]
pub fn shared(storage: SqliteStorage) -> SharedStorage {
    Arc::new(Mutex::new(storage))
}

/// Lock the shared storage for one short critical section.
///
/// # Errors
///
/// Returns `Storage` if a previous holder panicked.
pub fn lock(storage: &SharedStorage) -> Result<MutexGuard<'_, SqliteStorage>> {
    storage
        .lock()
        .map_err(|_| Error::Storage("storage lock poisoned".to_string()))
}
