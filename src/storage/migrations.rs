//! Versioned data migrations.
//!
//! The base DDL in [`schema`](super::schema) is idempotent; migrations carry
//! data fixes for databases created by older releases. Each runs once and is
//! recorded in `schema_migrations`.

use rusqlite::{Connection, Result};
use tracing::{info, warn};

/// A single migration with version identifier and SQL content.
struct Migration {
    version: &'static str,
    sql: &'static str,
}

/// All migrations in order.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: "001_backfill_primary_locations",
        // Users registered before location contexts existed get their own
        // ZIP and store as the primary context.
        sql: "INSERT INTO user_zip_codes (user_id, zip_code, store_id, label, is_primary, created_at)
              SELECT u.id, u.zip_code, u.primary_store_id, 'Primary', 1, u.created_at
              FROM users u
              WHERE NOT EXISTS (SELECT 1 FROM user_zip_codes z WHERE z.user_id = u.id);",
    },
    Migration {
        version: "002_add_notifications_enabled",
        sql: "ALTER TABLE users ADD COLUMN notifications_enabled INTEGER NOT NULL DEFAULT 1;",
    },
];

/// Run all pending migrations on the database.
///
/// Already-applied migrations are skipped, so this is safe on every open.
///
/// # Errors
///
/// Returns an error if a migration fails to apply. Duplicate-column errors
/// are logged and the migration is marked complete, since the base DDL
/// already has those columns.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version TEXT PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let applied: std::collections::HashSet<String> = conn
        .prepare("SELECT version FROM schema_migrations")?
        .query_map([], |row| row.get(0))?
        .collect::<Result<_, _>>()?;

    for migration in MIGRATIONS {
        if applied.contains(migration.version) {
            continue;
        }

        info!(version = migration.version, "Applying migration");

        if let Err(e) = conn.execute_batch(migration.sql) {
            if e.to_string().contains("duplicate column name") {
                warn!(
                    version = migration.version,
                    "Migration partially applied (columns exist), marking complete"
                );
            } else {
                return Err(e);
            }
        }

        conn.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            rusqlite::params![migration.version, chrono::Utc::now().timestamp_millis()],
        )?;
    }

    Ok(())
}
