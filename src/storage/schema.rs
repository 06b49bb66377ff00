//! Database schema definitions.
//!
//! Timestamps are stored as INTEGER Unix milliseconds; money as INTEGER cents.

use rusqlite::{Connection, Result};

/// Current schema version for migration tracking.
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// The complete SQL schema for the pricewatch database.
pub const SCHEMA_SQL: &str = r"
-- ====================
-- Schema Version Tracking
-- ====================

CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    applied_at INTEGER NOT NULL
);

-- ====================
-- Users and locations
-- ====================

CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    discord_id TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    primary_store_id TEXT NOT NULL,
    zip_code TEXT NOT NULL,
    notifications_enabled INTEGER NOT NULL DEFAULT 1,
    created_at INTEGER NOT NULL
);

-- Shipping location contexts; exactly one primary per user once any exist
CREATE TABLE IF NOT EXISTS user_zip_codes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    zip_code TEXT NOT NULL,
    store_id TEXT,
    label TEXT NOT NULL,
    is_primary INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    UNIQUE (user_id, zip_code),
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_user_zip_codes_user ON user_zip_codes(user_id);

-- Walmart pickup stores
CREATE TABLE IF NOT EXISTS user_stores (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    store_id TEXT NOT NULL,
    zip_code TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    UNIQUE (user_id, store_id),
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

-- ====================
-- Products and tracking
-- ====================

CREATE TABLE IF NOT EXISTS products (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL UNIQUE,
    name TEXT,
    retailer TEXT NOT NULL CHECK (retailer IN ('walmart', 'target')),
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS tracked_products (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    product_id INTEGER NOT NULL,
    threshold_cents INTEGER NOT NULL CHECK (threshold_cents > 0),
    active INTEGER NOT NULL DEFAULT 1,
    created_at INTEGER NOT NULL,
    UNIQUE (user_id, product_id),
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
    FOREIGN KEY (product_id) REFERENCES products(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_tracked_products_active ON tracked_products(active);

-- ====================
-- Observations and alerts
-- ====================

CREATE TABLE IF NOT EXISTS price_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    product_id INTEGER NOT NULL,
    store_key TEXT NOT NULL,
    price_cents INTEGER NOT NULL,
    shipping_available INTEGER NOT NULL,
    pickup_available INTEGER NOT NULL,
    checked_at INTEGER NOT NULL,
    FOREIGN KEY (product_id) REFERENCES products(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_price_history_product ON price_history(product_id, checked_at);

CREATE TABLE IF NOT EXISTS alert_states (
    user_id INTEGER NOT NULL,
    product_id INTEGER NOT NULL,
    store_key TEXT NOT NULL,
    alert_type TEXT NOT NULL CHECK (alert_type IN ('shipping', 'pickup')),
    last_alert_price_cents INTEGER NOT NULL,
    last_alert_at INTEGER NOT NULL,
    PRIMARY KEY (user_id, product_id, store_key, alert_type),
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
    FOREIGN KEY (product_id) REFERENCES products(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS alert_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    product_id INTEGER NOT NULL,
    store_key TEXT NOT NULL,
    alert_type TEXT NOT NULL,
    price_cents INTEGER NOT NULL,
    sent_at INTEGER NOT NULL,
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
    FOREIGN KEY (product_id) REFERENCES products(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_alert_history_user ON alert_history(user_id, sent_at);

-- ====================
-- Run records
-- ====================

CREATE TABLE IF NOT EXISTS check_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at INTEGER NOT NULL,
    finished_at INTEGER NOT NULL,
    duration_ms INTEGER NOT NULL,
    checks_succeeded INTEGER NOT NULL,
    checks_failed INTEGER NOT NULL,
    alerts_sent INTEGER NOT NULL,
    peak_concurrency INTEGER NOT NULL
);

-- Held by the process currently running checks against this database.
CREATE TABLE IF NOT EXISTS run_lease (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    holder TEXT NOT NULL,
    acquired_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL
);
";

/// Apply the complete schema to a database connection.
///
/// # Errors
///
/// Returns an error if any pragma or statement fails.
pub fn apply_schema(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;

    conn.execute_batch(SCHEMA_SQL)?;

    // Run migrations for existing databases
    super::migrations::run_migrations(conn)?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
        rusqlite::params![
            format!("v{CURRENT_SCHEMA_VERSION}"),
            chrono::Utc::now().timestamp_millis()
        ],
    )?;

    Ok(())
}
