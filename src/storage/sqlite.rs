//! SQLite storage implementation.
//!
//! Multi-statement writes go through [`SqliteStorage::mutate`], which wraps
//! the closure in an IMMEDIATE transaction so concurrent writers on the same
//! database file serialize instead of interleaving.

use crate::alerts::{decide, AlertDecision};
use crate::error::{Error, Result};
use crate::storage::schema::apply_schema;
use crate::model::{
    ActiveTracking, AlertHistoryEntry, AlertKey, AlertState, AlertType, CheckRun, LocationContext,
    Money, PickupStore, PriceHistoryEntry, Product, Retailer, TrackingRequest, User,
};
use rusqlite::{Connection, OptionalExtension, Row, Transaction};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// SQLite-based storage backend.
#[derive(Debug)]
pub struct SqliteStorage {
    conn: Connection,
}

/// Row counts reported by `pricewatch stats`.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseCounts {
    pub users: usize,
    pub products: usize,
    pub active_tracking: usize,
    pub price_observations: usize,
    pub alerts_sent: usize,
}

/// Fields of a finished run, before it has a row id.
#[derive(Debug, Clone, Copy, Default)]
pub struct NewCheckRun {
    pub started_at: i64,
    pub finished_at: i64,
    pub checks_succeeded: u64,
    pub checks_failed: u64,
    pub alerts_sent: u64,
    pub peak_concurrency: u64,
}

const USER_COLUMNS: &str =
    "id, discord_id, name, primary_store_id, zip_code, notifications_enabled, created_at";
const LOCATION_COLUMNS: &str = "id, zip_code, store_id, label, is_primary";
const PICKUP_COLUMNS: &str = "id, user_id, store_id, zip_code, created_at";
const PRODUCT_COLUMNS: &str = "id, url, name, retailer, created_at";
const TRACKING_COLUMNS: &str = "id, user_id, product_id, threshold_cents, active, created_at";

fn map_user(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        discord_id: row.get(1)?,
        name: row.get(2)?,
        primary_store_id: row.get(3)?,
        zip_code: row.get(4)?,
        notifications_enabled: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn map_location(row: &Row<'_>) -> rusqlite::Result<LocationContext> {
    Ok(LocationContext {
        id: Some(row.get(0)?),
        zip_code: row.get(1)?,
        store_id: row.get(2)?,
        label: row.get(3)?,
        is_primary: row.get(4)?,
    })
}

fn map_pickup(row: &Row<'_>) -> rusqlite::Result<PickupStore> {
    Ok(PickupStore {
        id: row.get(0)?,
        user_id: row.get(1)?,
        store_id: row.get(2)?,
        zip_code: row.get(3)?,
        created_at: row.get(4)?,
    })
}

/// Maps a product starting at column `offset`.
fn map_product(row: &Row<'_>, offset: usize) -> rusqlite::Result<Product> {
    Ok(Product {
        id: row.get(offset)?,
        url: row.get(offset + 1)?,
        name: row.get(offset + 2)?,
        retailer: row.get(offset + 3)?,
        created_at: row.get(offset + 4)?,
    })
}

fn map_tracking(row: &Row<'_>, offset: usize) -> rusqlite::Result<TrackingRequest> {
    Ok(TrackingRequest {
        id: row.get(offset)?,
        user_id: row.get(offset + 1)?,
        product_id: row.get(offset + 2)?,
        threshold: row.get(offset + 3)?,
        active: row.get(offset + 4)?,
        created_at: row.get(offset + 5)?,
    })
}

#[allow(clippy::cast_possible_wrap)]
const fn to_i64(n: u64) -> i64 {
    n as i64
}

#[allow(clippy::cast_sign_loss)]
const fn to_u64(n: i64) -> u64 {
    n as u64
}

fn read_alert_state(conn: &Connection, key: &AlertKey) -> Result<Option<AlertState>> {
    let state = conn
        .query_row(
            "SELECT last_alert_price_cents, last_alert_at FROM alert_states
             WHERE user_id = ?1 AND product_id = ?2 AND store_key = ?3 AND alert_type = ?4",
            rusqlite::params![key.user_id, key.product_id, key.store_key, key.alert_type.as_str()],
            |row| {
                Ok(AlertState {
                    key: key.clone(),
                    last_alerted_price: row.get(0)?,
                    last_alerted_at: row.get(1)?,
                })
            },
        )
        .optional()?;
    Ok(state)
}

fn write_alert_state(conn: &Connection, state: &AlertState) -> Result<()> {
    conn.execute(
        "INSERT INTO alert_states (user_id, product_id, store_key, alert_type, last_alert_price_cents, last_alert_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT (user_id, product_id, store_key, alert_type)
         DO UPDATE SET last_alert_price_cents = excluded.last_alert_price_cents,
                       last_alert_at = excluded.last_alert_at",
        rusqlite::params![
            state.key.user_id,
            state.key.product_id,
            state.key.store_key,
            state.key.alert_type.as_str(),
            state.last_alerted_price,
            state.last_alerted_at,
        ],
    )?;
    Ok(())
}

fn remove_alert_state(conn: &Connection, key: &AlertKey) -> Result<bool> {
    let rows = conn.execute(
        "DELETE FROM alert_states
         WHERE user_id = ?1 AND product_id = ?2 AND store_key = ?3 AND alert_type = ?4",
        rusqlite::params![key.user_id, key.product_id, key.store_key, key.alert_type.as_str()],
    )?;
    Ok(rows > 0)
}

/// Point `users.zip_code` at the user's current primary context.
fn mirror_primary_zip(tx: &Transaction, user_id: i64) -> Result<()> {
    tx.execute(
        "UPDATE users SET zip_code = (
             SELECT zip_code FROM user_zip_codes WHERE user_id = ?1 AND is_primary = 1
         )
         WHERE id = ?1
           AND EXISTS (SELECT 1 FROM user_zip_codes WHERE user_id = ?1 AND is_primary = 1)",
        [user_id],
    )?;
    Ok(())
}

impl SqliteStorage {
    /// Open a database at the given path.
    ///
    /// Creates the database and applies schema if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema fails.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_timeout(path, None)
    }

    /// Open a database with an optional busy timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema fails.
    pub fn open_with_timeout(path: &Path, timeout_ms: Option<u64>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_millis(timeout_ms.unwrap_or(5000)))?;
        apply_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Get a reference to the underlying connection (for read operations).
    #[must_use]
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Execute a mutation inside an IMMEDIATE transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if any step fails. The transaction is rolled back on error.
    pub fn mutate<F, R>(&mut self, op: &str, f: F) -> Result<R>
    where
        F: FnOnce(&Transaction) -> Result<R>,
    {
        let tx = self
            .conn
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

        let result = f(&tx)?;
        tx.commit()?;

        debug!(op, "Mutation committed");
        Ok(result)
    }

    // ==================
    // User Operations
    // ==================

    /// Register a user along with their "Primary" location context.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the Discord ID is already registered.
    pub fn create_user(
        &mut self,
        discord_id: &str,
        name: &str,
        primary_store_id: &str,
        zip_code: &str,
    ) -> Result<User> {
        let now = chrono::Utc::now().timestamp_millis();

        self.mutate("create_user", |tx| {
            let exists: bool = tx
                .prepare("SELECT 1 FROM users WHERE discord_id = ?1")?
                .exists([discord_id])?;
            if exists {
                return Err(Error::InvalidArgument(format!(
                    "User {discord_id} is already registered"
                )));
            }

            tx.execute(
                "INSERT INTO users (discord_id, name, primary_store_id, zip_code, notifications_enabled, created_at)
                 VALUES (?1, ?2, ?3, ?4, 1, ?5)",
                rusqlite::params![discord_id, name, primary_store_id, zip_code, now],
            )?;
            let id = tx.last_insert_rowid();

            tx.execute(
                "INSERT INTO user_zip_codes (user_id, zip_code, store_id, label, is_primary, created_at)
                 VALUES (?1, ?2, ?3, 'Primary', 1, ?4)",
                rusqlite::params![id, zip_code, primary_store_id, now],
            )?;

            Ok(User {
                id,
                discord_id: discord_id.to_string(),
                name: name.to_string(),
                primary_store_id: primary_store_id.to_string(),
                zip_code: zip_code.to_string(),
                notifications_enabled: true,
                created_at: now,
            })
        })
    }

    /// Get a user by Discord ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_user_by_discord_id(&self, discord_id: &str) -> Result<Option<User>> {
        let user = self
            .conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE discord_id = ?1"),
                [discord_id],
                map_user,
            )
            .optional()?;
        Ok(user)
    }

    /// Get a user by Discord ID, failing if absent.
    ///
    /// # Errors
    ///
    /// Returns `UserNotFound` if no such user exists.
    pub fn require_user(&self, discord_id: &str) -> Result<User> {
        self.get_user_by_discord_id(discord_id)?
            .ok_or_else(|| Error::UserNotFound {
                id: discord_id.to_string(),
            })
    }

    /// List all users ordered by registration.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_users(&self) -> Result<Vec<User>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY created_at, id"))?;
        let rows = stmt.query_map([], map_user)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    /// Delete a user and everything they own.
    ///
    /// # Errors
    ///
    /// Returns `UserNotFound` if no such user exists.
    pub fn delete_user(&mut self, discord_id: &str) -> Result<()> {
        self.mutate("delete_user", |tx| {
            let rows = tx.execute("DELETE FROM users WHERE discord_id = ?1", [discord_id])?;
            if rows == 0 {
                return Err(Error::UserNotFound {
                    id: discord_id.to_string(),
                });
            }
            Ok(())
        })
    }

    /// Enable or disable alert delivery for a user.
    ///
    /// # Errors
    ///
    /// Returns `UserNotFound` if no such user exists.
    pub fn set_notifications_enabled(&mut self, discord_id: &str, enabled: bool) -> Result<()> {
        let rows = self.conn.execute(
            "UPDATE users SET notifications_enabled = ?1 WHERE discord_id = ?2",
            rusqlite::params![enabled, discord_id],
        )?;
        if rows == 0 {
            return Err(Error::UserNotFound {
                id: discord_id.to_string(),
            });
        }
        Ok(())
    }

    // ==================
    // Location Operations
    // ==================

    /// List a user's location contexts, primary first, then by creation.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_location_contexts(&self, user_id: i64) -> Result<Vec<LocationContext>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {LOCATION_COLUMNS} FROM user_zip_codes
             WHERE user_id = ?1
             ORDER BY is_primary DESC, created_at ASC, id ASC"
        ))?;
        let rows = stmt.query_map([user_id], map_location)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    /// Add a location context. The first context, or one added with
    /// `primary`, becomes the only primary.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the ZIP code is already configured.
    pub fn add_location_context(
        &mut self,
        user_id: i64,
        zip_code: &str,
        store_id: Option<&str>,
        label: &str,
        primary: bool,
    ) -> Result<LocationContext> {
        let now = chrono::Utc::now().timestamp_millis();

        self.mutate("add_location_context", |tx| {
            let exists = tx
                .prepare("SELECT 1 FROM user_zip_codes WHERE user_id = ?1 AND zip_code = ?2")?
                .exists(rusqlite::params![user_id, zip_code])?;
            if exists {
                return Err(Error::InvalidArgument(format!(
                    "ZIP code {zip_code} is already configured"
                )));
            }

            let count: i64 = tx.query_row(
                "SELECT COUNT(*) FROM user_zip_codes WHERE user_id = ?1",
                [user_id],
                |row| row.get(0),
            )?;
            let make_primary = primary || count == 0;

            if make_primary {
                tx.execute(
                    "UPDATE user_zip_codes SET is_primary = 0 WHERE user_id = ?1",
                    [user_id],
                )?;
            }

            tx.execute(
                "INSERT INTO user_zip_codes (user_id, zip_code, store_id, label, is_primary, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![user_id, zip_code, store_id, label, make_primary, now],
            )?;
            let id = tx.last_insert_rowid();

            if make_primary {
                mirror_primary_zip(tx, user_id)?;
            }

            Ok(LocationContext {
                id: Some(id),
                zip_code: zip_code.to_string(),
                store_id: store_id.map(str::to_string),
                label: label.to_string(),
                is_primary: make_primary,
            })
        })
    }

    /// Remove a location context. Removing the primary promotes the oldest
    /// remaining context; removing the last one is refused.
    ///
    /// # Errors
    ///
    /// Returns `LocationNotFound` or `InvalidArgument` for the last context.
    pub fn remove_location_context(&mut self, user_id: i64, zip_code: &str) -> Result<()> {
        self.mutate("remove_location_context", |tx| {
            let row: Option<(i64, bool)> = tx
                .query_row(
                    "SELECT id, is_primary FROM user_zip_codes WHERE user_id = ?1 AND zip_code = ?2",
                    rusqlite::params![user_id, zip_code],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            let Some((id, was_primary)) = row else {
                return Err(Error::LocationNotFound {
                    zip_code: zip_code.to_string(),
                });
            };

            let count: i64 = tx.query_row(
                "SELECT COUNT(*) FROM user_zip_codes WHERE user_id = ?1",
                [user_id],
                |row| row.get(0),
            )?;
            if count <= 1 {
                return Err(Error::InvalidArgument(
                    "Cannot remove the only configured ZIP code".into(),
                ));
            }

            tx.execute("DELETE FROM user_zip_codes WHERE id = ?1", [id])?;

            if was_primary {
                tx.execute(
                    "UPDATE user_zip_codes SET is_primary = 1 WHERE id = (
                         SELECT id FROM user_zip_codes WHERE user_id = ?1
                         ORDER BY created_at ASC, id ASC LIMIT 1
                     )",
                    [user_id],
                )?;
                mirror_primary_zip(tx, user_id)?;
            }

            Ok(())
        })
    }

    /// Make an existing location context the primary one.
    ///
    /// # Errors
    ///
    /// Returns `LocationNotFound` if the ZIP code is not configured.
    pub fn set_primary_location(&mut self, user_id: i64, zip_code: &str) -> Result<()> {
        self.mutate("set_primary_location", |tx| {
            let id: Option<i64> = tx
                .query_row(
                    "SELECT id FROM user_zip_codes WHERE user_id = ?1 AND zip_code = ?2",
                    rusqlite::params![user_id, zip_code],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(id) = id else {
                return Err(Error::LocationNotFound {
                    zip_code: zip_code.to_string(),
                });
            };

            tx.execute(
                "UPDATE user_zip_codes SET is_primary = (id = ?2) WHERE user_id = ?1",
                rusqlite::params![user_id, id],
            )?;
            mirror_primary_zip(tx, user_id)
        })
    }

    // ==================
    // Pickup Store Operations
    // ==================

    /// List a user's pickup stores in the order they were added.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_pickup_stores(&self, user_id: i64) -> Result<Vec<PickupStore>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PICKUP_COLUMNS} FROM user_stores WHERE user_id = ?1 ORDER BY created_at, id"
        ))?;
        let rows = stmt.query_map([user_id], map_pickup)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    /// Add a pickup store.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the store is already on the list.
    pub fn add_pickup_store(
        &mut self,
        user_id: i64,
        store_id: &str,
        zip_code: &str,
    ) -> Result<PickupStore> {
        let now = chrono::Utc::now().timestamp_millis();
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO user_stores (user_id, store_id, zip_code, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![user_id, store_id, zip_code, now],
        )?;
        if inserted == 0 {
            return Err(Error::InvalidArgument(format!(
                "Store {store_id} is already on your pickup list"
            )));
        }
        Ok(PickupStore {
            id: self.conn.last_insert_rowid(),
            user_id,
            store_id: store_id.to_string(),
            zip_code: zip_code.to_string(),
            created_at: now,
        })
    }

    /// Remove a pickup store. Returns whether a row was deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn remove_pickup_store(&mut self, user_id: i64, store_id: &str) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM user_stores WHERE user_id = ?1 AND store_id = ?2",
            rusqlite::params![user_id, store_id],
        )?;
        Ok(rows > 0)
    }

    // ==================
    // Product & Tracking Operations
    // ==================

    /// Get a product by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_product(&self, id: i64) -> Result<Option<Product>> {
        let product = self
            .conn
            .query_row(
                &format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ?1"),
                [id],
                |row| map_product(row, 0),
            )
            .optional()?;
        Ok(product)
    }

    /// Store a product name if the product does not have one yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn set_product_name_if_missing(&mut self, product_id: i64, name: &str) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE products SET name = ?1 WHERE id = ?2 AND (name IS NULL OR name = '')",
            rusqlite::params![name, product_id],
        )?;
        Ok(rows > 0)
    }

    /// Start tracking a product for a user. Re-adding an existing request
    /// reactivates it with the new threshold.
    ///
    /// # Errors
    ///
    /// Returns an error if the writes fail.
    pub fn track_product(
        &mut self,
        user_id: i64,
        url: &str,
        retailer: Retailer,
        name: Option<&str>,
        threshold: Money,
    ) -> Result<(TrackingRequest, Product)> {
        let now = chrono::Utc::now().timestamp_millis();

        self.mutate("track_product", |tx| {
            tx.execute(
                "INSERT OR IGNORE INTO products (url, name, retailer, created_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![url, name, retailer.as_str(), now],
            )?;
            let product = tx.query_row(
                &format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE url = ?1"),
                [url],
                |row| map_product(row, 0),
            )?;

            tx.execute(
                "INSERT INTO tracked_products (user_id, product_id, threshold_cents, active, created_at)
                 VALUES (?1, ?2, ?3, 1, ?4)
                 ON CONFLICT (user_id, product_id)
                 DO UPDATE SET threshold_cents = excluded.threshold_cents, active = 1",
                rusqlite::params![user_id, product.id, threshold, now],
            )?;
            let tracking = tx.query_row(
                &format!(
                    "SELECT {TRACKING_COLUMNS} FROM tracked_products WHERE user_id = ?1 AND product_id = ?2"
                ),
                rusqlite::params![user_id, product.id],
                |row| map_tracking(row, 0),
            )?;

            Ok((tracking, product))
        })
    }

    /// List a user's active tracking requests with their products.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_tracking_for_user(&self, user_id: i64) -> Result<Vec<(TrackingRequest, Product)>> {
        let mut stmt = self.conn.prepare(
            "SELECT t.id, t.user_id, t.product_id, t.threshold_cents, t.active, t.created_at,
                    p.id, p.url, p.name, p.retailer, p.created_at
             FROM tracked_products t
             JOIN products p ON p.id = t.product_id
             WHERE t.user_id = ?1 AND t.active = 1
             ORDER BY t.created_at, t.id",
        )?;
        let rows = stmt.query_map([user_id], |row| Ok((map_tracking(row, 0)?, map_product(row, 6)?)))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    /// Deactivate a tracking request owned by the user.
    ///
    /// # Errors
    ///
    /// Returns `TrackingNotFound` if the request is absent, inactive or
    /// owned by someone else.
    pub fn deactivate_tracking(&mut self, user_id: i64, tracking_id: i64) -> Result<()> {
        let rows = self.conn.execute(
            "UPDATE tracked_products SET active = 0 WHERE id = ?1 AND user_id = ?2 AND active = 1",
            rusqlite::params![tracking_id, user_id],
        )?;
        if rows == 0 {
            return Err(Error::TrackingNotFound { id: tracking_id });
        }
        Ok(())
    }

    /// Load every active tracking request whose owner has notifications
    /// enabled, joined with the owner and product.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_active_tracking(&self) -> Result<Vec<ActiveTracking>> {
        let mut stmt = self.conn.prepare(
            "SELECT t.id, t.user_id, t.product_id, t.threshold_cents, t.active, t.created_at,
                    u.id, u.discord_id, u.name, u.primary_store_id, u.zip_code,
                    u.notifications_enabled, u.created_at,
                    p.id, p.url, p.name, p.retailer, p.created_at
             FROM tracked_products t
             JOIN users u ON u.id = t.user_id
             JOIN products p ON p.id = t.product_id
             WHERE t.active = 1 AND u.notifications_enabled = 1
             ORDER BY t.id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(ActiveTracking {
                tracking: map_tracking(row, 0)?,
                user: User {
                    id: row.get(6)?,
                    discord_id: row.get(7)?,
                    name: row.get(8)?,
                    primary_store_id: row.get(9)?,
                    zip_code: row.get(10)?,
                    notifications_enabled: row.get(11)?,
                    created_at: row.get(12)?,
                },
                product: map_product(row, 13)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    // ==================
    // Price History
    // ==================

    /// Record one priced observation.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn append_price_history(
        &mut self,
        product_id: i64,
        store_key: &str,
        price: Money,
        shipping_available: bool,
        pickup_available: bool,
        checked_at: i64,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO price_history (product_id, store_key, price_cents, shipping_available, pickup_available, checked_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![product_id, store_key, price, shipping_available, pickup_available, checked_at],
        )?;
        Ok(())
    }

    /// Most recent price observations for a product.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_price_history(&self, product_id: i64, limit: u32) -> Result<Vec<PriceHistoryEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, product_id, store_key, price_cents, shipping_available, pickup_available, checked_at
             FROM price_history WHERE product_id = ?1
             ORDER BY checked_at DESC, id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(rusqlite::params![product_id, limit], |row| {
            Ok(PriceHistoryEntry {
                id: row.get(0)?,
                product_id: row.get(1)?,
                store_key: row.get(2)?,
                price: row.get(3)?,
                shipping_available: row.get(4)?,
                pickup_available: row.get(5)?,
                observed_at: row.get(6)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    // ==================
    // Alert State
    // ==================

    /// Get the dedup state for an alert key.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_alert_state(&self, key: &AlertKey) -> Result<Option<AlertState>> {
        read_alert_state(&self.conn, key)
    }

    /// Insert or replace the dedup state for its key.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn upsert_alert_state(&mut self, state: &AlertState) -> Result<()> {
        write_alert_state(&self.conn, state)
    }

    /// Delete the dedup state for a key. Returns whether one existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn delete_alert_state(&mut self, key: &AlertKey) -> Result<bool> {
        remove_alert_state(&self.conn, key)
    }

    /// Read, decide and write the alert state for `key` in one transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if any statement fails; the state is then unchanged.
    pub fn apply_alert_decision(
        &mut self,
        key: &AlertKey,
        price: Money,
        threshold: Money,
        now: i64,
        cooldown: Duration,
    ) -> Result<AlertDecision> {
        self.mutate("apply_alert_decision", |tx| {
            let state = read_alert_state(tx, key)?;
            let decision = decide(state.as_ref(), price, threshold, now, cooldown);

            match decision {
                AlertDecision::Reset => {
                    remove_alert_state(tx, key)?;
                }
                AlertDecision::Send => write_alert_state(
                    tx,
                    &AlertState {
                        key: key.clone(),
                        last_alerted_price: price,
                        last_alerted_at: now,
                    },
                )?,
                AlertDecision::Suppress => {}
            }

            Ok(decision)
        })
    }

    /// Record a delivered alert.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn append_alert_history(&mut self, key: &AlertKey, price: Money, sent_at: i64) -> Result<()> {
        self.conn.execute(
            "INSERT INTO alert_history (user_id, product_id, store_key, alert_type, price_cents, sent_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                key.user_id,
                key.product_id,
                key.store_key,
                key.alert_type.as_str(),
                price,
                sent_at
            ],
        )?;
        Ok(())
    }

    /// Delivered alerts for a user, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_alert_history(&self, user_id: i64, limit: u32) -> Result<Vec<AlertHistoryEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, product_id, store_key, alert_type, price_cents, sent_at
             FROM alert_history WHERE user_id = ?1
             ORDER BY sent_at DESC, id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(rusqlite::params![user_id, limit], |row| {
            Ok(AlertHistoryEntry {
                id: row.get(0)?,
                user_id: row.get(1)?,
                product_id: row.get(2)?,
                store_key: row.get(3)?,
                alert_type: row.get::<_, AlertType>(4)?,
                price: row.get(5)?,
                sent_at: row.get(6)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    // ==================
    // Run Lease
    // ==================

    /// Take the run lease for `holder` unless another holder has an
    /// unexpired one. Returns the competing lease's start time on refusal.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails.
    pub fn try_acquire_run_lease(&mut self, holder: &str, now: i64, ttl: Duration) -> Result<Option<i64>> {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        self.mutate("try_acquire_run_lease", |tx| {
            let current: Option<(String, i64, i64)> = tx
                .query_row(
                    "SELECT holder, acquired_at, expires_at FROM run_lease WHERE id = 1",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()?;

            if let Some((other, acquired_at, expires_at)) = current {
                if other != holder && expires_at > now {
                    return Ok(Some(acquired_at));
                }
            }

            tx.execute(
                "INSERT INTO run_lease (id, holder, acquired_at, expires_at) VALUES (1, ?1, ?2, ?3)
                 ON CONFLICT (id) DO UPDATE SET holder = excluded.holder,
                                                acquired_at = excluded.acquired_at,
                                                expires_at = excluded.expires_at",
                rusqlite::params![holder, now, now.saturating_add(ttl_ms)],
            )?;
            Ok(None)
        })
    }

    /// Drop the run lease if `holder` owns it.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn release_run_lease(&mut self, holder: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM run_lease WHERE id = 1 AND holder = ?1", [holder])?;
        Ok(())
    }

    // ==================
    // Check Runs
    // ==================

    /// Persist a finished run.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn record_check_run(&mut self, run: &NewCheckRun) -> Result<CheckRun> {
        let duration_ms = (run.finished_at - run.started_at).max(0);
        self.conn.execute(
            "INSERT INTO check_runs (started_at, finished_at, duration_ms, checks_succeeded, checks_failed, alerts_sent, peak_concurrency)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                run.started_at,
                run.finished_at,
                duration_ms,
                to_i64(run.checks_succeeded),
                to_i64(run.checks_failed),
                to_i64(run.alerts_sent),
                to_i64(run.peak_concurrency),
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        info!(run_id = id, duration_ms, "Check run recorded");

        Ok(CheckRun {
            id,
            started_at: run.started_at,
            finished_at: run.finished_at,
            duration_ms,
            checks_succeeded: run.checks_succeeded,
            checks_failed: run.checks_failed,
            alerts_sent: run.alerts_sent,
            peak_concurrency: run.peak_concurrency,
        })
    }

    /// The most recently finished run.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn last_check_run(&self) -> Result<Option<CheckRun>> {
        let run = self
            .conn
            .query_row(
                "SELECT id, started_at, finished_at, duration_ms, checks_succeeded, checks_failed, alerts_sent, peak_concurrency
                 FROM check_runs ORDER BY finished_at DESC, id DESC LIMIT 1",
                [],
                |row| {
                    Ok(CheckRun {
                        id: row.get(0)?,
                        started_at: row.get(1)?,
                        finished_at: row.get(2)?,
                        duration_ms: row.get(3)?,
                        checks_succeeded: to_u64(row.get(4)?),
                        checks_failed: to_u64(row.get(5)?),
                        alerts_sent: to_u64(row.get(6)?),
                        peak_concurrency: to_u64(row.get(7)?),
                    })
                },
            )
            .optional()?;
        Ok(run)
    }

    /// Row counts across the main tables.
    ///
    /// # Errors
    ///
    /// Returns an error if any count query fails.
    pub fn database_counts(&self) -> Result<DatabaseCounts> {
        let count = |sql: &str| -> Result<usize> {
            let n: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
            Ok(usize::try_from(n).unwrap_or(0))
        };

        Ok(DatabaseCounts {
            users: count("SELECT COUNT(*) FROM users")?,
            products: count("SELECT COUNT(*) FROM products")?,
            active_tracking: count("SELECT COUNT(*) FROM tracked_products WHERE active = 1")?,
            price_observations: count("SELECT COUNT(*) FROM price_history")?,
            alerts_sent: count("SELECT COUNT(*) FROM alert_history")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR_MS: i64 = 3_600_000;
    const DAY: Duration = Duration::from_secs(24 * 3600);

    fn storage_with_user() -> (SqliteStorage, User) {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let user = storage.create_user("1001", "alice", "5678", "10001").unwrap();
        (storage, user)
    }

    fn primaries(storage: &SqliteStorage, user_id: i64) -> Vec<String> {
        storage
            .list_location_contexts(user_id)
            .unwrap()
            .into_iter()
            .filter(|c| c.is_primary)
            .map(|c| c.zip_code)
            .collect()
    }

    #[test]
    fn test_create_user_creates_primary_context() {
        let (storage, user) = storage_with_user();
        let contexts = storage.list_location_contexts(user.id).unwrap();
        assert_eq!(contexts.len(), 1);
        assert_eq!(contexts[0].label, "Primary");
        assert!(contexts[0].is_primary);
        assert_eq!(contexts[0].store_id.as_deref(), Some("5678"));
    }

    #[test]
    fn test_duplicate_user_rejected() {
        let (mut storage, _) = storage_with_user();
        let err = storage.create_user("1001", "again", "1", "10001").unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_add_primary_location_demotes_others() {
        let (mut storage, user) = storage_with_user();
        storage
            .add_location_context(user.id, "90210", None, "Work", false)
            .unwrap();
        assert_eq!(primaries(&storage, user.id), vec!["10001"]);

        storage
            .add_location_context(user.id, "60601", Some("2280"), "Cabin", true)
            .unwrap();
        assert_eq!(primaries(&storage, user.id), vec!["60601"]);

        let mirrored = storage.require_user("1001").unwrap();
        assert_eq!(mirrored.zip_code, "60601");
    }

    #[test]
    fn test_remove_primary_promotes_oldest() {
        let (mut storage, user) = storage_with_user();
        storage
            .add_location_context(user.id, "90210", None, "Work", false)
            .unwrap();
        storage
            .add_location_context(user.id, "60601", None, "Cabin", false)
            .unwrap();

        storage.remove_location_context(user.id, "10001").unwrap();

        assert_eq!(primaries(&storage, user.id), vec!["90210"]);
        assert_eq!(storage.require_user("1001").unwrap().zip_code, "90210");
    }

    #[test]
    fn test_remove_last_location_refused() {
        let (mut storage, user) = storage_with_user();
        let err = storage.remove_location_context(user.id, "10001").unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert_eq!(storage.list_location_contexts(user.id).unwrap().len(), 1);

        let err = storage.remove_location_context(user.id, "99999").unwrap_err();
        assert!(matches!(err, Error::LocationNotFound { .. }));
    }

    #[test]
    fn test_set_primary_location() {
        let (mut storage, user) = storage_with_user();
        storage
            .add_location_context(user.id, "90210", None, "Work", false)
            .unwrap();
        storage.set_primary_location(user.id, "90210").unwrap();

        let contexts = storage.list_location_contexts(user.id).unwrap();
        assert_eq!(contexts[0].zip_code, "90210");
        assert!(contexts[0].is_primary);
        assert!(!contexts[1].is_primary);
    }

    #[test]
    fn test_pickup_store_unique_per_user() {
        let (mut storage, user) = storage_with_user();
        storage.add_pickup_store(user.id, "2280", "72712").unwrap();
        assert!(storage.add_pickup_store(user.id, "2280", "72712").is_err());
        assert_eq!(storage.list_pickup_stores(user.id).unwrap().len(), 1);
        assert!(storage.remove_pickup_store(user.id, "2280").unwrap());
        assert!(!storage.remove_pickup_store(user.id, "2280").unwrap());
    }

    #[test]
    fn test_track_reactivates_with_new_threshold() {
        let (mut storage, user) = storage_with_user();
        let url = "https://www.walmart.com/ip/thing/123";
        let (first, _) = storage
            .track_product(user.id, url, Retailer::Walmart, None, Money::from_cents(5000))
            .unwrap();
        storage.deactivate_tracking(user.id, first.id).unwrap();
        assert!(storage.list_tracking_for_user(user.id).unwrap().is_empty());

        let (again, _) = storage
            .track_product(user.id, url, Retailer::Walmart, None, Money::from_cents(4000))
            .unwrap();
        assert_eq!(again.id, first.id);
        assert!(again.active);
        assert_eq!(again.threshold, Money::from_cents(4000));
    }

    #[test]
    fn test_deactivate_other_users_tracking_is_not_found() {
        let (mut storage, user) = storage_with_user();
        let other = storage.create_user("2002", "bob", "1", "20002").unwrap();
        let (tracking, _) = storage
            .track_product(user.id, "https://www.target.com/p/x/-/A-1", Retailer::Target, None, Money::from_cents(100))
            .unwrap();
        let err = storage.deactivate_tracking(other.id, tracking.id).unwrap_err();
        assert!(matches!(err, Error::TrackingNotFound { .. }));
    }

    #[test]
    fn test_active_tracking_skips_muted_users() {
        let (mut storage, user) = storage_with_user();
        storage
            .track_product(user.id, "https://www.walmart.com/ip/a/1", Retailer::Walmart, None, Money::from_cents(100))
            .unwrap();
        assert_eq!(storage.list_active_tracking().unwrap().len(), 1);

        storage.set_notifications_enabled("1001", false).unwrap();
        assert!(storage.list_active_tracking().unwrap().is_empty());
    }

    #[test]
    fn test_apply_alert_decision_lifecycle() {
        let (mut storage, user) = storage_with_user();
        let (tracking, product) = storage
            .track_product(user.id, "https://www.walmart.com/ip/a/1", Retailer::Walmart, None, Money::from_cents(5000))
            .unwrap();
        let key = AlertKey {
            user_id: user.id,
            product_id: product.id,
            store_key: "5678".into(),
            alert_type: AlertType::Shipping,
        };
        let threshold = tracking.threshold;

        let d = storage
            .apply_alert_decision(&key, Money::from_cents(4500), threshold, 0, DAY)
            .unwrap();
        assert_eq!(d, AlertDecision::Send);
        assert_eq!(
            storage.get_alert_state(&key).unwrap().unwrap().last_alerted_price,
            Money::from_cents(4500)
        );

        let d = storage
            .apply_alert_decision(&key, Money::from_cents(4500), threshold, HOUR_MS, DAY)
            .unwrap();
        assert_eq!(d, AlertDecision::Suppress);

        let d = storage
            .apply_alert_decision(&key, Money::from_cents(6000), threshold, 2 * HOUR_MS, DAY)
            .unwrap();
        assert_eq!(d, AlertDecision::Reset);
        assert!(storage.get_alert_state(&key).unwrap().is_none());
    }

    #[test]
    fn test_alert_state_upsert_and_delete() {
        let (mut storage, user) = storage_with_user();
        let (_, product) = storage
            .track_product(user.id, "https://www.walmart.com/ip/a/1", Retailer::Walmart, None, Money::from_cents(5000))
            .unwrap();
        let key = AlertKey {
            user_id: user.id,
            product_id: product.id,
            store_key: "2280".into(),
            alert_type: AlertType::Pickup,
        };
        let mut state = AlertState {
            key: key.clone(),
            last_alerted_price: Money::from_cents(4500),
            last_alerted_at: 10,
        };

        storage.upsert_alert_state(&state).unwrap();
        state.last_alerted_price = Money::from_cents(3900);
        state.last_alerted_at = 20;
        storage.upsert_alert_state(&state).unwrap();

        let stored = storage.get_alert_state(&key).unwrap().unwrap();
        assert_eq!(stored.last_alerted_price, Money::from_cents(3900));
        assert_eq!(stored.last_alerted_at, 20);

        // Same product, other channel: independent key.
        let shipping = AlertKey {
            alert_type: AlertType::Shipping,
            ..key.clone()
        };
        assert!(storage.get_alert_state(&shipping).unwrap().is_none());

        assert!(storage.delete_alert_state(&key).unwrap());
        assert!(!storage.delete_alert_state(&key).unwrap());
        assert!(storage.get_alert_state(&key).unwrap().is_none());
    }

    #[test]
    fn test_run_lease_excludes_other_holders_until_expiry() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let ttl = Duration::from_secs(60);

        assert_eq!(storage.try_acquire_run_lease("daemon", 1_000, ttl).unwrap(), None);
        assert_eq!(storage.try_acquire_run_lease("daemon", 2_000, ttl).unwrap(), None);
        assert_eq!(storage.try_acquire_run_lease("manual", 3_000, ttl).unwrap(), Some(2_000));

        // A crashed holder's lease lapses.
        assert_eq!(storage.try_acquire_run_lease("manual", 62_001, ttl).unwrap(), None);

        storage.release_run_lease("daemon").unwrap();
        assert_eq!(storage.try_acquire_run_lease("daemon", 62_002, ttl).unwrap(), Some(62_001));

        storage.release_run_lease("manual").unwrap();
        assert_eq!(storage.try_acquire_run_lease("daemon", 62_003, ttl).unwrap(), None);
    }

    #[test]
    fn test_check_run_round_trip() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        assert!(storage.last_check_run().unwrap().is_none());

        storage
            .record_check_run(&NewCheckRun {
                started_at: 1_000,
                finished_at: 4_500,
                checks_succeeded: 7,
                checks_failed: 2,
                alerts_sent: 1,
                peak_concurrency: 3,
            })
            .unwrap();

        let run = storage.last_check_run().unwrap().unwrap();
        assert_eq!(run.duration_ms, 3_500);
        assert_eq!(run.checks_failed, 2);
        assert_eq!(run.peak_concurrency, 3);
    }
}
