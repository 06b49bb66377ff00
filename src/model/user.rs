//! Users and the locations prices are checked from.

use crate::model::Retailer;
use serde::{Deserialize, Serialize};

/// A registered user. `discord_id` is the direct-message recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub discord_id: String,
    pub name: String,
    pub primary_store_id: String,
    /// Mirrors the user's primary location context.
    pub zip_code: String,
    pub notifications_enabled: bool,
    pub created_at: i64,
}

/// A ZIP code (and optionally a store) from which shipping prices are checked.
///
/// Contexts with `id == None` are synthesized from the user record and were
/// never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationContext {
    pub id: Option<i64>,
    pub zip_code: String,
    pub store_id: Option<String>,
    pub label: String,
    pub is_primary: bool,
}

impl LocationContext {
    /// The fallback context built from the user's own ZIP and store.
    #[must_use]
    pub fn synthetic_primary(user: &User) -> Self {
        Self {
            id: None,
            zip_code: user.zip_code.clone(),
            store_id: Some(user.primary_store_id.clone()).filter(|s| !s.is_empty()),
            label: "Primary".to_string(),
            is_primary: true,
        }
    }

    /// Key distinguishing this location in price history and alert state.
    #[must_use]
    pub fn store_key(&self, retailer: Retailer) -> String {
        match retailer {
            Retailer::Walmart => self
                .store_id
                .clone()
                .unwrap_or_else(|| format!("online-{}", self.zip_code)),
            Retailer::Target => format!("target-{}", self.zip_code),
        }
    }
}

/// A Walmart store the user wants pickup alerts for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PickupStore {
    pub id: i64,
    pub user_id: i64,
    pub store_id: String,
    pub zip_code: String,
    pub created_at: i64,
}

impl PickupStore {
    #[must_use]
    pub fn store_key(&self) -> String {
        self.store_id.clone()
    }
}
