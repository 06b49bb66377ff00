//! Location resolution.
//!
//! Expands a user into the concrete places a product should be checked
//! from: shipping contexts for every retailer and, for Walmart, the user's
//! pickup stores.

use crate::error::Result;
use crate::model::{LocationContext, PickupStore, Retailer, User};
use crate::storage::SqliteStorage;

/// Where one user's products are checked from at one retailer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedLocations {
    /// Primary first, then in creation order. Never empty.
    pub shipping: Vec<LocationContext>,
    /// Empty for retailers without pickup.
    pub pickup: Vec<PickupStore>,
}

/// Resolve locations for `user` at `retailer`. Read-only.
///
/// # Errors
///
/// Returns an error if the storage queries fail.
pub fn resolve(storage: &SqliteStorage, user: &User, retailer: Retailer) -> Result<ResolvedLocations> {
    let mut shipping = storage.list_location_contexts(user.id)?;
    if shipping.is_empty() {
        shipping.push(LocationContext::synthetic_primary(user));
    }

    let pickup = if retailer.supports_pickup() {
        storage.list_pickup_stores(user.id)?
    } else {
        Vec::new()
    };

    Ok(ResolvedLocations { shipping, pickup })
}
