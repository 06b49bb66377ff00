//! Data models for pricewatch.
//!
//! This module contains all domain models:
//! - Money
//! - User, LocationContext, PickupStore
//! - Product, TrackingRequest
//! - Observation
//! - AlertState, AlertHistoryEntry, PriceHistoryEntry, CheckRun

pub mod alert;
pub mod money;
pub mod observation;
pub mod product;
pub mod user;

pub use alert::{AlertHistoryEntry, AlertKey, AlertState, CheckRun, PriceHistoryEntry};
pub use money::Money;
pub use observation::{AlertType, Observation};
pub use product::{ActiveTracking, Product, ProductUrl, Retailer, TrackingRequest};
pub use user::{LocationContext, PickupStore, User};
