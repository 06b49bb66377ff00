//! Alert bookkeeping and recorded history.

use crate::model::{AlertType, Money};
use serde::{Deserialize, Serialize};

/// Identity of one deduplicated alert stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AlertKey {
    pub user_id: i64,
    pub product_id: i64,
    pub store_key: String,
    pub alert_type: AlertType,
}

/// Last alerted price for an [`AlertKey`]. Absent when nothing has been
/// sent since the price was last above threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertState {
    pub key: AlertKey,
    pub last_alerted_price: Money,
    pub last_alerted_at: i64,
}

/// A delivered alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertHistoryEntry {
    pub id: i64,
    pub user_id: i64,
    pub product_id: i64,
    pub store_key: String,
    pub alert_type: AlertType,
    pub price: Money,
    pub sent_at: i64,
}

/// One successful price observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceHistoryEntry {
    pub id: i64,
    pub product_id: i64,
    pub store_key: String,
    pub price: Money,
    pub shipping_available: bool,
    pub pickup_available: bool,
    pub observed_at: i64,
}

/// Persisted summary of one orchestrator run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckRun {
    pub id: i64,
    pub started_at: i64,
    pub finished_at: i64,
    pub duration_ms: i64,
    pub checks_succeeded: u64,
    pub checks_failed: u64,
    pub alerts_sent: u64,
    pub peak_concurrency: u64,
}
