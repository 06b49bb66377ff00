//! Results of probing a product page at one location.

use crate::error::{Error, ProbeError, Result};
use crate::model::Money;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Fulfillment channel an alert is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertType {
    Shipping,
    Pickup,
}

impl AlertType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Shipping => "shipping",
            Self::Pickup => "pickup",
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "shipping" => Ok(Self::Shipping),
            "pickup" => Ok(Self::Pickup),
            other => Err(Error::InvalidArgument(format!("Unknown alert type: {other}"))),
        }
    }
}

impl FromSql for AlertType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: Error| FromSqlError::Other(Box::new(e)))
    }
}

/// What a probe saw on the product page.
///
/// Probes never fail outright: a failed fetch yields an observation with
/// `error` set and no price.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Observation {
    pub price: Option<Money>,
    pub name: Option<String>,
    pub shipping_available: bool,
    pub pickup_available: bool,
    /// Product-level stock flag as reported by the retailer.
    pub in_stock: bool,
    pub error: Option<ProbeError>,
}

impl Observation {
    #[must_use]
    pub fn failed(error: ProbeError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    /// A check succeeded when it produced a price and no error.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.error.is_none() && self.price.is_some()
    }

    #[must_use]
    pub const fn available_for(&self, alert_type: AlertType) -> bool {
        match alert_type {
            AlertType::Shipping => self.shipping_available,
            AlertType::Pickup => self.pickup_available,
        }
    }
}
