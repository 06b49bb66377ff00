//! Products, retailers and tracking requests.

use crate::error::{Error, Result};
use crate::model::{Money, User};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Retailer backends a product can be tracked at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Retailer {
    /// Shipping and in-store pickup.
    Walmart,
    /// Shipping only.
    Target,
}

impl Retailer {
    pub const ALL: [Self; 2] = [Self::Walmart, Self::Target];

    /// Get the string representation for storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Walmart => "walmart",
            Self::Target => "target",
        }
    }

    #[must_use]
    pub const fn display_name(&self) -> &'static str {
        match self {
            Self::Walmart => "Walmart",
            Self::Target => "Target",
        }
    }

    /// Whether pickup checks are performed for this retailer.
    #[must_use]
    pub const fn supports_pickup(&self) -> bool {
        matches!(self, Self::Walmart)
    }
}

impl fmt::Display for Retailer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Retailer {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "walmart" => Ok(Self::Walmart),
            "target" => Ok(Self::Target),
            other => Err(Error::InvalidArgument(format!("Unknown retailer: {other}"))),
        }
    }
}

impl FromSql for Retailer {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        s.parse().map_err(|e: Error| FromSqlError::Other(Box::new(e)))
    }
}

/// A product page being tracked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub url: String,
    /// Filled in from the first probe that reports a product name.
    pub name: Option<String>,
    pub retailer: Retailer,
    pub created_at: i64,
}

impl Product {
    /// Name for messages, falling back to the URL slug.
    #[must_use]
    pub fn display_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        ProductUrl::parse(&self.url).map_or_else(
            |_| format!("{} Product", self.retailer.display_name()),
            |u| u.slug_name,
        )
    }
}

/// A user's subscription to alerts for one product at one threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingRequest {
    pub id: i64,
    pub user_id: i64,
    pub product_id: i64,
    pub threshold: Money,
    pub active: bool,
    pub created_at: i64,
}

/// An active tracking request joined with its owner and product.
#[derive(Debug, Clone)]
pub struct ActiveTracking {
    pub tracking: TrackingRequest,
    pub user: User,
    pub product: Product,
}

/// A validated retailer product URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductUrl {
    pub url: String,
    pub retailer: Retailer,
    /// Walmart item id or Target DPCI/TCIN.
    pub product_id: String,
    /// Human-readable name derived from the URL slug.
    pub slug_name: String,
}

impl ProductUrl {
    /// Validate a product URL and extract its retailer and product id.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for unsupported hosts or malformed paths.
    pub fn parse(input: &str) -> Result<Self> {
        let parsed = reqwest::Url::parse(input.trim())
            .map_err(|e| Error::InvalidArgument(format!("Invalid URL: {e}")))?;
        let host = parsed.host_str().unwrap_or_default().to_lowercase();
        let segments: Vec<&str> = parsed
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect())
            .unwrap_or_default();

        if host.ends_with("walmart.com") {
            // /ip/<slug>/<digits>
            let idx = segments
                .iter()
                .position(|s| *s == "ip")
                .ok_or_else(|| Error::InvalidArgument("Walmart URL must contain '/ip/'".into()))?;
            let (slug, id) = match (segments.get(idx + 1), segments.get(idx + 2)) {
                (Some(slug), Some(id)) => (*slug, leading_digits(id)),
                _ => ("", String::new()),
            };
            if id.is_empty() {
                return Err(Error::InvalidArgument(
                    "Could not extract Walmart product ID from URL".into(),
                ));
            }
            return Ok(Self {
                url: input.trim().to_string(),
                retailer: Retailer::Walmart,
                product_id: id,
                slug_name: title_case_slug(slug),
            });
        }

        if host.ends_with("target.com") {
            // /p/<slug>/-/A-<digits>
            let p_idx = segments.iter().position(|s| *s == "p");
            let dash_idx = segments.iter().position(|s| *s == "-");
            let id = segments
                .iter()
                .find_map(|s| s.strip_prefix("A-"))
                .map(leading_digits)
                .unwrap_or_default();
            if p_idx.is_none() || dash_idx.is_none() || id.is_empty() {
                return Err(Error::InvalidArgument(
                    "Target URL must contain '/p/' and '/-/A-<id>'".into(),
                ));
            }
            let slug = p_idx
                .and_then(|i| segments.get(i + 1))
                .filter(|s| **s != "-")
                .copied()
                .unwrap_or_default();
            return Ok(Self {
                url: input.trim().to_string(),
                retailer: Retailer::Target,
                product_id: id,
                slug_name: title_case_slug(slug),
            });
        }

        Err(Error::InvalidArgument(
            "URL must be from walmart.com or target.com".into(),
        ))
    }
}

fn leading_digits(s: &str) -> String {
    s.chars().take_while(char::is_ascii_digit).collect()
}

fn title_case_slug(slug: &str) -> String {
    slug.split('-')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
            })
        })
        .collect::<Vec<_>>()
        .join(" ")
}
