//! Target product page probe.
//!
//! The delivery ZIP is passed in the `GuestLocation` cookie. Price and stock
//! come from the schema.org `Product` JSON-LD embedded in the page. Target
//! is checked for shipping only.

use super::{script_bodies, status_error, ProbeTarget, RetailerProbe, USER_AGENT};
use crate::error::{ProbeError, Result};
use crate::model::{Money, Observation, Retailer};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, COOKIE};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Target probe.
pub struct TargetProbe {
    client: reqwest::Client,
}

impl TargetProbe {
    /// Build a probe whose HTTP client gives up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("text/html,*/*;q=0.8"));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

/// ZIP-only location; coordinates and state are left blank.
fn location_cookie(zip_code: &str) -> String {
    let value = format!("{zip_code}|||US");
    format!("GuestLocation={value}; UserLocation={value}")
}

fn is_product(node: &Value) -> bool {
    match node.get("@type") {
        Some(Value::String(t)) => t == "Product",
        Some(Value::Array(types)) => types.iter().any(|t| t == "Product"),
        _ => false,
    }
}

/// First `Product` node in a JSON-LD document, looking through arrays and
/// `@graph`.
fn find_product(doc: &Value) -> Option<&Value> {
    if is_product(doc) {
        return Some(doc);
    }
    match doc {
        Value::Array(items) => items.iter().find_map(find_product),
        Value::Object(map) => map.get("@graph").and_then(find_product),
        _ => None,
    }
}

fn offer_price(offer: &Value) -> Option<Money> {
    match offer.get("price")? {
        Value::Number(n) => n.as_f64().map(Money::from_dollars),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Extract an observation from a Target product page.
///
/// # Errors
///
/// Returns `ParseFailure` if no JSON-LD product with a price is present.
pub fn parse_product_page(html: &str) -> std::result::Result<Observation, ProbeError> {
    let product = script_bodies(html, "application/ld+json")
        .into_iter()
        .filter_map(|body| serde_json::from_str::<Value>(body).ok())
        .find_map(|doc| find_product(&doc).cloned())
        .ok_or_else(|| ProbeError::ParseFailure("no JSON-LD product".into()))?;

    let offer = match product.get("offers") {
        Some(Value::Array(offers)) => offers.first(),
        other => other,
    }
    .ok_or_else(|| ProbeError::ParseFailure("product has no offers".into()))?;

    let price = offer_price(offer)
        .ok_or_else(|| ProbeError::ParseFailure("offer has no price".into()))?;

    let in_stock = offer
        .get("availability")
        .and_then(Value::as_str)
        .is_some_and(|a| a.ends_with("InStock"));

    Ok(Observation {
        price: Some(price),
        name: product.get("name").and_then(Value::as_str).map(str::to_string),
        shipping_available: in_stock,
        pickup_available: false,
        in_stock,
        error: None,
    })
}

impl RetailerProbe for TargetProbe {
    fn retailer(&self) -> Retailer {
        Retailer::Target
    }

    async fn fetch(
        &self,
        url: &str,
        target: &ProbeTarget,
    ) -> std::result::Result<Observation, ProbeError> {
        let response = self
            .client
            .get(url)
            .header(COOKIE, location_cookie(&target.zip_code))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status));
        }

        let html = response.text().await?;
        let observation = parse_product_page(&html)?;
        debug!(
            url,
            zip = %target.zip_code,
            price = ?observation.price,
            shipping = observation.shipping_available,
            "Target page parsed"
        );
        Ok(observation)
    }
}
