//! Walmart product page probe.
//!
//! Location is conveyed with cookies: `assortmentStoreId` selects the store
//! whose pickup options are shown, and `locDataV3` carries the store and the
//! delivery ZIP. Product data comes from the page's `__NEXT_DATA__` JSON.

use super::{script_bodies, status_error, ProbeTarget, RetailerProbe, USER_AGENT};
use crate::error::{ProbeError, Result};
use crate::model::{Money, Observation, Retailer};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, COOKIE};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

const PRODUCT_POINTER: &str = "/props/pageProps/initialData/data/product";

/// Walmart probe.
pub struct WalmartProbe {
    client: reqwest::Client,
}

impl WalmartProbe {
    /// Build a probe whose HTTP client gives up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

/// Cookie header pinning the page to a ZIP and optionally a store.
fn location_cookie(target: &ProbeTarget, now_ms: i64) -> String {
    let acid = uuid::Uuid::new_v4();

    let mut loc = json!({
        "intent": "SHIPPING",
        "mergeFlag": true,
        "postalCode": { "base": target.zip_code, "timestamp": now_ms },
        "validateKey": format!("prod:v2:{acid}"),
    });
    let mut cookie = format!("ACID={acid}; hasACID=true; hasLocData=1");

    if let Some(store) = &target.store_id {
        loc["storeIntent"] = json!("PICKUP");
        loc["pickup"] = json!({ "nodeId": store, "timestamp": now_ms });
        cookie.push_str(&format!("; assortmentStoreId={store}"));
    }

    cookie.push_str(&format!("; locDataV3={loc}"));
    cookie
}

fn is_available(status: Option<&str>) -> bool {
    matches!(status, Some("IN_STOCK" | "AVAILABLE"))
}

/// Extract an observation from a Walmart product page.
///
/// # Errors
///
/// Returns `ParseFailure` if the page has no product data or no price.
pub fn parse_product_page(html: &str) -> std::result::Result<Observation, ProbeError> {
    let body = script_bodies(html, "__NEXT_DATA__")
        .into_iter()
        .next()
        .ok_or_else(|| ProbeError::ParseFailure("no __NEXT_DATA__ script".into()))?;

    let data: Value = serde_json::from_str(body)
        .map_err(|e| ProbeError::ParseFailure(format!("invalid __NEXT_DATA__ JSON: {e}")))?;
    let product = data
        .pointer(PRODUCT_POINTER)
        .ok_or_else(|| ProbeError::ParseFailure("no product in page data".into()))?;

    let price = product
        .pointer("/priceInfo/currentPrice/price")
        .and_then(Value::as_f64)
        .map(Money::from_dollars)
        .ok_or_else(|| ProbeError::ParseFailure("no current price".into()))?;

    let mut observation = Observation {
        price: Some(price),
        name: product.get("name").and_then(Value::as_str).map(str::to_string),
        in_stock: product.get("availabilityStatus").and_then(Value::as_str) == Some("IN_STOCK"),
        ..Observation::default()
    };

    for option in product
        .get("fulfillmentOptions")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        let available = is_available(option.get("availabilityStatus").and_then(Value::as_str));
        match option.get("type").and_then(Value::as_str) {
            Some("SHIPPING") => observation.shipping_available = available,
            Some("PICKUP") => observation.pickup_available = available,
            _ => {}
        }
    }

    Ok(observation)
}

impl RetailerProbe for WalmartProbe {
    fn retailer(&self) -> Retailer {
        Retailer::Walmart
    }

    async fn fetch(
        &self,
        url: &str,
        target: &ProbeTarget,
    ) -> std::result::Result<Observation, ProbeError> {
        let cookie = location_cookie(target, chrono::Utc::now().timestamp_millis());

        let response = self.client.get(url).header(COOKIE, cookie).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status));
        }

        let html = response.text().await?;
        let observation = parse_product_page(&html)?;
        debug!(
            url,
            store_key = %target.store_key,
            price = ?observation.price,
            shipping = observation.shipping_available,
            pickup = observation.pickup_available,
            "Walmart page parsed"
        );
        Ok(observation)
    }
}
