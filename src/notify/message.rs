//! Plain-text alert messages.

use crate::model::{AlertType, Money, Retailer};
use std::fmt::Write;

/// Everything a recipient needs to act on a price drop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertMessage {
    pub product_name: String,
    pub product_url: String,
    pub retailer: Retailer,
    pub alert_type: AlertType,
    pub price: Money,
    pub threshold: Money,
    pub zip_code: String,
    pub store_id: Option<String>,
}

impl AlertMessage {
    #[must_use]
    pub fn savings(&self) -> Money {
        self.threshold - self.price
    }

    /// Savings as a percentage of the threshold.
    #[must_use]
    pub fn savings_percent(&self) -> f64 {
        if self.threshold.cents() == 0 {
            return 0.0;
        }
        self.savings().as_dollars() / self.threshold.as_dollars() * 100.0
    }

    #[must_use]
    pub fn title(&self) -> String {
        let channel = match self.alert_type {
            AlertType::Shipping => "SHIPPING",
            AlertType::Pickup => "PICKUP",
        };
        format!(
            "{} {channel} ALERT",
            self.retailer.display_name().to_uppercase()
        )
    }

    fn location_line(&self) -> String {
        match (self.alert_type, self.retailer, &self.store_id) {
            (AlertType::Pickup, _, Some(store)) => {
                format!("Pickup at store #{store} (ZIP {})", self.zip_code)
            }
            (_, Retailer::Target, _) => format!("Ships from Target.com to {}", self.zip_code),
            (_, _, Some(store)) => format!("Store #{store}, ships to {}", self.zip_code),
            (_, _, None) => format!("Ships to {}", self.zip_code),
        }
    }

    /// Render the message body.
    #[must_use]
    pub fn render(&self) -> String {
        let verb = match self.alert_type {
            AlertType::Shipping => "is available for shipping",
            AlertType::Pickup => "is available for pickup",
        };

        let mut out = String::new();
        let _ = writeln!(out, "{}", self.title());
        let _ = writeln!(out, "{} {verb}!", self.product_name);
        let _ = writeln!(out, "Price: {} (threshold {})", self.price, self.threshold);
        let _ = writeln!(
            out,
            "You save: {} ({:.1}%)",
            self.savings(),
            self.savings_percent()
        );
        let _ = writeln!(out, "{}", self.location_line());
        let _ = write!(out, "{}", self.product_url);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pickup_message() -> AlertMessage {
        AlertMessage {
            product_name: "Ninja Air Fryer".into(),
            product_url: "https://www.walmart.com/ip/ninja/1".into(),
            retailer: Retailer::Walmart,
            alert_type: AlertType::Pickup,
            price: Money::from_cents(4500),
            threshold: Money::from_cents(5000),
            zip_code: "72712".into(),
            store_id: Some("2280".into()),
        }
    }

    #[test]
    fn test_render_pickup_message() {
        let text = pickup_message().render();
        assert!(text.starts_with("WALMART PICKUP ALERT\n"));
        assert!(text.contains("Price: $45.00 (threshold $50.00)"));
        assert!(text.contains("You save: $5.00 (10.0%)"));
        assert!(text.contains("store #2280"));
        assert!(text.ends_with("https://www.walmart.com/ip/ninja/1"));
    }

    #[test]
    fn test_target_location_line() {
        let msg = AlertMessage {
            retailer: Retailer::Target,
            alert_type: AlertType::Shipping,
            store_id: None,
            ..pickup_message()
        };
        assert!(msg.render().contains("Ships from Target.com to 72712"));
    }
}
