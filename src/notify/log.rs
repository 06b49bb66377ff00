//! Notifier that writes alerts to the log instead of sending them.

use super::{AlertMessage, Notifier};
use crate::error::Result;
use tracing::info;

/// Used when no bot token is configured, and for dry runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn is_ready(&self) -> bool {
        true
    }

    async fn deliver(&self, recipient: &str, message: &AlertMessage) -> Result<()> {
        info!(
            recipient,
            retailer = %message.retailer,
            alert_type = %message.alert_type,
            price = %message.price,
            "{}",
            message.render()
        );
        Ok(())
    }
}
