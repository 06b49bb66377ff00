//! Notification channel.
//!
//! Alerts leave the process through a [`Notifier`]. The trait uses async
//! methods, so runtime selection goes through [`BoxedNotifier`], which also
//! keeps the sent/failed delivery counters.

pub mod discord;
pub mod log;
pub mod message;

pub use discord::DiscordNotifier;
pub use log::LogNotifier;
pub use message::AlertMessage;

use crate::error::Result;
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};

/// A channel that can deliver an alert to a user.
pub trait Notifier: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Whether the channel is connected and able to deliver.
    fn is_ready(&self) -> impl Future<Output = bool> + Send;

    /// Deliver `message` to `recipient` (a Discord user id).
    ///
    /// Fails with `Error::NotificationUnreachable` when the recipient cannot
    /// be reached by any route.
    fn deliver(&self, recipient: &str, message: &AlertMessage) -> impl Future<Output = Result<()>> + Send;
}

/// Object-safe version of [`Notifier`] for boxing.
trait NotifierBoxed: Send + Sync {
    fn name(&self) -> &'static str;
    fn is_ready_boxed(&self) -> Pin<Box<dyn Future<Output = bool> + Send + '_>>;
    fn deliver_boxed<'a>(
        &'a self,
        recipient: &'a str,
        message: &'a AlertMessage,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

struct NotifierWrapper<N: Notifier + 'static>(N);

impl<N: Notifier + 'static> NotifierBoxed for NotifierWrapper<N> {
    fn name(&self) -> &'static str {
        self.0.name()
    }

    fn is_ready_boxed(&self) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
        Box::pin(self.0.is_ready())
    }

    fn deliver_boxed<'a>(
        &'a self,
        recipient: &'a str,
        message: &'a AlertMessage,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(self.0.deliver(recipient, message))
    }
}

/// Delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryStats {
    pub sent: u64,
    pub failed: u64,
}

/// Boxed notifier for dynamic dispatch.
pub struct BoxedNotifier {
    inner: Box<dyn NotifierBoxed>,
    sent: AtomicU64,
    failed: AtomicU64,
}

impl BoxedNotifier {
    pub fn new<N: Notifier + 'static>(notifier: N) -> Self {
        Self {
            inner: Box::new(NotifierWrapper(notifier)),
            sent: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.inner.name()
    }

    pub async fn is_ready(&self) -> bool {
        self.inner.is_ready_boxed().await
    }

    /// Deliver and count the outcome.
    ///
    /// # Errors
    ///
    /// Propagates the channel's delivery error.
    pub async fn deliver(&self, recipient: &str, message: &AlertMessage) -> Result<()> {
        let result = self.inner.deliver_boxed(recipient, message).await;
        if result.is_ok() {
            self.sent.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    #[must_use]
    pub fn stats(&self) -> DeliveryStats {
        DeliveryStats {
            sent: self.sent.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingNotifier;
    use super::*;
    use crate::model::{AlertType, Money, Retailer};

    fn message() -> AlertMessage {
        AlertMessage {
            product_name: "Thing".into(),
            product_url: "https://www.target.com/p/thing/-/A-1".into(),
            retailer: Retailer::Target,
            alert_type: AlertType::Shipping,
            price: Money::from_cents(900),
            threshold: Money::from_cents(1000),
            zip_code: "10001".into(),
            store_id: None,
        }
    }

    #[tokio::test]
    async fn test_boxed_notifier_counts_outcomes() {
        let ok = BoxedNotifier::new(RecordingNotifier::default());
        ok.deliver("1", &message()).await.unwrap();
        ok.deliver("2", &message()).await.unwrap();
        assert_eq!(ok.stats(), DeliveryStats { sent: 2, failed: 0 });

        let broken = BoxedNotifier::new(RecordingNotifier {
            unreachable: true,
            ..RecordingNotifier::default()
        });
        assert!(broken.deliver("1", &message()).await.is_err());
        assert_eq!(broken.stats(), DeliveryStats { sent: 0, failed: 1 });
    }
}
