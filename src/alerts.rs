//! Alert decision engine.
//!
//! [`decide`] is the pure dedup state machine. [`AlertEngine`] feeds it
//! observations: it records price history, applies the decision to the
//! stored alert state atomically, and dispatches through the notifier.
//!
//! State transitions do not depend on delivery: a `Send` whose message never
//! arrives still advances the stored state.

use crate::error::Result;
use crate::model::{ActiveTracking, AlertKey, AlertState, AlertType, Money, Observation};
use crate::notify::{AlertMessage, BoxedNotifier};
use crate::storage::{self, SharedStorage};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default minimum time between repeat alerts at an unchanged price.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(24 * 60 * 60);

/// Outcome of evaluating one price against one alert state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertDecision {
    /// Price is above threshold; forget any previous alert.
    Reset,
    /// Alert the user and record the price.
    Send,
    /// Already alerted at this price recently.
    Suppress,
}

/// Decide whether an observed price should alert.
///
/// - above threshold: `Reset`
/// - no previous alert: `Send`
/// - moved by more than one cent since the last alert: `Send`
/// - last alert older than `cooldown`: `Send`
/// - otherwise `Suppress`
#[must_use]
pub fn decide(
    state: Option<&AlertState>,
    price: Money,
    threshold: Money,
    now: i64,
    cooldown: Duration,
) -> AlertDecision {
    if price > threshold {
        return AlertDecision::Reset;
    }

    let Some(state) = state else {
        return AlertDecision::Send;
    };

    if price.abs_diff(state.last_alerted_price) > Money::CENT {
        return AlertDecision::Send;
    }

    let cooldown_ms = i64::try_from(cooldown.as_millis()).unwrap_or(i64::MAX);
    if now.saturating_sub(state.last_alerted_at) > cooldown_ms {
        AlertDecision::Send
    } else {
        AlertDecision::Suppress
    }
}

/// Where a check was made, for alert keys and message text.
#[derive(Debug, Clone)]
pub struct CheckSite {
    pub store_key: String,
    pub alert_type: AlertType,
    pub zip_code: String,
    /// Store number, when the check was tied to one.
    pub store_id: Option<String>,
}

/// What happened to one observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertOutcome {
    /// Observation carried no usable price. A zero placeholder is still
    /// written to price history, but never alerts.
    NoPrice,
    Reset,
    Suppressed,
    /// Decision was `Send` but the channel was not available.
    Unavailable,
    Delivered,
    DeliveryFailed,
}

/// Applies decisions to stored state and dispatches alerts.
#[derive(Clone)]
pub struct AlertEngine {
    storage: SharedStorage,
    notifier: Arc<BoxedNotifier>,
    cooldown: Duration,
}

impl AlertEngine {
    #[must_use]
    pub fn new(storage: SharedStorage, notifier: Arc<BoxedNotifier>, cooldown: Duration) -> Self {
        Self {
            storage,
            notifier,
            cooldown,
        }
    }

    /// Handle one observation for one tracking request at one site.
    ///
    /// # Errors
    ///
    /// Returns an error only for storage failures. Delivery failures are
    /// logged and reported as [`AlertOutcome::DeliveryFailed`].
    pub async fn handle(
        &self,
        tracking: &ActiveTracking,
        site: &CheckSite,
        observation: &Observation,
        now: i64,
    ) -> Result<AlertOutcome> {
        let Some(price) = observation.price.filter(|_| observation.error.is_none()) else {
            return Ok(AlertOutcome::NoPrice);
        };

        let key = AlertKey {
            user_id: tracking.user.id,
            product_id: tracking.product.id,
            store_key: site.store_key.clone(),
            alert_type: site.alert_type,
        };
        let threshold = tracking.tracking.threshold;

        let decision = {
            let mut db = storage::lock(&self.storage)?;
            db.append_price_history(
                tracking.product.id,
                &site.store_key,
                price,
                observation.shipping_available,
                observation.pickup_available,
                now,
            )?;
            if let Some(name) = observation.name.as_deref().filter(|n| !n.is_empty()) {
                if db.set_product_name_if_missing(tracking.product.id, name)? {
                    debug!(product_id = tracking.product.id, name, "Product name recorded");
                }
            }
            if !price.is_positive() {
                debug!(product_id = tracking.product.id, store_key = %key.store_key, "Placeholder price, not alerting");
                return Ok(AlertOutcome::NoPrice);
            }
            db.apply_alert_decision(&key, price, threshold, now, self.cooldown)?
        };

        match decision {
            AlertDecision::Reset => return Ok(AlertOutcome::Reset),
            AlertDecision::Suppress => {
                debug!(store_key = %key.store_key, alert_type = %key.alert_type, "Alert suppressed");
                return Ok(AlertOutcome::Suppressed);
            }
            AlertDecision::Send => {}
        }

        if !observation.available_for(site.alert_type) {
            debug!(
                store_key = %key.store_key,
                alert_type = %key.alert_type,
                "Below threshold but not available, not dispatching"
            );
            return Ok(AlertOutcome::Unavailable);
        }

        let mut product = tracking.product.clone();
        if product.name.is_none() {
            product.name.clone_from(&observation.name);
        }
        let message = AlertMessage {
            product_name: product.display_name(),
            product_url: product.url.clone(),
            retailer: product.retailer,
            alert_type: site.alert_type,
            price,
            threshold,
            zip_code: site.zip_code.clone(),
            store_id: site.store_id.clone(),
        };

        match self.notifier.deliver(&tracking.user.discord_id, &message).await {
            Ok(()) => {
                storage::lock(&self.storage)?.append_alert_history(&key, price, now)?;
                info!(
                    user = %tracking.user.discord_id,
                    product_id = key.product_id,
                    store_key = %key.store_key,
                    alert_type = %key.alert_type,
                    %price,
                    "Alert sent"
                );
                Ok(AlertOutcome::Delivered)
            }
            Err(e) => {
                warn!(
                    user = %tracking.user.discord_id,
                    product_id = key.product_id,
                    error = %e,
                    "Alert delivery failed"
                );
                Ok(AlertOutcome::DeliveryFailed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR_MS: i64 = 3_600_000;

    fn state(price: i64, at: i64) -> AlertState {
        AlertState {
            key: AlertKey {
                user_id: 1,
                product_id: 1,
                store_key: "5678".into(),
                alert_type: AlertType::Shipping,
            },
            last_alerted_price: Money::from_cents(price),
            last_alerted_at: at,
        }
    }

    fn cents(c: i64) -> Money {
        Money::from_cents(c)
    }

    #[test]
    fn test_above_threshold_resets() {
        let s = state(4500, 0);
        assert_eq!(
            decide(Some(&s), cents(5001), cents(5000), HOUR_MS, DEFAULT_COOLDOWN),
            AlertDecision::Reset
        );
        assert_eq!(
            decide(None, cents(5001), cents(5000), 0, DEFAULT_COOLDOWN),
            AlertDecision::Reset
        );
    }

    #[test]
    fn test_fresh_tuple_sends_at_threshold() {
        assert_eq!(
            decide(None, cents(5000), cents(5000), 0, DEFAULT_COOLDOWN),
            AlertDecision::Send
        );
    }

    #[test]
    fn test_cooldown_boundary() {
        let s = state(1000, 0);
        assert_eq!(
            decide(Some(&s), cents(1000), cents(2000), 23 * HOUR_MS, DEFAULT_COOLDOWN),
            AlertDecision::Suppress
        );
        assert_eq!(
            decide(Some(&s), cents(1000), cents(2000), 25 * HOUR_MS, DEFAULT_COOLDOWN),
            AlertDecision::Send
        );
    }

    #[test]
    fn test_one_cent_is_unchanged() {
        let s = state(1000, 0);
        assert_eq!(
            decide(Some(&s), cents(999), cents(2000), HOUR_MS, DEFAULT_COOLDOWN),
            AlertDecision::Suppress
        );
        assert_eq!(
            decide(Some(&s), cents(998), cents(2000), HOUR_MS, DEFAULT_COOLDOWN),
            AlertDecision::Send
        );
        assert_eq!(
            decide(Some(&s), cents(1002), cents(2000), HOUR_MS, DEFAULT_COOLDOWN),
            AlertDecision::Send
        );
    }

    mod engine {
        use super::*;
        use crate::model::Retailer;
        use crate::notify::testing::RecordingNotifier;
        use crate::storage::SqliteStorage;

        fn setup(notifier: RecordingNotifier) -> (AlertEngine, SharedStorage, ActiveTracking) {
            let mut db = SqliteStorage::open_memory().unwrap();
            db.create_user("1001", "alice", "5678", "10001").unwrap();
            db.track_product(
                1,
                "https://www.target.com/p/desk-lamp/-/A-1",
                Retailer::Target,
                None,
                cents(5000),
            )
            .unwrap();
            let tracking = db.list_active_tracking().unwrap().remove(0);

            let storage = storage::shared(db);
            let engine = AlertEngine::new(
                Arc::clone(&storage),
                Arc::new(BoxedNotifier::new(notifier)),
                DEFAULT_COOLDOWN,
            );
            (engine, storage, tracking)
        }

        fn site() -> CheckSite {
            CheckSite {
                store_key: "target-10001".into(),
                alert_type: AlertType::Shipping,
                zip_code: "10001".into(),
                store_id: None,
            }
        }

        fn seen(price: i64, shipping: bool) -> Observation {
            Observation {
                price: Some(cents(price)),
                name: Some("Desk Lamp".into()),
                shipping_available: shipping,
                in_stock: shipping,
                ..Observation::default()
            }
        }

        #[tokio::test]
        async fn test_failed_delivery_still_advances_state() {
            let (engine, storage, tracking) = setup(RecordingNotifier {
                unreachable: true,
                ..RecordingNotifier::default()
            });

            let outcome = engine.handle(&tracking, &site(), &seen(4500, true), 0).await.unwrap();
            assert_eq!(outcome, AlertOutcome::DeliveryFailed);

            let db = storage::lock(&storage).unwrap();
            let key = AlertKey {
                user_id: tracking.user.id,
                product_id: tracking.product.id,
                store_key: "target-10001".into(),
                alert_type: AlertType::Shipping,
            };
            assert_eq!(db.get_alert_state(&key).unwrap().unwrap().last_alerted_price, cents(4500));
            assert!(db.list_alert_history(tracking.user.id, 10).unwrap().is_empty());
            drop(db);

            let again = engine.handle(&tracking, &site(), &seen(4500, true), HOUR_MS).await.unwrap();
            assert_eq!(again, AlertOutcome::Suppressed);
        }

        #[tokio::test]
        async fn test_unavailable_item_is_not_dispatched() {
            let (engine, storage, tracking) = setup(RecordingNotifier::default());

            let outcome = engine.handle(&tracking, &site(), &seen(4500, false), 0).await.unwrap();
            assert_eq!(outcome, AlertOutcome::Unavailable);

            let db = storage::lock(&storage).unwrap();
            assert_eq!(db.list_price_history(tracking.product.id, 10).unwrap().len(), 1);
            let product = db.get_product(tracking.product.id).unwrap().unwrap();
            assert_eq!(product.name.as_deref(), Some("Desk Lamp"));
        }

        #[tokio::test]
        async fn test_zero_price_is_recorded_but_never_alerts() {
            let (engine, storage, tracking) = setup(RecordingNotifier::default());

            let outcome = engine.handle(&tracking, &site(), &seen(0, true), 0).await.unwrap();
            assert_eq!(outcome, AlertOutcome::NoPrice);
            assert_eq!(engine.notifier.stats().sent, 0);

            let db = storage::lock(&storage).unwrap();
            let history = db.list_price_history(tracking.product.id, 10).unwrap();
            assert_eq!(history.len(), 1);
            assert_eq!(history[0].price, cents(0));
            let key = AlertKey {
                user_id: tracking.user.id,
                product_id: tracking.product.id,
                store_key: "target-10001".into(),
                alert_type: AlertType::Shipping,
            };
            assert!(db.get_alert_state(&key).unwrap().is_none());
            drop(db);

            // A real price afterwards still alerts.
            let next = engine.handle(&tracking, &site(), &seen(4500, true), HOUR_MS).await.unwrap();
            assert_eq!(next, AlertOutcome::Delivered);
        }

        #[tokio::test]
        async fn test_price_rise_resets_then_realerts() {
            let (engine, _storage, tracking) = setup(RecordingNotifier::default());

            let steps = [(4500, AlertOutcome::Delivered), (5500, AlertOutcome::Reset), (4500, AlertOutcome::Delivered)];
            for (i, (price, expected)) in steps.into_iter().enumerate() {
                let now = i64::try_from(i).unwrap() * HOUR_MS;
                let outcome = engine.handle(&tracking, &site(), &seen(price, true), now).await.unwrap();
                assert_eq!(outcome, expected, "step {i}");
            }
        }
    }
}
