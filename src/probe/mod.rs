//! Retailer probes.
//!
//! A [`RetailerProbe`] fetches one product page as seen from one location
//! and reports an [`Observation`]. [`ProbeRunner`] adds the per-attempt
//! timeout and the [`RetryPolicy`], and never fails: exhausted retries come
//! back as an observation carrying the last error.
//!
//! # Submodules
//!
//! - [`retry`] - Backoff policy
//! - [`walmart`] - Walmart product pages (`__NEXT_DATA__`)
//! - [`target`] - Target product pages (JSON-LD)

pub mod retry;
pub mod target;
pub mod walmart;

pub use retry::RetryPolicy;
pub use target::TargetProbe;
pub use walmart::WalmartProbe;

use crate::error::ProbeError;
use crate::model::{Observation, Retailer};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, warn};

/// Browser-like user agent sent with every page request.
pub const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Where a page should be viewed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    pub zip_code: String,
    /// Store whose assortment and pickup options should be shown.
    pub store_id: Option<String>,
    /// Key under which the observation is recorded.
    pub store_key: String,
}

/// Fetches a product page for one retailer.
pub trait RetailerProbe: Send + Sync {
    fn retailer(&self) -> Retailer;

    /// Fetch `url` as seen from `target`.
    fn fetch(
        &self,
        url: &str,
        target: &ProbeTarget,
    ) -> impl Future<Output = std::result::Result<Observation, ProbeError>> + Send;
}

/// Object-safe version of [`RetailerProbe`] for boxing.
trait RetailerProbeBoxed: Send + Sync {
    fn retailer(&self) -> Retailer;
    fn fetch_boxed<'a>(
        &'a self,
        url: &'a str,
        target: &'a ProbeTarget,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<Observation, ProbeError>> + Send + 'a>>;
}

struct ProbeWrapper<P: RetailerProbe + 'static>(P);

impl<P: RetailerProbe + 'static> RetailerProbeBoxed for ProbeWrapper<P> {
    fn retailer(&self) -> Retailer {
        self.0.retailer()
    }

    fn fetch_boxed<'a>(
        &'a self,
        url: &'a str,
        target: &'a ProbeTarget,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<Observation, ProbeError>> + Send + 'a>>
    {
        Box::pin(self.0.fetch(url, target))
    }
}

/// Boxed probe for dynamic dispatch.
pub struct BoxedProbe {
    inner: Box<dyn RetailerProbeBoxed>,
}

impl BoxedProbe {
    pub fn new<P: RetailerProbe + 'static>(probe: P) -> Self {
        Self {
            inner: Box::new(ProbeWrapper(probe)),
        }
    }

    #[must_use]
    pub fn retailer(&self) -> Retailer {
        self.inner.retailer()
    }

    /// Fetch once, without timeout or retry.
    ///
    /// # Errors
    ///
    /// Returns the probe's error.
    pub async fn fetch(
        &self,
        url: &str,
        target: &ProbeTarget,
    ) -> std::result::Result<Observation, ProbeError> {
        self.inner.fetch_boxed(url, target).await
    }
}

/// A probe with timeout and retry applied.
pub struct ProbeRunner {
    probe: BoxedProbe,
    policy: RetryPolicy,
    timeout: Duration,
}

impl ProbeRunner {
    #[must_use]
    pub fn new(probe: BoxedProbe, policy: RetryPolicy, timeout: Duration) -> Self {
        Self {
            probe,
            policy,
            timeout,
        }
    }

    #[must_use]
    pub fn retailer(&self) -> Retailer {
        self.probe.retailer()
    }

    /// Probe `url` from `target`, retrying retryable failures.
    pub async fn probe(&self, url: &str, target: &ProbeTarget) -> Observation {
        let attempts = self.policy.attempts();
        let mut attempt = 0;

        loop {
            let result = match tokio::time::timeout(self.timeout, self.probe.fetch(url, target)).await {
                Ok(inner) => inner,
                Err(_) => Err(ProbeError::Timeout),
            };

            let error = match result {
                Ok(observation) => return observation,
                Err(e) => e,
            };

            attempt += 1;
            if !error.is_retryable() || attempt >= attempts {
                warn!(
                    retailer = %self.retailer(),
                    url,
                    store_key = %target.store_key,
                    kind = error.kind(),
                    attempts = attempt,
                    "Probe failed: {error}"
                );
                return Observation::failed(error);
            }

            let delay = self.policy.delay(attempt - 1);
            debug!(
                retailer = %self.retailer(),
                url,
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Retrying probe: {error}"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

/// Bodies of `<script>` elements whose opening tag contains `marker`.
pub(crate) fn script_bodies<'a>(html: &'a str, marker: &str) -> Vec<&'a str> {
    let mut bodies = Vec::new();
    let mut rest = html;

    while let Some(start) = rest.find("<script") {
        rest = &rest[start..];
        let Some(tag_end) = rest.find('>') else {
            break;
        };
        let tag = &rest[..tag_end];
        let after_tag = &rest[tag_end + 1..];
        let Some(close) = after_tag.find("</script>") else {
            break;
        };
        if tag.contains(marker) {
            bodies.push(after_tag[..close].trim());
        }
        rest = &after_tag[close..];
    }

    bodies
}

/// Map a non-success HTTP status to a probe error.
pub(crate) fn status_error(status: reqwest::StatusCode) -> ProbeError {
    match status.as_u16() {
        403 | 429 => ProbeError::Blocked {
            status: status.as_u16(),
        },
        _ => ProbeError::Transport(format!("HTTP {status}")),
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedProbe;
    use super::*;
    use crate::model::Money;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    fn target() -> ProbeTarget {
        ProbeTarget {
            zip_code: "10001".into(),
            store_id: None,
            store_key: "online-10001".into(),
        }
    }

    /// Fails with `error` for the first `failures` calls, then succeeds.
    struct Flaky {
        failures: usize,
        error: ProbeError,
        calls: Arc<std::sync::atomic::AtomicUsize>,
    }

    impl RetailerProbe for Flaky {
        fn retailer(&self) -> Retailer {
            Retailer::Walmart
        }

        async fn fetch(&self, _url: &str, _target: &ProbeTarget) -> std::result::Result<Observation, ProbeError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(self.error.clone())
            } else {
                Ok(Observation {
                    price: Some(Money::from_cents(100)),
                    ..Observation::default()
                })
            }
        }
    }

    #[tokio::test]
    async fn test_retries_transient_failures() {
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let runner = ProbeRunner::new(
            BoxedProbe::new(Flaky {
                failures: 2,
                error: ProbeError::Blocked { status: 429 },
                calls: Arc::clone(&calls),
            }),
            RetryPolicy::immediate(3),
            Duration::from_secs(1),
        );

        let obs = runner.probe("u", &target()).await;
        assert!(obs.is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_parse_failure_not_retried() {
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let runner = ProbeRunner::new(
            BoxedProbe::new(Flaky {
                failures: 5,
                error: ProbeError::ParseFailure("layout changed".into()),
                calls: Arc::clone(&calls),
            }),
            RetryPolicy::immediate(3),
            Duration::from_secs(1),
        );

        let obs = runner.probe("u", &target()).await;
        assert!(matches!(obs.error, Some(ProbeError::ParseFailure(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_slow_probe_times_out() {
        let mut slow = ScriptedProbe::new(Retailer::Target).answer(
            "u",
            "online-10001",
            Ok(Observation::default()),
        );
        slow.delay = Duration::from_millis(200);

        let runner = ProbeRunner::new(
            BoxedProbe::new(slow),
            RetryPolicy::immediate(2),
            Duration::from_millis(20),
        );
        let obs = runner.probe("u", &target()).await;
        assert_eq!(obs.error, Some(ProbeError::Timeout));
    }

    #[test]
    fn test_script_bodies_by_marker() {
        let html = r#"<html><script src="a.js"></script>
            <script id="__NEXT_DATA__" type="application/json">{"a":1}</script>
            <script type="application/ld+json"> {"@type":"Product"} </script></html>"#;
        assert_eq!(script_bodies(html, "__NEXT_DATA__"), vec![r#"{"a":1}"#]);
        assert_eq!(
            script_bodies(html, "application/ld+json"),
            vec![r#"{"@type":"Product"}"#]
        );
        assert!(script_bodies(html, "nothing").is_empty());
    }
}
