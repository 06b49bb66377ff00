//! Per-retailer concurrency gate.
//!
//! Bounds how many probes against one retailer are in flight at once and
//! records the high-water mark so runs can report it.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Counting gate around a tokio [`Semaphore`].
#[derive(Debug)]
pub struct ConcurrencyGate {
    name: &'static str,
    limit: usize,
    semaphore: Semaphore,
    active: AtomicUsize,
    peak: AtomicUsize,
}

/// Decrements the active count when the gated work finishes, fails or
/// unwinds.
struct ActiveGuard<'a> {
    active: &'a AtomicUsize,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ConcurrencyGate {
    /// Create a gate admitting at most `limit` concurrent runs (minimum 1).
    #[must_use]
    pub fn new(name: &'static str, limit: usize) -> Arc<Self> {
        let limit = limit.max(1);
        Arc::new(Self {
            name,
            limit,
            semaphore: Semaphore::new(limit),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    /// Wait for a slot, then run `work` while holding it.
    pub async fn run<F: Future>(&self, work: F) -> F::Output {
        // The semaphore is never closed, so acquire cannot fail.
        let _permit = self.semaphore.acquire().await.ok();

        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now_active, Ordering::SeqCst);
        let _guard = ActiveGuard {
            active: &self.active,
        };

        work.await
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub const fn limit(&self) -> usize {
        self.limit
    }

    /// Runs currently holding a slot.
    #[must_use]
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous runs since creation.
    #[must_use]
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}
