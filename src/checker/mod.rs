//! Price-check runs.
//!
//! # Submodules
//!
//! - [`orchestrator`] - One run: expand tracking into checks, probe, alert
//! - [`scheduler`] - Periodic runs without overlap
//! - [`stats`] - Cumulative counters

pub mod orchestrator;
pub mod scheduler;
pub mod stats;

pub use orchestrator::{CheckTask, Lane, Orchestrator};
pub use scheduler::Scheduler;
pub use stats::{RunStats, StatsSnapshot};

use std::time::Duration;

/// Outcome of one orchestrator run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Unix ms.
    pub started_at: i64,
    /// Unix ms.
    pub finished_at: i64,
    pub duration: Duration,
    pub checks_succeeded: u64,
    pub checks_failed: u64,
    pub alerts_sent: u64,
    /// Most probes in flight at once across all retailers.
    pub peak_concurrency: u64,
}

impl RunSummary {
    #[must_use]
    pub const fn checks_total(&self) -> u64 {
        self.checks_succeeded + self.checks_failed
    }
}
