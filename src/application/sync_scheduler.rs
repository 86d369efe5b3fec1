//! Scheduler boundary for the sync workflow
//!
//! Invokes the workflow on a fixed cadence and re-runs the whole workflow
//! after retriable failures, up to a bounded number of attempts per tick.
//! Ticks never overlap: the loop awaits one tick before starting the next.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::application::sync_workflow::SyncWorkflow;
use crate::domain::repositories::{FeedSource, ProductStore};
use crate::domain::sync_error::SyncError;
use crate::domain::sync_summary::SyncSummary;

/// Something the scheduler can run once per attempt.
#[async_trait]
pub trait SyncJob: Send + Sync {
    async fn run_sync(&self) -> Result<SyncSummary, SyncError>;
}

#[async_trait]
impl<F, S> SyncJob for SyncWorkflow<F, S>
where
    F: FeedSource,
    S: ProductStore,
{
    async fn run_sync(&self) -> Result<SyncSummary, SyncError> {
        self.run().await
    }
}

/// Whole-workflow retry policy applied per tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
        }
    }
}

impl RetryPolicy {
    pub const fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub const fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Exponential backoff before attempt `attempt + 1`, with up to 20% jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let exponential = self.base_delay_ms.saturating_mul(1u64 << exponent);
        let capped = exponential.min(self.max_delay_ms);
        let jitter = if capped >= 5 { fastrand::u64(0..=capped / 5) } else { 0 };
        Duration::from_millis(capped.saturating_add(jitter).min(self.max_delay_ms))
    }
}

/// Result of one scheduled tick.
#[derive(Debug)]
pub enum TickOutcome {
    Completed {
        summary: SyncSummary,
        attempts: u32,
    },
    Failed {
        error: SyncError,
        attempts: u32,
    },
}

impl TickOutcome {
    pub const fn attempts(&self) -> u32 {
        match self {
            Self::Completed { attempts, .. } | Self::Failed { attempts, .. } => *attempts,
        }
    }

    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// Runs a [`SyncJob`] every `interval` with bounded whole-workflow retries.
pub struct SyncScheduler<J> {
    job: J,
    interval: Duration,
    retry: RetryPolicy,
}

impl<J: SyncJob> SyncScheduler<J> {
    pub const fn new(job: J, interval: Duration, retry: RetryPolicy) -> Self {
        Self { job, interval, retry }
    }

    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Run one tick: attempt the job until it succeeds, fails terminally,
    /// or runs out of attempts. Cancelling `shutdown` during a backoff ends
    /// the tick with the last error.
    pub async fn run_once(&self, shutdown: &CancellationToken) -> TickOutcome {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.job.run_sync().await {
                Ok(summary) => {
                    info!(
                        attempt,
                        inserted = summary.inserted,
                        updated = summary.updated,
                        total = summary.total,
                        "Scheduled sync succeeded"
                    );
                    return TickOutcome::Completed {
                        summary,
                        attempts: attempt,
                    };
                }
                Err(error) if !error.is_retriable() => {
                    warn!(attempt, "Scheduled sync failed terminally, not retrying: {}", error);
                    return TickOutcome::Failed {
                        error,
                        attempts: attempt,
                    };
                }
                Err(error) if attempt >= max_attempts => {
                    error!(attempt, max_attempts, "Scheduled sync exhausted retries: {}", error);
                    return TickOutcome::Failed {
                        error,
                        attempts: attempt,
                    };
                }
                Err(error) => {
                    let delay = self.retry.backoff(attempt);
                    warn!(
                        attempt,
                        max_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Scheduled sync failed, retrying: {}",
                        error
                    );
                    tokio::select! {
                        () = shutdown.cancelled() => {
                            info!(attempt, "Retry abandoned on shutdown");
                            return TickOutcome::Failed {
                                error,
                                attempts: attempt,
                            };
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
            }
        }
    }

    /// Tick on the configured interval until `shutdown` is cancelled.
    ///
    /// The first tick fires immediately.
    pub async fn run_until_cancelled(&self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(interval_secs = self.interval.as_secs(), "Sync scheduler started");

        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    info!("Sync scheduler stopping");
                    break;
                }
                _ = ticker.tick() => {
                    let outcome = self.run_once(&shutdown).await;
                    if !outcome.is_success() {
                        warn!(attempts = outcome.attempts(), "Tick ended without a summary");
                    }
                }
            }
        }
    }
}
