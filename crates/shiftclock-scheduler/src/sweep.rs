//! Milestone sweep — one pass over active users, bounded and throttled.
//!
//! Users are checked in chunks; within a chunk a semaphore caps how many
//! checks run at once, each with its own timeout, and the chunk as a whole
//! has a deadline. Those deadlines cover confirming and persisting only:
//! notifications for a chunk are sent after it, under the dispatcher's own
//! retry policy. A short pause separates chunks.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use shiftclock_core::config::SweepConfig;
use shiftclock_core::{Result, ShiftError};
use tokio::sync::Semaphore;

use crate::tracker::{MilestoneBatch, Tracker};

/// Sweep tuning as durations.
#[derive(Debug, Clone)]
pub struct SweepOptions {
    pub interval: Duration,
    pub max_interval: Duration,
    pub max_users: usize,
    pub chunk_size: usize,
    pub concurrency: usize,
    pub user_timeout: Duration,
    pub chunk_timeout: Duration,
    pub chunk_pause: Duration,
    pub snapshot_timeout: Duration,
    pub max_errors: u32,
    pub cooldown: Duration,
}

impl SweepOptions {
    pub fn from_config(config: &SweepConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.interval_secs.max(1)),
            max_interval: Duration::from_secs(config.max_interval_secs.max(config.interval_secs)),
            max_users: config.max_users,
            chunk_size: config.chunk_size.max(1),
            concurrency: config.concurrency.max(1),
            user_timeout: Duration::from_secs(config.user_timeout_secs),
            chunk_timeout: Duration::from_secs(config.chunk_timeout_secs),
            chunk_pause: Duration::from_millis(config.chunk_pause_ms),
            snapshot_timeout: Duration::from_secs(config.snapshot_timeout_secs),
            max_errors: config.max_errors.max(1),
            cooldown: Duration::from_secs(config.cooldown_secs),
        }
    }
}

impl Default for SweepOptions {
    fn default() -> Self {
        Self::from_config(&SweepConfig::default())
    }
}

/// What one sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub active: usize,
    pub checked: usize,
    pub milestones: usize,
    pub user_errors: usize,
    pub user_timeouts: usize,
    pub chunk_timeouts: usize,
}

/// Check every active user once.
///
/// Only a failed snapshot fails the sweep; per-user problems are counted.
pub async fn sweep_once(tracker: &Arc<Tracker>, opts: &SweepOptions) -> Result<SweepReport> {
    let (ids, active) = tokio::time::timeout(opts.snapshot_timeout, tracker.active_ids(opts.max_users))
        .await
        .map_err(|_| ShiftError::Timeout("sweep snapshot"))?;

    let mut report = SweepReport {
        active,
        ..Default::default()
    };
    if ids.is_empty() {
        return Ok(report);
    }
    if active > ids.len() {
        tracing::warn!("⚠️ {active} active users, sweeping the first {}", ids.len());
    }

    let semaphore = Arc::new(Semaphore::new(opts.concurrency));
    let chunks: Vec<_> = ids.chunks(opts.chunk_size).collect();
    let last = chunks.len() - 1;

    for (i, chunk) in chunks.into_iter().enumerate() {
        // Filled as each check finishes, so a chunk timeout keeps what was confirmed.
        let confirmed: Arc<Mutex<Vec<MilestoneBatch>>> = Arc::default();
        let checks = chunk.iter().map(|&id| {
            let semaphore = semaphore.clone();
            let tracker = tracker.clone();
            let confirmed = confirmed.clone();
            let user_timeout = opts.user_timeout;
            async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (id, None);
                };
                let result = tokio::time::timeout(user_timeout, tracker.confirm_milestones(id))
                    .await
                    .map(|r| {
                        r.map(|batch| {
                            if let Some(batch) = batch {
                                confirmed.lock().unwrap_or_else(|e| e.into_inner()).push(batch);
                            }
                        })
                    });
                (id, Some(result))
            }
        });

        match tokio::time::timeout(opts.chunk_timeout, join_all(checks)).await {
            Ok(results) => {
                for (id, result) in results {
                    report.checked += 1;
                    match result {
                        Some(Ok(Ok(()))) => {}
                        Some(Ok(Err(e))) => {
                            report.user_errors += 1;
                            tracing::warn!(user = %id, "⚠️ Milestone check failed: {e}");
                        }
                        Some(Err(_)) => {
                            report.user_timeouts += 1;
                            tracing::warn!(user = %id, "⏱️ Milestone check timed out");
                        }
                        None => report.user_errors += 1,
                    }
                }
            }
            Err(_) => {
                report.chunk_timeouts += 1;
                tracing::warn!("⏱️ Sweep chunk {} of {} timed out", i + 1, last + 1);
            }
        }

        // Confirmed boundaries are already on disk; delivery runs its own
        // retry budget outside the check deadlines.
        let batches = std::mem::take(&mut *confirmed.lock().unwrap_or_else(|e| e.into_inner()));
        report.milestones += batches.iter().map(|b| b.hits.len()).sum::<usize>();
        join_all(batches.iter().map(|batch| tracker.announce(batch))).await;

        if i < last && !opts.chunk_pause.is_zero() {
            tokio::time::sleep(opts.chunk_pause).await;
        }
    }

    if report.milestones > 0 {
        tracing::info!(
            "⏰ Sweep: {} checked, {} milestones confirmed",
            report.checked,
            report.milestones
        );
    }
    Ok(report)
}

/// Adaptive delay between sweeps.
#[derive(Debug, Default)]
pub struct SweepBackoff {
    consecutive_errors: u32,
}

impl SweepBackoff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    /// Normal cadence.
    pub fn on_success(&mut self, opts: &SweepOptions) -> Duration {
        self.consecutive_errors = 0;
        opts.interval
    }

    /// Doubles the interval up to the cap; the `max_errors`-th consecutive
    /// failure yields the cooldown and starts counting again.
    pub fn on_error(&mut self, opts: &SweepOptions) -> Duration {
        self.consecutive_errors += 1;
        if self.consecutive_errors >= opts.max_errors {
            self.consecutive_errors = 0;
            return opts.cooldown;
        }
        let factor = 2u32.saturating_pow(self.consecutive_errors);
        opts.interval.saturating_mul(factor).min(opts.max_interval)
    }
}
