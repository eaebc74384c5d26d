//! Scheduler engine — owns the background loops.
//!
//! Four loops run until shutdown: the milestone sweep and three daily
//! transitions (auto-start, auto-stop, midnight reset). Each loop logs its
//! own errors and backs off; none of them can end the process.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use shiftclock_core::{Result, ShiftClockConfig};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::clock::{Clock, DailyTrigger};
use crate::sweep::{sweep_once, SweepBackoff, SweepOptions};
use crate::tracker::Tracker;

/// Loop timing.
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub sweep: SweepOptions,
    /// Daily loops wake this often.
    pub poll: Duration,
    /// Sleep after a daily transition fires.
    pub refire_guard: Duration,
    /// Deadline for one daily transition.
    pub action_timeout: Duration,
    /// Cap for the daily loops' error backoff.
    pub max_backoff: Duration,
}

impl SchedulerOptions {
    pub fn from_config(config: &ShiftClockConfig) -> Self {
        Self {
            sweep: SweepOptions::from_config(&config.sweep),
            poll: Duration::from_secs(config.schedule.poll_secs.max(1)),
            refire_guard: Duration::from_secs(config.schedule.refire_guard_secs),
            action_timeout: Duration::from_secs(config.schedule.action_timeout_secs.max(1)),
            max_backoff: Duration::from_secs(120),
        }
    }
}

/// A once-a-day transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DailyJob {
    AutoStart,
    AutoStop,
    DailyReset,
}

impl DailyJob {
    pub fn name(&self) -> &'static str {
        match self {
            DailyJob::AutoStart => "auto-start",
            DailyJob::AutoStop => "auto-stop",
            DailyJob::DailyReset => "daily-reset",
        }
    }

    async fn run(self, tracker: &Tracker) -> Result<usize> {
        match self {
            DailyJob::AutoStart => tracker.auto_start().await,
            DailyJob::AutoStop => tracker.auto_stop().await,
            DailyJob::DailyReset => tracker.reset_daily_limits().await.map(|s| s.total()),
        }
    }
}

/// The scheduler supervisor.
pub struct Scheduler {
    token: CancellationToken,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl Scheduler {
    /// Spawn all four loops.
    pub fn start(tracker: Arc<Tracker>, opts: SchedulerOptions) -> Result<Self> {
        let schedule = &tracker.config().schedule;
        let offset = schedule.offset()?;
        let jobs = [
            (DailyJob::AutoStart, schedule.auto_start),
            (DailyJob::AutoStop, schedule.auto_stop),
            (DailyJob::DailyReset, schedule.daily_reset),
        ];

        let token = CancellationToken::new();
        let mut handles = Vec::with_capacity(4);

        handles.push((
            "milestone-sweep",
            tokio::spawn(sweep_loop(tracker.clone(), opts.sweep.clone(), token.clone())),
        ));
        for (job, at) in jobs {
            let trigger = DailyTrigger::new(job.name(), at, offset);
            let t = tracker.clone();
            let action = move || {
                let t = t.clone();
                async move { job.run(&t).await }
            };
            handles.push((
                job.name(),
                tokio::spawn(daily_loop(
                    tracker.clock().clone(),
                    trigger,
                    action,
                    opts.clone(),
                    token.clone(),
                )),
            ));
        }

        tracing::info!(
            "⏰ Scheduler started: sweep every {:?}, daily at {} / {} / {} (UTC{:+})",
            opts.sweep.interval,
            schedule.auto_start,
            schedule.auto_stop,
            schedule.daily_reset,
            schedule.utc_offset_hours
        );
        Ok(Self { token, handles })
    }

    /// Token that stops every loop when cancelled.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_running(&self) -> bool {
        self.handles.iter().any(|(_, h)| !h.is_finished())
    }

    /// Cancel all loops and wait for them to finish.
    pub async fn shutdown(self) {
        self.token.cancel();
        for (name, handle) in self.handles {
            if let Err(e) = handle.await {
                tracing::error!("❌ {name} loop ended abnormally: {e}");
            }
        }
        tracing::info!("⏰ Scheduler stopped");
    }
}

/// Sleep unless cancelled first. Returns false on cancellation.
async fn pause(token: &CancellationToken, d: Duration) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(d) => true,
    }
}

async fn sweep_loop(tracker: Arc<Tracker>, opts: SweepOptions, token: CancellationToken) {
    let mut backoff = SweepBackoff::new();
    let mut delay = opts.interval;

    while pause(&token, delay).await {
        delay = match sweep_once(&tracker, &opts).await {
            Ok(_) => backoff.on_success(&opts),
            Err(e) => {
                let d = backoff.on_error(&opts);
                if backoff.consecutive_errors() == 0 {
                    tracing::error!("❌ Milestone sweep failed repeatedly ({e}); cooling down for {d:?}");
                } else {
                    tracing::warn!("⚠️ Milestone sweep failed: {e}; retry in {d:?}");
                }
                d
            }
        };
    }
    tracing::debug!("milestone-sweep loop exiting");
}

/// Run `action` whenever `trigger` is due. A failed run backs off and is
/// retried until it succeeds or the local date ends.
async fn daily_loop<F, Fut>(
    clock: Arc<dyn Clock>,
    mut trigger: DailyTrigger,
    mut action: F,
    opts: SchedulerOptions,
    token: CancellationToken,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<usize>>,
{
    let name = trigger.name();
    tracing::info!("⏰ {name} loop started (daily at {})", trigger.at());
    let mut failures: u32 = 0;

    loop {
        let delay = if failures == 0 {
            opts.poll
        } else {
            opts.poll
                .saturating_mul(2u32.saturating_pow(failures - 1))
                .min(opts.max_backoff)
        };
        if !pause(&token, delay).await {
            break;
        }

        let now = clock.now();
        if !trigger.is_due(now) {
            if failures > 0 {
                tracing::error!("❌ {name} gave up for the day after {failures} failed attempts");
                failures = 0;
            }
            continue;
        }

        match tokio::time::timeout(opts.action_timeout, action()).await {
            Ok(Ok(count)) => {
                trigger.mark_fired(now);
                failures = 0;
                tracing::info!("✅ {name} done ({count} users)");
                if !pause(&token, opts.refire_guard).await {
                    break;
                }
            }
            Ok(Err(e)) => {
                trigger.mark_failed(now);
                failures += 1;
                tracing::warn!("⚠️ {name} failed (attempt {failures}): {e}; will retry today");
            }
            Err(_) => {
                trigger.mark_failed(now);
                failures += 1;
                tracing::warn!("⚠️ {name} timed out (attempt {failures}); will retry today");
            }
        }
    }
    tracing::debug!("{name} loop exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::{FixedOffset, TimeZone, Utc};
    use shiftclock_core::{DailyTime, ShiftError};

    use crate::clock::ManualClock;

    fn fast_opts() -> SchedulerOptions {
        SchedulerOptions {
            sweep: SweepOptions::default(),
            poll: Duration::from_millis(5),
            refire_guard: Duration::from_millis(5),
            action_timeout: Duration::from_secs(1),
            max_backoff: Duration::from_millis(20),
        }
    }

    fn auto_start_trigger() -> DailyTrigger {
        let offset = FixedOffset::east_opt(-5 * 3600).unwrap();
        DailyTrigger::new("auto-start", DailyTime::new(17, 0), offset)
    }

    async fn wait_for(calls: &AtomicUsize, n: usize) {
        for _ in 0..400 {
            if calls.load(Ordering::SeqCst) >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {n} runs, saw {}", calls.load(Ordering::SeqCst));
    }

    /// Spawns a loop whose first run moves the clock forward and fails.
    fn spawn_flaky(
        clock: Arc<ManualClock>,
        calls: Arc<AtomicUsize>,
        on_failure_advance: i64,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        let action_clock = clock.clone();
        let action = move || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            let clock = action_clock.clone();
            async move {
                if n == 0 {
                    clock.advance(on_failure_advance);
                    Err(ShiftError::Timeout("state write"))
                } else {
                    Ok(3)
                }
            }
        };
        tokio::spawn(daily_loop(clock, auto_start_trigger(), action, fast_opts(), token))
    }

    #[tokio::test]
    async fn test_failed_transition_retried_within_minute() {
        // 17:00:05 local.
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 2, 22, 0, 5).unwrap()));
        let calls = Arc::new(AtomicUsize::new(0));
        let token = CancellationToken::new();
        let handle = spawn_flaky(clock, calls.clone(), 0, token.clone());

        wait_for(&calls, 2).await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        // Fired once the second time; not again the same day.
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_transition_fires_late_after_minute_passes() {
        // 17:00:50 local; the failure pushes the clock to 17:02:50.
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 2, 22, 0, 50).unwrap()));
        let calls = Arc::new(AtomicUsize::new(0));
        let token = CancellationToken::new();
        let handle = spawn_flaky(clock, calls.clone(), 120, token.clone());

        wait_for(&calls, 2).await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_loop_idle_outside_trigger_minute() {
        // 16:59 local.
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 2, 21, 59, 0).unwrap()));
        let calls = Arc::new(AtomicUsize::new(0));
        let token = CancellationToken::new();
        let handle = spawn_flaky(clock, calls.clone(), 0, token.clone());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        token.cancel();
        handle.await.unwrap();
    }

    #[test]
    fn test_action_timeout_has_its_own_key() {
        let mut config = ShiftClockConfig::default();
        config.schedule.action_timeout_secs = 7;
        config.sweep.snapshot_timeout_secs = 99;
        let opts = SchedulerOptions::from_config(&config);
        assert_eq!(opts.action_timeout, Duration::from_secs(7));
    }
}
