//! End-to-end scenarios: tracker, sweep, store and scheduler together.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use shiftclock_core::config::{DailyReset, RankedTier};
use shiftclock_core::{Initiator, ShiftClockConfig, StartMode, TierGroup, UserId};
use shiftclock_scheduler::dispatch::DispatchError;
use shiftclock_scheduler::{
    sweep_once, Dispatcher, ManualClock, Member, Notification, Notifier, NotifyChannel,
    RecordingNotifier, RetryPolicy, Role, Scheduler, SchedulerOptions, StaticDirectory,
    SweepOptions, Tracker,
};

const GOLD_ROLE: u64 = 100;
const MID_ROLE: u64 = 200;
const ALTOS_ROLE: u64 = 301;

struct Harness {
    tracker: Arc<Tracker>,
    clock: Arc<ManualClock>,
    sent: Arc<RecordingNotifier>,
    config: ShiftClockConfig,
    dir: tempfile::TempDir,
}

fn config(dir: &tempfile::TempDir) -> ShiftClockConfig {
    let mut config = ShiftClockConfig::default();
    config.state.path = dir.path().join("user_times.json").display().to_string();
    config.credits.gold.role_id = Some(GOLD_ROLE);
    config.credits.mid.role_id = Some(MID_ROLE);
    config.credits.ranked.insert(
        "altos".into(),
        RankedTier {
            role_id: Some(ALTOS_ROLE),
            credits_per_hour: 7.0,
            rank: 1,
            display_name: Some("Altos".into()),
            aliases: vec![],
            daily_reset: DailyReset::ZeroTime,
        },
    );
    config
}

fn member(id: u64, name: &str, role: Option<u64>) -> Member {
    Member {
        id: UserId(id),
        name: name.into(),
        bot: false,
        roles: role.into_iter().map(|id| Role { id, name: String::new() }).collect(),
    }
}

fn directory() -> StaticDirectory {
    let mut dir = StaticDirectory::new();
    dir.insert(member(1, "Recruit Rita", None));
    dir.insert(member(2, "Gold Gus", Some(GOLD_ROLE)));
    dir.insert(member(3, "Mid Mia", Some(MID_ROLE)));
    dir.insert(member(4, "Altos Al", Some(ALTOS_ROLE)));
    dir
}

/// Local 17:00 on 2026-03-02 (UTC-5).
fn five_pm() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 22, 0, 0).unwrap()
}

async fn open(
    config: ShiftClockConfig,
    clock: Arc<ManualClock>,
    sent: Arc<RecordingNotifier>,
) -> Tracker {
    let policy = RetryPolicy {
        max_attempts: 3,
        attempt_timeout: Duration::from_secs(2),
        base_delay: Duration::from_millis(1),
    };
    open_with(config, clock, sent, policy).await
}

async fn open_with(
    config: ShiftClockConfig,
    clock: Arc<ManualClock>,
    notifier: Arc<dyn Notifier>,
    policy: RetryPolicy,
) -> Tracker {
    let dispatcher = Arc::new(Dispatcher::new(notifier, policy));
    Tracker::open(config, clock, Arc::new(directory()), dispatcher)
        .await
        .unwrap()
}

/// A webhook that never answers.
struct StalledNotifier;

#[async_trait]
impl Notifier for StalledNotifier {
    fn name(&self) -> &str {
        "stalled"
    }

    async fn send(&self, _notification: &Notification) -> Result<(), DispatchError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }
}

async fn harness_with(config_fn: impl FnOnce(&mut ShiftClockConfig)) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(&dir);
    config_fn(&mut config);
    let clock = Arc::new(ManualClock::new(five_pm()));
    let sent = Arc::new(RecordingNotifier::new());
    let tracker = Arc::new(open(config.clone(), clock.clone(), sent.clone()).await);
    Harness { tracker, clock, sent, config, dir }
}

async fn harness() -> Harness {
    harness_with(|_| {}).await
}

fn admin() -> Initiator {
    Initiator { id: UserId(99), name: "admin".into() }
}

fn fast_sweep() -> SweepOptions {
    SweepOptions {
        chunk_pause: Duration::from_millis(1),
        ..SweepOptions::default()
    }
}

#[tokio::test]
async fn test_default_tier_first_hour_scenario() {
    let h = harness().await;
    let report = h.tracker.start(UserId(1), &admin()).await.unwrap();
    assert_eq!(report.mode, StartMode::Immediate);

    h.clock.advance(3600);
    let sweep = sweep_once(&h.tracker, &fast_sweep()).await.unwrap();
    assert_eq!(sweep.milestones, 1);

    let milestones = h.sent.sent_on(NotifyChannel::Milestones);
    assert_eq!(milestones.len(), 1);
    assert!(milestones[0].body.contains("1 hour"));

    let records = h.tracker.records().await;
    let rec = &records[&UserId(1)];
    assert_eq!(rec.confirmed_credits, h.config.credits.recruit.first_hour);
    assert!(rec.milestone_completed);
    assert!(!rec.is_active && !rec.is_paused);

    // A second sweep with unchanged time confirms nothing new.
    let again = sweep_once(&h.tracker, &fast_sweep()).await.unwrap();
    assert_eq!(again.milestones, 0);
    assert_eq!(h.sent.sent_on(NotifyChannel::Milestones).len(), 1);
}

#[tokio::test]
async fn test_extra_minutes_delay_the_milestone() {
    let h = harness().await;
    h.tracker.start(UserId(1), &admin()).await.unwrap();
    h.tracker.add_extra_minutes(UserId(1), 15).await.unwrap();

    h.clock.advance(3600);
    assert_eq!(sweep_once(&h.tracker, &fast_sweep()).await.unwrap().milestones, 0);
    h.clock.advance(15 * 60);
    assert_eq!(sweep_once(&h.tracker, &fast_sweep()).await.unwrap().milestones, 1);
    assert_eq!(h.tracker.records().await[&UserId(1)].extra_minutes, 15);
}

#[tokio::test]
async fn test_stalled_webhook_gets_full_retries_outside_check_deadline() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::new(five_pm()));
    // Retry budget (2 x 300ms) is well past the per-user check deadline.
    let policy = RetryPolicy {
        max_attempts: 2,
        attempt_timeout: Duration::from_millis(300),
        base_delay: Duration::from_millis(1),
    };
    let notifier = Arc::new(StalledNotifier);
    let tracker = Arc::new(open_with(config(&dir), clock.clone(), notifier, policy).await);
    tracker.start(UserId(1), &admin()).await.unwrap();
    clock.advance(3600);

    let opts = SweepOptions {
        user_timeout: Duration::from_millis(200),
        ..fast_sweep()
    };
    let report = sweep_once(&tracker, &opts).await.unwrap();
    assert_eq!(report.milestones, 1);
    assert_eq!(report.user_timeouts, 0);

    let records = tracker.records().await;
    assert_eq!(records[&UserId(1)].notified_milestones, vec![3600]);
    // Every attempt was made, then the drop was recorded.
    let history = tracker.dispatcher().history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].attempts, 2);
    assert!(!history[0].delivered);
}

async fn completed_gold_with_40_credits(h: &Harness) {
    h.tracker.start(UserId(2), &admin()).await.unwrap();
    h.clock.advance(7200);
    let sweep = sweep_once(&h.tracker, &fast_sweep()).await.unwrap();
    assert_eq!(sweep.milestones, 2);
    h.tracker.grant_credits(UserId(2), 28).await.unwrap();

    let records = h.tracker.records().await;
    let rec = &records[&UserId(2)];
    assert!(rec.milestone_completed);
    assert_eq!(rec.confirmed_credits, 40.0);
}

#[tokio::test]
async fn test_midnight_reset_privileged_preserves_history() {
    let h = harness().await;
    completed_gold_with_40_credits(&h).await;

    let summary = h.tracker.reset_daily_limits().await.unwrap();
    assert_eq!(summary.preserved, 1);
    assert_eq!(summary.by_group[&TierGroup::Gold], 1);

    let records = h.tracker.records().await;
    let rec = &records[&UserId(2)];
    assert_eq!(rec.total_time, 7200.0);
    assert_eq!(rec.confirmed_credits, 40.0);
    assert!(!rec.milestone_completed);
    assert!(rec.daily_limit_reset);
    assert!(rec.notified_milestones.is_empty());
}

#[tokio::test]
async fn test_midnight_reset_privileged_zero_time_policy() {
    let h = harness_with(|c| c.credits.gold.daily_reset = DailyReset::ZeroTime).await;
    completed_gold_with_40_credits(&h).await;

    let summary = h.tracker.reset_daily_limits().await.unwrap();
    assert_eq!(summary.zero_time, 1);

    let records = h.tracker.records().await;
    let rec = &records[&UserId(2)];
    assert_eq!(rec.total_time, 0.0);
    assert_eq!(rec.confirmed_credits, 40.0);
    assert!(!rec.milestone_completed);
}

#[tokio::test]
async fn test_state_survives_restart() {
    let h = harness().await;
    h.tracker.start(UserId(1), &admin()).await.unwrap();
    h.tracker.start(UserId(4), &admin()).await.unwrap();
    h.clock.advance(1234);
    h.tracker.pause(UserId(4), &admin()).await.unwrap();
    h.tracker.add_extra_minutes(UserId(1), 7).await.unwrap();
    h.tracker.grant_credits(UserId(3), 3).await.unwrap();
    let before = h.tracker.records().await;

    let reopened = open(h.config.clone(), h.clock.clone(), Arc::new(RecordingNotifier::new())).await;
    assert_eq!(reopened.records().await, before);
    assert!(h.dir.path().join("user_times.json").exists());
}

#[tokio::test]
async fn test_three_pauses_auto_cancel_and_notify() {
    let h = harness().await;
    h.tracker.add_minutes(UserId(3), 50).await.unwrap();
    h.tracker.start(UserId(3), &admin()).await.unwrap();
    for _ in 0..2 {
        h.clock.advance(300);
        h.tracker.pause(UserId(3), &admin()).await.unwrap();
        h.tracker.resume(UserId(3), &admin()).await.unwrap();
    }
    h.clock.advance(300);
    h.tracker.pause(UserId(3), &admin()).await.unwrap();

    let records = h.tracker.records().await;
    let rec = &records[&UserId(3)];
    assert_eq!(rec.total_time, 3600.0);
    assert_eq!(rec.time_lost_on_cancellation, 300.0);
    assert_eq!(rec.pause_count, 0);
    assert_eq!(h.sent.sent_on(NotifyChannel::Cancellations).len(), 1);
}

#[tokio::test]
async fn test_sweep_handles_many_users_in_chunks() {
    let h = harness().await;
    for id in 1000..1040 {
        h.tracker.start(UserId(id), &admin()).await.unwrap();
    }
    h.clock.advance(3600);
    let opts = SweepOptions {
        chunk_size: 15,
        concurrency: 6,
        ..fast_sweep()
    };
    let report = sweep_once(&h.tracker, &opts).await.unwrap();
    assert_eq!(report.active, 40);
    assert_eq!(report.checked, 40);
    assert_eq!(report.milestones, 40);
    assert_eq!(h.sent.sent_on(NotifyChannel::Milestones).len(), 40);
}

#[tokio::test]
async fn test_purge_removes_low_tiers_and_resets_ranked() {
    let h = harness().await;
    for id in 1..=4 {
        h.tracker.start(UserId(id), &admin()).await.unwrap();
    }
    h.tracker.add_extra_minutes(UserId(4), 5).await.unwrap();
    // Past both shifted boundaries: one sweep confirms them together.
    h.clock.advance(7200 + 300);
    sweep_once(&h.tracker, &fast_sweep()).await.unwrap();
    assert!(h.tracker.records().await[&UserId(4)].milestone_completed);

    let summary = h
        .tracker
        .purge_tiers(&[TierGroup::Recruit, TierGroup::Gold, TierGroup::Mid])
        .await
        .unwrap();
    assert_eq!(summary.deleted, 3);
    assert_eq!(summary.remaining, 1);
    assert_eq!(summary.reset, 1);
    assert_eq!(summary.extra_minutes_cleared, 5);

    let records = h.tracker.records().await;
    let rec = &records[&UserId(4)];
    assert_eq!(rec.total_time, 0.0);
    assert_eq!(rec.confirmed_credits, 14.0);
    assert_eq!(rec.extra_minutes, 0);
}

#[tokio::test]
async fn test_scheduler_auto_starts_pre_registered() {
    let h = harness().await;
    h.clock.set(five_pm() - chrono::Duration::hours(2));
    let report = h.tracker.start(UserId(1), &admin()).await.unwrap();
    assert_eq!(report.mode, StartMode::PreRegister);

    h.clock.set(five_pm());
    let mut opts = SchedulerOptions::from_config(&h.config);
    opts.poll = Duration::from_millis(10);
    opts.refire_guard = Duration::from_millis(50);
    opts.sweep.interval = Duration::from_millis(10);
    let scheduler = Scheduler::start(h.tracker.clone(), opts).unwrap();

    let mut started = false;
    for _ in 0..200 {
        if h.tracker.records().await[&UserId(1)].is_active {
            started = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(scheduler.is_running());
    scheduler.shutdown().await;
    assert!(started);
    assert!(h.tracker.pre_registered().await.is_empty());
}
