//! # ShiftClock Scheduler
//!
//! State store, notification dispatch and the autonomous daily scheduler.
//! File-based state, tokio timers only.
//!
//! ## Architecture
//! ```text
//! Scheduler (supervisor, CancellationToken)
//!   ├── milestone sweep: every 15s → chunks → Semaphore(6) → Tracker::confirm_milestones → announce
//!   ├── auto-start  17:00 → Tracker::auto_start
//!   ├── auto-stop   20:01 → Tracker::auto_stop
//!   └── reset       00:00 → Tracker::reset_daily_limits
//!
//! Tracker (records under one lock)
//!   ├── mutate → commit (generation, JSON) → RecordStore (tmp + rename)
//!   └── notify → Dispatcher (retry, timeout, backoff) → Notifier
//!                  ├── WebhookNotifier (one webhook per channel)
//!                  └── LogNotifier
//! ```

pub mod clock;
pub mod directory;
pub mod dispatch;
pub mod engine;
pub mod notify;
pub mod store;
pub mod sweep;
pub mod tracker;

pub use clock::{Clock, DailyTrigger, ManualClock, SystemClock};
pub use directory::{AliasFallback, Member, MemberDirectory, Role, StaticDirectory, TierResolver};
pub use dispatch::{Dispatcher, LogNotifier, Notifier, RecordingNotifier, RetryPolicy, WebhookNotifier};
pub use engine::{Scheduler, SchedulerOptions};
pub use notify::{Notification, NotifyChannel, NotifyPriority, NotifyRouter};
pub use store::RecordStore;
pub use sweep::{sweep_once, SweepBackoff, SweepOptions, SweepReport};
pub use tracker::{MilestoneBatch, PurgeSummary, ResetSummary, StartReport, Tracker};
