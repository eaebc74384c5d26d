//! # ShiftClock Core
//!
//! Pure domain logic for tiered work-time tracking. No async, no clocks:
//! every operation takes `now` from the caller.
//!
//! ## Architecture
//! ```text
//! UserRecord ── session  (start / pause / resume / stop / cancel / resets)
//!            ── milestone (hour boundaries → confirmed credits)
//!                  └── credits (the only credit formula)
//! gate   — start policy (role, cutoff, hour cap, pre-registration)
//! query  — status, snapshots, listings, payment reports
//! ```

pub mod config;
pub mod credits;
pub mod error;
pub mod format;
pub mod gate;
pub mod milestone;
pub mod query;
pub mod record;
pub mod session;
pub mod tier;

pub use config::{CreditTable, DailyReset, DailyTime, ShiftClockConfig};
pub use credits::compute_credits;
pub use error::{Result, ShiftError};
pub use gate::{GateError, MemberFacts, StartMode, StartPolicy};
pub use milestone::{check_milestones, MilestoneHit};
pub use query::{ListPage, ListQuery, PaymentEntry, PreRegisteredEntry, Snapshot, Status};
pub use record::{Initiator, Records, UserId, UserRecord};
pub use session::{CancelOutcome, PauseOutcome, SessionError, StopOutcome};
pub use tier::{Tier, TierGroup};
