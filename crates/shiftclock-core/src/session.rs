//! Session engine — legal state transitions on a single record.
//!
//! Every operation takes `now` explicitly; the engine knows nothing about
//! wall-clock policy. A failed precondition returns an error and leaves the
//! record untouched.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::record::{clamp_secs, elapsed_secs, Initiator, UserRecord, HOUR_SECS, MAX_PAUSES};
use crate::tier::Tier;

/// Rejected session operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("time is already running")]
    AlreadyActive,
    #[error("time is paused; resume it instead")]
    Paused,
    #[error("no running time to pause")]
    NotActive,
    #[error("time is not paused")]
    NotPaused,
    #[error("already pre-registered")]
    AlreadyPreRegistered,
    #[error("not pre-registered")]
    NotPreRegistered,
    #[error("quantity must be positive (got {0})")]
    InvalidQuantity(i64),
    #[error("no extra minutes to remove")]
    NoExtraMinutes,
}

/// Result of a successful pause.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PauseOutcome {
    Paused {
        session_secs: f64,
        total_secs: f64,
        pause_count: u8,
    },
    /// The pause limit was hit; only whole hours were kept.
    AutoCancelled {
        session_secs: f64,
        kept_secs: f64,
        lost_secs: f64,
    },
}

/// Result of a stop.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StopOutcome {
    Stopped { session_secs: f64 },
    PauseCleared,
    AlreadyIdle,
}

impl StopOutcome {
    pub fn changed(&self) -> bool {
        !matches!(self, StopOutcome::AlreadyIdle)
    }
}

/// Result of a cancellation that keeps whole hours.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CancelOutcome {
    pub total_secs: f64,
    pub kept_secs: f64,
    pub lost_secs: f64,
}

fn positive(n: i64) -> Result<u64, SessionError> {
    if n > 0 { Ok(n as u64) } else { Err(SessionError::InvalidQuantity(n)) }
}

/// Positive minutes as seconds; quantities whose seconds overflow are rejected.
fn minutes_to_secs(n: i64) -> Result<f64, SessionError> {
    positive(n)?
        .checked_mul(60)
        .map(|secs| secs as f64)
        .ok_or(SessionError::InvalidQuantity(n))
}

fn whole_hours(secs: f64) -> f64 {
    let secs = clamp_secs(secs);
    (secs / HOUR_SECS as f64).floor() * HOUR_SECS as f64
}

impl UserRecord {
    /// Flag the record for the daily auto-start.
    pub fn pre_register(
        &mut self,
        initiator: Initiator,
        now: DateTime<Utc>,
    ) -> Result<(), SessionError> {
        if self.is_pre_registered {
            return Err(SessionError::AlreadyPreRegistered);
        }
        if self.is_active {
            return Err(SessionError::AlreadyActive);
        }
        if self.is_paused {
            return Err(SessionError::Paused);
        }
        self.is_pre_registered = true;
        self.pre_register_time = Some(now);
        self.pre_register_initiator = Some(initiator);
        Ok(())
    }

    /// Begin accruing time.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), SessionError> {
        if self.is_active {
            return Err(SessionError::AlreadyActive);
        }
        if self.is_paused {
            return Err(SessionError::Paused);
        }
        self.is_active = true;
        self.last_start = Some(now);
        self.clear_pre_registration();
        Ok(())
    }

    /// Start a pre-registered record (daily auto-start).
    pub fn start_from_pre_register(&mut self, now: DateTime<Utc>) -> Result<(), SessionError> {
        if !self.is_pre_registered {
            return Err(SessionError::NotPreRegistered);
        }
        self.start(now)
    }

    /// Flush elapsed time and pause.
    ///
    /// The third pause of an escalating tier auto-cancels instead: whole
    /// hours are kept, the remainder is discarded and the record goes idle.
    pub fn pause(&mut self, tier: &Tier, now: DateTime<Utc>) -> Result<PauseOutcome, SessionError> {
        if !self.is_active {
            return Err(SessionError::NotActive);
        }
        let session_secs = self.flush(now);

        let next_count = self.pause_count.saturating_add(1);
        if tier.escalates_pauses() && next_count >= MAX_PAUSES {
            let (kept_secs, lost_secs) = self.truncate_to_hours();
            self.is_paused = false;
            self.paused_at = None;
            self.pause_count = 0;
            return Ok(PauseOutcome::AutoCancelled {
                session_secs,
                kept_secs,
                lost_secs,
            });
        }

        self.is_paused = true;
        self.paused_at = Some(now);
        self.pause_count = next_count.min(MAX_PAUSES - 1);
        Ok(PauseOutcome::Paused {
            session_secs,
            total_secs: self.total_time,
            pause_count: self.pause_count,
        })
    }

    /// Resume a paused record. Returns how long it was paused.
    pub fn resume(&mut self, now: DateTime<Utc>) -> Result<f64, SessionError> {
        if !self.is_paused {
            return Err(SessionError::NotPaused);
        }
        let paused_secs = self.paused_for(now);
        self.is_paused = false;
        self.paused_at = None;
        self.is_active = true;
        self.last_start = Some(now);
        Ok(paused_secs)
    }

    /// Stop accruing. Idempotent.
    pub fn stop(&mut self, now: DateTime<Utc>) -> StopOutcome {
        if self.is_active {
            let session_secs = self.flush(now);
            StopOutcome::Stopped { session_secs }
        } else if self.is_paused {
            self.is_paused = false;
            self.paused_at = None;
            StopOutcome::PauseCleared
        } else {
            StopOutcome::AlreadyIdle
        }
    }

    /// Stop, then keep only whole hours. Credits are untouched.
    pub fn cancel_keep_hours(&mut self, now: DateTime<Utc>) -> CancelOutcome {
        self.stop(now);
        let total_secs = clamp_secs(self.total_time);
        let (kept_secs, lost_secs) = self.truncate_to_hours();
        self.pause_count = 0;
        self.clear_pre_registration();
        CancelOutcome {
            total_secs,
            kept_secs,
            lost_secs,
        }
    }

    /// Add `minutes` to the base time. Returns the new total.
    pub fn add_minutes(&mut self, minutes: i64) -> Result<f64, SessionError> {
        let secs = minutes_to_secs(minutes)?;
        self.total_time = clamp_secs(self.total_time) + secs;
        Ok(self.total_time)
    }

    /// Remove `minutes` from the base time, floored at zero.
    pub fn subtract_minutes(&mut self, minutes: i64) -> Result<f64, SessionError> {
        let secs = minutes_to_secs(minutes)?;
        self.total_time = clamp_secs(self.total_time - secs);
        Ok(self.total_time)
    }

    /// Grant extra minutes. Returns the new extra total.
    pub fn add_extra_minutes(&mut self, minutes: i64) -> Result<u32, SessionError> {
        let minutes = positive(minutes)?;
        let minutes = u32::try_from(minutes).unwrap_or(u32::MAX);
        self.extra_minutes = self.extra_minutes.saturating_add(minutes);
        Ok(self.extra_minutes)
    }

    /// Withdraw extra minutes, never more than granted. Returns the amount removed.
    pub fn subtract_extra_minutes(&mut self, minutes: i64) -> Result<u32, SessionError> {
        let minutes = positive(minutes)?;
        if self.extra_minutes == 0 {
            return Err(SessionError::NoExtraMinutes);
        }
        let removed = u32::try_from(minutes).unwrap_or(u32::MAX).min(self.extra_minutes);
        self.extra_minutes -= removed;
        Ok(removed)
    }

    /// Zero time, pauses, extras and milestones. Credits are kept.
    pub fn reset_to_zero(&mut self) {
        self.total_time = 0.0;
        self.pause_count = 0;
        self.extra_minutes = 0;
        self.notified_milestones.clear();
        self.milestone_completed = false;
        self.daily_limit_reset = false;
        self.time_lost_on_cancellation = 0.0;
        self.clear_flags();
    }

    /// Midnight reset for tiers that carry time across days.
    pub fn reset_daily_limit_preserve_history(&mut self, confirmed_credits: f64, historical_time: f64) {
        self.reset_daily_limit(confirmed_credits, clamp_secs(historical_time));
    }

    /// Midnight reset for tiers that restart from zero.
    pub fn reset_daily_limit_zero_time(&mut self, confirmed_credits: f64) {
        self.reset_daily_limit(confirmed_credits, 0.0);
    }

    fn reset_daily_limit(&mut self, confirmed_credits: f64, total_time: f64) {
        self.total_time = total_time;
        self.confirmed_credits = clamp_secs(confirmed_credits);
        self.milestone_completed = false;
        self.notified_milestones.clear();
        self.pause_count = 0;
        self.extra_minutes = 0;
        self.daily_limit_reset = true;
        self.clear_flags();
    }

    /// Add credits directly. Returns the new confirmed total.
    pub fn grant_credits(&mut self, amount: i64) -> Result<f64, SessionError> {
        let amount = positive(amount)?;
        self.confirmed_credits = clamp_secs(self.confirmed_credits) + amount as f64;
        Ok(self.confirmed_credits)
    }

    /// Remove credits, floored at zero. Returns the amount actually removed.
    pub fn withdraw_credits(&mut self, amount: i64) -> Result<f64, SessionError> {
        let amount = positive(amount)? as f64;
        let current = clamp_secs(self.confirmed_credits);
        let remaining = (current - amount).max(0.0);
        self.confirmed_credits = remaining;
        Ok(current - remaining)
    }

    /// Accumulate the running session into `total_time` and go inactive.
    fn flush(&mut self, now: DateTime<Utc>) -> f64 {
        let session = self.last_start.map(|s| elapsed_secs(s, now)).unwrap_or(0.0);
        self.total_time = clamp_secs(self.total_time) + session;
        self.is_active = false;
        self.last_start = None;
        session
    }

    fn truncate_to_hours(&mut self) -> (f64, f64) {
        let total = clamp_secs(self.total_time);
        let kept = whole_hours(total);
        let lost = total - kept;
        self.total_time = kept;
        self.time_lost_on_cancellation = lost;
        (kept, lost)
    }

    fn clear_flags(&mut self) {
        self.is_active = false;
        self.is_paused = false;
        self.last_start = None;
        self.paused_at = None;
        self.clear_pre_registration();
    }

    fn clear_pre_registration(&mut self) {
        self.is_pre_registered = false;
        self.pre_register_time = None;
        self.pre_register_initiator = None;
    }
}
