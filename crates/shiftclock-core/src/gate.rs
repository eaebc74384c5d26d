//! Start gate — the wall-clock and role policy applied before a start.

use chrono::NaiveTime;
use serde::Serialize;
use thiserror::Error;

use crate::config::{DailyTime, RolesConfig, ScheduleConfig};
use crate::record::{UserRecord, HOUR_SECS};
use crate::tier::Tier;

/// Why a start was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateError {
    #[error("bots cannot track time")]
    Bot,
    #[error("member does not hold the verified role")]
    NotVerified,
    #[error("starts are closed after {0}")]
    PastCutoff(DailyTime),
    #[error("daily maximum already completed")]
    Completed,
    #[error("{tier} limit of {hours}h already reached")]
    HourCap { tier: String, hours: u64 },
    #[error("time is paused; resume it instead")]
    Paused,
}

/// How an accepted start proceeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StartMode {
    /// Before the auto-start time: queue for the daily start.
    PreRegister,
    /// Start accruing now.
    Immediate,
}

/// What the gate needs to know about the member.
#[derive(Debug, Clone, Default)]
pub struct MemberFacts {
    pub is_bot: bool,
    pub role_ids: Vec<u64>,
}

/// Policy inputs taken from config.
#[derive(Debug, Clone, Copy)]
pub struct StartPolicy {
    pub verified_role_id: Option<u64>,
    pub auto_start: DailyTime,
    pub start_cutoff: DailyTime,
}

impl StartPolicy {
    pub fn from_config(schedule: &ScheduleConfig, roles: &RolesConfig) -> Self {
        Self {
            verified_role_id: roles.verified_role_id,
            auto_start: schedule.auto_start,
            start_cutoff: schedule.start_cutoff,
        }
    }
}

/// Decide whether `record` (if any) may start at local time `local`.
pub fn check_start(
    record: Option<&UserRecord>,
    tier: &Tier,
    member: &MemberFacts,
    local: NaiveTime,
    policy: &StartPolicy,
) -> Result<StartMode, GateError> {
    if member.is_bot {
        return Err(GateError::Bot);
    }
    if let Some(role) = policy.verified_role_id {
        if !member.role_ids.contains(&role) {
            return Err(GateError::NotVerified);
        }
    }
    if policy.start_cutoff.is_reached_by(&local) {
        return Err(GateError::PastCutoff(policy.start_cutoff));
    }

    if let Some(rec) = record {
        if rec.milestone_completed {
            return Err(GateError::Completed);
        }
        let whole_hours = (rec.total_time.max(0.0) / HOUR_SECS as f64).floor() as u64;
        if whole_hours >= tier.hour_cap() {
            return Err(GateError::HourCap {
                tier: tier.to_string(),
                hours: tier.hour_cap(),
            });
        }
        if rec.is_paused {
            return Err(GateError::Paused);
        }
    }

    if policy.auto_start.is_reached_by(&local) {
        Ok(StartMode::Immediate)
    } else {
        Ok(StartMode::PreRegister)
    }
}
