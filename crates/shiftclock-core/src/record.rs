//! Per-user time record, the unit the state store persists.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum pauses before a session is auto-cancelled.
pub const MAX_PAUSES: u8 = 3;

/// Seconds in one whole hour.
pub const HOUR_SECS: u64 = 3600;

/// Stable chat-platform user identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for UserId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(UserId)
    }
}

/// Who asked for a pre-registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Initiator {
    pub id: UserId,
    pub name: String,
}

/// All records, keyed by user.
pub type Records = BTreeMap<UserId, UserRecord>;

/// One tracked person.
///
/// `is_active` and `is_paused` are mutually exclusive; both false means idle.
/// Only the operations in [`crate::session`] and [`crate::milestone`] mutate it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Last-seen display name. Not an identity.
    pub name: String,
    /// Accumulated active seconds, flushed at pause/stop.
    #[serde(default)]
    pub total_time: f64,
    /// Administrative bonus, in minutes. Shifts milestone thresholds only.
    #[serde(default)]
    pub extra_minutes: u32,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub is_paused: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub pause_count: u8,
    /// Hour boundaries (seconds) already confirmed this cycle.
    #[serde(default)]
    pub notified_milestones: Vec<u64>,
    #[serde(default)]
    pub milestone_completed: bool,
    /// The only credit value ever shown to users.
    #[serde(default)]
    pub confirmed_credits: f64,
    #[serde(default)]
    pub is_pre_registered: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_register_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_register_initiator: Option<Initiator>,
    #[serde(default)]
    pub daily_limit_reset: bool,
    #[serde(default)]
    pub time_lost_on_cancellation: f64,
}

impl UserRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            total_time: 0.0,
            extra_minutes: 0,
            is_active: false,
            is_paused: false,
            last_start: None,
            paused_at: None,
            pause_count: 0,
            notified_milestones: Vec::new(),
            milestone_completed: false,
            confirmed_credits: 0.0,
            is_pre_registered: false,
            pre_register_time: None,
            pre_register_initiator: None,
            daily_limit_reset: false,
            time_lost_on_cancellation: 0.0,
        }
    }

    /// Seconds of the in-progress session, zero when not active.
    pub fn current_session(&self, now: DateTime<Utc>) -> f64 {
        match (self.is_active, self.last_start) {
            (true, Some(start)) => elapsed_secs(start, now),
            _ => 0.0,
        }
    }

    /// Persisted total plus the in-progress session.
    pub fn live_total(&self, now: DateTime<Utc>) -> f64 {
        clamp_secs(self.total_time) + self.current_session(now)
    }

    /// How long the record has been paused, zero when not paused.
    pub fn paused_for(&self, now: DateTime<Utc>) -> f64 {
        match (self.is_paused, self.paused_at) {
            (true, Some(at)) => elapsed_secs(at, now),
            _ => 0.0,
        }
    }

    pub fn extra_seconds(&self) -> u64 {
        u64::from(self.extra_minutes) * 60
    }

    pub fn has_notified(&self, boundary: u64) -> bool {
        self.notified_milestones.contains(&boundary)
    }

    pub fn is_idle(&self) -> bool {
        !self.is_active && !self.is_paused
    }
}

/// Wall-clock seconds between two instants, never negative.
pub fn elapsed_secs(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    let ms = (to - from).num_milliseconds();
    if ms <= 0 { 0.0 } else { ms as f64 / 1000.0 }
}

/// Floors negative or non-finite seconds to zero.
pub fn clamp_secs(secs: f64) -> f64 {
    if secs.is_finite() && secs > 0.0 { secs } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 22, 0, 0).unwrap()
    }

    #[test]
    fn test_live_total_includes_running_session() {
        let mut rec = UserRecord::new("ana");
        rec.total_time = 100.0;
        rec.is_active = true;
        rec.last_start = Some(t0());
        assert_eq!(rec.live_total(t0() + Duration::seconds(50)), 150.0);
    }

    #[test]
    fn test_elapsed_never_negative() {
        assert_eq!(elapsed_secs(t0(), t0() - Duration::seconds(10)), 0.0);
        assert_eq!(clamp_secs(f64::NAN), 0.0);
        assert_eq!(clamp_secs(-3.0), 0.0);
    }

    #[test]
    fn test_numeric_keys_survive_json() {
        let mut records = Records::new();
        records.insert(UserId(1430689715761451113), UserRecord::new("ana"));
        let json = serde_json::to_string(&records).unwrap();
        assert!(json.contains("\"1430689715761451113\""));
        let back: Records = serde_json::from_str(&json).unwrap();
        assert_eq!(back, records);
    }

    #[test]
    fn test_missing_fields_default() {
        let rec: UserRecord = serde_json::from_str(r#"{"name":"old"}"#).unwrap();
        assert_eq!(rec.pause_count, 0);
        assert!(rec.is_idle());
    }
}
