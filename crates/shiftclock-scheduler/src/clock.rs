//! Wall-clock sources and once-a-day triggers.
//!
//! Local time is UTC shifted by a fixed offset (no DST). Triggers match
//! the exact minute and fire at most once per local date.

use std::sync::Mutex;

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, Utc};
use shiftclock_core::DailyTime;

/// Source of "now".
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The real clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A settable clock for tests and dry runs.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(start) }
    }

    pub fn set(&self, t: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = t;
    }

    pub fn advance(&self, secs: i64) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += Duration::seconds(secs);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Local wall-clock view of an instant.
pub fn local(now: DateTime<Utc>, offset: FixedOffset) -> DateTime<FixedOffset> {
    now.with_timezone(&offset)
}

/// Local time of day.
pub fn local_time(now: DateTime<Utc>, offset: FixedOffset) -> NaiveTime {
    local(now, offset).time()
}

/// Fires once per local date when the local minute equals `at`; a failed
/// run is retried later that date.
#[derive(Debug, Clone)]
pub struct DailyTrigger {
    name: &'static str,
    at: DailyTime,
    offset: FixedOffset,
    last_fired: Option<NaiveDate>,
    /// Local date whose run came due but has not succeeded yet.
    pending: Option<NaiveDate>,
}

impl DailyTrigger {
    pub fn new(name: &'static str, at: DailyTime, offset: FixedOffset) -> Self {
        Self {
            name,
            at,
            offset,
            last_fired: None,
            pending: None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn at(&self) -> DailyTime {
        self.at
    }

    /// Whether the trigger is due at `now`: its exact minute, or later the
    /// same local date after a failed run. Does not mark it fired.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        let local = local(now, self.offset);
        let today = Some(local.date_naive());
        if self.last_fired == today {
            return false;
        }
        self.at.matches(&local) || self.pending == today
    }

    /// Record a successful run for the local date of `now`.
    pub fn mark_fired(&mut self, now: DateTime<Utc>) {
        self.last_fired = Some(local(now, self.offset).date_naive());
        self.pending = None;
    }

    /// Record a failed run; the trigger stays due until the local date ends.
    pub fn mark_failed(&mut self, now: DateTime<Utc>) {
        self.pending = Some(local(now, self.offset).date_naive());
    }

    /// Check and mark fired in one step.
    pub fn poll(&mut self, now: DateTime<Utc>) -> bool {
        if !self.is_due(now) {
            return false;
        }
        self.mark_fired(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bogota() -> FixedOffset {
        FixedOffset::east_opt(-5 * 3600).unwrap()
    }

    #[test]
    fn test_local_time_uses_offset() {
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 22, 0, 0).unwrap();
        assert_eq!(local_time(now, bogota()), NaiveTime::from_hms_opt(17, 0, 0).unwrap());
    }

    #[test]
    fn test_trigger_exact_minute_once_per_day() {
        let mut trig = DailyTrigger::new("auto-start", DailyTime::new(17, 0), bogota());
        let before = Utc.with_ymd_and_hms(2026, 3, 2, 21, 59, 30).unwrap();
        let hit = Utc.with_ymd_and_hms(2026, 3, 2, 22, 0, 10).unwrap();
        assert!(!trig.poll(before));
        assert!(trig.poll(hit));
        assert!(!trig.poll(hit + Duration::seconds(30)));
        // Past the minute: no window.
        assert!(!trig.is_due(hit + Duration::seconds(60)));
        // Next local day fires again.
        assert!(trig.poll(hit + Duration::days(1)));
    }

    #[test]
    fn test_failed_run_stays_due_until_local_date_ends() {
        let mut trig = DailyTrigger::new("auto-stop", DailyTime::new(20, 1), bogota());
        // 01:01 UTC next day = 20:01 in Bogota.
        let hit = Utc.with_ymd_and_hms(2026, 3, 3, 1, 1, 40).unwrap();
        assert!(trig.is_due(hit));
        trig.mark_failed(hit);

        let late = hit + Duration::minutes(3);
        assert!(trig.is_due(late));
        trig.mark_fired(late);
        assert!(!trig.is_due(late + Duration::seconds(30)));

        // A failure left over from yesterday does not carry into today.
        let mut trig = DailyTrigger::new("auto-stop", DailyTime::new(20, 1), bogota());
        trig.mark_failed(hit);
        assert!(!trig.is_due(hit + Duration::hours(12)));
        assert!(trig.is_due(hit + Duration::days(1)));
    }

    #[test]
    fn test_midnight_trigger_local_date() {
        let mut trig = DailyTrigger::new("reset", DailyTime::new(0, 0), bogota());
        // 05:00 UTC = 00:00 in Bogota.
        let midnight = Utc.with_ymd_and_hms(2026, 3, 3, 5, 0, 5).unwrap();
        assert!(trig.poll(midnight));
    }

    #[test]
    fn test_manual_clock() {
        let start = Utc.with_ymd_and_hms(2026, 3, 2, 22, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        clock.advance(90);
        assert_eq!(clock.now(), start + Duration::seconds(90));
    }
}
