//! Human formatting for durations and credits.

use crate::record::clamp_secs;

/// "2h 05m 09s", "12m 00s", "40s". Sub-second parts are dropped.
pub fn format_duration(secs: f64) -> String {
    let total = clamp_secs(secs).floor() as u64;
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h > 0 {
        format!("{h}h {m:02}m {s:02}s")
    } else if m > 0 {
        format!("{m}m {s:02}s")
    } else {
        format!("{s}s")
    }
}

/// Integer when whole, otherwise two decimals.
pub fn format_credits(credits: f64) -> String {
    let credits = clamp_secs(credits);
    if (credits - credits.round()).abs() < f64::EPSILON * 16.0 {
        format!("{}", credits.round() as u64)
    } else {
        format!("{credits:.2}")
    }
}

/// Whole hours in `secs`.
pub fn whole_hours(secs: f64) -> u64 {
    (clamp_secs(secs) / 3600.0).floor() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0.0), "0s");
        assert_eq!(format_duration(59.9), "59s");
        assert_eq!(format_duration(720.0), "12m 00s");
        assert_eq!(format_duration(7509.0), "2h 05m 09s");
        assert_eq!(format_duration(-4.0), "0s");
    }

    #[test]
    fn test_format_credits() {
        assert_eq!(format_credits(40.0), "40");
        assert_eq!(format_credits(6.67), "6.67");
        assert_eq!(format_credits(f64::NAN), "0");
    }
}
