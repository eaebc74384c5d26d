//! Credit engine. The single place credits are computed.
//!
//! Only whole completed hours count. Results are advisory until the
//! milestone engine writes them into `confirmed_credits`.

use crate::config::CreditTable;
use crate::record::HOUR_SECS;
use crate::tier::Tier;

/// Snap to an integer within this distance, else keep two decimals.
const ROUNDING_EPSILON: f64 = 0.01;

/// Credits earned by `total_seconds` of work at `tier`.
///
/// Negative, NaN or infinite input yields 0.
pub fn compute_credits(total_seconds: f64, tier: &Tier, table: &CreditTable) -> f64 {
    if !total_seconds.is_finite() || total_seconds < 0.0 {
        return 0.0;
    }
    let hours = (total_seconds / HOUR_SECS as f64).floor() as u64;

    let credits = match tier {
        Tier::Mid => match hours {
            0 => 0.0,
            1 => table.mid.first_hour,
            _ => table.mid.second_hour,
        },
        Tier::Ranked(name) => {
            let rate = table
                .ranked
                .get(name)
                .map(|t| t.credits_per_hour)
                .unwrap_or(0.0);
            round_credits(hours as f64 * rate)
        }
        Tier::Gold => hours as f64 * table.gold.per_hour,
        Tier::Recruit => {
            if hours >= 1 {
                table.recruit.first_hour
            } else {
                0.0
            }
        }
    };

    if credits.is_finite() && credits > 0.0 { credits } else { 0.0 }
}

/// Credits added by confirming `boundary`, relative to the tier's
/// previous boundary.
pub fn boundary_increment(boundary: u64, tier: &Tier, table: &CreditTable) -> f64 {
    let previous = tier
        .boundaries()
        .iter()
        .copied()
        .take_while(|b| *b < boundary)
        .last()
        .unwrap_or(0);
    let delta = compute_credits(boundary as f64, tier, table)
        - compute_credits(previous as f64, tier, table);
    round_credits(delta.max(0.0))
}

/// Integer when within epsilon of one, otherwise two decimals.
pub fn round_credits(credits: f64) -> f64 {
    let nearest = credits.round();
    if (credits - nearest).abs() < ROUNDING_EPSILON {
        nearest
    } else {
        (credits * 100.0).round() / 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DailyReset, RankedTier};

    fn table() -> CreditTable {
        let mut table = CreditTable::default();
        table.ranked.insert(
            "altos".into(),
            RankedTier {
                role_id: Some(10),
                credits_per_hour: 6.666666,
                rank: 1,
                display_name: None,
                aliases: vec![],
                daily_reset: DailyReset::ZeroTime,
            },
        );
        table.ranked.insert(
            "supremos".into(),
            RankedTier {
                role_id: Some(11),
                credits_per_hour: 9.999999,
                rank: 5,
                display_name: None,
                aliases: vec![],
                daily_reset: DailyReset::ZeroTime,
            },
        );
        table
    }

    fn all_tiers() -> Vec<Tier> {
        vec![
            Tier::Recruit,
            Tier::Gold,
            Tier::Mid,
            Tier::Ranked("altos".into()),
            Tier::Ranked("supremos".into()),
        ]
    }

    #[test]
    fn test_sub_hour_remainder_never_counts() {
        let t = table();
        for tier in all_tiers() {
            assert_eq!(compute_credits(3599.0, &tier, &t), compute_credits(0.0, &tier, &t));
            assert_eq!(
                compute_credits(7199.9, &tier, &t),
                compute_credits(3600.0, &tier, &t),
                "{tier}"
            );
        }
    }

    #[test]
    fn test_monotonic_in_whole_hours() {
        let t = table();
        for tier in all_tiers() {
            let mut last = 0.0;
            for h in 0..6 {
                let c = compute_credits((h * 3600) as f64, &tier, &t);
                assert!(c >= last, "{tier} dropped at {h}h");
                last = c;
            }
        }
    }

    #[test]
    fn test_tier_formulas() {
        let t = table();
        assert_eq!(compute_credits(3600.0, &Tier::Recruit, &t), 4.0);
        assert_eq!(compute_credits(3.0 * 3600.0, &Tier::Recruit, &t), 4.0);
        assert_eq!(compute_credits(3600.0, &Tier::Mid, &t), 5.0);
        assert_eq!(compute_credits(7200.0, &Tier::Mid, &t), 10.0);
        assert_eq!(compute_credits(7200.0, &Tier::Gold, &t), 12.0);
        assert_eq!(compute_credits(3600.0, &Tier::Ranked("altos".into()), &t), 6.67);
        assert_eq!(compute_credits(7200.0, &Tier::Ranked("supremos".into()), &t), 20.0);
    }

    #[test]
    fn test_defensive_floor() {
        let t = table();
        assert_eq!(compute_credits(-10.0, &Tier::Gold, &t), 0.0);
        assert_eq!(compute_credits(f64::NAN, &Tier::Gold, &t), 0.0);
        assert_eq!(compute_credits(f64::INFINITY, &Tier::Gold, &t), 0.0);
        assert_eq!(compute_credits(3600.0, &Tier::Ranked("unknown".into()), &t), 0.0);
    }

    #[test]
    fn test_boundary_increments_sum_to_total() {
        let t = table();
        for tier in all_tiers() {
            let sum: f64 = tier
                .boundaries()
                .iter()
                .map(|b| boundary_increment(*b, &tier, &t))
                .sum();
            let total = compute_credits(tier.max_boundary() as f64, &tier, &t);
            assert!((sum - total).abs() < 0.011, "{tier}: {sum} vs {total}");
        }
        assert_eq!(boundary_increment(7200, &Tier::Mid, &t), 5.0);
    }
}
