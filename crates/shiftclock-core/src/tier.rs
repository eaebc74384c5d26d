//! Tiers: role categories with their own rates and hour policies.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::{CreditTable, DailyReset};
use crate::record::HOUR_SECS;

const ONE_HOUR: &[u64] = &[HOUR_SECS];
const TWO_HOURS: &[u64] = &[HOUR_SECS, 2 * HOUR_SECS];

/// A user's tier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Default tier, no special role. One hour per day.
    Recruit,
    /// Privileged flat-rate tier.
    Gold,
    /// Low-volume tier with two discrete payouts.
    Mid,
    /// A configured ranked tier, by name.
    Ranked(String),
}

impl Tier {
    /// Hour boundaries (seconds) at which time is confirmed, ascending.
    pub fn boundaries(&self) -> &'static [u64] {
        match self {
            Tier::Recruit => ONE_HOUR,
            Tier::Gold | Tier::Mid | Tier::Ranked(_) => TWO_HOURS,
        }
    }

    /// The last boundary: reaching it completes the day.
    pub fn max_boundary(&self) -> u64 {
        self.boundaries().last().copied().unwrap_or(HOUR_SECS)
    }

    /// Whole hours a member of this tier may accumulate.
    pub fn hour_cap(&self) -> u64 {
        self.max_boundary() / HOUR_SECS
    }

    /// Whether confirming an intermediate boundary also stops the session.
    pub fn stops_at_intermediate(&self) -> bool {
        matches!(self, Tier::Mid | Tier::Ranked(_))
    }

    /// Whether the third pause auto-cancels the session.
    pub fn escalates_pauses(&self) -> bool {
        !matches!(self, Tier::Gold)
    }

    /// Midnight policy for completed records of this tier.
    pub fn daily_reset(&self, table: &CreditTable) -> DailyReset {
        match self {
            Tier::Recruit => table.recruit.daily_reset,
            Tier::Gold => table.gold.daily_reset,
            Tier::Mid => table.mid.daily_reset,
            Tier::Ranked(name) => table
                .ranked
                .get(name)
                .map(|t| t.daily_reset)
                .unwrap_or(DailyReset::ZeroTime),
        }
    }

    /// Human label, using a ranked tier's configured display name if any.
    pub fn label(&self, table: &CreditTable) -> String {
        match self {
            Tier::Ranked(name) => table
                .ranked
                .get(name)
                .and_then(|t| t.display_name.clone())
                .unwrap_or_else(|| capitalize(name)),
            other => other.to_string(),
        }
    }

    /// Coarse grouping used by payment reports.
    pub fn group(&self) -> TierGroup {
        match self {
            Tier::Recruit => TierGroup::Recruit,
            Tier::Gold => TierGroup::Gold,
            Tier::Mid => TierGroup::Mid,
            Tier::Ranked(_) => TierGroup::Ranked,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Recruit => write!(f, "Recruit"),
            Tier::Gold => write!(f, "Gold"),
            Tier::Mid => write!(f, "Mid"),
            Tier::Ranked(name) => write!(f, "{}", capitalize(name)),
        }
    }
}

/// Tier families for reports and bulk operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierGroup {
    Recruit,
    Gold,
    Mid,
    Ranked,
}

impl std::str::FromStr for TierGroup {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "recruit" => Ok(TierGroup::Recruit),
            "gold" => Ok(TierGroup::Gold),
            "mid" => Ok(TierGroup::Mid),
            "ranked" => Ok(TierGroup::Ranked),
            other => Err(format!("unknown tier group '{other}'")),
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RankedTier;

    #[test]
    fn test_boundaries_per_tier() {
        assert_eq!(Tier::Recruit.boundaries(), &[3600]);
        assert_eq!(Tier::Gold.boundaries(), &[3600, 7200]);
        assert_eq!(Tier::Ranked("altos".into()).max_boundary(), 7200);
        assert_eq!(Tier::Recruit.hour_cap(), 1);
    }

    #[test]
    fn test_policies() {
        assert!(!Tier::Gold.stops_at_intermediate());
        assert!(Tier::Mid.stops_at_intermediate());
        assert!(!Tier::Gold.escalates_pauses());
        assert!(Tier::Recruit.escalates_pauses());
    }

    #[test]
    fn test_daily_reset_policy_from_table() {
        let mut table = CreditTable::default();
        table.ranked.insert(
            "altos".into(),
            RankedTier {
                role_id: Some(1),
                credits_per_hour: 7.0,
                rank: 1,
                display_name: Some("Altos".into()),
                aliases: vec![],
                daily_reset: DailyReset::ZeroTime,
            },
        );
        assert_eq!(Tier::Ranked("altos".into()).daily_reset(&table), DailyReset::ZeroTime);
        assert_eq!(Tier::Gold.daily_reset(&table), DailyReset::PreserveHistory);
        assert_eq!(Tier::Ranked("nobleza".into()).label(&table), "Nobleza");
    }
}
