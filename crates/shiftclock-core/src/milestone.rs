//! Milestone engine — confirms hour boundaries and writes credits.
//!
//! A boundary `H` fires when the live total reaches `H + extra_seconds`
//! and `H` is not yet in `notified_milestones`. Firing marks the boundary,
//! adds its credits to `confirmed_credits` and may stop the session. The
//! caller persists the record before sending any notification, so a crash
//! after persistence never fires the same boundary twice.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::CreditTable;
use crate::credits::{boundary_increment, round_credits};
use crate::record::{UserRecord, HOUR_SECS};
use crate::tier::Tier;

/// One confirmed boundary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MilestoneHit {
    /// Boundary in seconds (3600, 7200).
    pub boundary: u64,
    pub hours: u64,
    /// Credits added by this boundary.
    pub credits_granted: f64,
    /// `confirmed_credits` after this boundary.
    pub confirmed_total: f64,
    /// The session was stopped by this boundary.
    pub stopped: bool,
    /// The tier's daily maximum is reached.
    pub completed: bool,
    /// Live total at confirmation time.
    pub total_secs: f64,
}

/// Check an active record against its tier's boundaries.
///
/// Paused or idle records are left alone. Returns the boundaries confirmed
/// by this call, in ascending order; calling again with unchanged time
/// returns nothing.
pub fn check_milestones(
    record: &mut UserRecord,
    tier: &Tier,
    table: &CreditTable,
    now: DateTime<Utc>,
) -> Vec<MilestoneHit> {
    if !record.is_active || record.is_paused {
        return Vec::new();
    }

    let live = record.live_total(now);
    let extra = record.extra_seconds() as f64;
    let max_boundary = tier.max_boundary();
    let mut hits = Vec::new();

    for &boundary in tier.boundaries() {
        if record.has_notified(boundary) || live < boundary as f64 + extra {
            continue;
        }

        record.notified_milestones.push(boundary);
        let granted = boundary_increment(boundary, tier, table);
        record.confirmed_credits = round_credits(record.confirmed_credits.max(0.0) + granted);

        let completed = boundary == max_boundary;
        let stopped = completed || tier.stops_at_intermediate();
        if stopped {
            record.stop(now);
        }
        if completed {
            record.milestone_completed = true;
        }

        hits.push(MilestoneHit {
            boundary,
            hours: boundary / HOUR_SECS,
            credits_granted: granted,
            confirmed_total: record.confirmed_credits,
            stopped,
            completed,
            total_secs: live,
        });
    }

    hits
}
