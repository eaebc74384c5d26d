//! Read-only views over the records: status, snapshots, listings, reports.
//!
//! Nothing here recomputes credits; reports show `confirmed_credits` as stored.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::CreditTable;
use crate::format::whole_hours;
use crate::record::{Initiator, Records, UserId, UserRecord};
use crate::tier::{Tier, TierGroup};

/// Derived display status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Active,
    Finished,
    Paused,
    Inactive,
}

impl Status {
    pub fn of(record: &UserRecord, tier: &Tier, now: DateTime<Utc>) -> Self {
        let hours = whole_hours(record.live_total(now));
        if record.is_active {
            Status::Active
        } else if record.milestone_completed
            || (*tier == Tier::Gold && hours >= 2)
            || (*tier == Tier::Recruit && hours >= 1)
        {
            Status::Finished
        } else if record.is_paused {
            Status::Paused
        } else if record.daily_limit_reset && record.total_time > 0.0 {
            Status::Finished
        } else {
            Status::Inactive
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Active => "active",
            Status::Finished => "finished",
            Status::Paused => "paused",
            Status::Inactive => "inactive",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "active" => Ok(Status::Active),
            "finished" => Ok(Status::Finished),
            "paused" => Ok(Status::Paused),
            "inactive" => Ok(Status::Inactive),
            other => Err(format!("unknown status '{other}'")),
        }
    }
}

/// Per-user view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub id: UserId,
    pub name: String,
    pub tier: Tier,
    pub tier_label: String,
    /// Persisted total plus the in-progress session.
    pub total_secs: f64,
    pub extra_minutes: u32,
    pub confirmed_credits: f64,
    pub pause_count: u8,
    pub status: Status,
    pub paused_secs: f64,
    pub is_pre_registered: bool,
}

impl Snapshot {
    pub fn build(
        id: UserId,
        record: &UserRecord,
        tier: Tier,
        table: &CreditTable,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name: record.name.clone(),
            tier_label: tier.label(table),
            total_secs: record.live_total(now),
            extra_minutes: record.extra_minutes,
            confirmed_credits: record.confirmed_credits.max(0.0),
            pause_count: record.pause_count,
            status: Status::of(record, &tier, now),
            paused_secs: record.paused_for(now),
            is_pre_registered: record.is_pre_registered,
            tier,
        }
    }
}

/// Listing filters. `page` is 1-based.
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub search: Option<String>,
    pub status: Option<Status>,
    pub page: usize,
    pub page_size: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListPage {
    pub entries: Vec<Snapshot>,
    /// 1-based, clamped into range.
    pub page: usize,
    /// Always at least 1.
    pub pages: usize,
    /// Matches before paging.
    pub total: usize,
}

/// Filter, sort by lower-cased name and cut one page.
pub fn list(snapshots: Vec<Snapshot>, query: &ListQuery) -> ListPage {
    let needle = query
        .search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase);

    let mut matched: Vec<Snapshot> = snapshots
        .into_iter()
        .filter(|s| match &needle {
            Some(n) => s.name.to_lowercase().contains(n.as_str()),
            None => true,
        })
        .filter(|s| query.status.is_none_or(|st| s.status == st))
        .collect();
    matched.sort_by_cached_key(|s| (s.name.to_lowercase(), s.id));

    let page_size = query.page_size.max(1);
    let total = matched.len();
    let pages = total.div_ceil(page_size).max(1);
    let page = query.page.clamp(1, pages);
    let entries = matched
        .into_iter()
        .skip((page - 1) * page_size)
        .take(page_size)
        .collect();

    ListPage { entries, page, pages, total }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreRegisteredEntry {
    pub id: UserId,
    pub name: String,
    pub registered_at: Option<DateTime<Utc>>,
    pub initiator: Option<Initiator>,
}

/// Records waiting for the daily auto-start, oldest registration first.
pub fn pre_registered(records: &Records) -> Vec<PreRegisteredEntry> {
    let mut out: Vec<PreRegisteredEntry> = records
        .iter()
        .filter(|(_, r)| r.is_pre_registered)
        .map(|(id, r)| PreRegisteredEntry {
            id: *id,
            name: r.name.clone(),
            registered_at: r.pre_register_time,
            initiator: r.pre_register_initiator.clone(),
        })
        .collect();
    out.sort_by_key(|e| (e.registered_at, e.id));
    out
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentEntry {
    pub id: UserId,
    pub name: String,
    pub tier: Tier,
    pub total_secs: f64,
    pub confirmed_credits: f64,
}

/// Users with time or credits in `group` (all groups when `None`).
pub fn payments<F>(
    records: &Records,
    resolve: F,
    group: Option<TierGroup>,
    now: DateTime<Utc>,
) -> Vec<PaymentEntry>
where
    F: Fn(UserId) -> Tier,
{
    let mut out: Vec<PaymentEntry> = records
        .iter()
        .filter_map(|(id, r)| {
            let tier = resolve(*id);
            if group.is_some_and(|g| tier.group() != g) {
                return None;
            }
            let total_secs = r.live_total(now);
            if total_secs <= 0.0 && r.confirmed_credits <= 0.0 {
                return None;
            }
            Some(PaymentEntry {
                id: *id,
                name: r.name.clone(),
                tier,
                total_secs,
                confirmed_credits: r.confirmed_credits.max(0.0),
            })
        })
        .collect();
    out.sort_by_cached_key(|e| (e.name.to_lowercase(), e.id));
    out
}
