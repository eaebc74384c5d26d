//! Notification events — what to say and on which logical channel.
//! Delivery lives in [`crate::dispatch`]; this module only renders text.

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shiftclock_core::format::{format_credits, format_duration};
use shiftclock_core::record::MAX_PAUSES;
use shiftclock_core::{MilestoneHit, UserId};

/// History ring buffer size.
const HISTORY_LIMIT: usize = 100;

/// A fully rendered notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub channel: NotifyChannel,
    /// Title/summary.
    pub title: String,
    /// Body content.
    pub body: String,
    pub priority: NotifyPriority,
    /// What triggered it (command or loop name).
    pub source: String,
    pub timestamp: DateTime<Utc>,
}

/// Notification priority.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NotifyPriority {
    Low,
    Normal,
    High,
    Urgent,
}

/// The three logical destinations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotifyChannel {
    Milestones,
    Pauses,
    Cancellations,
}

impl fmt::Display for NotifyChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotifyChannel::Milestones => write!(f, "milestones"),
            NotifyChannel::Pauses => write!(f, "pauses"),
            NotifyChannel::Cancellations => write!(f, "cancellations"),
        }
    }
}

/// One delivery outcome.
#[derive(Debug, Clone, Serialize)]
pub struct Delivery {
    pub notification: Notification,
    pub delivered: bool,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Keeps the last deliveries for inspection.
#[derive(Debug, Default)]
pub struct NotifyRouter {
    history: VecDeque<Delivery>,
}

impl NotifyRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a delivery outcome.
    pub fn record(&mut self, delivery: Delivery) {
        self.history.push_back(delivery);
        while self.history.len() > HISTORY_LIMIT {
            self.history.pop_front();
        }
    }

    /// Oldest first.
    pub fn history(&self) -> impl Iterator<Item = &Delivery> {
        self.history.iter()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn failures(&self) -> usize {
        self.history.iter().filter(|d| !d.delivered).count()
    }
}

/// Who a notification is about.
#[derive(Debug, Clone, Copy)]
pub struct Subject<'a> {
    pub id: UserId,
    pub name: &'a str,
}

impl fmt::Display for Subject<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

pub fn milestone(
    who: Subject<'_>,
    tier_label: &str,
    hit: &MilestoneHit,
    source: &str,
    now: DateTime<Utc>,
) -> Notification {
    let hours = if hit.hours == 1 { "1 hour".to_string() } else { format!("{} hours", hit.hours) };
    let mut body = format!(
        "{who} [{tier_label}] completed {hours}.\nCredits confirmed: +{} (total {}).",
        format_credits(hit.credits_granted),
        format_credits(hit.confirmed_total),
    );
    if hit.completed {
        body.push_str("\nDaily maximum reached; time stopped.");
    } else if hit.stopped {
        body.push_str("\nTime stopped; it can be started again for the next hour.");
    }
    Notification {
        channel: NotifyChannel::Milestones,
        title: format!("⏰ {hours} confirmed"),
        body,
        priority: NotifyPriority::Normal,
        source: source.to_string(),
        timestamp: now,
    }
}

pub fn paused(
    who: Subject<'_>,
    session_secs: f64,
    total_secs: f64,
    pause_count: u8,
    actor: &str,
    now: DateTime<Utc>,
) -> Notification {
    let mut body = format!(
        "{who} paused by {actor}.\nSession: {}\nTotal: {}\nPauses: {pause_count}/{MAX_PAUSES}",
        format_duration(session_secs),
        format_duration(total_secs),
    );
    let warn = pause_count + 1 >= MAX_PAUSES;
    if warn {
        body.push_str("\n⚠️ One more pause cancels the session.");
    }
    Notification {
        channel: NotifyChannel::Pauses,
        title: "⏸️ Time paused".into(),
        body,
        priority: if warn { NotifyPriority::High } else { NotifyPriority::Low },
        source: "pause".into(),
        timestamp: now,
    }
}

pub fn resumed(who: Subject<'_>, paused_secs: f64, actor: &str, now: DateTime<Utc>) -> Notification {
    Notification {
        channel: NotifyChannel::Pauses,
        title: "▶️ Time resumed".into(),
        body: format!(
            "{who} resumed by {actor} after {}.",
            format_duration(paused_secs)
        ),
        priority: NotifyPriority::Low,
        source: "resume".into(),
        timestamp: now,
    }
}

pub fn cancelled(
    who: Subject<'_>,
    total_secs: f64,
    kept_secs: f64,
    lost_secs: f64,
    actor: &str,
    now: DateTime<Utc>,
) -> Notification {
    Notification {
        channel: NotifyChannel::Cancellations,
        title: "🛑 Time cancelled".into(),
        body: format!(
            "{who} cancelled by {actor}.\nTotal: {}\nKept: {}\nLost: {}",
            format_duration(total_secs),
            format_duration(kept_secs),
            format_duration(lost_secs),
        ),
        priority: NotifyPriority::High,
        source: "cancel".into(),
        timestamp: now,
    }
}

pub fn auto_cancelled(
    who: Subject<'_>,
    kept_secs: f64,
    lost_secs: f64,
    actor: &str,
    now: DateTime<Utc>,
) -> Notification {
    Notification {
        channel: NotifyChannel::Cancellations,
        title: "🚫 Time auto-cancelled".into(),
        body: format!(
            "{who} reached {MAX_PAUSES}/{MAX_PAUSES} pauses (last by {actor}).\nKept: {}\nLost: {}",
            format_duration(kept_secs),
            format_duration(lost_secs),
        ),
        priority: NotifyPriority::Urgent,
        source: "pause".into(),
        timestamp: now,
    }
}
