//! ShiftClock configuration system.
//!
//! Loaded once at startup from TOML; the core never re-derives it.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{FixedOffset, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ShiftError};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShiftClockConfig {
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
    #[serde(default)]
    pub credits: CreditTable,
    #[serde(default)]
    pub roles: RolesConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub directory: DirectoryConfig,
    #[serde(default)]
    pub members: Vec<MemberConfig>,
}

impl ShiftClockConfig {
    /// Load config from the default path (~/.shiftclock/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ShiftError::Config(format!("Failed to read config: {e}")))?;
        let config = Self::parse(&content)?;
        tracing::debug!("📋 Loaded config from {}", path.display());
        Ok(config)
    }

    /// Parse and validate a TOML document.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| ShiftError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the ShiftClock home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".shiftclock")
    }

    fn validate(&self) -> Result<()> {
        self.schedule.offset()?;
        if self.sweep.concurrency == 0 || self.sweep.chunk_size == 0 {
            return Err(ShiftError::Config(
                "sweep.concurrency and sweep.chunk_size must be at least 1".into(),
            ));
        }
        if self.notify.max_attempts == 0 {
            return Err(ShiftError::Config("notify.max_attempts must be at least 1".into()));
        }
        for (name, tier) in &self.credits.ranked {
            if !tier.credits_per_hour.is_finite() || tier.credits_per_hour < 0.0 {
                return Err(ShiftError::Config(format!(
                    "credits.ranked.{name}.credits_per_hour must be a non-negative number"
                )));
            }
        }
        Ok(())
    }
}

/// State file configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    #[serde(default = "default_state_path")]
    pub path: String,
    #[serde(default = "default_io_timeout")]
    pub io_timeout_secs: u64,
}

fn default_state_path() -> String { "~/.shiftclock/user_times.json".into() }
fn default_io_timeout() -> u64 { 10 }

impl StateConfig {
    /// State file path with `~` expanded.
    pub fn resolved_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.path).to_string())
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: default_state_path(),
            io_timeout_secs: default_io_timeout(),
        }
    }
}

/// Wall-clock policy for the daily transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Local time = UTC + this many hours (America/Bogota is -5, no DST).
    #[serde(default = "default_utc_offset")]
    pub utc_offset_hours: i32,
    #[serde(default = "default_auto_start")]
    pub auto_start: DailyTime,
    #[serde(default = "default_auto_stop")]
    pub auto_stop: DailyTime,
    #[serde(default = "default_daily_reset")]
    pub daily_reset: DailyTime,
    /// No manual starts at or after this local time.
    #[serde(default = "default_start_cutoff")]
    pub start_cutoff: DailyTime,
    #[serde(default = "default_poll_secs")]
    pub poll_secs: u64,
    #[serde(default = "default_refire_guard")]
    pub refire_guard_secs: u64,
    /// Deadline for one daily transition run.
    #[serde(default = "default_action_timeout")]
    pub action_timeout_secs: u64,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_utc_offset() -> i32 { -5 }
fn default_auto_start() -> DailyTime { DailyTime::new(17, 0) }
fn default_auto_stop() -> DailyTime { DailyTime::new(20, 1) }
fn default_daily_reset() -> DailyTime { DailyTime::new(0, 0) }
fn default_start_cutoff() -> DailyTime { DailyTime::new(19, 1) }
fn default_poll_secs() -> u64 { 30 }
fn default_refire_guard() -> u64 { 70 }
fn default_action_timeout() -> u64 { 20 }
fn default_page_size() -> usize { 20 }

impl ScheduleConfig {
    pub fn offset(&self) -> Result<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_hours * 3600).ok_or_else(|| {
            ShiftError::Config(format!(
                "schedule.utc_offset_hours out of range: {}",
                self.utc_offset_hours
            ))
        })
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            utc_offset_hours: default_utc_offset(),
            auto_start: default_auto_start(),
            auto_stop: default_auto_stop(),
            daily_reset: default_daily_reset(),
            start_cutoff: default_start_cutoff(),
            poll_secs: default_poll_secs(),
            refire_guard_secs: default_refire_guard(),
            action_timeout_secs: default_action_timeout(),
            page_size: default_page_size(),
        }
    }
}

/// A local wall-clock minute, written "HH:MM".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DailyTime {
    pub hour: u32,
    pub minute: u32,
}

impl DailyTime {
    pub const fn new(hour: u32, minute: u32) -> Self {
        Self { hour, minute }
    }

    /// Exact minute match (no window).
    pub fn matches<T: Timelike>(&self, t: &T) -> bool {
        t.hour() == self.hour && t.minute() == self.minute
    }

    /// True when `t` is at or past this minute of the same day.
    pub fn is_reached_by(&self, t: &NaiveTime) -> bool {
        (t.hour(), t.minute()) >= (self.hour, self.minute)
    }
}

impl TryFrom<String> for DailyTime {
    type Error = String;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        let (h, m) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| format!("expected HH:MM, got '{s}'"))?;
        let hour: u32 = h.parse().map_err(|_| format!("bad hour in '{s}'"))?;
        let minute: u32 = m.parse().map_err(|_| format!("bad minute in '{s}'"))?;
        if hour > 23 || minute > 59 {
            return Err(format!("time out of range: '{s}'"));
        }
        Ok(Self { hour, minute })
    }
}

impl From<DailyTime> for String {
    fn from(t: DailyTime) -> Self {
        t.to_string()
    }
}

impl fmt::Display for DailyTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

/// Milestone sweep tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    #[serde(default = "default_sweep_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_sweep_max_interval")]
    pub max_interval_secs: u64,
    #[serde(default = "default_max_users")]
    pub max_users: usize,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_user_timeout")]
    pub user_timeout_secs: u64,
    #[serde(default = "default_chunk_timeout")]
    pub chunk_timeout_secs: u64,
    #[serde(default = "default_chunk_pause")]
    pub chunk_pause_ms: u64,
    #[serde(default = "default_snapshot_timeout")]
    pub snapshot_timeout_secs: u64,
    #[serde(default = "default_max_errors")]
    pub max_errors: u32,
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
}

fn default_sweep_interval() -> u64 { 15 }
fn default_sweep_max_interval() -> u64 { 60 }
fn default_max_users() -> usize { 120 }
fn default_chunk_size() -> usize { 15 }
fn default_concurrency() -> usize { 6 }
fn default_user_timeout() -> u64 { 20 }
fn default_chunk_timeout() -> u64 { 45 }
fn default_chunk_pause() -> u64 { 300 }
fn default_snapshot_timeout() -> u64 { 30 }
fn default_max_errors() -> u32 { 3 }
fn default_cooldown() -> u64 { 90 }

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_sweep_interval(),
            max_interval_secs: default_sweep_max_interval(),
            max_users: default_max_users(),
            chunk_size: default_chunk_size(),
            concurrency: default_concurrency(),
            user_timeout_secs: default_user_timeout(),
            chunk_timeout_secs: default_chunk_timeout(),
            chunk_pause_ms: default_chunk_pause(),
            snapshot_timeout_secs: default_snapshot_timeout(),
            max_errors: default_max_errors(),
            cooldown_secs: default_cooldown(),
        }
    }
}

/// What the midnight transition does to a completed record's time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DailyReset {
    /// Restart from zero each day; credits kept.
    ZeroTime,
    /// Carry accumulated time across days; credits kept.
    PreserveHistory,
}

/// Per-tier credit rates, role identifiers and reset policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreditTable {
    #[serde(default)]
    pub recruit: RecruitTier,
    #[serde(default)]
    pub gold: GoldTier,
    #[serde(default)]
    pub mid: MidTier,
    /// Ranked tiers by name (e.g. "altos", "supremos").
    #[serde(default)]
    pub ranked: BTreeMap<String, RankedTier>,
}

/// Default tier: one fixed amount once the first hour is done.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecruitTier {
    #[serde(default = "default_recruit_hour")]
    pub first_hour: f64,
    #[serde(default = "default_preserve")]
    pub daily_reset: DailyReset,
}

fn default_recruit_hour() -> f64 { 4.0 }
fn default_preserve() -> DailyReset { DailyReset::PreserveHistory }
fn default_zero() -> DailyReset { DailyReset::ZeroTime }

impl Default for RecruitTier {
    fn default() -> Self {
        Self {
            first_hour: default_recruit_hour(),
            daily_reset: default_preserve(),
        }
    }
}

/// Privileged tier: flat elevated rate per whole hour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoldTier {
    #[serde(default)]
    pub role_id: Option<u64>,
    #[serde(default = "default_gold_rate")]
    pub per_hour: f64,
    #[serde(default = "default_gold_aliases")]
    pub aliases: Vec<String>,
    #[serde(default = "default_preserve")]
    pub daily_reset: DailyReset,
}

fn default_gold_rate() -> f64 { 6.0 }
fn default_gold_aliases() -> Vec<String> { vec!["gold".into()] }

impl Default for GoldTier {
    fn default() -> Self {
        Self {
            role_id: None,
            per_hour: default_gold_rate(),
            aliases: default_gold_aliases(),
            daily_reset: default_preserve(),
        }
    }
}

/// Low-volume tier: two discrete thresholds, not a rate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MidTier {
    #[serde(default)]
    pub role_id: Option<u64>,
    #[serde(default = "default_mid_first")]
    pub first_hour: f64,
    #[serde(default = "default_mid_second")]
    pub second_hour: f64,
    #[serde(default = "default_mid_aliases")]
    pub aliases: Vec<String>,
    #[serde(default = "default_preserve")]
    pub daily_reset: DailyReset,
}

fn default_mid_first() -> f64 { 5.0 }
fn default_mid_second() -> f64 { 10.0 }
fn default_mid_aliases() -> Vec<String> { vec!["medios".into(), "medio".into()] }

impl Default for MidTier {
    fn default() -> Self {
        Self {
            role_id: None,
            first_hour: default_mid_first(),
            second_hour: default_mid_second(),
            aliases: default_mid_aliases(),
            daily_reset: default_preserve(),
        }
    }
}

/// A ranked tier paid per whole hour at a configured rate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedTier {
    #[serde(default)]
    pub role_id: Option<u64>,
    #[serde(default)]
    pub credits_per_hour: f64,
    /// Higher rank wins when a member holds several tier roles.
    #[serde(default)]
    pub rank: u8,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default = "default_zero")]
    pub daily_reset: DailyReset,
}

/// Role identifiers that gate commands.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RolesConfig {
    /// Members must hold this role before their time can be started.
    #[serde(default)]
    pub verified_role_id: Option<u64>,
}

/// Outbound notification channels (webhook URLs) and retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(default)]
    pub milestones_webhook: Option<String>,
    #[serde(default)]
    pub pauses_webhook: Option<String>,
    #[serde(default)]
    pub cancellations_webhook: Option<String>,
    #[serde(default = "default_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_attempt_timeout")]
    pub attempt_timeout_secs: u64,
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
}

fn default_attempts() -> u32 { 3 }
fn default_attempt_timeout() -> u64 { 10 }
fn default_base_delay() -> u64 { 1000 }

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            milestones_webhook: None,
            pauses_webhook: None,
            cancellations_webhook: None,
            max_attempts: default_attempts(),
            attempt_timeout_secs: default_attempt_timeout(),
            base_delay_ms: default_base_delay(),
        }
    }
}

/// Member directory behaviour.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Fall back to role-name matching when no role id matches.
    #[serde(default)]
    pub name_fallback: bool,
}

/// A statically configured member.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberConfig {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub bot: bool,
    #[serde(default)]
    pub roles: Vec<RoleConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleConfig {
    pub id: u64,
    #[serde(default)]
    pub name: String,
}
