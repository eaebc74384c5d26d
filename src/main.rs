//! # ShiftClock — work-time tracker
//!
//! Runs the autonomous scheduler as a daemon, or applies one administrative
//! command to the state file and exits.
//!
//! Usage:
//!   shiftclock run                       # Daemon: sweep + daily transitions
//!   shiftclock start 1234                # Start or pre-register a user
//!   shiftclock list --status active      # Paged listing
//!   shiftclock purge --tiers recruit,gold --confirm YES
//!
//! One-shot commands write the same state file the daemon owns; do not run
//! them while the daemon is up.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;
use shiftclock_core::query::{ListQuery, Status};
use shiftclock_core::{Initiator, ShiftClockConfig, TierGroup, UserId};
use shiftclock_scheduler::{
    Dispatcher, Scheduler, SchedulerOptions, StaticDirectory, SystemClock, Tracker,
};
use tracing_subscriber::EnvFilter;

const CONFIRM_WORD: &str = "YES";

#[derive(Parser)]
#[command(name = "shiftclock", version, about = "⏰ ShiftClock — work-time tracker")]
struct Cli {
    /// Config file (default: ~/.shiftclock/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler until Ctrl-C
    Run,
    /// Start a session, or pre-register before the auto-start time
    Start {
        user: UserId,
        #[command(flatten)]
        by: Actor,
    },
    /// Pause an active session
    Pause {
        user: UserId,
        #[command(flatten)]
        by: Actor,
    },
    /// Resume a paused session
    Resume {
        user: UserId,
        #[command(flatten)]
        by: Actor,
    },
    /// Stop a session (idempotent)
    Stop { user: UserId },
    /// Stop a session and keep only whole hours
    Cancel {
        user: UserId,
        #[command(flatten)]
        by: Actor,
    },
    /// Add minutes to the recorded time
    AddTime { user: UserId, minutes: i64 },
    /// Remove minutes from the recorded time
    SubTime { user: UserId, minutes: i64 },
    /// Grant extra minutes (shifts milestone thresholds)
    AddExtra { user: UserId, minutes: i64 },
    /// Withdraw extra minutes
    SubExtra { user: UserId, minutes: i64 },
    /// Add confirmed credits
    Grant { user: UserId, amount: i64 },
    /// Remove confirmed credits
    Withdraw { user: UserId, amount: i64 },
    /// Zero one user's record
    ResetUser { user: UserId },
    /// Zero every record
    ResetAll {
        #[arg(long)]
        confirm: Option<String>,
    },
    /// Apply the midnight daily-limit reset now
    ResetDaily,
    /// Delete every record in the given tier groups
    Purge {
        #[arg(long, value_delimiter = ',', required = true)]
        tiers: Vec<TierGroup>,
        #[arg(long)]
        confirm: Option<String>,
    },
    /// Delete every record
    Wipe {
        #[arg(long)]
        confirm: Option<String>,
    },
    /// Show one user's snapshot
    Status { user: UserId },
    /// Paged listing of all users
    List {
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        status: Option<Status>,
        #[arg(long, default_value = "1")]
        page: usize,
    },
    /// Users waiting for auto-start
    PreRegistered,
    /// Payment report
    Payments {
        #[arg(long)]
        tier: Option<TierGroup>,
    },
}

/// Who is issuing the command.
#[derive(clap::Args)]
struct Actor {
    /// Initiator id
    #[arg(long = "by-id", default_value = "0")]
    id: UserId,
    /// Initiator name
    #[arg(long = "by", default_value = "cli")]
    name: String,
}

impl From<Actor> for Initiator {
    fn from(a: Actor) -> Self {
        Initiator { id: a.id, name: a.name }
    }
}

fn expand_path(p: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(p).to_string())
}

fn load_config(path: Option<&str>) -> Result<ShiftClockConfig> {
    let config = match path {
        Some(p) => ShiftClockConfig::load_from(&expand_path(p))?,
        None => ShiftClockConfig::load()?,
    };
    Ok(config)
}

fn require_confirm(confirm: Option<&str>, what: &str) -> Result<()> {
    if confirm != Some(CONFIRM_WORD) {
        bail!("{what} is destructive; pass --confirm {CONFIRM_WORD}");
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn open_tracker(config: ShiftClockConfig) -> Result<Arc<Tracker>> {
    let directory = Arc::new(StaticDirectory::from_config(&config.members));
    let dispatcher = Arc::new(Dispatcher::from_config(&config.notify));
    let tracker = Tracker::open(config, Arc::new(SystemClock), directory, dispatcher)
        .await
        .context("Failed to open state")?;
    Ok(Arc::new(tracker))
}

async fn run_daemon(tracker: Arc<Tracker>) -> Result<()> {
    let opts = SchedulerOptions::from_config(tracker.config());
    println!("⏰ ShiftClock v{}", env!("CARGO_PKG_VERSION"));
    println!(
        "   🗄️  State:  {}",
        tracker.config().state.resolved_path().display()
    );
    println!("   👥 Records: {}", tracker.records().await.len());
    println!();

    let scheduler = Scheduler::start(tracker, opts)?;
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("🛑 Shutdown requested");
    scheduler.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "shiftclock=debug,shiftclock_core=debug,shiftclock_scheduler=debug"
    } else {
        "shiftclock=info,shiftclock_core=info,shiftclock_scheduler=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let config = load_config(cli.config.as_deref())?;
    let tracker = open_tracker(config).await?;

    match cli.command {
        Commands::Run => run_daemon(tracker).await?,
        Commands::Start { user, by } => print_json(&tracker.start(user, &by.into()).await?)?,
        Commands::Pause { user, by } => print_json(&tracker.pause(user, &by.into()).await?)?,
        Commands::Resume { user, by } => {
            let paused = tracker.resume(user, &by.into()).await?;
            println!("▶️ Resumed {user} after {paused:.0}s paused");
        }
        Commands::Stop { user } => print_json(&tracker.stop(user).await?)?,
        Commands::Cancel { user, by } => print_json(&tracker.cancel(user, &by.into()).await?)?,
        Commands::AddTime { user, minutes } => {
            let total = tracker.add_minutes(user, minutes).await?;
            println!("➕ {user}: total {total:.0}s");
        }
        Commands::SubTime { user, minutes } => {
            let total = tracker.subtract_minutes(user, minutes).await?;
            println!("➖ {user}: total {total:.0}s");
        }
        Commands::AddExtra { user, minutes } => {
            let extra = tracker.add_extra_minutes(user, minutes).await?;
            println!("➕ {user}: {extra} extra minutes");
        }
        Commands::SubExtra { user, minutes } => {
            let removed = tracker.subtract_extra_minutes(user, minutes).await?;
            println!("➖ {user}: removed {removed} extra minutes");
        }
        Commands::Grant { user, amount } => {
            let total = tracker.grant_credits(user, amount).await?;
            println!("💰 {user}: {total} credits");
        }
        Commands::Withdraw { user, amount } => {
            let removed = tracker.withdraw_credits(user, amount).await?;
            println!("💸 {user}: withdrew {removed} credits");
        }
        Commands::ResetUser { user } => {
            tracker.reset_user(user).await?;
            println!("🔄 {user} reset");
        }
        Commands::ResetAll { confirm } => {
            require_confirm(confirm.as_deref(), "reset-all")?;
            let count = tracker.reset_all().await?;
            println!("🔄 {count} records reset");
        }
        Commands::ResetDaily => print_json(&tracker.reset_daily_limits().await?)?,
        Commands::Purge { tiers, confirm } => {
            require_confirm(confirm.as_deref(), "purge")?;
            print_json(&tracker.purge_tiers(&tiers).await?)?;
        }
        Commands::Wipe { confirm } => {
            require_confirm(confirm.as_deref(), "wipe")?;
            let count = tracker.wipe_all().await?;
            println!("🗑️ {count} records deleted");
        }
        Commands::Status { user } => print_json(&tracker.snapshot(user).await?)?,
        Commands::List { search, status, page } => {
            let query = ListQuery {
                search,
                status,
                page,
                page_size: tracker.config().schedule.page_size,
            };
            print_json(&tracker.list(&query).await)?;
        }
        Commands::PreRegistered => print_json(&tracker.pre_registered().await)?,
        Commands::Payments { tier } => print_json(&tracker.payments(tier).await)?,
    }
    Ok(())
}
