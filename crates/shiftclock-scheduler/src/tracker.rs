//! Tracker — the single owner of all records.
//!
//! Every command runs its mutation under the state lock, bumps the
//! generation and serializes the whole map before releasing it. The file
//! write and any notification happen after the lock is dropped. A failed
//! write is logged; the in-memory map stays authoritative.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveTime, Utc};
use serde::Serialize;
use shiftclock_core::gate::check_start;
use shiftclock_core::query::{self, ListPage, ListQuery, PaymentEntry, PreRegisteredEntry, Snapshot};
use shiftclock_core::{
    check_milestones, CancelOutcome, DailyReset, Initiator, MilestoneHit, PauseOutcome, Records,
    Result, ShiftClockConfig, ShiftError, StartMode, StartPolicy, StopOutcome, Tier, TierGroup,
    UserId, UserRecord,
};
use tokio::sync::Mutex;

use crate::clock::{local_time, Clock};
use crate::directory::{Member, MemberDirectory, TierResolver};
use crate::dispatch::Dispatcher;
use crate::notify::{self, Notification, Subject};
use crate::store::RecordStore;

/// Records plus the generation of the last committed mutation.
struct State {
    records: Records,
    generation: u64,
}

/// A serialized snapshot waiting to be written.
struct PendingWrite {
    generation: u64,
    bytes: Vec<u8>,
}

impl State {
    fn commit(&mut self) -> Option<PendingWrite> {
        self.generation += 1;
        match RecordStore::encode(&self.records) {
            Ok(bytes) => Some(PendingWrite {
                generation: self.generation,
                bytes,
            }),
            Err(e) => {
                tracing::error!("❌ Failed to serialize records (g{}): {e}", self.generation);
                None
            }
        }
    }
}

/// Outcome of a start request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StartReport {
    pub mode: StartMode,
    pub tier: Tier,
}

/// Outcome of a daily-limit reset.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResetSummary {
    pub zero_time: usize,
    pub preserved: usize,
    pub by_group: HashMap<TierGroup, usize>,
}

impl ResetSummary {
    pub fn total(&self) -> usize {
        self.zero_time + self.preserved
    }
}

/// Outcome of a tier purge.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PurgeSummary {
    pub deleted: usize,
    pub extra_minutes_cleared: u64,
    pub reset: usize,
    pub remaining: usize,
}

/// Boundaries confirmed for one user, waiting to be announced.
#[derive(Debug, Clone)]
pub struct MilestoneBatch {
    pub id: UserId,
    pub name: String,
    pub tier_label: String,
    pub hits: Vec<MilestoneHit>,
    pub at: DateTime<Utc>,
}

/// The tracker service.
pub struct Tracker {
    config: ShiftClockConfig,
    offset: FixedOffset,
    policy: StartPolicy,
    state: Mutex<State>,
    store: RecordStore,
    clock: Arc<dyn Clock>,
    directory: Arc<dyn MemberDirectory>,
    resolver: TierResolver,
    dispatcher: Arc<Dispatcher>,
}

impl Tracker {
    /// Load the state file named in `config` and build the tracker.
    pub async fn open(
        config: ShiftClockConfig,
        clock: Arc<dyn Clock>,
        directory: Arc<dyn MemberDirectory>,
        dispatcher: Arc<Dispatcher>,
    ) -> Result<Self> {
        let store = RecordStore::from_config(&config.state);
        let records = store.load().await?;
        let offset = config.schedule.offset()?;
        Ok(Self {
            policy: StartPolicy::from_config(&config.schedule, &config.roles),
            resolver: TierResolver::from_config(&config),
            offset,
            state: Mutex::new(State {
                records,
                generation: 0,
            }),
            store,
            clock,
            directory,
            dispatcher,
            config,
        })
    }

    pub fn config(&self) -> &ShiftClockConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn local_time(&self) -> NaiveTime {
        local_time(self.clock.now(), self.offset)
    }

    /// Tier of `id` as the directory sees it now.
    pub fn tier_of(&self, id: UserId) -> Tier {
        self.resolver.resolve(self.directory.member(id).as_ref())
    }

    // ── Mutation plumbing ────────────────────────────────────

    async fn mutate<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&mut Records, DateTime<Utc>) -> Result<T>,
    {
        let now = self.clock.now();
        let (out, pending) = {
            let mut state = self.state.lock().await;
            let out = op(&mut state.records, now)?;
            (out, state.commit())
        };
        self.persist(pending).await;
        Ok(out)
    }

    async fn persist(&self, pending: Option<PendingWrite>) {
        let Some(pending) = pending else { return };
        if let Err(e) = self.store.write(pending.generation, pending.bytes).await {
            tracing::error!(
                "❌ State write g{} failed, in-memory state kept: {e}",
                pending.generation
            );
        }
    }

    async fn notify(&self, notification: Notification) {
        self.dispatcher.deliver(notification).await;
    }

    fn display_name(&self, member: Option<&Member>, id: UserId) -> String {
        member
            .map(|m| m.name.clone())
            .unwrap_or_else(|| format!("user {id}"))
    }

    // ── Session commands ─────────────────────────────────────

    /// Start or pre-register `id`, depending on the local time.
    pub async fn start(&self, id: UserId, actor: &Initiator) -> Result<StartReport> {
        let member = self.directory.member(id);
        let tier = self.resolver.resolve(member.as_ref());
        let facts = member.as_ref().map(Member::facts).unwrap_or_default();
        let name = self.display_name(member.as_ref(), id);

        let report = self
            .mutate(|records, now| {
                let local = local_time(now, self.offset);
                let mode = check_start(records.get(&id), &tier, &facts, local, &self.policy)?;
                let rec = records
                    .entry(id)
                    .or_insert_with(|| UserRecord::new(name.clone()));
                match mode {
                    StartMode::PreRegister => rec.pre_register(actor.clone(), now)?,
                    StartMode::Immediate => rec.start(now)?,
                }
                rec.name = name.clone();
                Ok(StartReport {
                    mode,
                    tier: tier.clone(),
                })
            })
            .await?;

        match report.mode {
            StartMode::PreRegister => tracing::info!(
                user = %id,
                "📝 {name} pre-registered by {} ({tier})",
                actor.name
            ),
            StartMode::Immediate => {
                tracing::info!(user = %id, "▶️ {name} started by {} ({tier})", actor.name)
            }
        }
        Ok(report)
    }

    /// Pause `id`. The third pause of an escalating tier auto-cancels.
    pub async fn pause(&self, id: UserId, actor: &Initiator) -> Result<PauseOutcome> {
        let tier = self.tier_of(id);
        let (outcome, name) = self
            .mutate(|records, now| {
                let rec = records.get_mut(&id).ok_or(ShiftError::UnknownUser(id))?;
                let outcome = rec.pause(&tier, now)?;
                Ok((outcome, rec.name.clone()))
            })
            .await?;

        let who = Subject { id, name: &name };
        let now = self.clock.now();
        let notification = match &outcome {
            PauseOutcome::Paused {
                session_secs,
                total_secs,
                pause_count,
            } => {
                tracing::info!(user = %id, "⏸️ {name} paused ({pause_count}/3)");
                notify::paused(who, *session_secs, *total_secs, *pause_count, &actor.name, now)
            }
            PauseOutcome::AutoCancelled {
                kept_secs,
                lost_secs,
                ..
            } => {
                tracing::warn!(user = %id, "🚫 {name} auto-cancelled on third pause, lost {lost_secs:.0}s");
                notify::auto_cancelled(who, *kept_secs, *lost_secs, &actor.name, now)
            }
        };
        self.notify(notification).await;
        Ok(outcome)
    }

    /// Resume `id`. Returns how long it was paused.
    pub async fn resume(&self, id: UserId, actor: &Initiator) -> Result<f64> {
        let (paused_secs, name) = self
            .mutate(|records, now| {
                let rec = records.get_mut(&id).ok_or(ShiftError::UnknownUser(id))?;
                Ok((rec.resume(now)?, rec.name.clone()))
            })
            .await?;
        tracing::info!(user = %id, "▶️ {name} resumed after {paused_secs:.0}s");
        let now = self.clock.now();
        self.notify(notify::resumed(Subject { id, name: &name }, paused_secs, &actor.name, now))
            .await;
        Ok(paused_secs)
    }

    /// Stop `id`. Idempotent.
    pub async fn stop(&self, id: UserId) -> Result<StopOutcome> {
        let outcome = self
            .mutate(|records, now| {
                let rec = records.get_mut(&id).ok_or(ShiftError::UnknownUser(id))?;
                Ok(rec.stop(now))
            })
            .await?;
        tracing::info!(user = %id, "⏹️ Stop: {outcome:?}");
        Ok(outcome)
    }

    /// Stop `id` and keep only whole hours.
    pub async fn cancel(&self, id: UserId, actor: &Initiator) -> Result<CancelOutcome> {
        let (outcome, name) = self
            .mutate(|records, now| {
                let rec = records.get_mut(&id).ok_or(ShiftError::UnknownUser(id))?;
                Ok((rec.cancel_keep_hours(now), rec.name.clone()))
            })
            .await?;
        tracing::info!(
            user = %id,
            "🛑 {name} cancelled by {}: kept {:.0}s, lost {:.0}s",
            actor.name,
            outcome.kept_secs,
            outcome.lost_secs
        );
        let now = self.clock.now();
        self.notify(notify::cancelled(
            Subject { id, name: &name },
            outcome.total_secs,
            outcome.kept_secs,
            outcome.lost_secs,
            &actor.name,
            now,
        ))
        .await;
        Ok(outcome)
    }

    /// Add to the base time; creates the record if unseen. Returns the new total.
    pub async fn add_minutes(&self, id: UserId, minutes: i64) -> Result<f64> {
        let name = self.display_name(self.directory.member(id).as_ref(), id);
        if minutes <= 0 {
            return Err(ShiftError::InvalidQuantity(minutes));
        }
        let total = self
            .mutate(|records, _| {
                let rec = records.entry(id).or_insert_with(|| UserRecord::new(name));
                Ok(rec.add_minutes(minutes)?)
            })
            .await?;
        tracing::info!(user = %id, "➕ Added {minutes} min, total {total:.0}s");
        Ok(total)
    }

    /// Remove from the base time, floored at zero. Returns the new total.
    pub async fn subtract_minutes(&self, id: UserId, minutes: i64) -> Result<f64> {
        let total = self
            .mutate(|records, _| {
                let rec = records.get_mut(&id).ok_or(ShiftError::UnknownUser(id))?;
                Ok(rec.subtract_minutes(minutes)?)
            })
            .await?;
        tracing::info!(user = %id, "➖ Removed {minutes} min, total {total:.0}s");
        Ok(total)
    }

    /// Grant extra minutes (shift milestone thresholds). Returns the new extra total.
    pub async fn add_extra_minutes(&self, id: UserId, minutes: i64) -> Result<u32> {
        let name = self.display_name(self.directory.member(id).as_ref(), id);
        if minutes <= 0 {
            return Err(ShiftError::InvalidQuantity(minutes));
        }
        let extra = self
            .mutate(|records, _| {
                let rec = records.entry(id).or_insert_with(|| UserRecord::new(name));
                Ok(rec.add_extra_minutes(minutes)?)
            })
            .await?;
        tracing::info!(user = %id, "➕ Extra minutes now {extra}");
        Ok(extra)
    }

    /// Withdraw extra minutes. Returns the amount actually removed.
    pub async fn subtract_extra_minutes(&self, id: UserId, minutes: i64) -> Result<u32> {
        let removed = self
            .mutate(|records, _| {
                let rec = records.get_mut(&id).ok_or(ShiftError::UnknownUser(id))?;
                Ok(rec.subtract_extra_minutes(minutes)?)
            })
            .await?;
        tracing::info!(user = %id, "➖ Removed {removed} extra minutes");
        Ok(removed)
    }

    /// Zero one record's time, pauses, extras and milestones.
    pub async fn reset_user(&self, id: UserId) -> Result<()> {
        self.mutate(|records, _| {
            let rec = records.get_mut(&id).ok_or(ShiftError::UnknownUser(id))?;
            rec.reset_to_zero();
            Ok(())
        })
        .await?;
        tracing::info!(user = %id, "🔄 Record reset to zero");
        Ok(())
    }

    /// Zero every record. Returns how many were reset.
    pub async fn reset_all(&self) -> Result<usize> {
        let count = self
            .mutate(|records, _| {
                records.values_mut().for_each(UserRecord::reset_to_zero);
                Ok(records.len())
            })
            .await?;
        tracing::info!("🔄 Reset {count} records to zero");
        Ok(count)
    }

    // ── Administrative credit and bulk commands ─────────────

    /// Add confirmed credits; creates the record if unseen.
    pub async fn grant_credits(&self, id: UserId, amount: i64) -> Result<f64> {
        if amount <= 0 {
            return Err(ShiftError::InvalidQuantity(amount));
        }
        let name = self.display_name(self.directory.member(id).as_ref(), id);
        let total = self
            .mutate(|records, _| {
                let rec = records.entry(id).or_insert_with(|| UserRecord::new(name));
                Ok(rec.grant_credits(amount)?)
            })
            .await?;
        tracing::info!(user = %id, "💰 Granted {amount} credits, now {total}");
        Ok(total)
    }

    /// Remove confirmed credits, floored at zero. Returns the amount removed.
    pub async fn withdraw_credits(&self, id: UserId, amount: i64) -> Result<f64> {
        if amount <= 0 {
            return Err(ShiftError::InvalidQuantity(amount));
        }
        let removed = self
            .mutate(|records, _| {
                let rec = records.get_mut(&id).ok_or(ShiftError::UnknownUser(id))?;
                if rec.confirmed_credits <= 0.0 {
                    return Err(ShiftError::NoCredits(id));
                }
                Ok(rec.withdraw_credits(amount)?)
            })
            .await?;
        tracing::info!(user = %id, "💸 Withdrew {removed} credits");
        Ok(removed)
    }

    /// Apply each completed record's daily reset. Runs at midnight and on demand.
    pub async fn reset_daily_limits(&self) -> Result<ResetSummary> {
        let summary = self
            .mutate(|records, now| {
                let mut summary = ResetSummary::default();
                for (id, rec) in records.iter_mut().filter(|(_, r)| r.milestone_completed) {
                    let tier = self.tier_of(*id);
                    rec.stop(now);
                    let credits = rec.confirmed_credits;
                    match tier.daily_reset(self.resolver.table()) {
                        DailyReset::ZeroTime => {
                            rec.reset_daily_limit_zero_time(credits);
                            summary.zero_time += 1;
                        }
                        DailyReset::PreserveHistory => {
                            let historical = rec.total_time;
                            rec.reset_daily_limit_preserve_history(credits, historical);
                            summary.preserved += 1;
                        }
                    }
                    *summary.by_group.entry(tier.group()).or_default() += 1;
                    tracing::debug!(user = %id, "🔄 Daily limit reset ({tier}), credits kept: {credits}");
                }
                Ok(summary)
            })
            .await?;
        tracing::info!(
            "🔄 Daily limits reset: {} zero-time, {} preserved",
            summary.zero_time,
            summary.preserved
        );
        Ok(summary)
    }

    /// Delete every record whose tier is in `groups`, clear extra minutes
    /// on the rest and zero-reset the remaining completed zero-time tiers.
    pub async fn purge_tiers(&self, groups: &[TierGroup]) -> Result<PurgeSummary> {
        let summary = self
            .mutate(|records, now| {
                let mut summary = PurgeSummary::default();
                let doomed: Vec<UserId> = records
                    .keys()
                    .copied()
                    .filter(|id| groups.contains(&self.tier_of(*id).group()))
                    .collect();
                for id in &doomed {
                    if let Some(rec) = records.remove(id) {
                        summary.extra_minutes_cleared += u64::from(rec.extra_minutes);
                        summary.deleted += 1;
                    }
                }
                for (id, rec) in records.iter_mut() {
                    summary.extra_minutes_cleared += u64::from(rec.extra_minutes);
                    rec.extra_minutes = 0;
                    if !rec.milestone_completed {
                        continue;
                    }
                    let tier = self.tier_of(*id);
                    if tier.daily_reset(self.resolver.table()) == DailyReset::ZeroTime {
                        rec.stop(now);
                        let credits = rec.confirmed_credits;
                        rec.reset_daily_limit_zero_time(credits);
                        summary.reset += 1;
                    }
                }
                summary.remaining = records.len();
                Ok(summary)
            })
            .await?;
        tracing::warn!(
            "🗑️ Purged {} records ({:?}); {} remain, {} reset",
            summary.deleted,
            groups,
            summary.remaining,
            summary.reset
        );
        Ok(summary)
    }

    /// Remove every record.
    pub async fn wipe_all(&self) -> Result<usize> {
        let count = self
            .mutate(|records, _| {
                let count = records.len();
                records.clear();
                Ok(count)
            })
            .await?;
        tracing::warn!("🗑️ Wiped {count} records");
        Ok(count)
    }

    // ── Scheduler hooks ──────────────────────────────────────

    /// Active, unpaused users, at most `limit`. Also returns how many there were.
    pub async fn active_ids(&self, limit: usize) -> (Vec<UserId>, usize) {
        let state = self.state.lock().await;
        let active: Vec<UserId> = state
            .records
            .iter()
            .filter(|(_, r)| r.is_active && !r.is_paused)
            .map(|(id, _)| *id)
            .collect();
        let total = active.len();
        (active.into_iter().take(limit).collect(), total)
    }

    /// Confirm any boundary `id` has reached; persist, then notify.
    pub async fn check_user(&self, id: UserId) -> Result<Vec<MilestoneHit>> {
        match self.confirm_milestones(id).await? {
            Some(batch) => {
                self.announce(&batch).await;
                Ok(batch.hits)
            }
            None => Ok(Vec::new()),
        }
    }

    /// Confirm and persist any boundary `id` has reached, without notifying.
    ///
    /// The returned batch must be passed to [`announce`](Self::announce).
    pub async fn confirm_milestones(&self, id: UserId) -> Result<Option<MilestoneBatch>> {
        let tier = self.tier_of(id);
        let now = self.clock.now();
        let (hits, name, pending) = {
            let mut state = self.state.lock().await;
            let Some(rec) = state.records.get_mut(&id) else {
                return Ok(None);
            };
            let hits = check_milestones(rec, &tier, self.resolver.table(), now);
            if hits.is_empty() {
                return Ok(None);
            }
            let name = rec.name.clone();
            (hits, name, state.commit())
        };
        self.persist(pending).await;

        let label = tier.label(self.resolver.table());
        for hit in &hits {
            tracing::info!(
                user = %id,
                "⏰ {name} reached {}h ({label}): +{} credits, total {}",
                hit.hours,
                hit.credits_granted,
                hit.confirmed_total
            );
        }
        Ok(Some(MilestoneBatch {
            id,
            name,
            tier_label: label,
            hits,
            at: now,
        }))
    }

    /// Send one milestone notification per confirmed boundary.
    pub async fn announce(&self, batch: &MilestoneBatch) {
        for hit in &batch.hits {
            let who = Subject {
                id: batch.id,
                name: &batch.name,
            };
            self.notify(notify::milestone(who, &batch.tier_label, hit, "sweep", batch.at))
                .await;
        }
    }

    /// Start every pre-registered record. Returns how many started.
    pub async fn auto_start(&self) -> Result<usize> {
        let started = self
            .mutate(|records, now| {
                let mut started = 0;
                for (id, rec) in records.iter_mut().filter(|(_, r)| r.is_pre_registered) {
                    let by = rec
                        .pre_register_initiator
                        .as_ref()
                        .map(|i| i.name.clone())
                        .unwrap_or_else(|| "unknown".into());
                    match rec.start_from_pre_register(now) {
                        Ok(()) => {
                            started += 1;
                            tracing::info!(user = %id, "▶️ Auto-started {} (pre-registered by {by})", rec.name);
                        }
                        Err(e) => tracing::warn!(user = %id, "⚠️ Auto-start skipped {}: {e}", rec.name),
                    }
                }
                Ok(started)
            })
            .await?;
        tracing::info!("🕐 Auto-start: {started} users started");
        Ok(started)
    }

    /// Stop every active or paused record. Returns how many stopped.
    pub async fn auto_stop(&self) -> Result<usize> {
        let stopped = self
            .mutate(|records, now| {
                Ok(records
                    .values_mut()
                    .filter(|r| !r.is_idle())
                    .map(|r| r.stop(now))
                    .filter(StopOutcome::changed)
                    .count())
            })
            .await?;
        tracing::info!("🛑 Auto-stop: {stopped} users stopped");
        Ok(stopped)
    }

    // ── Queries ──────────────────────────────────────────────

    pub async fn snapshot(&self, id: UserId) -> Result<Snapshot> {
        let now = self.clock.now();
        let state = self.state.lock().await;
        let rec = state.records.get(&id).ok_or(ShiftError::UnknownUser(id))?;
        Ok(Snapshot::build(id, rec, self.tier_of(id), self.resolver.table(), now))
    }

    pub async fn list(&self, query: &ListQuery) -> ListPage {
        let now = self.clock.now();
        let snapshots: Vec<Snapshot> = {
            let state = self.state.lock().await;
            state
                .records
                .iter()
                .map(|(id, rec)| Snapshot::build(*id, rec, self.tier_of(*id), self.resolver.table(), now))
                .collect()
        };
        query::list(snapshots, query)
    }

    pub async fn pre_registered(&self) -> Vec<PreRegisteredEntry> {
        query::pre_registered(&self.state.lock().await.records)
    }

    pub async fn payments(&self, group: Option<TierGroup>) -> Vec<PaymentEntry> {
        let now = self.clock.now();
        let state = self.state.lock().await;
        query::payments(&state.records, |id| self.tier_of(id), group, now)
    }

    /// Copy of every record.
    pub async fn records(&self) -> Records {
        self.state.lock().await.records.clone()
    }
}
