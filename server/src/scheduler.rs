//! The cron-driven scheduler loop
//!
//! A singleton tick loop that reads the schedule registry, computes the
//! next fire instant per entry through the cron planner, and dispatches
//! due entries to the dispatch queue after passing the dispatch gate:
//! maintenance windows, preflight checks, the single-flight lock, and
//! dependency freshness, in that order.
// Missed fires are not replayed: after a restart the next fire is
// computed from "now", so catch-up is an explicit operator action via
// run-now. Within one tick, due entries dispatch in lexicographic order
// by name so the dispatch order is deterministic.

use anyhow::Result;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::time::Duration;
use tracing::{debug, info, warn};

use shared::jobrun::JobRunStore;
use shared::locks::TaskLocks;
use shared::planner::CronPlan;
use shared::queue::{DispatchMessage, DispatchOptions, DispatchQueue};
use shared::registry::{MetadataStore, ScheduleRegistry};
use shared::schedule::{ScheduleEntry, ScheduleMetadata};

use crate::preflight::Preflight;

/// Upper bound on how many fire candidates are stepped over when
/// escaping a maintenance window.
const MAX_WINDOW_ADVANCE: usize = 1000;

/// Fallback dependency recency when a cron period cannot be computed.
const FALLBACK_RECENCY_HOURS: i64 = 24;

/// Cached planning state for one schedule.
struct PlannedFire {
    cron: String,
    timezone: String,
    next_fire: DateTime<Utc>,
}

/// The singleton scheduler loop.
pub struct SchedulerLoop {
    registry: ScheduleRegistry,
    metadata: MetadataStore,
    queue: DispatchQueue,
    locks: TaskLocks,
    preflight: Preflight,
    jobruns: Arc<Mutex<JobRunStore>>,
    tick: Duration,
    /// Next-fire cache keyed by schedule name, invalidated whenever the
    /// entry's cron or timezone changes.
    fires: HashMap<String, PlannedFire>,
}

impl SchedulerLoop {
    pub fn new(
        registry: ScheduleRegistry,
        metadata: MetadataStore,
        queue: DispatchQueue,
        locks: TaskLocks,
        preflight: Preflight,
        jobruns: Arc<Mutex<JobRunStore>>,
        tick: Duration,
    ) -> Self {
        Self {
            registry,
            metadata,
            queue,
            locks,
            preflight,
            jobruns,
            tick,
            fires: HashMap::new(),
        }
    }

    /// Run until the shutdown signal flips.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(tick_seconds = self.tick.as_secs(), "Scheduler loop started");
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick_once(Utc::now()).await {
                        warn!(error = %e, "Scheduler tick failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Scheduler loop stopped");
    }

    /// Process one tick at instant `now`.
    ///
    /// Returns the names of the schedules dispatched this tick, in
    /// dispatch order.
    pub async fn tick_once(&mut self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let entries = self.registry.scan().await?;

        // Drop cache entries for schedules that no longer exist.
        let live: std::collections::HashSet<&str> =
            entries.iter().map(|e| e.name.as_str()).collect();
        self.fires.retain(|name, _| live.contains(name.as_str()));

        let mut due: Vec<(ScheduleEntry, CronPlan)> = Vec::new();
        for entry in entries {
            if !entry.enabled {
                continue;
            }
            let plan = match CronPlan::parse(&entry.cron, &entry.timezone) {
                Ok(plan) => plan,
                Err(e) => {
                    warn!(schedule = %entry.name, error = %e, "Skipping unplannable schedule");
                    continue;
                }
            };

            let stale = self.fires.get(&entry.name).map_or(true, |cached| {
                cached.cron != entry.cron || cached.timezone != entry.timezone
            });
            if stale {
                let Some(next_fire) = plan.next_fire(now) else {
                    warn!(schedule = %entry.name, "Cron expression yields no upcoming fires");
                    continue;
                };
                self.fires.insert(
                    entry.name.clone(),
                    PlannedFire {
                        cron: entry.cron.clone(),
                        timezone: entry.timezone.clone(),
                        next_fire,
                    },
                );
            }

            if self.fires[&entry.name].next_fire <= now {
                due.push((entry, plan));
            }
        }

        // Deterministic dispatch order for entries sharing a fire instant.
        due.sort_by(|a, b| a.0.name.cmp(&b.0.name));

        let mut dispatched = Vec::new();
        for (entry, plan) in due {
            let meta = self
                .metadata
                .load(&entry.name)
                .await
                .unwrap_or_else(|e| {
                    warn!(schedule = %entry.name, error = %e, "Metadata load failed, using defaults");
                    None
                })
                .unwrap_or_default();

            // Gate 1: maintenance windows suppress the fire entirely and
            // advance past the window.
            if meta.in_maintenance_window(now) {
                let next = self.next_fire_outside_windows(&plan, &meta, now);
                debug!(schedule = %entry.name, next_fire = %next, "Fire suppressed by maintenance window");
                self.set_next_fire(&entry.name, next);
                continue;
            }

            // Gate 2: preflight failures defer to the next tick without
            // advancing; the fire happens as soon as the checks recover.
            if !self.preflight.all_pass(&meta.preflight_checks).await {
                debug!(schedule = %entry.name, "Fire deferred by preflight checks");
                continue;
            }

            // Gate 3: single-flight. A held lock means the previous run
            // is still going; skip and advance normally.
            if meta.safety.singleflight
                && self.locks.any_held(entry.simple_task_name()).await?
            {
                debug!(schedule = %entry.name, "Fire skipped, single-flight lock held");
                self.advance(&entry, &plan, now);
                continue;
            }

            // Gate 4: dependency freshness. A stale dependency skips this
            // fire; it does not block the schedule forever.
            if !self.dependencies_met(&meta, &plan, now).await {
                debug!(schedule = %entry.name, "Fire skipped, dependencies not fresh");
                self.advance(&entry, &plan, now);
                continue;
            }

            let message = DispatchMessage::new(
                &entry.task,
                entry.args.clone(),
                entry.kwargs.clone(),
                DispatchOptions::from_metadata(&meta),
            );
            if let Err(e) = self.queue.enqueue(&message).await {
                // Deferred, not advanced: the enqueue retries next tick.
                warn!(schedule = %entry.name, error = %e, "Dispatch enqueue failed");
                continue;
            }

            debug!(schedule = %entry.name, task = %entry.task, queue = %message.queue(), "Dispatched");
            self.advance(&entry, &plan, now);
            dispatched.push(entry.name.clone());
        }

        Ok(dispatched)
    }

    /// Advance a schedule's cached fire time to the next cron boundary
    /// after `now`.
    fn advance(&mut self, entry: &ScheduleEntry, plan: &CronPlan, now: DateTime<Utc>) {
        if let Some(next) = plan.next_fire(now) {
            self.set_next_fire(&entry.name, next);
        }
    }

    fn set_next_fire(&mut self, name: &str, next_fire: DateTime<Utc>) {
        if let Some(cached) = self.fires.get_mut(name) {
            cached.next_fire = next_fire;
        }
    }

    /// First fire after `now` that does not fall inside any maintenance
    /// window, bounded so a window covering every fire cannot spin.
    fn next_fire_outside_windows(
        &self,
        plan: &CronPlan,
        meta: &ScheduleMetadata,
        now: DateTime<Utc>,
    ) -> DateTime<Utc> {
        let mut candidate = plan.next_fire(now).unwrap_or(now);
        for _ in 0..MAX_WINDOW_ADVANCE {
            if !meta.in_maintenance_window(candidate) {
                break;
            }
            match plan.next_fire(candidate) {
                Some(next) => candidate = next,
                None => break,
            }
        }
        candidate
    }

    /// Whether every dependency has a recent-enough successful run.
    ///
    /// The recency window defaults to this schedule's cron period.
    async fn dependencies_met(
        &self,
        meta: &ScheduleMetadata,
        plan: &CronPlan,
        now: DateTime<Utc>,
    ) -> bool {
        if meta.dependencies.is_empty() {
            return true;
        }

        let recency = plan
            .period(now)
            .unwrap_or_else(|| ChronoDuration::hours(FALLBACK_RECENCY_HOURS));
        let horizon = now - recency;

        for dependency in &meta.dependencies {
            // Dependencies name schedules; fall back to treating the name
            // as a task path when the schedule is gone.
            let task_name = match self.registry.get(dependency).await {
                Ok(Some(dep_entry)) => dep_entry.simple_task_name().to_string(),
                _ => shared::utils::simple_task_name(dependency).to_string(),
            };

            let last_ok = match self.jobruns.lock().await.last_ok_run(&task_name) {
                Ok(run) => run,
                Err(e) => {
                    warn!(dependency = %dependency, error = %e, "Dependency lookup failed");
                    return false;
                }
            };

            let fresh = last_ok
                .and_then(|run| run.finished_at)
                .map_or(false, |finished| finished >= horizon);
            if !fresh {
                return false;
            }
        }
        true
    }
}
