//! Schedule entries and per-schedule metadata
//!
//! This module defines the schedulable unit (`ScheduleEntry`), the rich
//! metadata record persisted alongside it (`ScheduleMetadata` with its
//! safety, hook, and maintenance-window sub-records), the partial-update
//! payload used by the admin surface (`MetadataPatch`), and the snapshot
//! stored when a schedule is paused (`PausedSchedule`).
// Inbound payloads are strict: unknown fields are rejected so operator
// typos surface as 400s instead of silently vanishing. Outbound JSON emits
// only known fields, and map-typed fields use BTreeMap so canonical
// serialization is deterministic (pause/resume round-trips compare equal
// byte-for-byte).

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;

use crate::defaults::*;
use crate::utils::{now_iso_utc, simple_task_name};

/// The schedulable unit: a named recurring intent to run a task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ScheduleEntry {
    /// Unique schedule name; doubles as the registry key segment.
    pub name: String,
    /// Opaque dotted-path task identifier routed to a registered handler.
    pub task: String,
    /// Standard 5-field cron expression (minute hour dom month dow).
    pub cron: String,
    /// IANA zone in which the cron expression is evaluated.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Positional arguments passed to the task body.
    #[serde(default)]
    pub args: Vec<Value>,
    /// Keyword arguments passed to the task body.
    #[serde(default)]
    pub kwargs: BTreeMap<String, Value>,
    /// Entries in the active registry are enabled; paused entries live in
    /// the paused side-registry instead.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl ScheduleEntry {
    /// The final dotted-path segment, used for JobRun rows and lock keys.
    pub fn simple_task_name(&self) -> &str {
        simple_task_name(&self.task)
    }
}

/// A wall-clock interval during which a schedule's fires are suppressed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct MaintenanceWindow {
    /// ISO-8601 start, either offset-aware or naive in `timezone`.
    pub start: String,
    /// ISO-8601 end, same conventions as `start`.
    pub end: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl MaintenanceWindow {
    /// Whether `now` falls inside this window.
    ///
    /// Unparseable windows never match; a malformed window must not
    /// silently suppress fires forever.
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        match (self.boundary(&self.start), self.boundary(&self.end)) {
            (Some(start), Some(end)) => start <= now && now < end,
            _ => {
                warn!(
                    start = %self.start,
                    end = %self.end,
                    "Ignoring unparseable maintenance window"
                );
                false
            }
        }
    }

    /// Parse one boundary: RFC 3339 with offset first, then a naive
    /// timestamp localized in the window's zone.
    fn boundary(&self, value: &str) -> Option<DateTime<Utc>> {
        if let Ok(instant) = DateTime::parse_from_rfc3339(value) {
            return Some(instant.with_timezone(&Utc));
        }
        let tz: chrono_tz::Tz = self.timezone.parse().ok()?;
        let naive = chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S")
            .or_else(|_| chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M"))
            .ok()?;
        // Ambiguous fall-back times resolve to their first occurrence;
        // boundaries inside a spring-forward gap have no local form.
        tz.from_local_datetime(&naive)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// Execution guard rails enforced before and during dispatch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SafetyConfig {
    #[serde(default = "default_singleflight")]
    pub singleflight: bool,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: u32,
    /// Upper bound on task duration; also the single-flight lock TTL.
    #[serde(default = "default_timeout_s")]
    pub timeout_s: u64,
    #[serde(default)]
    pub retries: u32,
    #[serde(default)]
    pub backoff_s: u64,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            singleflight: default_singleflight(),
            max_concurrency: default_max_concurrency(),
            timeout_s: default_timeout_s(),
            retries: 0,
            backoff_s: 0,
        }
    }
}

/// Events a schedule can opt into alerting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertEvent {
    Success,
    Failure,
    Slow,
}

impl AlertEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertEvent::Success => "success",
            AlertEvent::Failure => "failure",
            AlertEvent::Slow => "slow",
        }
    }
}

fn default_alert_on() -> Vec<AlertEvent> {
    vec![AlertEvent::Failure]
}

/// Optional alert integrations for a schedule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct HookConfig {
    /// Single Discord descriptor (alias or raw URL); kept separate from
    /// `discord_channels` for compatibility with older payloads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discord_webhook: Option<String>,
    #[serde(default)]
    pub discord_channels: Vec<String>,
    /// Mention strings appended to the alert description.
    #[serde(default)]
    pub discord_mentions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prometheus_endpoint: Option<String>,
    #[serde(default = "default_alert_on")]
    pub alert_on: Vec<AlertEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slow_threshold_s: Option<f64>,
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            discord_webhook: None,
            discord_channels: Vec::new(),
            discord_mentions: Vec::new(),
            prometheus_endpoint: None,
            alert_on: default_alert_on(),
            slow_threshold_s: None,
        }
    }
}

impl HookConfig {
    /// All Discord descriptors in declaration order.
    pub fn discord_descriptors(&self) -> Vec<String> {
        let mut out = Vec::new();
        if let Some(hook) = &self.discord_webhook {
            out.push(hook.clone());
        }
        out.extend(self.discord_channels.iter().cloned());
        out
    }

    pub fn wants(&self, event: AlertEvent) -> bool {
        self.alert_on.contains(&event)
    }
}

/// Create/update provenance stamped on every metadata mutation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct AuditStamp {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
}

/// Rich metadata persisted alongside each schedule entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ScheduleMetadata {
    /// Routing hint for the dispatch queue.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
    /// Schedule names whose latest successful run must be fresh for this
    /// schedule to fire.
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub maintenance_windows: Vec<MaintenanceWindow>,
    /// Named readiness checks evaluated before dispatch.
    #[serde(default)]
    pub preflight_checks: Vec<String>,
    #[serde(default)]
    pub safety: SafetyConfig,
    #[serde(default)]
    pub hooks: HookConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub audit: AuditStamp,
}

impl ScheduleMetadata {
    /// Stamp audit fields for a mutation by `actor`.
    ///
    /// Create fields are written once and never changed afterwards; update
    /// fields are overwritten on every call.
    pub fn touch_audit(&mut self, actor: &str, is_create: bool) {
        let now = now_iso_utc();
        if is_create || self.audit.created_at.is_none() {
            self.audit.created_at = Some(now.clone());
            self.audit.created_by = Some(actor.to_string());
        }
        self.audit.updated_at = Some(now);
        self.audit.updated_by = Some(actor.to_string());
    }

    /// Whether `now` falls inside any configured maintenance window.
    pub fn in_maintenance_window(&self, now: DateTime<Utc>) -> bool {
        self.maintenance_windows.iter().any(|w| w.contains(now))
    }

    /// Slow-run threshold: explicit hook threshold first, then the safety
    /// timeout, else no slow check.
    pub fn slow_threshold_s(&self) -> Option<f64> {
        match self.hooks.slow_threshold_s {
            Some(t) if t > 0.0 => Some(t),
            _ if self.safety.timeout_s > 0 => Some(self.safety.timeout_s as f64),
            _ => None,
        }
    }
}

/// Partial metadata payload used when creating or updating via the API.
///
/// Present fields overwrite, absent fields inherit from the base record.
/// Audit stamps are never patched directly; the admin surface stamps them.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct MetadataPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maintenance_windows: Option<Vec<MaintenanceWindow>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preflight_checks: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safety: Option<SafetyConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hooks: Option<HookConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl MetadataPatch {
    /// Produce a full metadata record from this patch layered over `base`.
    pub fn apply(&self, base: Option<&ScheduleMetadata>) -> ScheduleMetadata {
        let mut meta = base.cloned().unwrap_or_default();
        if let Some(queue) = &self.queue {
            meta.queue = Some(queue.clone());
        }
        if let Some(priority) = self.priority {
            meta.priority = Some(priority);
        }
        if let Some(dependencies) = &self.dependencies {
            meta.dependencies = dependencies.clone();
        }
        if let Some(windows) = &self.maintenance_windows {
            meta.maintenance_windows = windows.clone();
        }
        if let Some(checks) = &self.preflight_checks {
            meta.preflight_checks = checks.clone();
        }
        if let Some(safety) = &self.safety {
            meta.safety = safety.clone();
        }
        if let Some(hooks) = &self.hooks {
            meta.hooks = hooks.clone();
        }
        if let Some(notes) = &self.notes {
            meta.notes = Some(notes.clone());
        }
        meta
    }
}

/// Complete snapshot written when a schedule is paused.
///
/// Holds everything needed to reconstitute the entry (and its metadata)
/// exactly as it was before the pause.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PausedSchedule {
    pub entry: ScheduleEntry,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ScheduleMetadata>,
}
