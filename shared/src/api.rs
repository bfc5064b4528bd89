//! Admin API contract shared between the server and its callers
//!
//! This module defines the endpoint paths, authentication headers, and
//! request/response payloads of the admin HTTP surface, so the server and
//! any Rust-side client agree on one set of types.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::defaults::default_timezone;
use crate::jobrun::{JobRun, JobStatus};
use crate::schedule::{MetadataPatch, ScheduleMetadata};
use crate::utils::to_iso_utc;

/// Admin surface endpoint paths.
pub mod endpoints {
    pub const HEALTH: &str = "/health";
    pub const SCHEDULES: &str = "/schedules";
    pub const SCHEDULE_BY_NAME: &str = "/schedules/{name}";
    pub const SCHEDULES_PAUSE: &str = "/schedules/pause";
    pub const SCHEDULES_RESUME: &str = "/schedules/resume";
    pub const SCHEDULES_PREVIEW: &str = "/schedules/preview";
    pub const SCHEDULES_EXPORT: &str = "/schedules/export";
    pub const SCHEDULES_IMPORT: &str = "/schedules/import";
    pub const SCHEDULES_RUN_NOW: &str = "/schedules/run-now";
    pub const TASKS_CATALOG: &str = "/tasks/catalog";
}

/// HTTP header names used by the admin surface.
pub mod headers {
    /// Pre-shared admin API key.
    pub const API_KEY: &str = "x-api-key";
    /// Email or username of the admin caller; stamps audit fields.
    pub const ADMIN_USER: &str = "x-admin-user";
}

/// Condensed view of a task's most recent JobRun.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobRunSummary {
    pub task_name: String,
    pub status: JobStatus,
    pub started_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
}

impl From<&JobRun> for JobRunSummary {
    fn from(run: &JobRun) -> Self {
        Self {
            task_name: run.task_name.clone(),
            status: run.status,
            started_at: to_iso_utc(run.started_at),
            finished_at: run.finished_at.map(to_iso_utc),
        }
    }
}

/// One schedule in the list response, active or paused.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleSummary {
    pub name: String,
    pub task: String,
    pub cron: String,
    pub timezone: String,
    pub args: Vec<Value>,
    pub kwargs: BTreeMap<String, Value>,
    pub enabled: bool,
    /// `active` or `paused`.
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<JobRunSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ScheduleMetadata>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulesResponse {
    pub schedules: Vec<ScheduleSummary>,
    /// Always `dynamic`: schedules live in the mutable registry.
    pub mode: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleCreateRequest {
    pub name: String,
    pub task: String,
    /// Standard 5-field cron expression.
    pub cron: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MetadataPatch>,
}

/// Update payload. `cron` is required: an update without it is rejected
/// rather than inferred from the stored entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ScheduleUpdateRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kwargs: Option<BTreeMap<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MetadataPatch>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleMutationResponse {
    pub status: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleDeleteResponse {
    pub status: String,
    pub deleted: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulePauseResponse {
    pub status: String,
    pub paused: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleResumeResponse {
    pub status: String,
    pub resumed: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PreviewResponse {
    /// Upcoming fire instants as UTC ISO-8601 strings.
    pub next_runs_utc: Vec<String>,
    /// The zone the expression was evaluated in.
    pub tz: String,
}

/// One exported schedule: the entry plus its metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleExport {
    pub name: String,
    pub task: String,
    pub cron: String,
    pub timezone: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ScheduleMetadata>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExportResponse {
    pub schedules: Vec<ScheduleExport>,
}

/// One schedule in a bulk import payload. Shaped to accept a previous
/// export verbatim (full metadata, audit included); missing cron falls
/// back to every-minute.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleImportItem {
    pub name: String,
    pub task: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ScheduleMetadata>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImportRequest {
    pub schedules: Vec<ScheduleImportItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImportResponse {
    pub status: String,
    pub created: usize,
}

/// Optional body of the run-now endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RunNowRequest {
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunNowResponse {
    pub status: String,
    /// Opaque dispatch identifier of the enqueued one-off.
    pub task_id: String,
}

/// One factory catalog item, annotated with its latest run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatalogItem {
    pub id: String,
    pub display_name: String,
    pub group: String,
    pub task: String,
    pub description: String,
    pub default_cron: String,
    pub default_tz: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<JobRunSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatalogResponse {
    /// Catalog items grouped by logical group name.
    pub catalog: BTreeMap<String, Vec<CatalogItem>>,
}
