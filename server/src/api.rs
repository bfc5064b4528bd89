//! Admin REST API for the scheduler control plane
//!
//! This module provides the HTTP endpoints operators use to manage
//! schedules: CRUD, pause/resume, fire-time preview, export/import,
//! run-now, and the factory catalog. Every mutating endpoint identifies
//! the caller (for audit stamps) and all endpoints except the health
//! check require the admin API key.
// This module uses the `axum` web framework. Each public endpoint is a
// handler function; failures are returned as `ApiError`, which maps onto
// HTTP status codes with a structured JSON body.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use shared::api::{
    endpoints, headers, CatalogItem, CatalogResponse, ExportResponse, ImportRequest,
    ImportResponse, JobRunSummary, PreviewResponse, RunNowRequest, RunNowResponse,
    ScheduleCreateRequest, ScheduleDeleteResponse, ScheduleExport, ScheduleMutationResponse,
    SchedulePauseResponse, ScheduleResumeResponse, ScheduleSummary, ScheduleUpdateRequest,
    SchedulesResponse,
};
use shared::config::SchedulerConfig;
use shared::defaults::{default_preview_count, default_timezone, max_preview_count};
use shared::jobrun::JobRunStore;
use shared::planner::{self, CronPlan};
use shared::queue::{DispatchMessage, DispatchOptions, DispatchQueue};
use shared::registry::{MetadataStore, ScheduleRegistry};
use shared::schedule::{MetadataPatch, PausedSchedule, ScheduleEntry};
use shared::utils::{to_iso_utc, validate_schedule_name};

use crate::catalog;

/// Cron expression applied to imported entries that carry none.
const IMPORT_FALLBACK_CRON: &str = "* * * * *";

/// Actor label used when the caller does not identify themselves.
const DEFAULT_ACTOR: &str = "admin";

/// Application state shared across all API handlers
#[derive(Clone)]
pub struct AppState {
    /// Runtime configuration (admin key, defaults).
    pub config: Arc<SchedulerConfig>,
    /// Active + paused schedule entries.
    pub registry: ScheduleRegistry,
    /// Metadata blobs keyed by schedule name.
    pub metadata: MetadataStore,
    /// Producer handle for run-now dispatches.
    pub queue: DispatchQueue,
    /// JobRun store, read for last-run annotations.
    pub jobruns: Arc<Mutex<JobRunStore>>,
}

impl AppState {
    pub fn new(
        config: Arc<SchedulerConfig>,
        registry: ScheduleRegistry,
        metadata: MetadataStore,
        queue: DispatchQueue,
        jobruns: Arc<Mutex<JobRunStore>>,
    ) -> Self {
        Self {
            config,
            registry,
            metadata,
            queue,
            jobruns,
        }
    }
}

/// Creates the admin API router and defines all the application's routes.
/// This function is called once at server startup to build the routing tree.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Unauthenticated health check for load balancers and orchestrators.
        .route(endpoints::HEALTH, get(health_check))
        .route(
            endpoints::SCHEDULES,
            get(list_schedules).post(create_schedule),
        )
        .route(
            endpoints::SCHEDULE_BY_NAME,
            axum::routing::put(update_schedule).delete(delete_schedule),
        )
        .route(endpoints::SCHEDULES_PAUSE, post(pause_schedule))
        .route(endpoints::SCHEDULES_RESUME, post(resume_schedule))
        .route(endpoints::SCHEDULES_PREVIEW, get(preview_schedule))
        .route(endpoints::SCHEDULES_EXPORT, get(export_schedules))
        .route(endpoints::SCHEDULES_IMPORT, post(import_schedules))
        .route(endpoints::SCHEDULES_RUN_NOW, post(run_now))
        .route(endpoints::TASKS_CATALOG, get(list_catalog))
        .with_state(state)
}

/// Validate the admin API key and return the caller's audit label.
///
/// The key comparison is constant-time to avoid leaking the key
/// character-by-character through response timing.
fn authorize(state: &AppState, request_headers: &HeaderMap) -> Result<String, ApiError> {
    use subtle::ConstantTimeEq;

    let expected_key = state.config.admin_api_key.as_deref().unwrap_or("");

    let provided_key = match request_headers.get(headers::API_KEY) {
        Some(key) => match key.to_str() {
            Ok(key_str) => key_str,
            Err(_) => {
                warn!("Invalid API key format in header");
                return Err(ApiError::Unauthorized);
            }
        },
        None => {
            warn!("Missing API key header");
            return Err(ApiError::Unauthorized);
        }
    };

    if provided_key.is_empty() || expected_key.is_empty() {
        warn!("Empty API key provided or configured");
        return Err(ApiError::Unauthorized);
    }

    let provided_bytes = provided_key.as_bytes();
    let expected_bytes = expected_key.as_bytes();
    let keys_match = provided_bytes.len() == expected_bytes.len()
        && bool::from(provided_bytes.ct_eq(expected_bytes));

    if !keys_match {
        warn!("Invalid API key provided");
        return Err(ApiError::Unauthorized);
    }

    let actor = request_headers
        .get(headers::ADMIN_USER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|label| !label.is_empty())
        .unwrap_or(DEFAULT_ACTOR);
    Ok(actor.to_string())
}

fn store_error(e: anyhow::Error) -> ApiError {
    ApiError::Internal(e.to_string())
}

/// The handler for the `/health` endpoint.
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "quantmatrix-scheduler",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Most recent JobRun summary for a task, best-effort.
async fn last_run_summary(state: &AppState, simple_task: &str) -> Option<JobRunSummary> {
    match state.jobruns.lock().await.last_run(simple_task) {
        Ok(run) => run.as_ref().map(JobRunSummary::from),
        Err(e) => {
            warn!(task = simple_task, error = %e, "Last-run lookup failed");
            None
        }
    }
}

/// GET /schedules: merge active registry entries with paused snapshots.
async fn list_schedules(
    State(state): State<AppState>,
    request_headers: HeaderMap,
) -> Result<Json<SchedulesResponse>, ApiError> {
    authorize(&state, &request_headers)?;

    let mut schedules = Vec::new();

    for entry in state.registry.scan().await.map_err(store_error)? {
        let metadata = state.metadata.load(&entry.name).await.unwrap_or(None);
        let last_run = last_run_summary(&state, entry.simple_task_name()).await;
        schedules.push(ScheduleSummary {
            name: entry.name.clone(),
            task: entry.task.clone(),
            cron: entry.cron.clone(),
            timezone: entry.timezone.clone(),
            args: entry.args.clone(),
            kwargs: entry.kwargs.clone(),
            enabled: true,
            status: "active".to_string(),
            last_run,
            metadata,
        });
    }

    for snapshot in state.registry.scan_paused().await.map_err(store_error)? {
        let entry = snapshot.entry;
        schedules.push(ScheduleSummary {
            name: entry.name.clone(),
            task: entry.task.clone(),
            cron: entry.cron.clone(),
            timezone: entry.timezone.clone(),
            args: entry.args.clone(),
            kwargs: entry.kwargs.clone(),
            enabled: false,
            status: "paused".to_string(),
            last_run: None,
            metadata: snapshot.metadata,
        });
    }

    Ok(Json(SchedulesResponse {
        schedules,
        mode: "dynamic".to_string(),
    }))
}

/// Validate and write a schedule entry plus freshly-stamped metadata.
/// Shared by create and import.
async fn write_new_schedule(
    state: &AppState,
    actor: &str,
    entry: &ScheduleEntry,
    patch: Option<&MetadataPatch>,
) -> Result<(), ApiError> {
    validate_schedule_name(&entry.name).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    if entry.task.trim().is_empty() {
        return Err(ApiError::BadRequest("task is required".to_string()));
    }
    planner::validate(&entry.cron, &entry.timezone)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let meta = patch.map(|patch| {
        let mut meta = patch.apply(None);
        meta.touch_audit(actor, true);
        meta
    });

    state.registry.put(entry).await.map_err(store_error)?;
    state
        .metadata
        .save(&entry.name, meta.as_ref())
        .await
        .map_err(store_error)?;
    Ok(())
}

/// POST /schedules: create a schedule from cron string and timezone.
async fn create_schedule(
    State(state): State<AppState>,
    request_headers: HeaderMap,
    Json(payload): Json<ScheduleCreateRequest>,
) -> Result<Json<ScheduleMutationResponse>, ApiError> {
    let actor = authorize(&state, &request_headers)?;

    let entry = ScheduleEntry {
        name: payload.name.clone(),
        task: payload.task,
        cron: payload.cron,
        timezone: payload.timezone,
        args: payload.args,
        kwargs: payload.kwargs,
        enabled: true,
    };
    write_new_schedule(&state, &actor, &entry, payload.metadata.as_ref()).await?;

    info!(schedule = %entry.name, actor = %actor, "Schedule created");
    Ok(Json(ScheduleMutationResponse {
        status: "ok".to_string(),
        name: entry.name,
    }))
}

/// PUT /schedules/{name}: delete and recreate with the new definition.
///
/// `cron` is required; inferring it from the stored entry would make the
/// update ambiguous.
async fn update_schedule(
    State(state): State<AppState>,
    Path(name): Path<String>,
    request_headers: HeaderMap,
    Json(payload): Json<ScheduleUpdateRequest>,
) -> Result<Json<ScheduleMutationResponse>, ApiError> {
    let actor = authorize(&state, &request_headers)?;

    let current = state
        .registry
        .get(&name)
        .await
        .map_err(store_error)?
        .ok_or_else(|| ApiError::NotFound(format!("schedule '{name}' not found")))?;

    let Some(cron) = payload.cron else {
        return Err(ApiError::BadRequest(
            "cron is required for update".to_string(),
        ));
    };
    let timezone = payload.timezone.unwrap_or_else(default_timezone);
    planner::validate(&cron, &timezone).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let existing_meta = state.metadata.load(&name).await.unwrap_or(None);
    let meta = match payload.metadata {
        Some(patch) => {
            let mut merged = patch.apply(existing_meta.as_ref());
            merged.touch_audit(&actor, existing_meta.is_none());
            Some(merged)
        }
        None => existing_meta,
    };

    // Delete and recreate under the same name; the task identity is kept.
    state.registry.delete(&name).await.map_err(store_error)?;
    let entry = ScheduleEntry {
        name: name.clone(),
        task: current.task,
        cron,
        timezone,
        args: payload.args.unwrap_or(current.args),
        kwargs: payload.kwargs.unwrap_or(current.kwargs),
        enabled: true,
    };
    state.registry.put(&entry).await.map_err(store_error)?;
    state
        .metadata
        .save(&name, meta.as_ref())
        .await
        .map_err(store_error)?;

    info!(schedule = %name, actor = %actor, "Schedule updated");
    Ok(Json(ScheduleMutationResponse {
        status: "ok".to_string(),
        name,
    }))
}

/// DELETE /schedules/{name}: remove the entry and its metadata.
async fn delete_schedule(
    State(state): State<AppState>,
    Path(name): Path<String>,
    request_headers: HeaderMap,
) -> Result<Json<ScheduleDeleteResponse>, ApiError> {
    let actor = authorize(&state, &request_headers)?;

    let removed = state.registry.delete(&name).await.map_err(store_error)?;
    if !removed {
        return Err(ApiError::NotFound(format!("schedule '{name}' not found")));
    }
    state.metadata.delete(&name).await.map_err(store_error)?;

    info!(schedule = %name, actor = %actor, "Schedule deleted");
    Ok(Json(ScheduleDeleteResponse {
        status: "ok".to_string(),
        deleted: name,
    }))
}

#[derive(Debug, Deserialize)]
struct PauseQuery {
    name: String,
}

/// POST /schedules/pause?name=: snapshot the entry + metadata to the
/// paused side-registry, then remove the active entry.
async fn pause_schedule(
    State(state): State<AppState>,
    Query(query): Query<PauseQuery>,
    request_headers: HeaderMap,
) -> Result<Json<SchedulePauseResponse>, ApiError> {
    let actor = authorize(&state, &request_headers)?;
    let name = query.name;

    let entry = state
        .registry
        .get(&name)
        .await
        .map_err(store_error)?
        .ok_or_else(|| ApiError::NotFound(format!("schedule '{name}' not found")))?;
    let metadata = state.metadata.load(&name).await.unwrap_or(None);

    // Snapshot before delete: a crash between the steps leaves a
    // duplicate, never a lost schedule.
    let snapshot = PausedSchedule { entry, metadata };
    state
        .registry
        .put_paused(&name, &snapshot)
        .await
        .map_err(store_error)?;
    state.registry.delete(&name).await.map_err(store_error)?;
    state.metadata.delete(&name).await.map_err(store_error)?;

    info!(schedule = %name, actor = %actor, "Schedule paused");
    Ok(Json(SchedulePauseResponse {
        status: "ok".to_string(),
        paused: name,
    }))
}

#[derive(Debug, Deserialize)]
struct ResumeQuery {
    name: String,
    cron: Option<String>,
    timezone: Option<String>,
}

/// POST /schedules/resume?name=: recreate the schedule from its paused
/// snapshot, optionally overriding cron/timezone.
async fn resume_schedule(
    State(state): State<AppState>,
    Query(query): Query<ResumeQuery>,
    request_headers: HeaderMap,
) -> Result<Json<ScheduleResumeResponse>, ApiError> {
    let actor = authorize(&state, &request_headers)?;
    let name = query.name;

    let snapshot = state
        .registry
        .get_paused(&name)
        .await
        .map_err(store_error)?
        .ok_or_else(|| ApiError::NotFound(format!("paused schedule '{name}' not found")))?;

    let mut entry = snapshot.entry;
    if let Some(cron) = query.cron {
        entry.cron = cron;
    }
    if let Some(timezone) = query.timezone {
        entry.timezone = timezone;
    }
    planner::validate(&entry.cron, &entry.timezone)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    // Recreate before deleting the snapshot, mirroring pause's ordering.
    state.registry.put(&entry).await.map_err(store_error)?;
    state
        .metadata
        .save(&name, snapshot.metadata.as_ref())
        .await
        .map_err(store_error)?;
    state
        .registry
        .delete_paused(&name)
        .await
        .map_err(store_error)?;

    info!(schedule = %name, actor = %actor, "Schedule resumed");
    Ok(Json(ScheduleResumeResponse {
        status: "ok".to_string(),
        resumed: name,
    }))
}

#[derive(Debug, Deserialize)]
struct PreviewQuery {
    cron: String,
    #[serde(default = "default_timezone")]
    timezone: String,
    #[serde(default = "default_preview_count")]
    count: usize,
}

/// GET /schedules/preview: next N fire times for a cron + timezone.
async fn preview_schedule(
    State(state): State<AppState>,
    Query(query): Query<PreviewQuery>,
    request_headers: HeaderMap,
) -> Result<Json<PreviewResponse>, ApiError> {
    authorize(&state, &request_headers)?;

    if query.count < 1 || query.count > max_preview_count() {
        return Err(ApiError::BadRequest(format!(
            "count must be between 1 and {}",
            max_preview_count()
        )));
    }
    let plan = CronPlan::parse(&query.cron, &query.timezone)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let next_runs_utc = plan
        .upcoming(chrono::Utc::now(), query.count)
        .into_iter()
        .map(to_iso_utc)
        .collect();

    Ok(Json(PreviewResponse {
        next_runs_utc,
        tz: query.timezone,
    }))
}

/// GET /schedules/export: dump of all active entries with metadata.
async fn export_schedules(
    State(state): State<AppState>,
    request_headers: HeaderMap,
) -> Result<Json<ExportResponse>, ApiError> {
    authorize(&state, &request_headers)?;

    let mut schedules = Vec::new();
    for entry in state.registry.scan().await.map_err(store_error)? {
        let metadata = state.metadata.load(&entry.name).await.unwrap_or(None);
        schedules.push(ScheduleExport {
            name: entry.name,
            task: entry.task,
            cron: entry.cron,
            timezone: entry.timezone,
            args: entry.args,
            kwargs: entry.kwargs,
            metadata,
        });
    }
    Ok(Json(ExportResponse { schedules }))
}

/// POST /schedules/import: bulk upsert from a previously-exported
/// payload. Per-entry failures are tolerated and only counted.
async fn import_schedules(
    State(state): State<AppState>,
    request_headers: HeaderMap,
    Json(payload): Json<ImportRequest>,
) -> Result<Json<ImportResponse>, ApiError> {
    let actor = authorize(&state, &request_headers)?;

    let mut created = 0;
    for item in payload.schedules {
        let entry = ScheduleEntry {
            name: item.name.clone(),
            task: item.task,
            cron: item
                .cron
                .unwrap_or_else(|| IMPORT_FALLBACK_CRON.to_string()),
            timezone: item.timezone.unwrap_or_else(default_timezone),
            args: item.args,
            kwargs: item.kwargs,
            enabled: true,
        };
        // Exported metadata re-enters as a patch; audit is restamped to
        // the importing actor.
        let patch = item.metadata.map(|meta| MetadataPatch {
            queue: meta.queue,
            priority: meta.priority,
            dependencies: Some(meta.dependencies),
            maintenance_windows: Some(meta.maintenance_windows),
            preflight_checks: Some(meta.preflight_checks),
            safety: Some(meta.safety),
            hooks: Some(meta.hooks),
            notes: meta.notes,
        });
        match write_new_schedule(&state, &actor, &entry, patch.as_ref()).await {
            Ok(()) => created += 1,
            Err(e) => {
                warn!(schedule = %item.name, error = %e, "Import entry rejected");
            }
        }
    }

    info!(created, actor = %actor, "Schedules imported");
    Ok(Json(ImportResponse {
        status: "ok".to_string(),
        created,
    }))
}

#[derive(Debug, Deserialize)]
struct RunNowQuery {
    task: String,
}

/// POST /schedules/run-now?task=: one-off dispatch bypassing the cron
/// loop. The message carries no schedule metadata, so the worker falls
/// back to system-default alert hooks.
async fn run_now(
    State(state): State<AppState>,
    Query(query): Query<RunNowQuery>,
    request_headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<Json<RunNowResponse>, ApiError> {
    let actor = authorize(&state, &request_headers)?;

    if query.task.trim().is_empty() {
        return Err(ApiError::BadRequest("task is required".to_string()));
    }
    // The body is optional; a missing one means no args and no kwargs.
    let request: RunNowRequest = if body.is_empty() {
        RunNowRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("invalid run-now body: {e}")))?
    };

    let message = DispatchMessage::new(
        &query.task,
        request.args,
        request.kwargs,
        DispatchOptions::default(),
    );
    state.queue.enqueue(&message).await.map_err(store_error)?;

    info!(task = %query.task, dispatch_id = %message.id, actor = %actor, "One-off dispatched");
    Ok(Json(RunNowResponse {
        status: "ok".to_string(),
        task_id: message.id,
    }))
}

/// GET /tasks/catalog: the factory catalog grouped by logical group,
/// each item annotated with its most recent JobRun.
async fn list_catalog(
    State(state): State<AppState>,
    request_headers: HeaderMap,
) -> Result<Json<CatalogResponse>, ApiError> {
    authorize(&state, &request_headers)?;

    let mut grouped: BTreeMap<String, Vec<CatalogItem>> = BTreeMap::new();
    for template in catalog::catalog() {
        let mut item = template.to_item();
        let simple = shared::utils::simple_task_name(template.task);
        item.last_run = last_run_summary(&state, simple).await;
        grouped.entry(template.group.to_string()).or_default().push(item);
    }

    debug!(groups = grouped.len(), "Catalog listed");
    Ok(Json(CatalogResponse { catalog: grouped }))
}

/// Error types for the admin API
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Internal server error: {0}")]
    Internal(String),
}

/// This implementation allows `ApiError` to be converted into an HTTP
/// response, so handlers can return `Result<_, ApiError>` and let axum
/// render the error body.
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "Bad Request"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "Not Found"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error"),
        };

        let body = Json(serde_json::json!({
            "error": error_message,
            "details": self.to_string(),
        }));

        (status, body).into_response()
    }
}
