//! The task-run wrapper
//!
//! Every invocation, scheduled or one-off, goes through the same fixed
//! protocol: acquire the single-flight lock when the handler declares a
//! lock key, persist a JobRun row through its running -> ok/error
//! lifecycle, publish the last-run status blob, and emit alerts per the
//! schedule's hooks. The outcome is an explicit variant rather than an
//! exception: `Completed`, `Failed` (recorded and alerted, retried by
//! the consumer loop), or `Skipped` when the lock was contended, which
//! creates no JobRun at all.

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use shared::config::SchedulerConfig;
use shared::defaults::default_lock_ttl_s;
use shared::jobrun::JobRunStore;
use shared::kv::Kv;
use shared::locks::TaskLocks;
use shared::queue::{DispatchMessage, DispatchQueue};
use shared::registry::StatusBoard;
use shared::schedule::{AlertEvent, HookConfig, ScheduleMetadata};
use shared::utils::{simple_task_name, truncate_chars};

use crate::alerts::{AlertService, Severity};
use crate::tasks::{TaskContext, TaskRegistry};

/// Gauge pushed for every terminal transition.
pub const TASK_DURATION_METRIC: &str = "quantmatrix_task_duration_seconds";

/// Field-value truncation limits for alert embeds.
const COUNTERS_FIELD_MAX: usize = 1024;
const ERROR_FIELD_MAX: usize = 512;
const NOTES_FIELD_MAX: usize = 512;

/// Outcome of one wrapped invocation.
#[derive(Debug)]
pub enum RunOutcome {
    /// The task body returned; counters were captured.
    Completed { job_id: i64, value: Value },
    /// The task body failed; the error is recorded and alerted.
    Failed { job_id: i64, error: String },
    /// The single-flight lock was contended. No JobRun row exists.
    Skipped { reason: String, lock_key: String },
}

/// Wraps task invocations in the JobRun protocol.
#[derive(Clone)]
pub struct TaskRunner {
    tasks: Arc<TaskRegistry>,
    ctx: TaskContext,
    jobruns: Arc<Mutex<JobRunStore>>,
    locks: TaskLocks,
    status: StatusBoard,
    alerts: AlertService,
    config: Arc<SchedulerConfig>,
}

impl TaskRunner {
    pub fn new(
        tasks: Arc<TaskRegistry>,
        kv: Arc<dyn Kv>,
        jobruns: Arc<Mutex<JobRunStore>>,
        config: Arc<SchedulerConfig>,
        alerts: AlertService,
    ) -> Self {
        let ctx = TaskContext {
            kv: Arc::clone(&kv),
            jobruns: Arc::clone(&jobruns),
            queue: DispatchQueue::new(Arc::clone(&kv)),
            config: Arc::clone(&config),
        };
        Self {
            tasks,
            ctx,
            jobruns,
            locks: TaskLocks::new(Arc::clone(&kv)),
            status: StatusBoard::new(kv),
            alerts,
            config,
        }
    }

    /// Execute one dispatch message through the full protocol.
    ///
    /// `Err` is reserved for infrastructure failures (e.g. the JobRun
    /// row could not be created); task-body failures come back as
    /// `RunOutcome::Failed`.
    pub async fn run(&self, message: &DispatchMessage) -> Result<RunOutcome> {
        let simple = simple_task_name(&message.task);
        let meta = message.options.headers.schedule_metadata.as_ref();
        // Metadata hooks route alerts; one-offs fall back to the
        // system-default hooks when configured.
        let hooks = match meta {
            Some(meta) => Some(meta.hooks.clone()),
            None => self.config.default_hooks(),
        };

        // Optional single-flight lock, keyed by the handler.
        let mut lock = None;
        if let Some(handler) = self.tasks.resolve(&message.task) {
            if let Some(key) = handler.lock_key(&message.args, &message.kwargs) {
                let ttl = meta
                    .map(|m| m.safety.timeout_s)
                    .unwrap_or_else(default_lock_ttl_s);
                match self.locks.acquire(simple, &key, ttl).await {
                    Ok(Some(held)) => lock = Some(held),
                    Ok(None) => {
                        info!(task = simple, lock_key = %key, "Skipping run, lock already held");
                        return Ok(RunOutcome::Skipped {
                            reason: "locked".to_string(),
                            lock_key: key,
                        });
                    }
                    // Lock store hiccups don't block the run; the
                    // schedule just loses single-flight for this fire.
                    Err(e) => warn!(task = simple, error = %e, "Lock acquisition failed"),
                }
            }
        }

        let outcome = self
            .execute(message, simple, meta, hooks.as_ref())
            .await;

        if let Some(lock) = lock {
            if let Err(e) = lock.release().await {
                warn!(task = simple, error = %e, "Lock release failed");
            }
        }
        outcome
    }

    /// JobRun lifecycle + invocation + status + alerts.
    async fn execute(
        &self,
        message: &DispatchMessage,
        simple: &str,
        meta: Option<&ScheduleMetadata>,
        hooks: Option<&HookConfig>,
    ) -> Result<RunOutcome> {
        let started = Utc::now();
        let job_id = self
            .jobruns
            .lock()
            .await
            .insert_running(simple, &message.kwargs, started)
            .context("Failed to create JobRun row")?;

        self.publish_status(
            simple,
            "running",
            json!({"id": job_id, "params": message.kwargs}),
        )
        .await;

        let result = match self.tasks.resolve(&message.task) {
            Some(handler) => handler.run(&self.ctx, &message.args, &message.kwargs).await,
            None => Err(anyhow!("No handler registered for task '{}'", message.task)),
        };

        let finished = Utc::now();
        let duration_s = (finished - started)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);

        match result {
            Ok(value) => {
                let counters = extract_counters(&value);
                self.jobruns
                    .lock()
                    .await
                    .finish_ok(job_id, counters.as_ref(), finished)
                    .context("Failed to record JobRun success")?;
                self.publish_status(simple, "ok", json!({"id": job_id, "payload": value}))
                    .await;

                if let Some(hooks) = hooks {
                    self.emit_alerts(
                        AlertEvent::Success,
                        simple,
                        job_id,
                        duration_s,
                        hooks,
                        meta,
                        counters.as_ref(),
                        None,
                    )
                    .await;
                    if is_slow(duration_s, meta, hooks) {
                        self.emit_alerts(
                            AlertEvent::Slow,
                            simple,
                            job_id,
                            duration_s,
                            hooks,
                            meta,
                            counters.as_ref(),
                            None,
                        )
                        .await;
                    }
                }

                debug!(task = simple, job_id, duration_s, "Task completed");
                Ok(RunOutcome::Completed { job_id, value })
            }
            Err(error) => {
                // Record the whole error chain, outermost first.
                let error_text = format!("{error:#}");
                self.jobruns
                    .lock()
                    .await
                    .finish_error(job_id, &error_text, finished)
                    .context("Failed to record JobRun failure")?;
                self.publish_status(simple, "error", json!({"id": job_id, "error": error_text}))
                    .await;

                if let Some(hooks) = hooks {
                    self.emit_alerts(
                        AlertEvent::Failure,
                        simple,
                        job_id,
                        duration_s,
                        hooks,
                        meta,
                        None,
                        Some(&error_text),
                    )
                    .await;
                }

                warn!(task = simple, job_id, error = %error_text, "Task failed");
                Ok(RunOutcome::Failed {
                    job_id,
                    error: error_text,
                })
            }
        }
    }

    /// Best-effort status publication: one retry, then the failure is
    /// swallowed. Telemetry never fails a run.
    async fn publish_status(&self, task: &str, status: &str, payload: Value) {
        for attempt in 0..2 {
            match self.status.publish(task, status, payload.clone()).await {
                Ok(()) => return,
                Err(e) if attempt == 0 => {
                    debug!(task, error = %e, "Status publish failed, retrying once");
                }
                Err(e) => {
                    warn!(task, error = %e, "Status publish failed, giving up");
                }
            }
        }
    }

    /// Push the duration gauge, then the Discord alert when the event is
    /// opted in. All failures are logged inside the alert service.
    #[allow(clippy::too_many_arguments)]
    async fn emit_alerts(
        &self,
        event: AlertEvent,
        task: &str,
        job_id: i64,
        duration_s: f64,
        hooks: &HookConfig,
        meta: Option<&ScheduleMetadata>,
        counters: Option<&BTreeMap<String, Value>>,
        error: Option<&str>,
    ) {
        let queue_label = meta
            .and_then(|m| m.queue.as_deref())
            .unwrap_or("default")
            .to_string();

        let labels = vec![
            ("task".to_string(), task.to_string()),
            ("event".to_string(), event.as_str().to_string()),
            ("queue".to_string(), queue_label.clone()),
        ];
        let endpoint = hooks
            .prometheus_endpoint
            .as_deref()
            .or(self.config.prometheus_push_url.as_deref());
        self.alerts
            .push_prometheus_metric(endpoint, TASK_DURATION_METRIC, duration_s, &labels)
            .await;

        if !hooks.wants(event) {
            return;
        }
        let descriptors = hooks.discord_descriptors();
        if descriptors.is_empty() {
            return;
        }

        let mut fields = vec![
            ("Job ID".to_string(), job_id.to_string()),
            ("Duration".to_string(), format!("{duration_s:.1}s")),
            ("Queue".to_string(), queue_label),
        ];
        if let Some(counters) = counters {
            if let Ok(rendered) = serde_json::to_string(counters) {
                fields.push((
                    "Counters".to_string(),
                    truncate_chars(&rendered, COUNTERS_FIELD_MAX),
                ));
            }
        }
        if let Some(error) = error {
            fields.push(("Error".to_string(), truncate_chars(error, ERROR_FIELD_MAX)));
        }
        if let Some(notes) = meta.and_then(|m| m.notes.as_deref()) {
            fields.push(("Notes".to_string(), truncate_chars(notes, NOTES_FIELD_MAX)));
        }

        let mut description = format!("Task {task} reported {}.", event.as_str());
        let mentions = hooks.discord_mentions.join(" ");
        if !mentions.trim().is_empty() {
            description = format!("{description}\n{mentions}");
        }

        let title = format!("{task}: {}", event.as_str().to_uppercase());
        self.alerts
            .send_discord(
                &descriptors,
                &title,
                &description,
                &fields,
                Severity::for_event(event),
            )
            .await;
    }
}

/// Counters are the non-`status` keys of a structured task return.
fn extract_counters(value: &Value) -> Option<BTreeMap<String, Value>> {
    let object = value.as_object()?;
    let counters: BTreeMap<String, Value> = object
        .iter()
        .filter(|(key, _)| key.as_str() != "status" && key.as_str() != "error")
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    if counters.is_empty() {
        None
    } else {
        Some(counters)
    }
}

/// Slow threshold: explicit hook threshold first, then the schedule's
/// safety timeout; dispatches without metadata have no timeout fallback.
fn is_slow(duration_s: f64, meta: Option<&ScheduleMetadata>, hooks: &HookConfig) -> bool {
    let threshold = match hooks.slow_threshold_s {
        Some(threshold) if threshold > 0.0 => Some(threshold),
        _ => meta.and_then(|m| {
            if m.safety.timeout_s > 0 {
                Some(m.safety.timeout_s as f64)
            } else {
                None
            }
        }),
    };
    threshold.map_or(false, |threshold| duration_s > threshold)
}
