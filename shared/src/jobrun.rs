//! Durable JobRun records
//!
//! Every task invocation is persisted as a JobRun row in SQLite: inserted
//! as `running` when the task starts and transitioned exactly once to
//! `ok` or `error`. Rows are never mutated afterwards and are retained
//! for audit (the maintenance vacuum prunes them only when explicitly
//! scheduled).
// Workers insert and finish rows; the admin surface and the scheduler's
// dependency gate only read. WAL mode keeps the single-writer-per-row
// model safe across processes.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Lifecycle states of a JobRun.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Ok,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Ok => "ok",
            JobStatus::Error => "error",
        }
    }

    fn from_db(value: &str) -> Result<Self> {
        match value {
            "running" => Ok(JobStatus::Running),
            "ok" => Ok(JobStatus::Ok),
            "error" => Ok(JobStatus::Error),
            other => Err(anyhow::anyhow!("Unknown job status '{other}'")),
        }
    }
}

/// Immutable durable record of a single task invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobRun {
    pub id: i64,
    /// Simple task identifier (the final dotted-path segment).
    pub task_name: String,
    /// Snapshot of the kwargs at dispatch time.
    pub params: BTreeMap<String, Value>,
    pub status: JobStatus,
    /// Counters captured from a successful task's structured return.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counters: Option<BTreeMap<String, Value>>,
    /// Error chain text when status is `error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobRun {
    /// Wall-clock duration of a finished run, zero while running.
    pub fn duration_seconds(&self) -> f64 {
        match self.finished_at {
            Some(finished) => (finished - self.started_at)
                .to_std()
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0),
            None => 0.0,
        }
    }
}

/// SQLite-backed store for JobRun rows.
pub struct JobRunStore {
    db_path: PathBuf,
    connection: Connection,
}

impl JobRunStore {
    /// Open (or create) the store at `db_path`, creating parent
    /// directories and the schema as needed.
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create data directory: {}", parent.display())
                })?;
            }
        }

        let connection = Connection::open(&db_path)
            .with_context(|| format!("Failed to open JobRun database: {}", db_path.display()))?;

        // WAL lets admin readers run alongside worker writers.
        connection
            .query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))
            .context("Failed to enable WAL mode")?;
        connection
            .busy_timeout(std::time::Duration::from_secs(5))
            .context("Failed to set busy timeout")?;
        connection.execute_batch(
            "CREATE TABLE IF NOT EXISTS job_runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_name TEXT NOT NULL,
                params TEXT NOT NULL DEFAULT '{}',
                status TEXT NOT NULL,
                counters TEXT,
                error TEXT,
                started_at TEXT NOT NULL,
                finished_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_job_runs_task_started
                ON job_runs (task_name, started_at DESC);",
        )?;

        info!("JobRun store ready at {}", db_path.display());
        Ok(Self {
            db_path,
            connection,
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Insert a new row with status `running` and return its id.
    pub fn insert_running(
        &self,
        task_name: &str,
        params: &BTreeMap<String, Value>,
        started_at: DateTime<Utc>,
    ) -> Result<i64> {
        self.connection.execute(
            "INSERT INTO job_runs (task_name, params, status, started_at)
             VALUES (?1, ?2, 'running', ?3)",
            params![
                task_name,
                serde_json::to_string(params)?,
                started_at.to_rfc3339(),
            ],
        )?;
        Ok(self.connection.last_insert_rowid())
    }

    /// Transition a running row to `ok`, recording counters.
    ///
    /// Returns false when the row was not in `running` state; terminal
    /// rows are never overwritten.
    pub fn finish_ok(
        &self,
        id: i64,
        counters: Option<&BTreeMap<String, Value>>,
        finished_at: DateTime<Utc>,
    ) -> Result<bool> {
        let counters_json = counters.map(serde_json::to_string).transpose()?;
        let updated = self.connection.execute(
            "UPDATE job_runs SET status = 'ok', counters = ?2, finished_at = ?3
             WHERE id = ?1 AND status = 'running'",
            params![id, counters_json, finished_at.to_rfc3339()],
        )?;
        Ok(updated > 0)
    }

    /// Transition a running row to `error`, recording the error text.
    pub fn finish_error(&self, id: i64, error: &str, finished_at: DateTime<Utc>) -> Result<bool> {
        let updated = self.connection.execute(
            "UPDATE job_runs SET status = 'error', error = ?2, finished_at = ?3
             WHERE id = ?1 AND status = 'running'",
            params![id, error, finished_at.to_rfc3339()],
        )?;
        Ok(updated > 0)
    }

    pub fn get(&self, id: i64) -> Result<Option<JobRun>> {
        self.connection
            .query_row(
                "SELECT id, task_name, params, status, counters, error, started_at, finished_at
                 FROM job_runs WHERE id = ?1",
                params![id],
                Self::row_to_job_run,
            )
            .optional()
            .context("Failed to load JobRun")
    }

    /// The most recent run for a task, regardless of outcome.
    pub fn last_run(&self, task_name: &str) -> Result<Option<JobRun>> {
        self.connection
            .query_row(
                "SELECT id, task_name, params, status, counters, error, started_at, finished_at
                 FROM job_runs WHERE task_name = ?1
                 ORDER BY started_at DESC, id DESC LIMIT 1",
                params![task_name],
                Self::row_to_job_run,
            )
            .optional()
            .context("Failed to load last JobRun")
    }

    /// The most recent successful run for a task, used by the scheduler's
    /// dependency gate.
    pub fn last_ok_run(&self, task_name: &str) -> Result<Option<JobRun>> {
        self.connection
            .query_row(
                "SELECT id, task_name, params, status, counters, error, started_at, finished_at
                 FROM job_runs WHERE task_name = ?1 AND status = 'ok'
                 ORDER BY started_at DESC, id DESC LIMIT 1",
                params![task_name],
                Self::row_to_job_run,
            )
            .optional()
            .context("Failed to load last successful JobRun")
    }

    /// Delete terminal rows older than `retain_days`. Running rows are
    /// never pruned.
    pub fn prune_older_than(&self, retain_days: u32, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now - chrono::Duration::days(retain_days as i64);
        let removed = self.connection.execute(
            "DELETE FROM job_runs
             WHERE status != 'running' AND started_at < ?1",
            params![cutoff.to_rfc3339()],
        )?;
        debug!(removed, retain_days, "Pruned old JobRun rows");
        Ok(removed)
    }

    /// Connectivity probe for preflight checks.
    pub fn health_check(&self) -> Result<()> {
        self.connection
            .query_row("SELECT 1", [], |_| Ok(()))
            .context("JobRun store health check failed")
    }

    fn row_to_job_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<JobRun> {
        let params_json: String = row.get(2)?;
        let status_text: String = row.get(3)?;
        let counters_json: Option<String> = row.get(4)?;
        let started_at: String = row.get(6)?;
        let finished_at: Option<String> = row.get(7)?;

        let parse_instant = |value: &str, idx: usize| {
            DateTime::parse_from_rfc3339(value)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        idx,
                        rusqlite::types::Type::Text,
                        Box::new(e),
                    )
                })
        };

        Ok(JobRun {
            id: row.get(0)?,
            task_name: row.get(1)?,
            params: serde_json::from_str(&params_json).unwrap_or_default(),
            status: JobStatus::from_db(&status_text).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    3,
                    rusqlite::types::Type::Text,
                    e.into(),
                )
            })?,
            counters: counters_json.and_then(|raw| serde_json::from_str(&raw).ok()),
            error: row.get(5)?,
            started_at: parse_instant(&started_at, 6)?,
            finished_at: finished_at.as_deref().map(|raw| parse_instant(raw, 7)).transpose()?,
        })
    }
}
