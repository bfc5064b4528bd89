//! Schedule registry, metadata store, and last-status board
//!
//! These are the durable coordination stores on top of the key-value
//! substrate. Active schedule entries live at `reg:{name}:task`, paused
//! snapshots at `paused:{name}`, metadata blobs at `meta:{name}`, and the
//! per-task last-run status at `taskstatus:{task}:last`.
// Individual operations are atomic; multi-key flows (update, pause,
// resume) are deliberately not transactional. A crash between steps
// delays at most one fire and heals on the next scheduler tick, with the
// active entry treated as authoritative.

use anyhow::{Context, Result};
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

use crate::kv::Kv;
use crate::schedule::{PausedSchedule, ScheduleEntry, ScheduleMetadata};
use crate::utils::now_iso_utc;

const ACTIVE_PREFIX: &str = "reg:";
const ACTIVE_SUFFIX: &str = ":task";
const PAUSED_PREFIX: &str = "paused:";
const META_PREFIX: &str = "meta:";

/// Key of an active schedule entry.
pub fn schedule_key(name: &str) -> String {
    format!("{ACTIVE_PREFIX}{name}{ACTIVE_SUFFIX}")
}

/// Key of a paused schedule snapshot.
pub fn paused_key(name: &str) -> String {
    format!("{PAUSED_PREFIX}{name}")
}

/// Key of a schedule's metadata blob.
pub fn metadata_key(name: &str) -> String {
    format!("{META_PREFIX}{name}")
}

/// Key of a task's last-run status blob.
pub fn status_key(task: &str) -> String {
    format!("taskstatus:{task}:last")
}

/// Durable store of schedule entries keyed by name.
#[derive(Clone)]
pub struct ScheduleRegistry {
    kv: Arc<dyn Kv>,
}

impl ScheduleRegistry {
    pub fn new(kv: Arc<dyn Kv>) -> Self {
        Self { kv }
    }

    /// Upsert an entry; overwrites any existing entry with the same name.
    pub async fn put(&self, entry: &ScheduleEntry) -> Result<()> {
        let payload = serde_json::to_string(entry)?;
        self.kv.set(&schedule_key(&entry.name), &payload).await
    }

    pub async fn get(&self, name: &str) -> Result<Option<ScheduleEntry>> {
        match self.kv.get(&schedule_key(name)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw).with_context(|| {
                format!("Corrupt schedule entry for '{name}'")
            })?)),
            None => Ok(None),
        }
    }

    /// Idempotent removal; returns whether an entry existed.
    pub async fn delete(&self, name: &str) -> Result<bool> {
        self.kv.delete(&schedule_key(name)).await
    }

    /// Enumerate all active entries. Corrupt values are skipped with a
    /// warning rather than failing the whole scan.
    pub async fn scan(&self) -> Result<Vec<ScheduleEntry>> {
        let keys = self.kv.scan_prefix(ACTIVE_PREFIX).await?;
        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            if !key.ends_with(ACTIVE_SUFFIX) {
                continue;
            }
            let Some(raw) = self.kv.get(&key).await? else {
                continue;
            };
            match serde_json::from_str::<ScheduleEntry>(&raw) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(key = %key, error = %e, "Skipping corrupt schedule entry"),
            }
        }
        Ok(entries)
    }

    /// Whether the active registry holds no entries at all.
    pub async fn is_empty(&self) -> Result<bool> {
        let keys = self.kv.scan_prefix(ACTIVE_PREFIX).await?;
        Ok(!keys.iter().any(|key| key.ends_with(ACTIVE_SUFFIX)))
    }

    /// Write a paused snapshot. Pause flows call this before deleting the
    /// active entry so a crash between the steps never loses the schedule.
    pub async fn put_paused(&self, name: &str, payload: &PausedSchedule) -> Result<()> {
        let raw = serde_json::to_string(payload)?;
        self.kv.set(&paused_key(name), &raw).await
    }

    pub async fn get_paused(&self, name: &str) -> Result<Option<PausedSchedule>> {
        match self.kv.get(&paused_key(name)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw).with_context(|| {
                format!("Corrupt paused snapshot for '{name}'")
            })?)),
            None => Ok(None),
        }
    }

    pub async fn delete_paused(&self, name: &str) -> Result<bool> {
        self.kv.delete(&paused_key(name)).await
    }

    pub async fn scan_paused(&self) -> Result<Vec<PausedSchedule>> {
        let keys = self.kv.scan_prefix(PAUSED_PREFIX).await?;
        let mut snapshots = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(raw) = self.kv.get(&key).await? else {
                continue;
            };
            match serde_json::from_str::<PausedSchedule>(&raw) {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => warn!(key = %key, error = %e, "Skipping corrupt paused snapshot"),
            }
        }
        Ok(snapshots)
    }
}

/// Blob-per-schedule store for schedule metadata.
#[derive(Clone)]
pub struct MetadataStore {
    kv: Arc<dyn Kv>,
}

impl MetadataStore {
    pub fn new(kv: Arc<dyn Kv>) -> Self {
        Self { kv }
    }

    /// Load the metadata blob for a schedule if present. A corrupt blob
    /// reads as absent; callers fall back to defaults.
    pub async fn load(&self, name: &str) -> Result<Option<ScheduleMetadata>> {
        let Some(raw) = self.kv.get(&metadata_key(name)).await? else {
            return Ok(None);
        };
        match serde_json::from_str::<ScheduleMetadata>(&raw) {
            Ok(meta) => Ok(Some(meta)),
            Err(e) => {
                warn!(schedule = %name, error = %e, "Corrupt schedule metadata, using defaults");
                Ok(None)
            }
        }
    }

    /// Persist a metadata blob; `None` deletes the key (the admin-surface
    /// convention for clearing metadata).
    pub async fn save(&self, name: &str, meta: Option<&ScheduleMetadata>) -> Result<()> {
        match meta {
            Some(meta) => {
                let raw = serde_json::to_string(meta)?;
                self.kv.set(&metadata_key(name), &raw).await
            }
            None => {
                self.kv.delete(&metadata_key(name)).await?;
                Ok(())
            }
        }
    }

    pub async fn delete(&self, name: &str) -> Result<()> {
        self.save(name, None).await
    }
}

/// Single-writer, multi-reader last-run status per task name.
///
/// Overwritten on every transition; read by operators and the admin UI
/// for "last run" badges.
#[derive(Clone)]
pub struct StatusBoard {
    kv: Arc<dyn Kv>,
}

impl StatusBoard {
    pub fn new(kv: Arc<dyn Kv>) -> Self {
        Self { kv }
    }

    /// Publish the latest status for a task.
    pub async fn publish(&self, task: &str, status: &str, payload: Value) -> Result<()> {
        let blob = serde_json::json!({
            "task": task,
            "status": status,
            "ts": now_iso_utc(),
            "payload": payload,
        });
        self.kv
            .set(&status_key(task), &serde_json::to_string(&blob)?)
            .await
    }

    pub async fn last(&self, task: &str) -> Result<Option<Value>> {
        match self.kv.get(&status_key(task)).await? {
            Some(raw) => Ok(serde_json::from_str(&raw).ok()),
            None => Ok(None),
        }
    }
}
