//! Maintenance task handlers

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::tasks::{TaskContext, TaskHandler};

/// Retention window applied when the schedule doesn't set one.
const DEFAULT_RETAIN_DAYS: u32 = 90;

/// Deletes terminal JobRun rows older than the retention window.
///
/// Declares a lock key so two overlapping vacuum runs cannot race the
/// same table.
pub struct PruneJobHistoryTask;

#[async_trait]
impl TaskHandler for PruneJobHistoryTask {
    async fn run(
        &self,
        ctx: &TaskContext,
        _args: &[Value],
        kwargs: &BTreeMap<String, Value>,
    ) -> Result<Value> {
        let retain_days = kwargs
            .get("retain_days")
            .and_then(Value::as_u64)
            .map(|days| days as u32)
            .unwrap_or(DEFAULT_RETAIN_DAYS);

        let pruned = ctx
            .jobruns
            .lock()
            .await
            .prune_older_than(retain_days, Utc::now())?;

        Ok(json!({
            "status": "ok",
            "pruned": pruned,
            "retain_days": retain_days,
        }))
    }

    fn lock_key(&self, _args: &[Value], _kwargs: &BTreeMap<String, Value>) -> Option<String> {
        Some("jobruns".to_string())
    }
}
