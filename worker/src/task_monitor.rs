//! Operational monitoring task handlers

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::tasks::{TaskContext, TaskHandler};

/// Probes the worker's infrastructure dependencies.
///
/// Fails (and therefore alerts) when the key-value substrate or the
/// JobRun store is unreachable.
pub struct HealthProbeTask;

#[async_trait]
impl TaskHandler for HealthProbeTask {
    async fn run(
        &self,
        ctx: &TaskContext,
        _args: &[Value],
        _kwargs: &BTreeMap<String, Value>,
    ) -> Result<Value> {
        ctx.kv.ping().await.context("Key-value substrate probe failed")?;
        ctx.jobruns
            .lock()
            .await
            .health_check()
            .context("JobRun store probe failed")?;

        Ok(json!({
            "status": "ok",
            "redis_ok": 1,
            "database_ok": 1,
        }))
    }
}

/// Reports dispatch-queue depths as counters.
///
/// Kwargs: `queues` (optional list of queue names; defaults to the
/// worker's configured queues).
pub struct QueueDepthTask;

#[async_trait]
impl TaskHandler for QueueDepthTask {
    async fn run(
        &self,
        ctx: &TaskContext,
        _args: &[Value],
        kwargs: &BTreeMap<String, Value>,
    ) -> Result<Value> {
        let queues: Vec<String> = match kwargs.get("queues").and_then(Value::as_array) {
            Some(values) => values
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            None => ctx.config.worker_queues.clone(),
        };

        let mut report = serde_json::Map::new();
        report.insert("status".to_string(), json!("ok"));
        let mut total = 0usize;
        for queue in &queues {
            let depth = ctx.queue.depth(queue).await?;
            total += depth;
            report.insert(format!("depth_{queue}"), json!(depth));
        }
        report.insert("total".to_string(), json!(total));
        Ok(Value::Object(report))
    }
}
