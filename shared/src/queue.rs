//! Dispatch queue: list-backed task messages for the worker fleet
//!
//! The scheduler loop and the run-now endpoint push JSON messages onto
//! per-queue Redis lists at `queue:{name}`; workers block-pop them. The
//! message carries the task identifier, its arguments, and routing
//! options including a snapshot of the schedule metadata so workers can
//! decide alert routing without a registry round-trip.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::kv::Kv;
use crate::schedule::ScheduleMetadata;

/// Queue used when a message's options don't route elsewhere.
pub const DEFAULT_QUEUE: &str = "default";

fn queue_storage_key(queue: &str) -> String {
    format!("queue:{queue}")
}

/// Headers propagated alongside a dispatched task.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DispatchHeaders {
    /// Snapshot of the schedule's metadata at dispatch time. Absent for
    /// run-now one-offs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_metadata: Option<ScheduleMetadata>,
    /// Redelivery count; incremented each time the consumer re-dispatches
    /// a failed run under the schedule's retry budget.
    #[serde(default)]
    pub retry_count: u32,
}

/// Routing options attached to a dispatch message.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DispatchOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
    #[serde(default)]
    pub headers: DispatchHeaders,
}

impl DispatchOptions {
    /// Translate a metadata snapshot into dispatch options, mirroring the
    /// schedule's queue and priority and carrying the snapshot itself.
    pub fn from_metadata(meta: &ScheduleMetadata) -> Self {
        Self {
            queue: meta.queue.clone(),
            priority: meta.priority,
            headers: DispatchHeaders {
                schedule_metadata: Some(meta.clone()),
                retry_count: 0,
            },
        }
    }
}

/// A single unit of dispatched work.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatchMessage {
    /// Opaque dispatch identifier (returned by run-now).
    pub id: String,
    /// Dotted task path routed to a registered handler.
    pub task: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: BTreeMap<String, Value>,
    #[serde(default)]
    pub options: DispatchOptions,
}

impl DispatchMessage {
    pub fn new(
        task: &str,
        args: Vec<Value>,
        kwargs: BTreeMap<String, Value>,
        options: DispatchOptions,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            task: task.to_string(),
            args,
            kwargs,
            options,
        }
    }

    /// The queue this message routes to.
    pub fn queue(&self) -> &str {
        self.options.queue.as_deref().unwrap_or(DEFAULT_QUEUE)
    }
}

/// Producer/consumer handle for the dispatch lists.
#[derive(Clone)]
pub struct DispatchQueue {
    kv: Arc<dyn Kv>,
}

impl DispatchQueue {
    pub fn new(kv: Arc<dyn Kv>) -> Self {
        Self { kv }
    }

    /// Enqueue a message onto its routed queue.
    pub async fn enqueue(&self, message: &DispatchMessage) -> Result<()> {
        let payload = serde_json::to_string(message)?;
        self.kv
            .queue_push(&queue_storage_key(message.queue()), &payload)
            .await
    }

    /// Block-pop the next message from the given queues, in priority
    /// order of the queue list, waiting up to `timeout`.
    pub async fn pop(
        &self,
        queues: &[String],
        timeout: Duration,
    ) -> Result<Option<DispatchMessage>> {
        let keys: Vec<String> = queues.iter().map(|q| queue_storage_key(q)).collect();
        match self.kv.queue_pop(&keys, timeout).await? {
            Some((_key, payload)) => Ok(Some(
                serde_json::from_str(&payload).context("Corrupt dispatch message")?,
            )),
            None => Ok(None),
        }
    }

    /// Current depth of a queue, for operational reporting.
    pub async fn depth(&self, queue: &str) -> Result<usize> {
        self.kv.queue_len(&queue_storage_key(queue)).await
    }
}
