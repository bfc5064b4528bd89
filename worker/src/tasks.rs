//! Task handler registry
//!
//! Tasks are opaque dotted-path identifiers; this registry maps them to
//! handlers. The worker ships a small set of operational handlers
//! (health probe, queue-depth report, JobRun retention vacuum); domain
//! tasks from the catalog are handled by external workers registering
//! their own handlers against the same dispatch queues.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;

use shared::config::SchedulerConfig;
use shared::jobrun::JobRunStore;
use shared::kv::Kv;
use shared::queue::DispatchQueue;

use crate::task_maintenance::PruneJobHistoryTask;
use crate::task_monitor::{HealthProbeTask, QueueDepthTask};

/// Infrastructure handles available to task bodies.
#[derive(Clone)]
pub struct TaskContext {
    pub kv: Arc<dyn Kv>,
    pub jobruns: Arc<Mutex<JobRunStore>>,
    pub queue: DispatchQueue,
    pub config: Arc<SchedulerConfig>,
}

/// One executable task body.
///
/// A handler may declare a lock-key function; when it yields a key the
/// runner acquires the single-flight lock before creating a JobRun.
/// The returned value is recorded: a JSON object's non-`status` keys
/// become the run's counters.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn run(
        &self,
        ctx: &TaskContext,
        args: &[Value],
        kwargs: &BTreeMap<String, Value>,
    ) -> Result<Value>;

    fn lock_key(&self, _args: &[Value], _kwargs: &BTreeMap<String, Value>) -> Option<String> {
        None
    }
}

/// Maps dotted task paths to registered handlers.
#[derive(Default)]
pub struct TaskRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry with the worker's built-in operational handlers.
    pub fn with_builtin_handlers() -> Self {
        let mut registry = Self::new();
        registry.register("monitor.health", Arc::new(HealthProbeTask));
        registry.register("monitor.queue_depth", Arc::new(QueueDepthTask));
        registry.register(
            "maintenance.prune_job_history",
            Arc::new(PruneJobHistoryTask),
        );
        registry
    }

    pub fn register(&mut self, task_path: &str, handler: Arc<dyn TaskHandler>) {
        self.handlers.insert(task_path.to_string(), handler);
    }

    pub fn resolve(&self, task_path: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(task_path).cloned()
    }

    /// Registered task paths, sorted for stable listings.
    pub fn task_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.handlers.keys().cloned().collect();
        paths.sort();
        paths
    }
}
