//! QuantMatrix Scheduler Worker
//!
//! The worker consumes the dispatch queue and executes task bodies
//! through the run wrapper: single-flight locks, JobRun lifecycle,
//! status publication, and alerting. Multiple workers run in parallel;
//! tasks for the same schedule are serialized by the single-flight lock.
// This is the main entry point for the worker application. It is
// responsible for:
// - Initializing logging and environment-driven configuration.
// - Connecting the key-value substrate and the JobRun store.
// - Popping dispatch messages and running them concurrently.
// - Re-dispatching failed runs within the schedule's retry budget.

// Use jemalloc as the global allocator for better performance
#[cfg(not(target_os = "windows"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

mod alerts;
mod runner;
mod task_maintenance;
mod task_monitor;
mod tasks;

use shared::config::SchedulerConfig;
use shared::jobrun::JobRunStore;
use shared::kv::{Kv, RedisKv};
use shared::queue::{DispatchMessage, DispatchQueue};

use alerts::AlertService;
use runner::{RunOutcome, TaskRunner};
use tasks::TaskRegistry;

/// How long one queue pop blocks before the loop re-checks shutdown.
const POP_TIMEOUT: Duration = Duration::from_secs(5);

/// Initialize the tracing subscriber with an env-filter.
fn init_logging() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("worker=info,shared=info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .init();
}

/// Wait for SIGINT or SIGTERM.
async fn setup_shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    let _ = shutdown_tx.send(true);
}

/// Run one message and apply the consumer-side retry policy.
///
/// A failed run is re-dispatched while the schedule's retry budget
/// allows, with `safety.backoff_s` spacing; the budget travels in the
/// message headers.
async fn handle_message(runner: TaskRunner, queue: DispatchQueue, message: DispatchMessage) {
    match runner.run(&message).await {
        Ok(RunOutcome::Completed { job_id, .. }) => {
            debug!(task = %message.task, job_id, "Run completed");
        }
        Ok(RunOutcome::Skipped { reason, lock_key }) => {
            info!(task = %message.task, reason = %reason, lock_key = %lock_key, "Run skipped");
        }
        Ok(RunOutcome::Failed { job_id, .. }) => {
            let safety = message
                .options
                .headers
                .schedule_metadata
                .as_ref()
                .map(|meta| meta.safety.clone())
                .unwrap_or_default();
            let attempted = message.options.headers.retry_count;
            if attempted >= safety.retries {
                if safety.retries > 0 {
                    warn!(task = %message.task, job_id, attempted, "Retry budget exhausted");
                }
                return;
            }

            if safety.backoff_s > 0 {
                tokio::time::sleep(Duration::from_secs(safety.backoff_s)).await;
            }
            let mut retry = message.clone();
            retry.options.headers.retry_count = attempted + 1;
            match queue.enqueue(&retry).await {
                Ok(()) => {
                    info!(
                        task = %retry.task,
                        attempt = retry.options.headers.retry_count,
                        of = safety.retries,
                        "Failed run re-dispatched"
                    );
                }
                Err(e) => warn!(task = %retry.task, error = %e, "Retry enqueue failed"),
            }
        }
        Err(e) => {
            warn!(task = %message.task, error = %e, "Run aborted by infrastructure failure");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    info!("Starting QuantMatrix scheduler worker");

    let config = Arc::new(SchedulerConfig::from_env());
    let broker_url = config.require_broker_url()?.to_string();

    let kv: Arc<dyn Kv> = Arc::new(RedisKv::connect(&broker_url).await?);
    let queue = DispatchQueue::new(Arc::clone(&kv));
    let jobruns = Arc::new(Mutex::new(
        JobRunStore::open(&config.jobrun_db_path).context("Failed to open JobRun store")?,
    ));

    let registry = Arc::new(TaskRegistry::with_builtin_handlers());
    info!(tasks = ?registry.task_paths(), "Task handlers registered");

    let alerts = AlertService::new(Arc::clone(&config))?;
    let runner = TaskRunner::new(
        registry,
        Arc::clone(&kv),
        jobruns,
        Arc::clone(&config),
        alerts,
    );

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    tokio::spawn(setup_shutdown_signal(shutdown_tx));

    info!(queues = ?config.worker_queues, "Consuming dispatch queues");
    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        tokio::select! {
            popped = queue.pop(&config.worker_queues, POP_TIMEOUT) => {
                match popped {
                    Ok(Some(message)) => {
                        // Long task bodies must not block the pop loop.
                        tokio::spawn(handle_message(
                            runner.clone(),
                            queue.clone(),
                            message,
                        ));
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(error = %e, "Queue pop failed, backing off");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }

    info!("Worker shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests;
