//! QuantMatrix Scheduler Server
//!
//! The control-plane process: it owns the singleton scheduler loop and
//! serves the admin HTTP surface. Schedules live in the Redis-backed
//! registry and are mutable at runtime through the API; the loop picks
//! up changes on its next tick.
// This is the main entry point for the server application. It is
// responsible for:
// - Initializing logging and environment-driven configuration.
// - Connecting the key-value substrate and the JobRun store.
// - One-time catalog seeding of an empty registry.
// - Running the scheduler loop and the admin API side by side, with
//   graceful shutdown.

// Use jemalloc as the global allocator for better performance
#[cfg(not(target_os = "windows"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{error, info};

mod api;
mod catalog;
mod preflight;
mod scheduler;

use shared::config::SchedulerConfig;
use shared::jobrun::JobRunStore;
use shared::kv::{Kv, RedisKv};
use shared::locks::TaskLocks;
use shared::queue::DispatchQueue;
use shared::registry::{MetadataStore, ScheduleRegistry};

use api::AppState;
use preflight::Preflight;
use scheduler::SchedulerLoop;

/// Initialize the tracing subscriber with an env-filter.
fn init_logging() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("server=info,shared=info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .init();
}

/// Wait for SIGINT or SIGTERM.
async fn setup_shutdown_signal() {
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
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    info!("Starting QuantMatrix scheduler server");

    let config = Arc::new(SchedulerConfig::from_env());
    config
        .require_admin_api_key()
        .context("Admin surface cannot start")?;
    let broker_url = config.require_broker_url()?.to_string();

    let kv: Arc<dyn Kv> = Arc::new(RedisKv::connect(&broker_url).await?);
    let registry = ScheduleRegistry::new(Arc::clone(&kv));
    let metadata = MetadataStore::new(Arc::clone(&kv));
    let queue = DispatchQueue::new(Arc::clone(&kv));
    let locks = TaskLocks::new(Arc::clone(&kv));
    let jobruns = Arc::new(Mutex::new(
        JobRunStore::open(&config.jobrun_db_path).context("Failed to open JobRun store")?,
    ));

    // One-time bootstrap: a registry that has never held schedules gets
    // the factory catalog.
    let seeded = catalog::seed_if_empty(&registry, &metadata).await?;
    if seeded > 0 {
        info!(seeded, "Factory catalog seeded into empty registry");
    }

    let preflight = Preflight::new(Arc::clone(&kv), Arc::clone(&jobruns));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let scheduler_loop = SchedulerLoop::new(
        registry.clone(),
        metadata.clone(),
        queue.clone(),
        locks,
        preflight,
        Arc::clone(&jobruns),
        tokio::time::Duration::from_secs(config.tick_seconds),
    );
    let scheduler_handle = tokio::spawn(scheduler_loop.run(shutdown_rx));

    let state = AppState::new(
        Arc::clone(&config),
        registry,
        metadata,
        queue,
        jobruns,
    );
    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.admin_listen_addr)
        .await
        .with_context(|| {
            format!(
                "Failed to bind TCP listener to {}. \
                 Is another process already listening on that address?",
                config.admin_listen_addr
            )
        })?;
    info!(addr = %config.admin_listen_addr, "Admin API listening");

    let serve_result = axum::serve(listener, app)
        .with_graceful_shutdown(setup_shutdown_signal())
        .await;

    info!("Shutdown signal received, stopping scheduler loop");
    let _ = shutdown_tx.send(true);
    if let Err(e) = scheduler_handle.await {
        error!(error = %e, "Scheduler loop task panicked");
    }

    serve_result.context("Admin API server error")?;
    info!("Server shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests;
