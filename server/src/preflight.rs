//! Named readiness checks evaluated before dispatch
//!
//! A schedule can list preflight checks in its metadata; every named
//! check must pass before the scheduler enqueues a fire. A failing check
//! defers the fire to the next tick rather than skipping it, so a brief
//! dependency outage delays work instead of dropping it.

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use shared::jobrun::JobRunStore;
use shared::kv::Kv;

/// Evaluates preflight checks against live infrastructure handles.
#[derive(Clone)]
pub struct Preflight {
    kv: Arc<dyn Kv>,
    jobruns: Arc<Mutex<JobRunStore>>,
}

impl Preflight {
    pub fn new(kv: Arc<dyn Kv>, jobruns: Arc<Mutex<JobRunStore>>) -> Self {
        Self { kv, jobruns }
    }

    /// Run a single named check.
    ///
    /// Unknown names fail closed: a typo in metadata must not silently
    /// disable the gate it was meant to add.
    pub async fn check(&self, name: &str) -> bool {
        match name {
            "redis" => match self.kv.ping().await {
                Ok(()) => true,
                Err(e) => {
                    debug!(check = name, error = %e, "Preflight check failed");
                    false
                }
            },
            "postgres" | "database" | "jobruns" => {
                match self.jobruns.lock().await.health_check() {
                    Ok(()) => true,
                    Err(e) => {
                        debug!(check = name, error = %e, "Preflight check failed");
                        false
                    }
                }
            }
            other => {
                warn!(check = other, "Unknown preflight check name, failing closed");
                false
            }
        }
    }

    /// Whether every named check passes.
    pub async fn all_pass(&self, names: &[String]) -> bool {
        for name in names {
            if !self.check(name).await {
                return false;
            }
        }
        true
    }
}
