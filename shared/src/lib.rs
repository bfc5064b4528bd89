//! Shared data model and storage primitives for the scheduler control plane
//!
//! This crate contains the types and stores used by both the server (admin
//! surface + scheduler loop) and the worker (task runner) processes: the
//! schedule/metadata data model, the cron planner, the key-value substrate
//! and its higher-level stores, the JobRun SQLite store, the dispatch
//! queue, and environment-driven configuration.

pub mod api;
pub mod config;
pub mod defaults;
pub mod jobrun;
pub mod kv;
pub mod locks;
pub mod planner;
pub mod queue;
pub mod registry;
pub mod schedule;
pub mod utils;

// Re-export commonly used types for convenience
pub use config::SchedulerConfig;
pub use jobrun::{JobRun, JobRunStore, JobStatus};
pub use kv::{Kv, MemoryKv, RedisKv};
pub use planner::{CronPlan, PlannerError};
pub use queue::{DispatchMessage, DispatchOptions, DispatchQueue};
pub use registry::{MetadataStore, ScheduleRegistry, StatusBoard};
pub use schedule::{
    AlertEvent, HookConfig, MaintenanceWindow, MetadataPatch, PausedSchedule, SafetyConfig,
    ScheduleEntry, ScheduleMetadata,
};

/// Result type alias used throughout the shared crate
pub type Result<T> = anyhow::Result<T>;

/// Common error types for the scheduler control plane
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Dispatch error: {0}")]
    Dispatch(String),

    #[error("Task execution error: {0}")]
    TaskExecution(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests;
