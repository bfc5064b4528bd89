//! Default values for configuration and metadata parameters
//!
//! This module centralizes all default value functions used by the
//! configuration and schedule-metadata structures. These functions are used
//! by serde when deserializing payloads that don't specify optional fields.

// Schedule defaults

/// Default IANA time zone for schedules and maintenance windows
pub fn default_timezone() -> String {
    "UTC".to_string()
}

/// Schedules are enabled unless explicitly paused
pub fn default_enabled() -> bool {
    true
}

// Safety defaults

/// Single-flight execution is the safe default for recurring jobs
pub fn default_singleflight() -> bool {
    true
}

/// Default maximum concurrent executions per schedule
pub fn default_max_concurrency() -> u32 {
    1
}

/// Default task timeout / lock TTL (1 hour)
pub fn default_timeout_s() -> u64 {
    3600
}

/// Lock TTL used when a task declares a lock key but no schedule metadata
/// is available to supply `safety.timeout_s` (30 minutes)
pub fn default_lock_ttl_s() -> u64 {
    1800
}

// Scheduler loop defaults

/// Default scheduler tick period (1 second)
pub fn default_tick_seconds() -> u64 {
    1
}

/// Default admin API listen address
pub fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

/// Default SQLite file for JobRun rows
pub fn default_jobrun_db_path() -> String {
    "./data/jobruns.db".to_string()
}

// Dispatch queue defaults

/// Queue used when a schedule's metadata does not route elsewhere
pub fn default_queue_name() -> String {
    "default".to_string()
}

// Admin surface defaults

/// Default number of fire times returned by the preview endpoint
pub fn default_preview_count() -> usize {
    5
}

/// Upper bound on the preview endpoint's count parameter
pub fn max_preview_count() -> usize {
    20
}
