//! Utility functions for the scheduler control plane
//!
//! This module provides common helpers used across the server and worker
//! components, including name validation, timestamp formatting, and string
//! truncation for alert payloads.

use chrono::{DateTime, SecondsFormat, Utc};

/// Validate schedule name format
///
/// Schedule names become Redis key segments, so they must contain only
/// alphanumeric characters, hyphens, underscores, and dots. They must not
/// be empty and should be reasonable in length.
pub fn validate_schedule_name(name: &str) -> crate::Result<()> {
    if name.is_empty() {
        return Err(
            crate::SchedulerError::Validation("Schedule name cannot be empty".to_string()).into(),
        );
    }

    if name.len() > 128 {
        return Err(crate::SchedulerError::Validation(
            "Schedule name cannot be longer than 128 characters".to_string(),
        )
        .into());
    }

    if !name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(crate::SchedulerError::Validation(
            "Schedule name can only contain alphanumeric characters, hyphens, underscores, and dots"
                .to_string(),
        )
        .into());
    }

    Ok(())
}

/// Format a UTC instant as an ISO-8601 string with a trailing `Z`
///
/// All persisted timestamps (audit stamps, last-status blobs, JobRun
/// summaries) use this one format so lexicographic and chronological
/// ordering agree.
pub fn to_iso_utc(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Current UTC instant as an ISO-8601 string
pub fn now_iso_utc() -> String {
    to_iso_utc(Utc::now())
}

/// Truncate a string to at most `max` characters, respecting char boundaries
///
/// Alert sinks enforce hard payload limits; overlong values are cut rather
/// than rejected.
pub fn truncate_chars(value: &str, max: usize) -> String {
    value.chars().take(max).collect()
}

/// Extract the simple task name from a dotted task path
///
/// JobRun rows and lock keys are recorded under the final path segment,
/// e.g. `market_data.monitor_coverage_health` -> `monitor_coverage_health`.
pub fn simple_task_name(task: &str) -> &str {
    task.rsplit('.').next().unwrap_or(task)
}
