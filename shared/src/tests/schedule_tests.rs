//! Tests for schedule entries and metadata

use crate::schedule::{
    AlertEvent, HookConfig, MaintenanceWindow, MetadataPatch, PausedSchedule, SafetyConfig,
    ScheduleEntry, ScheduleMetadata,
};
use chrono::{TimeZone, Utc};
use serde_json::json;
use std::collections::BTreeMap;

fn entry(name: &str) -> ScheduleEntry {
    ScheduleEntry {
        name: name.to_string(),
        task: "market_data.monitor_coverage_health".to_string(),
        cron: "0 * * * *".to_string(),
        timezone: "UTC".to_string(),
        args: vec![],
        kwargs: BTreeMap::new(),
        enabled: true,
    }
}

#[test]
fn entry_defaults_apply_on_deserialization() {
    let parsed: ScheduleEntry = serde_json::from_str(
        r#"{"name":"probe","task":"monitor.health","cron":"0 * * * *"}"#,
    )
    .unwrap();
    assert_eq!(parsed.timezone, "UTC");
    assert!(parsed.enabled);
    assert!(parsed.args.is_empty());
    assert!(parsed.kwargs.is_empty());
}

#[test]
fn entry_rejects_unknown_fields() {
    let result: Result<ScheduleEntry, _> = serde_json::from_str(
        r#"{"name":"probe","task":"t","cron":"0 * * * *","surprise":true}"#,
    );
    assert!(result.is_err());
}

#[test]
fn simple_task_name_is_last_dotted_segment() {
    assert_eq!(entry("x").simple_task_name(), "monitor_coverage_health");
}

#[test]
fn metadata_defaults_are_safe() {
    let meta = ScheduleMetadata::default();
    assert!(meta.safety.singleflight);
    assert_eq!(meta.safety.max_concurrency, 1);
    assert_eq!(meta.safety.timeout_s, 3600);
    assert_eq!(meta.hooks.alert_on, vec![AlertEvent::Failure]);
    assert!(meta.queue.is_none());
    assert!(meta.dependencies.is_empty());
}

#[test]
fn metadata_rejects_unknown_fields() {
    let result: Result<ScheduleMetadata, _> =
        serde_json::from_str(r#"{"queue":"q1","made_up":1}"#);
    assert!(result.is_err());
}

#[test]
fn alert_events_serialize_lowercase() {
    assert_eq!(serde_json::to_string(&AlertEvent::Slow).unwrap(), r#""slow""#);
    let parsed: Vec<AlertEvent> = serde_json::from_str(r#"["failure","success"]"#).unwrap();
    assert_eq!(parsed, vec![AlertEvent::Failure, AlertEvent::Success]);
}

#[test]
fn patch_overwrites_present_fields_and_inherits_absent_ones() {
    let mut base = ScheduleMetadata {
        queue: Some("q1".to_string()),
        notes: Some("keep me".to_string()),
        ..ScheduleMetadata::default()
    };
    base.hooks.discord_channels = vec!["signals".to_string()];

    let patch = MetadataPatch {
        queue: Some("critical".to_string()),
        ..MetadataPatch::default()
    };
    let merged = patch.apply(Some(&base));

    assert_eq!(merged.queue.as_deref(), Some("critical"));
    assert_eq!(merged.notes.as_deref(), Some("keep me"));
    assert_eq!(merged.hooks.discord_channels, vec!["signals".to_string()]);
}

#[test]
fn patch_on_empty_base_produces_defaults_plus_patch() {
    let patch = MetadataPatch {
        priority: Some(7),
        ..MetadataPatch::default()
    };
    let merged = patch.apply(None);
    assert_eq!(merged.priority, Some(7));
    assert!(merged.safety.singleflight);
}

#[test]
fn touch_audit_stamps_create_once_and_update_every_time() {
    let mut meta = ScheduleMetadata::default();
    meta.touch_audit("alice@example.com", true);

    let created_at = meta.audit.created_at.clone().unwrap();
    assert_eq!(meta.audit.created_by.as_deref(), Some("alice@example.com"));
    assert_eq!(meta.audit.updated_at.clone().unwrap(), created_at);

    meta.touch_audit("bob@example.com", false);
    assert_eq!(meta.audit.created_at.as_deref(), Some(created_at.as_str()));
    assert_eq!(meta.audit.created_by.as_deref(), Some("alice@example.com"));
    assert_eq!(meta.audit.updated_by.as_deref(), Some("bob@example.com"));
    // ISO-8601 strings order lexicographically.
    assert!(meta.audit.updated_at.unwrap() >= created_at);
}

#[test]
fn maintenance_window_contains_naive_times_in_zone() {
    let window = MaintenanceWindow {
        start: "2025-06-01T22:00:00".to_string(),
        end: "2025-06-02T02:00:00".to_string(),
        timezone: "America/New_York".to_string(),
    };
    // 23:00 New York on June 1 (EDT) = 03:00 UTC June 2.
    let inside = Utc.with_ymd_and_hms(2025, 6, 2, 3, 0, 0).unwrap();
    let outside = Utc.with_ymd_and_hms(2025, 6, 2, 12, 0, 0).unwrap();
    assert!(window.contains(inside));
    assert!(!window.contains(outside));
}

#[test]
fn maintenance_window_accepts_rfc3339_boundaries() {
    let window = MaintenanceWindow {
        start: "2025-06-01T10:00:00+00:00".to_string(),
        end: "2025-06-01T11:00:00+00:00".to_string(),
        timezone: "UTC".to_string(),
    };
    assert!(window.contains(Utc.with_ymd_and_hms(2025, 6, 1, 10, 30, 0).unwrap()));
    // End boundary is exclusive.
    assert!(!window.contains(Utc.with_ymd_and_hms(2025, 6, 1, 11, 0, 0).unwrap()));
}

#[test]
fn unparseable_maintenance_window_never_matches() {
    let window = MaintenanceWindow {
        start: "whenever".to_string(),
        end: "later".to_string(),
        timezone: "UTC".to_string(),
    };
    assert!(!window.contains(Utc::now()));
}

#[test]
fn slow_threshold_prefers_hook_over_safety_timeout() {
    let mut meta = ScheduleMetadata::default();
    assert_eq!(meta.slow_threshold_s(), Some(3600.0));

    meta.hooks.slow_threshold_s = Some(90.0);
    assert_eq!(meta.slow_threshold_s(), Some(90.0));
}

#[test]
fn paused_snapshot_round_trips_through_canonical_json() {
    let mut kwargs = BTreeMap::new();
    kwargs.insert("history_days".to_string(), json!(5));
    kwargs.insert("batch_size".to_string(), json!(25));
    let mut original = entry("pp");
    original.kwargs = kwargs;

    let mut meta = ScheduleMetadata::default();
    meta.hooks.discord_channels = vec!["signals".to_string()];
    meta.hooks.alert_on = vec![AlertEvent::Failure, AlertEvent::Slow];
    meta.touch_audit("admin", true);

    let snapshot = PausedSchedule {
        entry: original.clone(),
        metadata: Some(meta.clone()),
    };
    let raw = serde_json::to_string(&snapshot).unwrap();
    let restored: PausedSchedule = serde_json::from_str(&raw).unwrap();

    assert_eq!(
        serde_json::to_string(&restored.entry).unwrap(),
        serde_json::to_string(&original).unwrap()
    );
    assert_eq!(
        serde_json::to_string(&restored.metadata).unwrap(),
        serde_json::to_string(&Some(meta)).unwrap()
    );
}

#[test]
fn safety_config_deserializes_with_partial_fields() {
    let safety: SafetyConfig = serde_json::from_str(r#"{"timeout_s":30}"#).unwrap();
    assert_eq!(safety.timeout_s, 30);
    assert!(safety.singleflight);
    assert_eq!(safety.retries, 0);
}

#[test]
fn hook_descriptors_combine_webhook_and_channels() {
    let hooks = HookConfig {
        discord_webhook: Some("system_status".to_string()),
        discord_channels: vec!["signals".to_string(), "playground".to_string()],
        ..HookConfig::default()
    };
    assert_eq!(
        hooks.discord_descriptors(),
        vec!["system_status", "signals", "playground"]
    );
}
