//! Tests for the alert service

use crate::alerts::{AlertService, Severity};
use shared::config::SchedulerConfig;
use shared::schedule::AlertEvent;
use std::sync::Arc;

fn service(pairs: &[(&str, &str)]) -> AlertService {
    let map: std::collections::HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let config = Arc::new(SchedulerConfig::from_lookup(move |name| {
        map.get(name).cloned()
    }));
    AlertService::new(config).unwrap()
}

#[test]
fn severity_colors_match_the_discord_palette() {
    assert_eq!(Severity::Info.color(), 0x3B82F6);
    assert_eq!(Severity::Warning.color(), 0xF59E0B);
    assert_eq!(Severity::Error.color(), 0xEF4444);

    assert_eq!(Severity::for_event(AlertEvent::Failure), Severity::Error);
    assert_eq!(Severity::for_event(AlertEvent::Slow), Severity::Warning);
    assert_eq!(Severity::for_event(AlertEvent::Success), Severity::Info);
}

#[test]
fn descriptor_resolution_handles_aliases_raw_urls_and_commas() {
    let service = service(&[
        ("DISCORD_WEBHOOK_SIGNALS", "https://discord.test/signals"),
        ("DISCORD_WEBHOOK_SYSTEM_STATUS", "https://discord.test/system"),
    ]);

    let targets = service.resolve_discord_targets(&[
        "signals,system_status".to_string(),
        "https://discord.test/raw".to_string(),
        "unknown_alias".to_string(),
    ]);
    assert_eq!(
        targets,
        vec![
            "https://discord.test/signals",
            "https://discord.test/system",
            "https://discord.test/raw",
        ]
    );
}

#[test]
fn embed_carries_title_description_color_and_fields() {
    let fields = vec![
        ("Job ID".to_string(), "17".to_string()),
        ("Error".to_string(), "boom".to_string()),
    ];
    let payload = AlertService::build_embed(
        "sync_accounts: FAILURE",
        "Task sync_accounts reported failure.",
        &fields,
        Severity::Error,
    );

    let embed = &payload["embeds"][0];
    assert_eq!(embed["title"], "sync_accounts: FAILURE");
    assert_eq!(embed["color"], 0xEF4444);
    let names: Vec<&str> = embed["fields"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["Job ID", "Error"]);
}

#[test]
fn embed_truncates_oversized_content() {
    let long_title = "t".repeat(400);
    let long_value = "v".repeat(2000);
    let fields = vec![("Counters".to_string(), long_value)];
    let payload = AlertService::build_embed(&long_title, "d", &fields, Severity::Info);

    let embed = &payload["embeds"][0];
    assert_eq!(embed["title"].as_str().unwrap().len(), 256);
    assert_eq!(
        embed["fields"][0]["value"].as_str().unwrap().len(),
        1024
    );
}

#[test]
fn embed_without_fields_omits_the_fields_key() {
    let payload = AlertService::build_embed("t", "d", &[], Severity::Info);
    assert!(payload["embeds"][0].get("fields").is_none());
}

#[test]
fn prometheus_body_is_text_format_gauge() {
    let labels = vec![
        ("task".to_string(), "sync_accounts".to_string()),
        ("event".to_string(), "failure".to_string()),
        ("queue".to_string(), "default".to_string()),
    ];
    let body =
        AlertService::prometheus_body("quantmatrix_task_duration_seconds", 1.5, &labels);
    assert_eq!(
        body,
        "# TYPE quantmatrix_task_duration_seconds gauge\n\
         quantmatrix_task_duration_seconds{task=\"sync_accounts\",event=\"failure\",queue=\"default\"} 1.5\n"
    );
}

#[test]
fn prometheus_body_without_labels_has_no_braces() {
    let body = AlertService::prometheus_body("m", 2.0, &[]);
    assert_eq!(body, "# TYPE m gauge\nm 2\n");
}

#[tokio::test]
async fn send_discord_with_no_resolvable_targets_is_a_noop() {
    let service = service(&[]);
    let delivered = service
        .send_discord(
            &["signals".to_string()],
            "t",
            "d",
            &[],
            Severity::Info,
        )
        .await;
    assert!(!delivered);
}

#[tokio::test]
async fn push_prometheus_without_endpoint_is_a_noop() {
    let service = service(&[]);
    let pushed = service
        .push_prometheus_metric(None, "m", 1.0, &[])
        .await;
    assert!(!pushed);
}

#[tokio::test]
async fn alert_failures_never_panic() {
    // Unroutable sink: delivery fails, the call still returns.
    let service = service(&[(
        "DISCORD_WEBHOOK_SYSTEM_STATUS",
        "http://127.0.0.1:1/unreachable",
    )]);
    let delivered = service
        .send_discord(
            &["system_status".to_string()],
            "t",
            "d",
            &[],
            Severity::Error,
        )
        .await;
    assert!(!delivered);

    let pushed = service
        .push_prometheus_metric(Some("http://127.0.0.1:1/push"), "m", 1.0, &[])
        .await;
    assert!(!pushed);
}
