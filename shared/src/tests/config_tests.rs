//! Tests for environment-driven configuration

use crate::config::SchedulerConfig;
use crate::schedule::AlertEvent;
use std::collections::HashMap;

fn config_from(pairs: &[(&str, &str)]) -> SchedulerConfig {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    SchedulerConfig::from_lookup(move |name| map.get(name).cloned())
}

#[test]
fn defaults_apply_when_environment_is_empty() {
    let config = config_from(&[]);
    assert!(config.broker_url.is_none());
    assert_eq!(config.admin_listen_addr, "0.0.0.0:8080");
    assert_eq!(config.tick_seconds, 1);
    assert_eq!(config.worker_queues, vec!["default"]);
    assert!(config.require_broker_url().is_err());
    assert!(config.require_admin_api_key().is_err());
}

#[test]
fn broker_url_prefers_broker_over_redis() {
    let config = config_from(&[
        ("BROKER_URL", "redis://broker:6379/0"),
        ("REDIS_URL", "redis://other:6379/0"),
    ]);
    assert_eq!(config.require_broker_url().unwrap(), "redis://broker:6379/0");

    let fallback = config_from(&[("REDIS_URL", "redis://other:6379/0")]);
    assert_eq!(fallback.require_broker_url().unwrap(), "redis://other:6379/0");
}

#[test]
fn worker_queues_parse_from_comma_list() {
    let config = config_from(&[("WORKER_QUEUES", "critical, account_sync ,default")]);
    assert_eq!(
        config.worker_queues,
        vec!["critical", "account_sync", "default"]
    );
}

#[test]
fn tick_seconds_rejects_zero_and_garbage() {
    assert_eq!(config_from(&[("SCHEDULER_TICK_SECONDS", "0")]).tick_seconds, 1);
    assert_eq!(config_from(&[("SCHEDULER_TICK_SECONDS", "abc")]).tick_seconds, 1);
    assert_eq!(config_from(&[("SCHEDULER_TICK_SECONDS", "5")]).tick_seconds, 5);
}

#[test]
fn discord_aliases_resolve_case_insensitively_with_hyphens() {
    let config = config_from(&[
        ("DISCORD_WEBHOOK_SIGNALS", "https://discord.test/signals"),
        (
            "DISCORD_WEBHOOK_PORTFOLIO_DIGEST",
            "https://discord.test/digest",
        ),
    ]);

    assert_eq!(
        config.resolve_discord("signals").as_deref(),
        Some("https://discord.test/signals")
    );
    assert_eq!(
        config.resolve_discord("Portfolio-Digest").as_deref(),
        Some("https://discord.test/digest")
    );
    assert_eq!(
        config.resolve_discord("portfolio").as_deref(),
        Some("https://discord.test/digest")
    );
    assert!(config.resolve_discord("morning").is_none());
}

#[test]
fn raw_urls_pass_through_unresolved() {
    let config = config_from(&[]);
    assert_eq!(
        config.resolve_discord("https://discord.test/raw").as_deref(),
        Some("https://discord.test/raw")
    );
    assert!(config.resolve_discord("").is_none());
}

#[test]
fn default_hooks_require_the_system_status_alias() {
    let without = config_from(&[]);
    assert!(without.default_hooks().is_none());

    let with = config_from(&[(
        "DISCORD_WEBHOOK_SYSTEM_STATUS",
        "https://discord.test/system",
    )]);
    let hooks = with.default_hooks().unwrap();
    assert_eq!(hooks.discord_webhook.as_deref(), Some("system_status"));
    assert_eq!(hooks.alert_on, vec![AlertEvent::Failure]);
}

#[test]
fn blank_values_are_treated_as_unset() {
    let config = config_from(&[("BROKER_URL", "  "), ("ADMIN_API_KEY", "")]);
    assert!(config.broker_url.is_none());
    assert!(config.admin_api_key.is_none());
}
