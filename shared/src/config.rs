//! Configuration for the scheduler control plane
//!
//! All configuration comes from environment variables; there are no CLI
//! flags and no config files. `SchedulerConfig::from_env` reads the
//! process environment, while `from_lookup` accepts any name->value
//! function so tests can build configurations without mutating the
//! environment.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{bail, Result};

use crate::defaults::*;
use crate::schedule::{AlertEvent, HookConfig};

/// Discord alias tokens resolvable through configuration. Each tuple maps
/// accepted alias spellings to the environment variable carrying the URL.
const DISCORD_ALIASES: &[(&[&str], &str)] = &[
    (&["signals"], "DISCORD_WEBHOOK_SIGNALS"),
    (
        &["portfolio", "portfolio_digest"],
        "DISCORD_WEBHOOK_PORTFOLIO_DIGEST",
    ),
    (&["morning", "morning_brew"], "DISCORD_WEBHOOK_MORNING_BREW"),
    (&["playground"], "DISCORD_WEBHOOK_PLAYGROUND"),
    (
        &["system", "system_status"],
        "DISCORD_WEBHOOK_SYSTEM_STATUS",
    ),
];

/// Runtime configuration shared by the server and worker processes.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Key-value substrate URL (`BROKER_URL` wins over `REDIS_URL`).
    pub broker_url: Option<String>,
    /// SQLite file holding JobRun rows.
    pub jobrun_db_path: PathBuf,
    /// API key required by the admin surface.
    pub admin_api_key: Option<String>,
    /// Bind address for the admin surface.
    pub admin_listen_addr: String,
    /// Scheduler loop tick period in seconds.
    pub tick_seconds: u64,
    /// Queues the worker consumes, in priority order.
    pub worker_queues: Vec<String>,
    /// Resolved Discord alias map (normalized alias -> webhook URL).
    pub discord_webhooks: BTreeMap<String, String>,
    /// Fallback Prometheus pushgateway endpoint.
    pub prometheus_push_url: Option<String>,
}

impl SchedulerConfig {
    /// Build configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build configuration from an arbitrary lookup function.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let nonempty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let mut discord_webhooks = BTreeMap::new();
        for (aliases, env_name) in DISCORD_ALIASES {
            if let Some(url) = nonempty(env_name) {
                for alias in *aliases {
                    discord_webhooks.insert(alias.to_string(), url.clone());
                }
            }
        }

        let worker_queues: Vec<String> = nonempty("WORKER_QUEUES")
            .map(|raw| {
                raw.split(',')
                    .map(|q| q.trim().to_string())
                    .filter(|q| !q.is_empty())
                    .collect()
            })
            .filter(|queues: &Vec<String>| !queues.is_empty())
            .unwrap_or_else(|| vec![default_queue_name()]);

        Self {
            broker_url: nonempty("BROKER_URL").or_else(|| nonempty("REDIS_URL")),
            jobrun_db_path: PathBuf::from(
                nonempty("JOBRUN_DB_PATH").unwrap_or_else(default_jobrun_db_path),
            ),
            admin_api_key: nonempty("ADMIN_API_KEY"),
            admin_listen_addr: nonempty("ADMIN_LISTEN_ADDR")
                .unwrap_or_else(default_listen_addr),
            tick_seconds: nonempty("SCHEDULER_TICK_SECONDS")
                .and_then(|raw| raw.parse().ok())
                .filter(|&secs| secs >= 1)
                .unwrap_or_else(default_tick_seconds),
            worker_queues,
            discord_webhooks,
            prometheus_push_url: nonempty("PROMETHEUS_PUSH_URL"),
        }
    }

    /// The broker URL, or an error naming the variables to set.
    pub fn require_broker_url(&self) -> Result<&str> {
        match &self.broker_url {
            Some(url) => Ok(url),
            None => bail!("Broker URL is not configured; set BROKER_URL or REDIS_URL"),
        }
    }

    /// The admin API key, required to serve the admin surface.
    pub fn require_admin_api_key(&self) -> Result<&str> {
        match &self.admin_api_key {
            Some(key) => Ok(key),
            None => bail!("Admin API key is not configured; set ADMIN_API_KEY"),
        }
    }

    /// Resolve a Discord descriptor token to a webhook URL.
    ///
    /// Raw URLs pass through unchanged; anything else is treated as an
    /// alias (case-insensitive, hyphens equivalent to underscores).
    pub fn resolve_discord(&self, token: &str) -> Option<String> {
        let token = token.trim();
        if token.is_empty() {
            return None;
        }
        if token.to_ascii_lowercase().starts_with("http") {
            return Some(token.to_string());
        }
        let normalized = token.to_ascii_lowercase().replace('-', "_");
        self.discord_webhooks.get(&normalized).cloned()
    }

    /// System-default hooks used for dispatches without schedule metadata
    /// (run-now one-offs): failure-only alerts to the system-status
    /// channel, when that alias is configured.
    pub fn default_hooks(&self) -> Option<HookConfig> {
        if self.discord_webhooks.contains_key("system_status") {
            Some(HookConfig {
                discord_webhook: Some("system_status".to_string()),
                alert_on: vec![AlertEvent::Failure],
                ..HookConfig::default()
            })
        } else {
            None
        }
    }
}
