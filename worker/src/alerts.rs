//! Alert dispatch: Discord-shaped webhooks and Prometheus pushgateway
//!
//! The alert service is deliberately best-effort: a failed alert is
//! logged and dropped, and never changes a task's success or failure
//! status. Discord descriptors are alias tokens resolved through
//! configuration, or raw URLs passed through unchanged.

use anyhow::{Context, Result};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use shared::config::SchedulerConfig;
use shared::schedule::AlertEvent;
use shared::utils::truncate_chars;

/// Discord embed hard limits.
const TITLE_MAX: usize = 256;
const DESCRIPTION_MAX: usize = 1800;
const FIELD_NAME_MAX: usize = 256;
const FIELD_VALUE_MAX: usize = 1024;

/// Timeout for any single alert-sink request.
const ALERT_TIMEOUT: Duration = Duration::from_secs(5);

/// Severity of an alert, mapped to the embed's color bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    /// info = blue, warning = amber, error = red.
    pub fn color(&self) -> u32 {
        match self {
            Severity::Info => 0x3B82F6,
            Severity::Warning => 0xF59E0B,
            Severity::Error => 0xEF4444,
        }
    }

    pub fn for_event(event: AlertEvent) -> Self {
        match event {
            AlertEvent::Failure => Severity::Error,
            AlertEvent::Slow => Severity::Warning,
            AlertEvent::Success => Severity::Info,
        }
    }
}

/// Lightweight alert dispatcher for Discord webhooks and Prometheus
/// push endpoints.
#[derive(Clone)]
pub struct AlertService {
    http: reqwest::Client,
    config: Arc<SchedulerConfig>,
}

impl AlertService {
    pub fn new(config: Arc<SchedulerConfig>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(ALERT_TIMEOUT)
            .build()
            .context("Failed to build alert HTTP client")?;
        Ok(Self { http, config })
    }

    /// Resolve descriptor tokens to webhook URLs.
    ///
    /// Tokens may be comma-separated lists; unresolvable aliases are
    /// dropped.
    pub fn resolve_discord_targets(&self, descriptors: &[String]) -> Vec<String> {
        let mut urls = Vec::new();
        for raw in descriptors {
            for token in raw.split(',') {
                if let Some(url) = self.config.resolve_discord(token) {
                    urls.push(url);
                }
            }
        }
        urls
    }

    /// Build the Discord embed payload, applying the sink's hard limits.
    pub fn build_embed(
        title: &str,
        description: &str,
        fields: &[(String, String)],
        severity: Severity,
    ) -> Value {
        let mut embed = serde_json::json!({
            "title": truncate_chars(title, TITLE_MAX),
            "description": truncate_chars(description, DESCRIPTION_MAX),
            "color": severity.color(),
        });
        if !fields.is_empty() {
            embed["fields"] = Value::Array(
                fields
                    .iter()
                    .map(|(name, value)| {
                        serde_json::json!({
                            "name": truncate_chars(name, FIELD_NAME_MAX),
                            "value": truncate_chars(value, FIELD_VALUE_MAX),
                        })
                    })
                    .collect(),
            );
        }
        serde_json::json!({ "embeds": [embed] })
    }

    /// Post an embed to every resolved target. Returns whether at least
    /// one delivery succeeded.
    pub async fn send_discord(
        &self,
        descriptors: &[String],
        title: &str,
        description: &str,
        fields: &[(String, String)],
        severity: Severity,
    ) -> bool {
        let urls = self.resolve_discord_targets(descriptors);
        if urls.is_empty() {
            return false;
        }

        let payload = Self::build_embed(title, description, fields, severity);
        let mut delivered = false;
        for url in urls {
            match self.http.post(&url).json(&payload).send().await {
                Ok(response) if response.status().is_success() => delivered = true,
                Ok(response) => {
                    warn!(status = %response.status(), "Discord alert rejected");
                }
                Err(e) => {
                    warn!(error = %e, "Failed to post Discord alert");
                }
            }
        }
        delivered
    }

    /// Render the pushgateway text-format body for one gauge sample.
    pub fn prometheus_body(metric: &str, value: f64, labels: &[(String, String)]) -> String {
        let label_str = if labels.is_empty() {
            String::new()
        } else {
            let parts: Vec<String> = labels
                .iter()
                .map(|(key, value)| format!("{key}=\"{value}\""))
                .collect();
            format!("{{{}}}", parts.join(","))
        };
        format!("# TYPE {metric} gauge\n{metric}{label_str} {value}\n")
    }

    /// Push one gauge sample; best-effort.
    pub async fn push_prometheus_metric(
        &self,
        endpoint: Option<&str>,
        metric: &str,
        value: f64,
        labels: &[(String, String)],
    ) -> bool {
        let Some(endpoint) = endpoint else {
            return false;
        };
        let body = Self::prometheus_body(metric, value, labels);
        match self
            .http
            .post(endpoint)
            .header("Content-Type", "text/plain")
            .body(body)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!(status = %response.status(), "Prometheus push rejected");
                false
            }
            Err(e) => {
                warn!(error = %e, "Failed to push Prometheus metric");
                false
            }
        }
    }
}
