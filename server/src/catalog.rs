//! Factory catalog of well-known recurring jobs
//!
//! The catalog is the bootstrap set of schedules for a fresh deployment.
//! On first startup, when the registry is completely empty, every template
//! is written as an active schedule with default metadata stamped
//! `created_by = "catalog_seed"`. A registry that is empty later (because
//! an operator deleted everything) is respected and never re-seeded.

use anyhow::Result;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::info;

use shared::api::CatalogItem;
use shared::registry::{MetadataStore, ScheduleRegistry};
use shared::schedule::{SafetyConfig, ScheduleEntry, ScheduleMetadata};

/// Actor label stamped on seeded metadata.
pub const SEED_ACTOR: &str = "catalog_seed";

/// A factory-default job definition.
#[derive(Debug, Clone)]
pub struct JobTemplate {
    pub id: &'static str,
    pub display_name: &'static str,
    /// Logical group: `market_data`, `accounts`, or `maintenance`.
    pub group: &'static str,
    pub task: &'static str,
    pub description: &'static str,
    /// Standard 5-field cron.
    pub default_cron: &'static str,
    pub default_tz: &'static str,
    pub kwargs: Vec<(&'static str, Value)>,
    pub queue: Option<&'static str>,
    pub safety: SafetyConfig,
}

impl JobTemplate {
    fn with_defaults(
        id: &'static str,
        display_name: &'static str,
        group: &'static str,
        task: &'static str,
        description: &'static str,
        default_cron: &'static str,
    ) -> Self {
        Self {
            id,
            display_name,
            group,
            task,
            description,
            default_cron,
            default_tz: "UTC",
            kwargs: Vec::new(),
            queue: None,
            safety: SafetyConfig::default(),
        }
    }

    fn kwargs_map(&self) -> BTreeMap<String, Value> {
        self.kwargs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    /// The schedule entry this template seeds.
    pub fn to_entry(&self) -> ScheduleEntry {
        ScheduleEntry {
            name: self.id.to_string(),
            task: self.task.to_string(),
            cron: self.default_cron.to_string(),
            timezone: self.default_tz.to_string(),
            args: Vec::new(),
            kwargs: self.kwargs_map(),
            enabled: true,
        }
    }

    /// Default metadata for a seeded schedule.
    pub fn to_metadata(&self) -> ScheduleMetadata {
        let mut meta = ScheduleMetadata {
            queue: self.queue.map(|q| q.to_string()),
            safety: self.safety.clone(),
            ..ScheduleMetadata::default()
        };
        meta.touch_audit(SEED_ACTOR, true);
        meta
    }

    /// The catalog listing item, before last-run annotation.
    pub fn to_item(&self) -> CatalogItem {
        CatalogItem {
            id: self.id.to_string(),
            display_name: self.display_name.to_string(),
            group: self.group.to_string(),
            task: self.task.to_string(),
            description: self.description.to_string(),
            default_cron: self.default_cron.to_string(),
            default_tz: self.default_tz.to_string(),
            args: Vec::new(),
            kwargs: self.kwargs_map(),
            queue: self.queue.map(|q| q.to_string()),
            last_run: None,
        }
    }
}

/// The factory catalog, grouped by the nightly pipeline's ordering.
pub fn catalog() -> Vec<JobTemplate> {
    vec![
        JobTemplate::with_defaults(
            "refresh-index-constituents",
            "Refresh Index Constituents",
            "market_data",
            "market_data.refresh_index_constituents",
            "Fetch SP500 / NASDAQ100 / DOW30 constituents and update the universe",
            "0 2 * * *",
        ),
        JobTemplate {
            queue: Some("account_sync"),
            ..JobTemplate::with_defaults(
                "ibkr-daily-flex-sync",
                "IBKR Daily Flex Sync",
                "accounts",
                "accounts.sync_ibkr_flex",
                "IBKR FlexQuery daily account sync",
                "15 2 * * *",
            )
        },
        JobTemplate::with_defaults(
            "update-tracked-symbol-cache",
            "Update Tracked Symbol Cache",
            "market_data",
            "market_data.update_tracked_symbol_cache",
            "Compute the union of tracked symbols and publish deltas",
            "30 2 * * *",
        ),
        JobTemplate::with_defaults(
            "backfill-new-tracked",
            "Backfill Newly Tracked Symbols",
            "market_data",
            "market_data.backfill_new_tracked",
            "Backfill OHLCV history for newly tracked symbols",
            "45 2 * * *",
        ),
        JobTemplate::with_defaults(
            "backfill-last-200",
            "Backfill Last 200 Daily Bars",
            "market_data",
            "market_data.backfill_last_200_bars",
            "Delta backfill of the last ~200 daily bars for the tracked universe",
            "0 3 * * *",
        ),
        JobTemplate::with_defaults(
            "record-daily-history",
            "Record Daily Analysis History",
            "market_data",
            "market_data.record_daily_history",
            "Record immutable daily analysis history",
            "20 3 * * *",
        ),
        JobTemplate::with_defaults(
            "recompute-indicators-universe",
            "Recompute Indicators (Universe)",
            "market_data",
            "market_data.recompute_indicators_universe",
            "Recompute indicators for the tracked universe from stored bars",
            "35 3 * * *",
        ),
        JobTemplate {
            kwargs: vec![("n_days", json!(1)), ("batch_size", json!(50))],
            ..JobTemplate::with_defaults(
                "backfill-5m-d1",
                "Backfill 5m Bars (D-1)",
                "market_data",
                "market_data.backfill_5m_bars",
                "Backfill 5-minute bars for the previous session",
                "10 4 * * *",
            )
        },
        JobTemplate::with_defaults(
            "monitor-coverage-health",
            "Monitor Coverage Health",
            "market_data",
            "market_data.monitor_coverage_health",
            "Snapshot coverage freshness and persist stale-symbol metrics",
            "0 * * * *",
        ),
        JobTemplate {
            kwargs: vec![("retain_days", json!(90))],
            safety: SafetyConfig {
                timeout_s: 900,
                ..SafetyConfig::default()
            },
            ..JobTemplate::with_defaults(
                "prune-job-history",
                "Prune Job History",
                "maintenance",
                "maintenance.prune_job_history",
                "Delete terminal JobRun rows older than the retention window",
                "30 5 * * *",
            )
        },
        JobTemplate::with_defaults(
            "queue-depth-report",
            "Queue Depth Report",
            "maintenance",
            "monitor.queue_depth",
            "Report dispatch-queue depths for operator dashboards",
            "5 * * * *",
        ),
    ]
}

/// Seed the registry from the catalog when it is completely empty.
///
/// Returns the number of seeded schedules; zero means the registry
/// already had entries and nothing was written.
pub async fn seed_if_empty(
    registry: &ScheduleRegistry,
    metadata: &MetadataStore,
) -> Result<usize> {
    if !registry.is_empty().await? {
        return Ok(0);
    }

    let mut seeded = 0;
    for template in catalog() {
        registry.put(&template.to_entry()).await?;
        metadata.save(template.id, Some(&template.to_metadata())).await?;
        seeded += 1;
    }
    info!(seeded, "Seeded schedule registry from the factory catalog");
    Ok(seeded)
}
