use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::types::ShopIdentity;

pub const DEFAULT_TICK_INTERVAL_SECS: u64 = 60; // matches the coarsest schedule granularity
pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 4;
pub const DEFAULT_LOOKBACK_HOURS: u32 = 24;
pub const DEFAULT_TARGET_BASE_URL: &str = "http://127.0.0.1:5883/api/eazybusiness/v1";

/// Top-level config (ordersync.toml + ORDERSYNC_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OrderSyncConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub target: TargetConfig,
    #[serde(default)]
    pub shops: Vec<ShopIdentity>,
    /// Index into `shops` of the shop the UI treats as active.
    #[serde(default)]
    pub current_shop: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    /// Upper bound on job runs executing at once within a tick.
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    /// Wall-clock offset used to interpret Daily "HH:MM" times.
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: DEFAULT_TICK_INTERVAL_SECS,
            max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
            utc_offset_minutes: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Lookback window used when a job does not set its own.
    #[serde(default = "default_lookback_hours")]
    pub default_lookback_hours: u32,
    /// How many shops of one run may sync in parallel. 1 = sequential.
    #[serde(default = "default_max_parallel_shops")]
    pub max_parallel_shops: usize,
    /// Pause between records of one shop, to go easy on the ERP.
    #[serde(default)]
    pub record_pause_ms: u64,
    /// Pause after each shop of a multi-shop run.
    #[serde(default)]
    pub shop_pause_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            default_lookback_hours: DEFAULT_LOOKBACK_HOURS,
            max_parallel_shops: default_max_parallel_shops(),
            record_pause_ms: 0,
            shop_pause_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_jobs_path")]
    pub jobs_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            jobs_path: default_jobs_path(),
        }
    }
}

/// File-based storefront export consumed by the daemon's source adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_export_dir")]
    pub export_dir: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            export_dir: default_export_dir(),
        }
    }
}

/// ERP REST endpoint used by the daemon's target adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    #[serde(default = "default_target_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_app_id")]
    pub app_id: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            base_url: default_target_base_url(),
            api_key: String::new(),
            app_id: default_app_id(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_tick_interval_secs() -> u64 {
    DEFAULT_TICK_INTERVAL_SECS
}
fn default_max_concurrent_jobs() -> usize {
    DEFAULT_MAX_CONCURRENT_JOBS
}
fn default_lookback_hours() -> u32 {
    DEFAULT_LOOKBACK_HOURS
}
fn default_max_parallel_shops() -> usize {
    1
}
fn default_target_base_url() -> String {
    DEFAULT_TARGET_BASE_URL.to_string()
}
fn default_app_id() -> String {
    "ordersync/v2".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn data_dir() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.ordersync", home)
}
fn default_jobs_path() -> String {
    format!("{}/jobs.json", data_dir())
}
fn default_export_dir() -> String {
    format!("{}/exports", data_dir())
}

impl OrderSyncConfig {
    /// Load config from a TOML file with ORDERSYNC_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `ORDERSYNC_SCHEDULER__TICK_INTERVAL_SECS=30`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        Self::figment(&path)
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))
    }

    fn figment(path: &str) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("ORDERSYNC_").split("__"))
    }
}

fn default_config_path() -> String {
    format!("{}/ordersync.toml", data_dir())
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::providers::Serialized;

    #[test]
    fn empty_config_uses_defaults() {
        let config: OrderSyncConfig = Figment::new()
            .merge(Toml::string(""))
            .extract()
            .unwrap();
        assert_eq!(config.scheduler.tick_interval_secs, 60);
        assert_eq!(config.sync.default_lookback_hours, 24);
        assert_eq!(config.sync.max_parallel_shops, 1);
        assert!(config.shops.is_empty());
    }

    #[test]
    fn toml_sections_override_defaults() {
        let toml = r#"
            current_shop = 1

            [scheduler]
            max_concurrent_jobs = 2
            utc_offset_minutes = 60

            [[shops]]
            id = "s1"
            name = "Main"
            source = { host = "db1", user = "vm", database = "joomla" }
            target = { host = "erp", user = "sa", database = "eazybusiness" }
        "#;
        let config: OrderSyncConfig = Figment::from(Serialized::defaults(
            OrderSyncConfig::default(),
        ))
        .merge(Toml::string(toml))
        .extract()
        .unwrap();

        assert_eq!(config.scheduler.max_concurrent_jobs, 2);
        assert_eq!(config.scheduler.utc_offset_minutes, 60);
        assert_eq!(config.scheduler.tick_interval_secs, 60);
        assert_eq!(config.shops.len(), 1);
        assert_eq!(config.shops[0].tables.orders, "jos_virtuemart_orders");
        assert_eq!(config.current_shop, 1);
    }
}
