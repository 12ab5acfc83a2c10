use crate::control::settings::parse_size;
use crate::management::BrokerEndpoint;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CONFIG_PATH: &str = "config/broker-controller.toml";

fn default_broker_name() -> String {
    "0.0.0.0".to_string()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_page_size() -> usize {
    500
}

fn default_concurrency() -> usize {
    20
}

fn default_unmanaged_prefixes() -> Vec<String> {
    vec!["activemq.".to_string(), "$".to_string()]
}

fn default_unmanaged_addresses() -> Vec<String> {
    vec!["DLQ".to_string(), "ExpiryQueue".to_string()]
}

fn default_resync_interval_seconds() -> u64 {
    30
}

fn default_stats_interval_seconds() -> u64 {
    30
}

fn default_close_timeout_ms() -> u64 {
    5_000
}

/// Top-level configuration for the broker controller.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub broker: BrokerConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub stats: StatsConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    /// Base URL of the broker management console.
    pub url: String,
    #[serde(default = "default_broker_name")]
    pub broker_name: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Rows requested per page from the paged list operations.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl BrokerConfig {
    pub fn endpoint(&self) -> BrokerEndpoint {
        BrokerEndpoint {
            url: self.url.clone(),
            broker_name: self.broker_name.clone(),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            page_size: self.page_size,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Upper bound on in-flight create/delete requests during one pass.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Broker addresses starting with these prefixes are never created or deleted.
    #[serde(default = "default_unmanaged_prefixes")]
    pub unmanaged_prefixes: Vec<String>,
    #[serde(default = "default_unmanaged_addresses")]
    pub unmanaged_addresses: Vec<String>,
    #[serde(default = "default_resync_interval_seconds")]
    pub resync_interval_seconds: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            unmanaged_prefixes: default_unmanaged_prefixes(),
            unmanaged_addresses: default_unmanaged_addresses(),
            resync_interval_seconds: default_resync_interval_seconds(),
        }
    }
}

impl SyncConfig {
    pub fn is_unmanaged(&self, address: &str) -> bool {
        self.unmanaged_addresses.iter().any(|a| a == address)
            || self
                .unmanaged_prefixes
                .iter()
                .any(|p| !p.is_empty() && address.starts_with(p.as_str()))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatsConfig {
    #[serde(default = "default_stats_interval_seconds")]
    pub interval_seconds: u64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_stats_interval_seconds(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LifecycleConfig {
    /// How long `close()` waits for in-flight broker operations to drain.
    #[serde(default = "default_close_timeout_ms")]
    pub close_timeout_ms: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            close_timeout_ms: default_close_timeout_ms(),
        }
    }
}

impl LifecycleConfig {
    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
}

/// Process-wide settings consumed by address settings resolution.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct GlobalConfig {
    /// Total broker memory budget shared by planned addresses, e.g. `"64MB"`.
    #[serde(default, alias = "BROKER_GLOBAL_MAX_SIZE")]
    pub broker_global_max_size: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default)]
    pub log_level: Option<String>,
}

impl Config {
    /// Minimal configuration pointing at `url`, everything else defaulted.
    pub fn for_broker(url: impl Into<String>) -> Self {
        Self {
            broker: BrokerConfig {
                url: url.into(),
                broker_name: default_broker_name(),
                request_timeout_ms: default_request_timeout_ms(),
                page_size: default_page_size(),
            },
            sync: SyncConfig::default(),
            stats: StatsConfig::default(),
            lifecycle: LifecycleConfig::default(),
            global: GlobalConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }

    /// Load configuration from BROKER_CONTROLLER_CONFIG or `config/broker-controller.toml`,
    /// then apply environment overrides.
    pub fn load_from_env() -> Result<Self> {
        let path = env_config_path();
        let mut cfg = Self::load(&path)?;
        cfg.apply_env_overrides()?;
        Ok(cfg)
    }

    /// Load configuration from a specific file (TOML or JSON based on extension).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path_ref = path.as_ref();
        let data = fs::read_to_string(path_ref)
            .with_context(|| format!("unable to read config {}", path_ref.display()))?;
        if is_json(path_ref) {
            Ok(serde_json::from_str(&data)
                .with_context(|| format!("invalid JSON config {}", path_ref.display()))?)
        } else {
            Ok(toml::from_str(&data)
                .with_context(|| format!("invalid TOML config {}", path_ref.display()))?)
        }
    }

    /// `BROKER_GLOBAL_MAX_SIZE` and `BROKER_CONTROLLER_URL` win over the file.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(size) = std::env::var("BROKER_GLOBAL_MAX_SIZE") {
            let size = size.trim();
            self.global.broker_global_max_size = if size.is_empty() {
                None
            } else {
                Some(size.to_string())
            };
        }
        if let Ok(url) = std::env::var("BROKER_CONTROLLER_URL") {
            if url.trim().is_empty() {
                bail!("BROKER_CONTROLLER_URL is set but empty");
            }
            self.broker.url = url.trim().to_string();
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.broker.url.trim().is_empty() {
            bail!("broker.url must be non-empty");
        }
        if self.broker.page_size == 0 {
            bail!("broker.page_size must be > 0");
        }
        if self.broker.request_timeout_ms == 0 {
            bail!("broker.request_timeout_ms must be > 0");
        }
        if self.sync.concurrency == 0 {
            bail!("sync.concurrency must be > 0");
        }
        if self.sync.resync_interval_seconds == 0 {
            bail!("sync.resync_interval_seconds must be > 0");
        }
        if self.stats.interval_seconds == 0 {
            bail!("stats.interval_seconds must be > 0");
        }
        if let Some(size) = &self.global.broker_global_max_size {
            parse_size(size)
                .with_context(|| format!("global.broker_global_max_size {size:?} is invalid"))?;
        }
        Ok(())
    }
}

fn env_config_path() -> PathBuf {
    std::env::var("BROKER_CONTROLLER_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}
