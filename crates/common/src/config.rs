use std::fs;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Top-level application configuration for a Meridian instance.
#[derive(Debug, Deserialize, Default, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub gateway: GatewaySettings,
    #[serde(default)]
    pub partial_data: PartialDataSettings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub admission: AdmissionSettings,
    #[serde(default)]
    pub split: SplitSettings,
    #[serde(default)]
    pub cluster: ClusterSettings,
    #[serde(default)]
    pub retry: RetrySettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GatewaySettings {
    /// Base URL used when building client-facing job payload links.
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Default asynchronous-promotion threshold in milliseconds.
    /// `None` means requests stay synchronous unless they ask otherwise.
    #[serde(default)]
    pub default_async_after_ms: Option<u64>,
    #[serde(default = "default_instance_name")]
    pub name: String,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            default_async_after_ms: None,
            name: default_instance_name(),
        }
    }
}

fn default_api_url() -> String {
    "http://localhost:8080/api/v1".to_string()
}

fn default_instance_name() -> String {
    "meridian".to_string()
}

/// Controls what happens with buckets that availability cannot cover.
///
/// Missing intervals are always computed; this only decides whether the
/// response is filtered down to covered buckets or merely annotated.
#[derive(Debug, Deserialize, Clone, Copy, Default)]
pub struct PartialDataSettings {
    #[serde(default)]
    pub mask_missing: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheSettings {
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,
    #[serde(default = "default_cache_ttl_seconds")]
    pub ttl_seconds: u64,
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            ttl_seconds: default_cache_ttl_seconds(),
            max_entries: default_cache_max_entries(),
        }
    }
}

fn default_cache_enabled() -> bool {
    true
}

fn default_cache_ttl_seconds() -> u64 {
    3600 // 1 hour
}

fn default_cache_max_entries() -> u64 {
    10_000
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct AdmissionSettings {
    /// Maximum estimated row weight (grouping cardinality x buckets)
    /// before a query is rejected.
    #[serde(default = "default_max_weight")]
    pub max_weight: u64,
    /// Weight above which the low-priority backend pool is preferred.
    #[serde(default = "default_heavy_weight")]
    pub heavy_weight: u64,
}

impl Default for AdmissionSettings {
    fn default() -> Self {
        Self {
            max_weight: default_max_weight(),
            heavy_weight: default_heavy_weight(),
        }
    }
}

fn default_max_weight() -> u64 {
    100_000
}

fn default_heavy_weight() -> u64 {
    10_000
}

#[derive(Debug, Deserialize, Clone, Copy, Default)]
pub struct SplitSettings {
    /// Queries spanning more grain buckets than this are split into
    /// narrower sub-queries. Zero disables splitting.
    #[serde(default)]
    pub max_buckets_per_query: u64,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ClusterSettings {
    /// Peer instances to fan ticket notifications out to.
    #[serde(default)]
    pub peers: Vec<String>,
    /// Address to listen on for peer notifications. `None` selects the
    /// in-memory channel (single-instance deployment).
    #[serde(default)]
    pub listen_addr: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}
fn default_base_delay_ms() -> u64 {
    1000
}
fn default_max_delay_ms() -> u64 {
    60000
}

impl AppConfig {
    pub fn from_file(path: &str) -> Result<Self> {
        let content =
            fs::read_to_string(path).context(format!("Failed to read config file at {}", path))?;
        let mut config: AppConfig = serde_yaml::from_str(&content)
            .context(format!("Failed to parse app config file at {}", path))?;

        // Environment variable overrides for deployment-specific settings
        if let Ok(url) = std::env::var("MERIDIAN_GATEWAY__API_URL") {
            config.gateway.api_url = url;
        }
        if let Ok(addr) = std::env::var("MERIDIAN_CLUSTER__LISTEN_ADDR") {
            config.cluster.listen_addr = Some(addr);
        }
        if let Ok(name) = std::env::var("MERIDIAN_GATEWAY__NAME") {
            config.gateway.name = name;
        }

        Ok(config)
    }
}
