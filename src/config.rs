//! Configuration loading.
//!
//! Two sources feed the server:
//!
//! - An optional TOML file (`--config`) with tuning knobs for search, field
//!   discovery, aggregation, and the listen address. Every key has a default,
//!   so the file may be partial or absent.
//! - The process environment, read once when the Timesketch client is first
//!   built: `TIMESKETCH_HOST`, `TIMESKETCH_PORT` (default `5000`),
//!   `TIMESKETCH_USER`, `TIMESKETCH_PASSWORD`.
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 8081
//!
//! [search]
//! retry_attempts = 3
//! retry_delay_secs = 10
//! page_size = 10000
//! request_timeout_secs = 60
//!
//! [discovery]
//! sample_limit = 1000
//! bucket_limit = 10
//! max_bucket_count = 10
//!
//! [aggregation]
//! bucket_limit = 10000
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use timesketch_mcp_core::TimesketchError;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub aggregation: AggregationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8081
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    /// Total attempts (initial + retries) when a sketch does not resolve.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    /// Events requested per explore page.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            retry_attempts: default_retry_attempts(),
            retry_delay_secs: default_retry_delay_secs(),
            page_size: default_page_size(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl SearchConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_retry_attempts() -> u32 {
    3
}
fn default_retry_delay_secs() -> u64 {
    10
}
fn default_page_size() -> usize {
    10_000
}
fn default_request_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct DiscoveryConfig {
    /// Events sampled to collect field names.
    #[serde(default = "default_sample_limit")]
    pub sample_limit: usize,
    /// Buckets fetched per candidate field.
    #[serde(default = "default_discovery_bucket_limit")]
    pub bucket_limit: usize,
    /// Fields whose top bucket reaches this count are suppressed.
    #[serde(default = "default_max_bucket_count")]
    pub max_bucket_count: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            sample_limit: default_sample_limit(),
            bucket_limit: default_discovery_bucket_limit(),
            max_bucket_count: default_max_bucket_count(),
        }
    }
}

fn default_sample_limit() -> usize {
    1000
}
fn default_discovery_bucket_limit() -> usize {
    10
}
fn default_max_bucket_count() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct AggregationConfig {
    #[serde(default = "default_aggregation_bucket_limit")]
    pub bucket_limit: usize,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            bucket_limit: default_aggregation_bucket_limit(),
        }
    }
}

fn default_aggregation_bucket_limit() -> usize {
    timesketch_mcp_core::aggregation::DEFAULT_BUCKET_LIMIT
}

/// Load and validate a config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Load `path` when given, otherwise fall back to defaults.
pub fn load_or_default(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(p) => load_config(p),
        None => Ok(Config::default()),
    }
}

pub fn validate(config: &Config) -> Result<()> {
    if config.search.retry_attempts == 0 {
        anyhow::bail!("search.retry_attempts must be >= 1");
    }
    if config.search.page_size == 0 {
        anyhow::bail!("search.page_size must be > 0");
    }
    if config.discovery.sample_limit == 0 {
        anyhow::bail!("discovery.sample_limit must be > 0");
    }
    if config.discovery.bucket_limit == 0 {
        anyhow::bail!("discovery.bucket_limit must be > 0");
    }
    if config.aggregation.bucket_limit == 0 {
        anyhow::bail!("aggregation.bucket_limit must be > 0");
    }
    Ok(())
}

/// Connection settings for the remote Timesketch instance.
#[derive(Clone)]
pub struct TimesketchSettings {
    pub host: String,
    pub port: String,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for TimesketchSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimesketchSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl TimesketchSettings {
    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self, TimesketchError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, TimesketchError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| TimesketchError::Connection(format!("{} is not set", key)))
        };

        Ok(Self {
            host: required("TIMESKETCH_HOST")?,
            port: lookup("TIMESKETCH_PORT")
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| "5000".to_string()),
            username: required("TIMESKETCH_USER")?,
            password: required("TIMESKETCH_PASSWORD")?,
        })
    }

    /// Base URI of the instance, always with a trailing slash.
    pub fn host_uri(&self) -> String {
        format!("http://{}:{}/", self.host, self.port)
    }
}
