//! Configuration for the proxy pool
//!
//! Values come from built-in defaults, then an optional TOML file, then
//! `PROXY_POOL_*` environment variables.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::Error;
use crate::proxy::crawler::DEFAULT_USER_AGENT;
use crate::proxy::{Anonymity, ValidatorConfig};
use crate::store::StoreConfig;
use crate::Result;

/// Most pages followed for a single vendor in one fetch cycle
pub const MAX_PAGES_CAP: usize = 3;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub catalog: CatalogConfig,
    pub thresholds: Thresholds,
    pub windows: Windows,
    pub intervals: Intervals,
    pub validator: ValidatorConfig,
    pub fetch: FetchConfig,
    pub logging: LoggingConfig,
}

/// Where vendor and validator definitions live
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub database_url: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://proxy_pool.db".to_string(),
        }
    }
}

/// Pool-size watermarks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Below this the pool is nearly dry and a fetch ignores the cooldown
    pub exhaust: u64,
    /// Below this a fetch is triggered unless the cooldown is active
    pub low: u64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self { exhaust: 2, low: 5 }
    }
}

/// Cooldown flag lifetimes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Windows {
    /// How long a triggered fetch suppresses further low-watermark fetches
    pub protect_secs: u64,
    /// Longest time between fetches regardless of pool size
    pub refresh_secs: u64,
}

impl Default for Windows {
    fn default() -> Self {
        Self {
            protect_secs: 600,
            refresh_secs: 86_400,
        }
    }
}

impl Windows {
    pub fn protect(&self) -> Duration {
        Duration::from_secs(self.protect_secs)
    }

    pub fn refresh(&self) -> Duration {
        Duration::from_secs(self.refresh_secs)
    }
}

/// Loop periods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Intervals {
    /// Pause between check cycles
    pub check_secs: u64,
    /// Pause between controller ticks
    pub poll_secs: u64,
    /// Upper bound of the random delay added to each controller pause
    pub jitter_ms: u64,
    /// Supervisor liveness poll
    pub supervisor_secs: u64,
}

impl Default for Intervals {
    fn default() -> Self {
        Self {
            check_secs: 5,
            poll_secs: 20,
            jitter_ms: 2_000,
            supervisor_secs: 60,
        }
    }
}

impl Intervals {
    pub fn check(&self) -> Duration {
        Duration::from_secs(self.check_secs)
    }

    pub fn poll(&self) -> Duration {
        Duration::from_secs(self.poll_secs)
    }

    pub fn jitter(&self) -> Duration {
        Duration::from_millis(self.jitter_ms)
    }

    pub fn supervisor(&self) -> Duration {
        Duration::from_secs(self.supervisor_secs)
    }
}

/// Vendor crawling and candidate filtering
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub timeout_secs: u64,
    pub user_agent: String,
    /// Pages followed per vendor per cycle
    pub max_pages: usize,
    /// Candidates advertising a slower latency are dropped
    pub max_latency_ms: Option<u64>,
    /// Candidates advertising a weaker anonymity level are dropped
    pub min_anonymity: Option<Anonymity>,
    /// Fetch vendor pages through a random pool member
    pub via_pool: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            max_pages: MAX_PAGES_CAP,
            max_latency_ms: Some(3_000),
            min_anonymity: None,
            via_pool: false,
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn max_latency(&self) -> Option<Duration> {
        self.max_latency_ms.map(Duration::from_millis)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

impl Config {
    /// Defaults, then the optional file, then the environment; validated
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("failed to read config file {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
            .map_err(|e| Error::config(format!("{}: {e}", path.display())))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::config(format!("failed to parse TOML: {e}")))
    }

    /// Override values from `PROXY_POOL_*` variables, read through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parsed<T: std::str::FromStr>(key: &str, value: String) -> Result<T> {
            value
                .trim()
                .parse()
                .map_err(|_| Error::config(format!("{key} has an invalid value: {value}")))
        }

        if let Some(v) = lookup("PROXY_POOL_REDIS_URL") {
            self.store.url = v;
        }
        if let Some(v) = lookup("PROXY_POOL_KEY_PREFIX") {
            self.store.key_prefix = v;
        }
        if let Some(v) = lookup("PROXY_POOL_CATALOG_URL") {
            self.catalog.database_url = v;
        }
        if let Some(v) = lookup("PROXY_POOL_EXHAUST") {
            self.thresholds.exhaust = parsed("PROXY_POOL_EXHAUST", v)?;
        }
        if let Some(v) = lookup("PROXY_POOL_LOW") {
            self.thresholds.low = parsed("PROXY_POOL_LOW", v)?;
        }
        if let Some(v) = lookup("PROXY_POOL_PROTECT_SECS") {
            self.windows.protect_secs = parsed("PROXY_POOL_PROTECT_SECS", v)?;
        }
        if let Some(v) = lookup("PROXY_POOL_REFRESH_SECS") {
            self.windows.refresh_secs = parsed("PROXY_POOL_REFRESH_SECS", v)?;
        }
        if let Some(v) = lookup("PROXY_POOL_CONCURRENCY") {
            self.validator.concurrency = parsed("PROXY_POOL_CONCURRENCY", v)?;
        }
        if let Some(v) = lookup("PROXY_POOL_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = lookup("PROXY_POOL_LOG_FORMAT") {
            self.logging.format = v;
        }
        Ok(())
    }

    /// Validate configuration values
    /// Apply a `--log-format` style override and revalidate
    pub fn override_log_format(&mut self, format: String) -> Result<()> {
        self.logging.format = format;
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if self.thresholds.exhaust > self.thresholds.low {
            return Err(Error::config(format!(
                "exhaust threshold ({}) must not exceed low threshold ({})",
                self.thresholds.exhaust, self.thresholds.low
            )));
        }
        if self.validator.concurrency == 0 {
            return Err(Error::config("validator concurrency must be greater than 0"));
        }
        if self.validator.timeout_secs == 0 {
            return Err(Error::config("validator timeout must be greater than 0"));
        }
        if self.fetch.max_pages == 0 || self.fetch.max_pages > MAX_PAGES_CAP {
            return Err(Error::config(format!(
                "fetch max_pages must be between 1 and {MAX_PAGES_CAP}"
            )));
        }
        if self.store.pool_size == 0 {
            return Err(Error::config("store pool_size must be greater than 0"));
        }
        let slowest_loop = self.intervals.check_secs.max(self.intervals.poll_secs);
        if self.intervals.supervisor_secs <= slowest_loop {
            return Err(Error::config(format!(
                "supervisor interval ({}s) must be longer than the check and poll intervals",
                self.intervals.supervisor_secs
            )));
        }
        if !matches!(self.logging.format.as_str(), "text" | "json") {
            return Err(Error::config(format!(
                "unknown log format '{}', expected text or json",
                self.logging.format
            )));
        }
        Ok(())
    }
}
