use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Idle connections older than this are evicted by default
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// Settings shared by every per-address pool of a registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum number of connections per address (checked out + idle)
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Seconds an idle connection may sit in the pool before it is evicted;
    /// 0 disables idle eviction
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Milliseconds to wait for a free slot; unset means wait indefinitely
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acquire_timeout_ms: Option<u64>,

    /// Seconds between background idle eviction sweeps
    #[serde(default = "default_eviction_interval_secs")]
    pub eviction_interval_secs: u64,

    /// Milliseconds allowed for dialing a new connection
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_capacity() -> usize {
    16
}

fn default_idle_timeout_secs() -> u64 {
    IDLE_TIMEOUT.as_secs()
}

fn default_eviction_interval_secs() -> u64 {
    30
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            idle_timeout_secs: default_idle_timeout_secs(),
            acquire_timeout_ms: None,
            eviction_interval_secs: default_eviction_interval_secs(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl PoolConfig {
    /// Default settings with the given per-address capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn acquire_timeout(&self) -> Option<Duration> {
        self.acquire_timeout_ms.map(Duration::from_millis)
    }

    pub fn eviction_interval(&self) -> Duration {
        Duration::from_secs(self.eviction_interval_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Reject settings a pool cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            anyhow::bail!("pool capacity must be at least 1");
        }
        if self.eviction_interval_secs == 0 {
            anyhow::bail!("eviction interval must be at least 1 second");
        }
        if self.connect_timeout_ms == 0 {
            anyhow::bail!("connect timeout must be at least 1 millisecond");
        }
        Ok(())
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Pool settings applied to every backend address
    #[serde(default)]
    pub pool: PoolConfig,

    /// Backend addresses known up front (pools are still created lazily)
    #[serde(default)]
    pub backends: Vec<String>,
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        self.pool.validate().context("Invalid pool configuration")?;
        if let Some(empty) = self.backends.iter().position(|b| b.trim().is_empty()) {
            anyhow::bail!("backend #{} has an empty address", empty);
        }
        Ok(())
    }
}

/// Load configuration from a YAML file
pub fn load_from_yaml<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())
        .context(format!("Failed to read config file: {:?}", path.as_ref()))?;

    let config: Config =
        serde_yaml::from_str(&content).context("Failed to parse YAML configuration")?;

    config.validate()?;
    Ok(config)
}

/// Load configuration from environment variables
///
/// - POOL_BACKENDS (comma-separated list of addresses, optional)
/// - POOL_CAPACITY
/// - POOL_IDLE_TIMEOUT (seconds)
/// - POOL_ACQUIRE_TIMEOUT_MS
/// - POOL_EVICTION_INTERVAL (seconds)
/// - POOL_CONNECT_TIMEOUT_MS
///
/// Unset variables keep their defaults; set but unparsable ones are errors.
pub fn load_from_env() -> Result<Config> {
    // Try to load .env file if it exists (don't fail if it doesn't)
    let _ = dotenvy::dotenv();

    let mut config = Config::default();

    if let Ok(backends) = std::env::var("POOL_BACKENDS") {
        config.backends = backends
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }

    if let Some(capacity) = env_parse("POOL_CAPACITY")? {
        config.pool.capacity = capacity;
    }

    if let Some(secs) = env_parse("POOL_IDLE_TIMEOUT")? {
        config.pool.idle_timeout_secs = secs;
    }

    if let Some(ms) = env_parse("POOL_ACQUIRE_TIMEOUT_MS")? {
        config.pool.acquire_timeout_ms = Some(ms);
    }

    if let Some(secs) = env_parse("POOL_EVICTION_INTERVAL")? {
        config.pool.eviction_interval_secs = secs;
    }

    if let Some(ms) = env_parse("POOL_CONNECT_TIMEOUT_MS")? {
        config.pool.connect_timeout_ms = ms;
    }

    config.validate()?;
    Ok(config)
}

fn env_parse<V>(key: &str) -> Result<Option<V>>
where
    V: std::str::FromStr,
    V::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("Invalid value for {}: {:?}", key, raw)),
        Err(_) => Ok(None),
    }
}

/// Load configuration from a YAML file if one is given, otherwise from the environment
pub fn load_config(config_path: Option<&str>) -> Result<Config> {
    match config_path {
        Some(path) => load_from_yaml(path),
        None => load_from_env(),
    }
}
