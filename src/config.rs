// ============================================================================
// SECTION 5: CONFIGURATION SYSTEM
// ============================================================================
// Configuration management with:
// - TOML file parsing
// - Environment variable overrides (ISLEY_ prefix, "__" as separator)
// - Validation
// - Lock-free snapshots for the poller and request handlers
// ============================================================================

use std::fmt::{self, Debug, Formatter};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::gateway::ecowitt::validate_device_address;
use crate::model::ZoneId;
use crate::{
    CACHE_TTL_DIVISOR, DEFAULT_AC_INFINITY_BASE_URL, DEFAULT_BIND_ADDRESS,
    DEFAULT_CACHE_MAX_ENTRIES, DEFAULT_GATEWAY_TIMEOUT_SECS, DEFAULT_POLLING_INTERVAL_SECS,
    DEFAULT_RETENTION_DAYS, DEFAULT_RETENTION_SWEEP_SECS, MAX_POLLING_INTERVAL_SECS,
    MIN_POLLING_INTERVAL_SECS,
};

// ----------------------------------------------------------------------------
// 5.1 Main Configuration Structure
// ----------------------------------------------------------------------------

/// Root configuration of the telemetry service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Poll cadence and gateway deadlines
    #[serde(default)]
    pub polling: PollingConfig,

    /// Per-gateway switches and credentials
    #[serde(default)]
    pub gateways: GatewaysConfig,

    /// Chart query cache
    #[serde(default)]
    pub cache: CacheConfig,

    /// Reading retention
    #[serde(default)]
    pub retention: RetentionConfig,

    /// HTTP surface
    #[serde(default)]
    pub server: ServerConfig,

    /// Push ingest over HTTP
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Known zones, for grouping and discovery
    #[serde(default)]
    pub zones: Vec<ZoneConfig>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl TelemetryConfig {
    /// Build the layered figment: optional TOML file, then `ISLEY_*` env vars.
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::new();
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed("ISLEY_").split("__"))
    }

    /// Load configuration from file with environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }

        Self::extract(Self::figment(Some(path)))
    }

    /// Load defaults overlaid with environment variables only.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::extract(Self::figment(None))
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract().map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML string (for testing)
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml_str).map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let interval = self.polling.interval_secs;
        if !(MIN_POLLING_INTERVAL_SECS..=MAX_POLLING_INTERVAL_SECS).contains(&interval) {
            return Err(ConfigError::invalid_value(
                "polling.interval_secs",
                format!(
                    "Polling interval must be between {} and {} seconds",
                    MIN_POLLING_INTERVAL_SECS, MAX_POLLING_INTERVAL_SECS
                ),
            ));
        }

        if self.polling.http_timeout.is_zero() {
            return Err(ConfigError::invalid_value(
                "polling.http_timeout",
                "Gateway timeout must be greater than zero",
            ));
        }

        for device in &self.gateways.ecowitt.devices {
            if !validate_device_address(device) {
                return Err(ConfigError::invalid_value(
                    "gateways.ecowitt.devices",
                    format!("'{}' is not a private address or local hostname", device),
                ));
            }
        }

        if self.cache.max_entries == 0 {
            return Err(ConfigError::invalid_value("cache.max_entries", "must be at least 1"));
        }

        if self.retention.days == 0 {
            return Err(ConfigError::invalid_value("retention.days", "must be at least 1"));
        }

        if self.retention.sweep_interval.is_zero() {
            return Err(ConfigError::invalid_value(
                "retention.sweep_interval",
                "must be greater than zero",
            ));
        }

        if self.server.bind.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::invalid_value(
                "server.bind",
                format!("'{}' is not a socket address", self.server.bind),
            ));
        }

        Ok(())
    }

    /// Render the default configuration as TOML
    pub fn generate_default_config() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }

    /// Current polling interval.
    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.polling.interval_secs)
    }

    /// Chart cache freshness window: one tenth of the polling interval.
    pub fn cache_ttl(&self) -> Duration {
        self.polling_interval() / CACHE_TTL_DIVISOR
    }

    /// Whether the cloud gateway should be polled this cycle.
    pub fn ac_infinity_active(&self) -> bool {
        self.gateways.ac_infinity.enabled && !self.gateways.ac_infinity.token.is_empty()
    }

    /// Whether the LAN gateway should be polled this cycle.
    pub fn ecowitt_active(&self) -> bool {
        self.gateways.ecowitt.enabled && !self.gateways.ecowitt.devices.is_empty()
    }

    /// Display name of a zone, if known.
    pub fn zone_name(&self, id: ZoneId) -> Option<&str> {
        self.zones.iter().find(|z| z.id == id).map(|z| z.name.as_str())
    }
}

// ----------------------------------------------------------------------------
// 5.2 Polling Configuration
// ----------------------------------------------------------------------------

/// Poll cadence settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Seconds between the end of one cycle and the start of the next
    #[serde(default = "default_polling_interval")]
    pub interval_secs: u64,

    /// Deadline for a single gateway round-trip
    #[serde(default = "default_http_timeout", with = "humantime_serde")]
    pub http_timeout: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_polling_interval(),
            http_timeout: default_http_timeout(),
        }
    }
}

fn default_polling_interval() -> u64 {
    DEFAULT_POLLING_INTERVAL_SECS
}

fn default_http_timeout() -> Duration {
    Duration::from_secs(DEFAULT_GATEWAY_TIMEOUT_SECS)
}

// ----------------------------------------------------------------------------
// 5.3 Gateway Configuration
// ----------------------------------------------------------------------------

/// Configuration for both gateway families
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewaysConfig {
    #[serde(default)]
    pub ac_infinity: AcInfinityConfig,

    #[serde(default)]
    pub ecowitt: EcoWittConfig,
}

/// AC Infinity cloud API
#[derive(Clone, Serialize, Deserialize)]
pub struct AcInfinityConfig {
    /// Poll this gateway
    #[serde(default)]
    pub enabled: bool,

    /// Account token; the gateway is skipped while empty
    #[serde(default)]
    pub token: String,

    /// API base URL
    #[serde(default = "default_ac_infinity_base_url")]
    pub base_url: String,
}

impl Default for AcInfinityConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            token: String::new(),
            base_url: default_ac_infinity_base_url(),
        }
    }
}

// Keeps the token out of logs.
impl Debug for AcInfinityConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcInfinityConfig")
            .field("enabled", &self.enabled)
            .field("token", &if self.token.is_empty() { "" } else { "<redacted>" })
            .field("base_url", &self.base_url)
            .finish()
    }
}

fn default_ac_infinity_base_url() -> String {
    DEFAULT_AC_INFINITY_BASE_URL.into()
}

/// EcoWitt consoles on the local network
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EcoWittConfig {
    /// Poll this gateway
    #[serde(default)]
    pub enabled: bool,

    /// Console addresses (`host` or `host:port`), polled in order
    #[serde(default)]
    pub devices: Vec<String>,
}

// ----------------------------------------------------------------------------
// 5.4 Cache, Retention & Server Configuration
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Upper bound on cached chart queries
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_cache_max_entries(),
        }
    }
}

fn default_cache_max_entries() -> usize {
    DEFAULT_CACHE_MAX_ENTRIES
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Readings older than this many days are pruned
    #[serde(default = "default_retention_days")]
    pub days: u32,

    /// Time between pruning sweeps
    #[serde(default = "default_sweep_interval", with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            days: default_retention_days(),
            sweep_interval: default_sweep_interval(),
        }
    }
}

fn default_retention_days() -> u32 {
    DEFAULT_RETENTION_DAYS
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(DEFAULT_RETENTION_SWEEP_SECS)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP bind address
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

fn default_bind() -> String {
    DEFAULT_BIND_ADDRESS.into()
}

/// Readings pushed by external scripts through `POST /sensors/ingest`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Accept pushed readings; the endpoint answers 403 while off
    #[serde(default)]
    pub enabled: bool,
}

/// A zone known to the grow tracker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneConfig {
    pub id: ZoneId,
    pub name: String,
}

// ----------------------------------------------------------------------------
// 5.5 Logging Configuration
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format (json, pretty, compact)
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Enable ANSI colors
    #[serde(default = "default_true")]
    pub colors: bool,

    /// Include source location
    #[serde(default)]
    pub source_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            colors: true,
            source_location: false,
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

fn default_true() -> bool {
    true
}

// ----------------------------------------------------------------------------
// 5.6 Snapshot Provider
// ----------------------------------------------------------------------------

/// Source of immutable configuration snapshots.
///
/// Every call returns a complete configuration; a concurrent reload never
/// shows up half-applied.
pub trait ConfigSource: Send + Sync {
    fn snapshot(&self) -> Arc<TelemetryConfig>;
}

/// Configuration manager with reload support
pub struct ConfigManager {
    /// Current configuration
    config: ArcSwap<TelemetryConfig>,
    /// Configuration file path
    config_path: Option<PathBuf>,
}

impl ConfigManager {
    /// Create a new configuration manager
    pub fn new(config: TelemetryConfig) -> Self {
        Self {
            config: ArcSwap::from_pointee(config),
            config_path: None,
        }
    }

    /// Create from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = TelemetryConfig::load(&path)?;
        let mut manager = Self::new(config);
        manager.config_path = Some(path.as_ref().to_path_buf());
        Ok(manager)
    }

    /// Remember a path to reload from without loading it now.
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Replace the configuration atomically
    pub fn update(&self, config: TelemetryConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.config.store(Arc::new(config));
        Ok(())
    }

    /// Reload from file; the previous configuration stays on failure
    pub fn reload(&self) -> Result<(), ConfigError> {
        let Some(path) = &self.config_path else {
            return Err(ConfigError::ReloadFailed {
                message: "no configuration file to reload from".into(),
            });
        };
        let config = TelemetryConfig::load(path)?;
        self.update(config)
    }
}

impl ConfigSource for ConfigManager {
    fn snapshot(&self) -> Arc<TelemetryConfig> {
        self.config.load_full()
    }
}

impl Debug for ConfigManager {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigManager")
            .field("config", &*self.config.load())
            .field("config_path", &self.config_path)
            .finish()
    }
}
