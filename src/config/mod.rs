//! Configuration management for storefront
//!
//! This module handles loading, parsing, and managing configuration from various sources:
//! - Configuration files (TOML format)
//! - Environment variables (`STOREFRONT_*`)
//! - Command-line arguments
//!
//! Configuration precedence (highest to lowest):
//! 1. Command-line arguments
//! 2. Environment variables
//! 3. Configuration file
//! 4. Default values

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{ConfigError, Result, StoreError};

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// HTTP listener
    #[serde(default)]
    pub server: ServerConfig,

    /// Export engine limits and cadence
    #[serde(default)]
    pub export: ExportConfig,

    /// Admission policy for exports
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Row store backend
    #[serde(default)]
    pub store: StoreConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP listener configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Export engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Hard cap on rows streamed by one export
    #[serde(default = "default_export_limit")]
    pub export_limit: u64,

    /// Rows between sink flushes
    #[serde(default = "default_flush_interval_items")]
    pub flush_interval_items: u64,

    /// Page size of the list endpoint when none is requested
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,

    /// Largest page size the list endpoint accepts
    #[serde(default = "default_max_page_size")]
    pub max_page_size: usize,

    /// Deadline for one export in seconds
    #[serde(default = "default_export_timeout")]
    pub timeout_secs: u64,

    /// End truncated line-delimited exports with a `limit_exceeded` marker
    #[serde(default)]
    pub truncation_marker: bool,

    /// Flushed chunks buffered between writer and response body
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Check every row against its registered schema in binary exports
    #[serde(default = "default_true")]
    pub validate_binary_rows: bool,
}

/// Admission configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Quota window in seconds
    #[serde(default = "default_rate_window")]
    pub window_secs: u64,

    /// Exports each client may start per window
    #[serde(default = "default_rate_permits")]
    pub permits: u32,

    /// Exports streaming at the same time, across all clients
    #[serde(default = "default_max_concurrent_exports")]
    pub max_concurrent_exports: usize,
}

/// Row store backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process ordered map
    #[default]
    Memory,
    /// MongoDB collection with `_id` as identity key
    Mongodb,
}

/// Row store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// MongoDB connection URI
    #[serde(default = "default_uri")]
    pub uri: String,

    #[serde(default = "default_database")]
    pub database: String,

    #[serde(default = "default_collection")]
    pub collection: String,

    /// Rows fetched per store round trip
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Maximum MongoDB pool size
    #[serde(default = "default_max_pool_size")]
    pub max_pool_size: u32,

    /// Synthetic products loaded at startup
    #[serde(default)]
    pub seed_rows: u64,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: LogLevel,

    /// Enable timestamps in logs
    #[serde(default = "default_true")]
    pub timestamps: bool,

    /// Emit JSON log records
    #[serde(default)]
    pub json: bool,
}

/// Log level options
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

// Default value functions
fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_export_limit() -> u64 {
    10_000
}

fn default_flush_interval_items() -> u64 {
    10
}

fn default_page_size() -> usize {
    50
}

fn default_max_page_size() -> usize {
    500
}

fn default_export_timeout() -> u64 {
    300
}

fn default_channel_capacity() -> usize {
    16
}

fn default_rate_window() -> u64 {
    60
}

fn default_rate_permits() -> u32 {
    30
}

fn default_max_concurrent_exports() -> usize {
    8
}

fn default_uri() -> String {
    "mongodb://localhost:27017".to_string()
}

fn default_database() -> String {
    "storefront".to_string()
}

fn default_collection() -> String {
    "products".to_string()
}

fn default_batch_size() -> u32 {
    500
}

fn default_max_pool_size() -> u32 {
    10
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            export_limit: default_export_limit(),
            flush_interval_items: default_flush_interval_items(),
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
            timeout_secs: default_export_timeout(),
            truncation_marker: false,
            channel_capacity: default_channel_capacity(),
            validate_binary_rows: true,
        }
    }
}

impl ExportConfig {
    /// Export deadline as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: default_rate_window(),
            permits: default_rate_permits(),
            max_concurrent_exports: default_max_concurrent_exports(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            uri: default_uri(),
            database: default_database(),
            collection: default_collection(),
            batch_size: default_batch_size(),
            max_pool_size: default_max_pool_size(),
            seed_rows: 0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            timestamps: true,
            json: false,
        }
    }
}

impl Config {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from file, then apply environment overrides
    ///
    /// # Arguments
    /// * `path` - Explicit config file; the default path is tried otherwise
    ///
    /// # Returns
    /// * `Result<Config>` - Merged configuration or error
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    ///
    /// An explicit path must exist. When no path is given the default path
    /// is used if present, otherwise the defaults.
    ///
    /// # Arguments
    /// * `path` - Path to the configuration file (TOML format)
    ///
    /// # Returns
    /// * `Result<Config>` - Loaded configuration or error
    pub fn load_from_file(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(explicit) => {
                if !explicit.exists() {
                    return Err(ConfigError::FileNotFound(explicit.display().to_string()).into());
                }
                explicit.to_path_buf()
            }
            None => {
                let default = Self::default_config_path();
                if !default.exists() {
                    return Ok(Self::default());
                }
                default
            }
        };

        let content = std::fs::read_to_string(&path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| ConfigError::InvalidFormat(e.to_string()).into())
    }

    /// Render the configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::InvalidFormat(e.to_string()).into())
    }

    /// Save configuration to a file
    ///
    /// # Arguments
    /// * `path` - Path where to save the configuration
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    /// Apply `STOREFRONT_*` environment overrides
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Apply environment overrides read through `lookup`
    ///
    /// # Arguments
    /// * `lookup` - Returns the value of an environment variable, if set
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bind) = lookup("STOREFRONT_BIND") {
            self.server.bind = bind;
        }
        if let Some(raw) = lookup("STOREFRONT_PORT") {
            self.server.port = parse_env("STOREFRONT_PORT", &raw)?;
        }
        if let Some(raw) = lookup("STOREFRONT_EXPORT_LIMIT") {
            self.export.export_limit = parse_env("STOREFRONT_EXPORT_LIMIT", &raw)?;
        }
        if let Some(raw) = lookup("STOREFRONT_FLUSH_INTERVAL") {
            self.export.flush_interval_items = parse_env("STOREFRONT_FLUSH_INTERVAL", &raw)?;
        }
        if let Some(raw) = lookup("STOREFRONT_EXPORT_TIMEOUT") {
            self.export.timeout_secs = parse_env("STOREFRONT_EXPORT_TIMEOUT", &raw)?;
        }
        if let Some(raw) = lookup("STOREFRONT_RATE_WINDOW") {
            self.rate_limit.window_secs = parse_env("STOREFRONT_RATE_WINDOW", &raw)?;
        }
        if let Some(raw) = lookup("STOREFRONT_RATE_PERMITS") {
            self.rate_limit.permits = parse_env("STOREFRONT_RATE_PERMITS", &raw)?;
        }
        if let Some(raw) = lookup("STOREFRONT_MAX_CONCURRENT_EXPORTS") {
            self.rate_limit.max_concurrent_exports =
                parse_env("STOREFRONT_MAX_CONCURRENT_EXPORTS", &raw)?;
        }
        if let Some(raw) = lookup("STOREFRONT_STORE_BACKEND") {
            self.store.backend = raw.trim().parse::<StoreBackend>()?;
        }
        if let Some(uri) = lookup("STOREFRONT_MONGODB_URI") {
            self.store.uri = uri;
        }
        if let Some(raw) = lookup("STOREFRONT_SEED_ROWS") {
            self.store.seed_rows = parse_env("STOREFRONT_SEED_ROWS", &raw)?;
        }
        if let Some(raw) = lookup("STOREFRONT_LOG_LEVEL") {
            self.logging.level = parse_env("STOREFRONT_LOG_LEVEL", &raw)?;
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".storefront")
            .join("config.toml")
    }

    /// Validate the configuration
    ///
    /// # Returns
    /// * `Result<()>` - Ok if valid, the first offending field otherwise
    pub fn validate(&self) -> Result<()> {
        let checks: [(&str, u64); 8] = [
            ("export.export_limit", self.export.export_limit),
            ("export.flush_interval_items", self.export.flush_interval_items),
            ("export.max_page_size", self.export.max_page_size as u64),
            ("export.timeout_secs", self.export.timeout_secs),
            ("export.channel_capacity", self.export.channel_capacity as u64),
            ("rate_limit.permits", u64::from(self.rate_limit.permits)),
            (
                "rate_limit.max_concurrent_exports",
                self.rate_limit.max_concurrent_exports as u64,
            ),
            ("store.batch_size", u64::from(self.store.batch_size)),
        ];
        for (field, value) in checks {
            if value == 0 {
                return Err(invalid(field, "0"));
            }
        }

        if self.export.default_page_size == 0
            || self.export.default_page_size > self.export.max_page_size
        {
            return Err(invalid(
                "export.default_page_size",
                &self.export.default_page_size.to_string(),
            ));
        }

        if self.rate_limit.window_secs == 0 {
            return Err(invalid("rate_limit.window_secs", "0"));
        }

        if self.store.backend == StoreBackend::Mongodb && !self.store.uri.starts_with("mongodb") {
            return Err(invalid("store.uri", &self.store.uri));
        }

        Ok(())
    }

    /// Socket address string for the HTTP listener
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.bind, self.server.port)
    }
}

fn invalid(field: &str, value: &str) -> crate::error::StorefrontError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
    }
    .into()
}

fn parse_env<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim().parse().map_err(|_| invalid(key, raw))
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(format!("unknown log level '{other}'")),
        }
    }
}

impl FromStr for StoreBackend {
    type Err = StoreError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "mongodb" | "mongo" => Ok(StoreBackend::Mongodb),
            other => Err(StoreError::UnknownBackend(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.export.export_limit, 10_000);
        assert_eq!(config.export.flush_interval_items, 10);
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert!(!config.export.truncation_marker);
        assert_eq!(config.export.timeout(), Duration::from_secs(300));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            [export]
            export_limit = 250

            [store]
            backend = "mongodb"
            "#,
        )
        .unwrap();
        assert_eq!(config.export.export_limit, 250);
        assert_eq!(config.export.max_page_size, 500);
        assert_eq!(config.store.backend, StoreBackend::Mongodb);
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_invalid_toml_is_reported() {
        let err = Config::from_toml("[export\nexport_limit = 1").unwrap_err();
        assert_eq!(err.code(), "invalid_config");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("STOREFRONT_EXPORT_LIMIT", "42"),
            ("STOREFRONT_LOG_LEVEL", "debug"),
            ("STOREFRONT_STORE_BACKEND", "mongo"),
        ]);
        let mut config = Config::default();
        config
            .apply_env_with(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.export.export_limit, 42);
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.store.backend, StoreBackend::Mongodb);
    }

    #[test]
    fn test_unknown_backend_is_rejected() {
        let err = "sqlite".parse::<StoreBackend>().unwrap_err();
        assert_eq!(err, StoreError::UnknownBackend("sqlite".into()));

        let mut config = Config::default();
        let err = config
            .apply_env_with(|key| (key == "STOREFRONT_STORE_BACKEND").then(|| "redis".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("redis"));
        assert_eq!(err.code(), "store_error");
    }

    #[test]
    fn test_bad_env_value_names_variable() {
        let mut config = Config::default();
        let err = config
            .apply_env_with(|key| (key == "STOREFRONT_PORT").then(|| "eighty".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("STOREFRONT_PORT"));
    }

    #[test]
    fn test_validate_rejects_zero_flush_interval() {
        let mut config = Config::default();
        config.export.flush_interval_items = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_default_page_above_max() {
        let mut config = Config::default();
        config.export.default_page_size = 1000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(Config::load_from_file(Some(missing.as_path())).is_err());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.server.port = 9090;
        config.save(&path).unwrap();

        let loaded = Config::load_from_file(Some(path.as_path())).unwrap();
        assert_eq!(loaded, config);
    }
}
