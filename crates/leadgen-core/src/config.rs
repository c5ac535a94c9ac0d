//! Configuration management for leadgen.
//!
//! Provides TOML-based configuration with XDG-compliant paths and
//! environment variable overrides.

use crate::error::{ConfigError, ConfigResult};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main application configuration.
///
/// This is loaded from `~/.config/leadgen/config.toml` (or platform equivalent).
/// If the file doesn't exist, default values are used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Remote people-data provider settings
    pub provider: ProviderConfig,
    /// Outbound request rate and daily quota
    pub limiter: LimiterConfig,
    /// Inbound webhook receiver settings
    pub receiver: ReceiverConfig,
    /// Reveal batch deadlines and sweeping
    pub reveal: RevealConfig,
    /// Local storage locations
    pub storage: StorageConfig,
}

impl AppConfig {
    /// Load configuration from disk, falling back to defaults if not found.
    ///
    /// # Errors
    /// Returns error if:
    /// - Config directory cannot be determined
    /// - File exists but cannot be read
    /// - File contents are not valid TOML
    pub fn load() -> ConfigResult<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::debug!("Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Load configuration from an explicit path.
    ///
    /// Unlike [`AppConfig::load`], a missing file is an error.
    pub fn load_from(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.display().to_string(),
            });
        }

        tracing::debug!("Loading config from {}", path.display());
        let contents = fs::read_to_string(path)?;
        let config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Apply environment variable overrides.
    ///
    /// Supports the following environment variables:
    /// - `LEADGEN_API_KEY`: provider API key (never written to disk)
    /// - `LEADGEN_CALLBACK_URL`: public URL the provider posts results to
    /// - `LEADGEN_BIND_ADDR`: local address of the webhook receiver
    /// - `LEADGEN_DAILY_LIMIT`: daily reveal quota
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var("LEADGEN_API_KEY") {
            if !val.trim().is_empty() {
                self.provider.api_key = Some(val.trim().to_string());
                tracing::debug!("Override provider.api_key from env");
            }
        }

        if let Ok(val) = std::env::var("LEADGEN_CALLBACK_URL") {
            if !val.trim().is_empty() {
                tracing::debug!("Override receiver.public_url from env: {}", val);
                self.receiver.public_url = val.trim().to_string();
            }
        }

        if let Ok(val) = std::env::var("LEADGEN_BIND_ADDR") {
            if !val.trim().is_empty() {
                tracing::debug!("Override receiver.bind_addr from env: {}", val);
                self.receiver.bind_addr = val.trim().to_string();
            }
        }

        if let Ok(val) = std::env::var("LEADGEN_DAILY_LIMIT") {
            if let Ok(limit) = val.parse() {
                self.limiter.daily_limit = limit;
                tracing::debug!("Override limiter.daily_limit from env: {}", limit);
            }
        }

        self
    }

    /// Load configuration from the default location with environment overrides.
    pub fn load_with_env() -> ConfigResult<Self> {
        Ok(Self::load()?.with_env_overrides())
    }

    /// Check that values are usable by the reveal pipeline.
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidValue` naming the first offending field.
    pub fn validate(&self) -> ConfigResult<()> {
        fn invalid(field: &str, reason: &str) -> ConfigError {
            ConfigError::InvalidValue {
                field: field.to_string(),
                reason: reason.to_string(),
            }
        }

        if self.provider.max_batch_size == 0 {
            return Err(invalid("provider.max_batch_size", "must be greater than zero"));
        }
        if self.limiter.bucket_capacity == 0 {
            return Err(invalid("limiter.bucket_capacity", "must be greater than zero"));
        }
        if !(self.limiter.refill_per_sec.is_finite() && self.limiter.refill_per_sec > 0.0) {
            return Err(invalid("limiter.refill_per_sec", "must be a positive number"));
        }
        if self.limiter.daily_limit == 0 {
            return Err(invalid("limiter.daily_limit", "must be greater than zero"));
        }
        if self.receiver.queue_capacity == 0 {
            return Err(invalid("receiver.queue_capacity", "must be greater than zero"));
        }
        if self.reveal.batch_timeout_secs == 0 {
            return Err(invalid("reveal.batch_timeout_secs", "must be greater than zero"));
        }
        if self.reveal.sweep_interval_secs == 0 {
            return Err(invalid("reveal.sweep_interval_secs", "must be greater than zero"));
        }
        Ok(())
    }

    /// Get the path to the configuration file.
    ///
    /// Uses XDG base directories: `~/.config/leadgen/config.toml`
    pub fn config_path() -> ConfigResult<PathBuf> {
        Ok(Self::project_dirs()?.config_dir().join("config.toml"))
    }

    /// Get the data directory path.
    ///
    /// Uses XDG base directories: `~/.local/share/leadgen`
    pub fn data_dir() -> ConfigResult<PathBuf> {
        Ok(Self::project_dirs()?.data_dir().to_path_buf())
    }

    /// Get the cache directory path.
    ///
    /// Uses XDG base directories: `~/.cache/leadgen`
    pub fn cache_dir() -> ConfigResult<PathBuf> {
        Ok(Self::project_dirs()?.cache_dir().to_path_buf())
    }

    fn project_dirs() -> ConfigResult<ProjectDirs> {
        ProjectDirs::from("com", "leadgen", "leadgen").ok_or(ConfigError::NoConfigDir)
    }
}

/// Remote provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Base URL of the provider API
    pub base_url: String,
    /// API key (taken from the environment, never serialized)
    #[serde(skip)]
    pub api_key: Option<String>,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Maximum identifiers per reveal submission
    pub max_batch_size: usize,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.signalhire.com/api/v1".to_string(),
            api_key: None,
            timeout_secs: 30,
            max_batch_size: 100,
        }
    }
}

/// Outbound request rate and daily quota.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimiterConfig {
    /// Token bucket capacity (burst size)
    pub bucket_capacity: u32,
    /// Tokens added per second
    pub refill_per_sec: f64,
    /// Reveal operations allowed per day
    pub daily_limit: u32,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            bucket_capacity: 5,
            refill_per_sec: 1.0,
            daily_limit: 5000,
        }
    }
}

/// Inbound webhook receiver settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    /// Local socket address the receiver binds to
    pub bind_addr: String,
    /// Public base URL the provider can reach (callback path is appended)
    pub public_url: String,
    /// Bounded queue size between the HTTP handler and the callback worker
    pub queue_capacity: usize,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8787".to_string(),
            public_url: "http://localhost:8787".to_string(),
            queue_capacity: 256,
        }
    }
}

/// Reveal batch deadlines and sweeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RevealConfig {
    /// Per sub-batch deadline in seconds
    pub batch_timeout_secs: u64,
    /// Interval between timeout sweeps in seconds
    pub sweep_interval_secs: u64,
    /// How long completed batches are retained for duplicate detection
    pub retention_secs: u64,
}

impl Default for RevealConfig {
    fn default() -> Self {
        Self {
            batch_timeout_secs: 300,
            sweep_interval_secs: 2,
            retention_secs: 3600,
        }
    }
}

/// Local storage locations.
///
/// Empty paths resolve to the XDG data/cache directories at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// `SQLite` database holding synced contacts
    pub database_path: Option<PathBuf>,
    /// JSON file caching previously revealed contacts
    pub cache_path: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.provider.max_batch_size, 100);
        assert_eq!(config.limiter.bucket_capacity, 5);
        assert_eq!(config.reveal.sweep_interval_secs, 2);
        assert!(config.provider.api_key.is_none());
        config.validate().expect("defaults are valid");
    }

    #[test]
    fn test_config_serialization_skips_api_key() {
        let mut config = AppConfig::default();
        config.provider.api_key = Some("secret".to_string());

        let toml_str = toml::to_string_pretty(&config).expect("serialize config");
        assert!(toml_str.contains("[provider]"));
        assert!(toml_str.contains("[limiter]"));
        assert!(!toml_str.contains("secret"));

        let parsed: AppConfig = toml::from_str(&toml_str).expect("parse serialized config");
        assert_eq!(parsed.provider.base_url, config.provider.base_url);
        assert!(parsed.provider.api_key.is_none());
    }

    #[test]
    fn test_load_from_path() {
        let tmp = TempDir::new().expect("create temp dir");
        let config_path = tmp.path().join("config.toml");

        let mut config = AppConfig::default();
        config.limiter.daily_limit = 250;
        config.receiver.public_url = "https://hooks.example.com".to_string();
        fs::write(&config_path, toml::to_string_pretty(&config).expect("serialize"))
            .expect("write config file");

        let loaded = AppConfig::load_from(&config_path).expect("load config");
        assert_eq!(loaded.limiter.daily_limit, 250);
        assert_eq!(loaded.receiver.public_url, "https://hooks.example.com");
    }

    #[test]
    fn test_load_from_missing_path() {
        let tmp = TempDir::new().expect("create temp dir");
        let result = AppConfig::load_from(&tmp.path().join("absent.toml"));
        assert!(matches!(result, Err(ConfigError::NotFound { .. })));
    }

    #[test]
    fn test_partial_config() {
        let toml_str = r#"
[limiter]
daily_limit = 20

[reveal]
batch_timeout_secs = 60
"#;

        let config: AppConfig = toml::from_str(toml_str).expect("parse partial config");
        assert_eq!(config.limiter.daily_limit, 20);
        assert_eq!(config.reveal.batch_timeout_secs, 60);
        // These should be defaults
        assert_eq!(config.limiter.bucket_capacity, 5);
        assert_eq!(config.provider.max_batch_size, 100);
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut config = AppConfig::default();
        config.limiter.daily_limit = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field, .. }) if field == "limiter.daily_limit"
        ));

        let mut config = AppConfig::default();
        config.limiter.refill_per_sec = 0.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.provider.max_batch_size = 0;
        assert!(config.validate().is_err());
    }
}
