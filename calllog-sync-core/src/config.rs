//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/calllog-sync/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/calllog-sync/` (~/.config/calllog-sync/)
//! - Data: `$XDG_DATA_HOME/calllog-sync/` (~/.local/share/calllog-sync/)
//! - State/Logs: `$XDG_STATE_HOME/calllog-sync/` (~/.local/state/calllog-sync/)
//!
//! The endpoint URL is not part of this file. It lives in the settings table
//! (see [`crate::settings`]) so it can change while the worker is running.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_DIR: &str = "calllog-sync";

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Delivery tuning
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Delivery worker configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DeliveryConfig {
    /// HTTP request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// First backoff step in milliseconds
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    /// Backoff cap in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Requeues allowed before a transient failure becomes permanent
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Periodic sweep for records whose backoff has expired
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            max_retries: default_max_retries(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl DeliveryConfig {
    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 {
            return Err(Error::Config(
                "delivery.timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.sweep_interval_secs == 0 {
            return Err(Error::Config(
                "delivery.sweep_interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(Error::Config(
                "delivery.base_delay_ms must not exceed delivery.max_delay_ms".to_string(),
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

fn default_timeout() -> u64 {
    30
}

fn default_base_delay() -> u64 {
    1_000
}

fn default_max_delay() -> u64 {
    300_000
}

fn default_max_retries() -> u32 {
    5
}

fn default_sweep_interval() -> u64 {
    5
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.delivery.validate()?;
        Ok(config)
    }

    /// `$XDG_CONFIG_HOME/calllog-sync/config.toml`
    pub fn config_path() -> PathBuf {
        xdg_config_home().join(APP_DIR).join("config.toml")
    }

    /// `$XDG_DATA_HOME/calllog-sync/`
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join(APP_DIR)
    }

    /// `$XDG_STATE_HOME/calllog-sync/`
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join(APP_DIR)
    }

    /// `$XDG_DATA_HOME/calllog-sync/calllog.db`
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("calllog.db")
    }

    /// Ensure XDG base directory environment variables are set.
    pub fn ensure_xdg_env() {
        let home = home_dir();

        if std::env::var("XDG_DATA_HOME").is_err() {
            std::env::set_var("XDG_DATA_HOME", home.join(".local/share"));
        }

        if std::env::var("XDG_STATE_HOME").is_err() {
            std::env::set_var("XDG_STATE_HOME", home.join(".local/state"));
        }

        if std::env::var("XDG_CONFIG_HOME").is_err() {
            std::env::set_var("XDG_CONFIG_HOME", home.join(".config"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.delivery.timeout_secs, 30);
        assert_eq!(config.delivery.base_delay_ms, 1_000);
        assert_eq!(config.delivery.max_retries, 5);
        assert_eq!(config.logging.level, "info");
        assert!(config.delivery.validate().is_ok());
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[delivery]
base_delay_ms = 250
max_delay_ms = 4000
max_retries = 2

[logging]
level = "debug"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.delivery.base_delay(), Duration::from_millis(250));
        assert_eq!(config.delivery.max_delay(), Duration::from_millis(4000));
        assert_eq!(config.delivery.max_retries, 2);
        assert_eq!(config.delivery.sweep_interval_secs, 5);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_delivery_config_validation() {
        let config = DeliveryConfig {
            base_delay_ms: 10_000,
            max_delay_ms: 1_000,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = DeliveryConfig {
            timeout_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_rejects_invalid_delivery() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[delivery]\nsweep_interval_secs = 0\n").unwrap();
        assert!(matches!(Config::load_from(&path), Err(Error::Config(_))));
    }
}
