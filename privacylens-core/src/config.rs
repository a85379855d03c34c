//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/privacylens/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/privacylens/` (~/.config/privacylens/)
//! - Data: `$XDG_DATA_HOME/privacylens/` (~/.local/share/privacylens/)
//! - State/Logs: `$XDG_STATE_HOME/privacylens/` (~/.local/state/privacylens/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "privacylens";

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
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Database location override
    #[serde(default)]
    pub database: DatabaseConfig,

    /// App icon lookup configuration
    #[serde(default)]
    pub icons: IconsConfig,
}

/// Logging configuration
#[derive(Debug, Deserialize)]
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

/// Database configuration
#[derive(Debug, Deserialize, Default)]
pub struct DatabaseConfig {
    /// Explicit database file; defaults to [`Config::default_database_path`]
    pub path: Option<PathBuf>,
}

/// App icon lookup configuration
#[derive(Debug, Deserialize, Clone)]
pub struct IconsConfig {
    /// Enable/disable network lookups for app icons
    #[serde(default = "default_icons_enabled")]
    pub enabled: bool,

    /// Lookup endpoint; queried as `{lookup_url}?bundleId={id}`
    #[serde(default = "default_icon_lookup_url")]
    pub lookup_url: String,

    /// HTTP request timeout in seconds
    #[serde(default = "default_icon_timeout")]
    pub timeout_secs: u64,
}

impl Default for IconsConfig {
    fn default() -> Self {
        Self {
            enabled: default_icons_enabled(),
            lookup_url: default_icon_lookup_url(),
            timeout_secs: default_icon_timeout(),
        }
    }
}

impl IconsConfig {
    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if !self.lookup_url.starts_with("http://") && !self.lookup_url.starts_with("https://") {
            return Err(Error::Config(format!(
                "icons.lookup_url must be an http(s) URL, got {:?}",
                self.lookup_url
            )));
        }
        if self.timeout_secs == 0 {
            return Err(Error::Config(
                "icons.timeout_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_icons_enabled() -> bool {
    true
}

fn default_icon_lookup_url() -> String {
    "https://itunes.apple.com/lookup".to_string()
}

fn default_icon_timeout() -> u64 {
    30
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

        config.icons.validate()?;

        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/privacylens/config.toml` (~/.config/privacylens/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join(APP_DIR).join("config.toml")
    }

    /// Returns the data directory path (for SQLite database)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join(APP_DIR)
    }

    /// Returns the state directory path (for logs)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join(APP_DIR)
    }

    /// Returns the default database file path
    ///
    /// `$XDG_DATA_HOME/privacylens/reports.db` (~/.local/share/privacylens/reports.db)
    pub fn default_database_path() -> PathBuf {
        Self::data_dir().join("reports.db")
    }

    /// Database path honoring the `[database] path` override
    pub fn database_path(&self) -> PathBuf {
        self.database
            .path
            .clone()
            .unwrap_or_else(Self::default_database_path)
    }

    /// Ensure XDG base directory environment variables are set.
    ///
    /// Binaries call this before touching the core library so paths are
    /// stable for the whole process.
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
