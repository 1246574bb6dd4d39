//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/depotsync/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/depotsync/` (~/.config/depotsync/)
//! - Data: `$XDG_DATA_HOME/depotsync/` (~/.local/share/depotsync/)
//! - State/Logs: `$XDG_STATE_HOME/depotsync/` (~/.local/state/depotsync/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Log files are named `<prefix>.<date>.<suffix>`
pub const LOG_FILE_PREFIX: &str = "depotsync";
pub const LOG_FILE_SUFFIX: &str = "log";

/// Name of the sync metadata file inside the data directory
pub const SYNC_METADATA_FILE: &str = "sync-metadata.json";

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
    /// Shared storage and file naming
    #[serde(default)]
    pub storage: StorageConfig,

    /// Background sync worker
    #[serde(default)]
    pub sync: SyncConfig,

    /// Master database backups
    #[serde(default)]
    pub backup: BackupConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where the master database lives and how its files are named
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Directory on shared/network storage holding the master database
    pub shared_path: Option<PathBuf>,

    /// File name of the database, used for both master and local copy
    #[serde(default = "default_db_filename")]
    pub db_filename: String,

    /// File name of the lock record inside the shared directory
    #[serde(default = "default_lock_filename")]
    pub lock_filename: String,

    /// Create an empty master database when none exists
    #[serde(default = "default_auto_create_master")]
    pub auto_create_master: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            shared_path: None,
            db_filename: default_db_filename(),
            lock_filename: default_lock_filename(),
            auto_create_master: default_auto_create_master(),
        }
    }
}

fn default_db_filename() -> String {
    "inventory.db".to_string()
}

fn default_lock_filename() -> String {
    "inventory.db.lock".to_string()
}

fn default_auto_create_master() -> bool {
    true
}

/// Background sync worker configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    /// Maximum number of queued copy-up jobs
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_queue_capacity() -> usize {
    16
}

/// Master database backup configuration
#[derive(Debug, Deserialize, Clone)]
pub struct BackupConfig {
    /// Take a backup of the master at session start
    #[serde(default = "default_backup_enabled")]
    pub enabled: bool,

    /// Number of backups to retain
    #[serde(default = "default_max_backups")]
    pub max_backups: usize,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            enabled: default_backup_enabled(),
            max_backups: default_max_backups(),
        }
    }
}

fn default_backup_enabled() -> bool {
    true
}

fn default_max_backups() -> usize {
    5
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Daily log files to keep
    #[serde(default = "default_log_retention")]
    pub keep_files: usize,

    /// Mirror warnings and errors to stderr
    #[serde(default)]
    pub stderr: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            keep_files: default_log_retention(),
            stderr: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_retention() -> usize {
    7
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

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.storage.db_filename.trim().is_empty() {
            return Err(Error::Config(
                "storage.db_filename must not be empty".to_string(),
            ));
        }
        if self.storage.lock_filename.trim().is_empty() {
            return Err(Error::Config(
                "storage.lock_filename must not be empty".to_string(),
            ));
        }
        if self.storage.lock_filename == self.storage.db_filename {
            return Err(Error::Config(
                "storage.lock_filename must differ from storage.db_filename".to_string(),
            ));
        }
        if self.sync.queue_capacity == 0 {
            return Err(Error::Config(
                "sync.queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.logging.keep_files == 0 {
            return Err(Error::Config(
                "logging.keep_files must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the configured shared storage directory
    pub fn shared_path(&self) -> Result<&Path> {
        self.storage
            .shared_path
            .as_deref()
            .ok_or_else(|| Error::Config("storage.shared_path is not configured".to_string()))
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/depotsync/config.toml` (~/.config/depotsync/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("depotsync").join("config.toml")
    }

    /// Returns the data directory path (local working copy and sync metadata)
    ///
    /// `$XDG_DATA_HOME/depotsync/` (~/.local/share/depotsync/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("depotsync")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/depotsync/` (~/.local/state/depotsync/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("depotsync")
    }

    /// Returns the sync metadata file path
    pub fn sync_metadata_path() -> PathBuf {
        Self::data_dir().join(SYNC_METADATA_FILE)
    }

    /// Returns the local working database path for this configuration
    pub fn local_database_path(&self) -> PathBuf {
        Self::data_dir().join(&self.storage.db_filename)
    }

    /// Returns today's log file path
    ///
    /// `$XDG_STATE_HOME/depotsync/depotsync.<YYYY-MM-DD>.log`, dated in UTC like the appender
    pub fn log_path() -> PathBuf {
        Self::state_dir().join(format!(
            "{}.{}.{}",
            LOG_FILE_PREFIX,
            chrono::Utc::now().format("%Y-%m-%d"),
            LOG_FILE_SUFFIX
        ))
    }

    /// Ensure XDG base directory environment variables are set.
    ///
    /// This is mainly for CLI binaries that want explicit, stable path behavior
    /// before invoking other components that read these env vars.
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
