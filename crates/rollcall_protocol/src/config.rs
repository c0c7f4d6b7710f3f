//! Rollcall configuration.
//!
//! Read from `~/.rollcall/config.toml` (or an explicit path), then overlaid
//! with `ROLLCALL_*` environment variables. Every field has a default, so an
//! empty or missing file yields a working configuration.

use crate::defaults::*;
use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Error type for config operations
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid config value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Result type for config operations
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Where the remote sheets live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RemoteBackendConfig {
    /// In-process workbooks; nothing leaves the machine (dry runs, demos).
    /// `roster` seeds the master sheet's ID column.
    Memory {
        #[serde(default)]
        roster: Vec<String>,
    },
    /// Workbooks stored as JSON documents in a mirrored directory
    JsonDir { mirror_dir: PathBuf },
}

impl Default for RemoteBackendConfig {
    fn default() -> Self {
        RemoteBackendConfig::Memory { roster: Vec::new() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollcallConfig {
    /// Directory holding the day partitions and backups
    #[serde(default = "paths::default_ledger_dir")]
    pub ledger_dir: PathBuf,

    /// Workbook holding one worksheet per day
    #[serde(default = "default_daily_workbook")]
    pub daily_workbook: String,

    /// Worksheet duplicated when today's daily sheet does not exist yet
    #[serde(default = "default_daily_template_sheet")]
    pub daily_template_sheet: String,

    /// Workbook holding the master presence roster
    #[serde(default = "default_master_workbook")]
    pub master_workbook: String,

    /// Roster worksheet name within the master workbook
    #[serde(default = "default_master_sheet")]
    pub master_sheet: String,

    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,

    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Consecutive unavailable records that abort a pass
    #[serde(default = "default_unavailable_abort_threshold")]
    pub unavailable_abort_threshold: u32,

    /// Repeat decodes of one identifier inside this window are suppressed
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,

    /// Extra passes on a timer while online (disabled when absent)
    #[serde(default)]
    pub periodic_sync_secs: Option<u64>,

    /// Snapshot files kept per partition date
    #[serde(default = "default_backup_retention")]
    pub backup_retention: usize,

    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,

    #[serde(default)]
    pub remote: RemoteBackendConfig,
}

fn default_daily_workbook() -> String {
    DEFAULT_DAILY_WORKBOOK.to_string()
}
fn default_daily_template_sheet() -> String {
    DEFAULT_DAILY_TEMPLATE_SHEET.to_string()
}
fn default_master_workbook() -> String {
    DEFAULT_MASTER_WORKBOOK.to_string()
}
fn default_master_sheet() -> String {
    DEFAULT_MASTER_SHEET.to_string()
}
fn default_probe_interval_secs() -> u64 { DEFAULT_PROBE_INTERVAL_SECS }
fn default_probe_timeout_ms() -> u64 { DEFAULT_PROBE_TIMEOUT_MS }
fn default_max_retry_attempts() -> u32 { DEFAULT_MAX_RETRY_ATTEMPTS }
fn default_retry_delay_ms() -> u64 { DEFAULT_RETRY_DELAY_MS }
fn default_unavailable_abort_threshold() -> u32 { DEFAULT_UNAVAILABLE_ABORT_THRESHOLD }
fn default_backup_retention() -> usize { DEFAULT_BACKUP_RETENTION }
fn default_shutdown_grace_ms() -> u64 { DEFAULT_SHUTDOWN_GRACE_MS }

impl Default for RollcallConfig {
    fn default() -> Self {
        Self {
            ledger_dir: paths::default_ledger_dir(),
            daily_workbook: default_daily_workbook(),
            daily_template_sheet: default_daily_template_sheet(),
            master_workbook: default_master_workbook(),
            master_sheet: default_master_sheet(),
            probe_interval_secs: default_probe_interval_secs(),
            probe_timeout_ms: default_probe_timeout_ms(),
            max_retry_attempts: default_max_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            unavailable_abort_threshold: default_unavailable_abort_threshold(),
            cooldown_ms: default_cooldown_ms(),
            periodic_sync_secs: None,
            backup_retention: default_backup_retention(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            remote: RemoteBackendConfig::default(),
        }
    }
}

impl RollcallConfig {
    /// Load from a TOML file. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: RollcallConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load from the default location, apply environment overrides, validate.
    pub fn load_default() -> Result<Self> {
        Self::load_with_env(&paths::default_config_path())
    }

    /// Load from `path`, apply environment overrides, validate.
    pub fn load_with_env(path: &Path) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay values from a key lookup (the process environment in production).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("ROLLCALL_LEDGER_DIR") {
            self.ledger_dir = PathBuf::from(dir);
        }
        if let Some(book) = lookup("ROLLCALL_DAILY_WORKBOOK") {
            self.daily_workbook = book;
        }
        if let Some(book) = lookup("ROLLCALL_MASTER_WORKBOOK") {
            self.master_workbook = book;
        }
        if let Some(raw) = lookup("ROLLCALL_PROBE_INTERVAL_SECS") {
            self.probe_interval_secs = parse_number("ROLLCALL_PROBE_INTERVAL_SECS", &raw)?;
        }
        if let Some(raw) = lookup("ROLLCALL_MAX_RETRY_ATTEMPTS") {
            self.max_retry_attempts = parse_number("ROLLCALL_MAX_RETRY_ATTEMPTS", &raw)?;
        }
        if let Some(raw) = lookup("ROLLCALL_COOLDOWN_MS") {
            self.cooldown_ms = parse_number("ROLLCALL_COOLDOWN_MS", &raw)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.probe_interval_secs == 0 {
            return Err(invalid("probe_interval_secs", "must be greater than zero"));
        }
        if self.probe_timeout_ms == 0 {
            return Err(invalid("probe_timeout_ms", "must be greater than zero"));
        }
        if self.max_retry_attempts == 0 {
            return Err(invalid("max_retry_attempts", "at least one attempt is required"));
        }
        if self.unavailable_abort_threshold == 0 {
            return Err(invalid("unavailable_abort_threshold", "must be greater than zero"));
        }
        if self.periodic_sync_secs == Some(0) {
            return Err(invalid("periodic_sync_secs", "use no value to disable"));
        }
        if self.daily_workbook.trim().is_empty() || self.master_workbook.trim().is_empty() {
            return Err(invalid("workbook", "workbook identifiers cannot be empty"));
        }
        Ok(())
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn periodic_sync(&self) -> Option<Duration> {
        self.periodic_sync_secs.map(Duration::from_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

fn invalid(key: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        reason: reason.to_string(),
    }
}

fn parse_number<T: std::str::FromStr>(key: &'static str, raw: &str) -> Result<T> {
    raw.trim().parse::<T>().map_err(|_| ConfigError::Invalid {
        key,
        reason: format!("not a number: {raw}"),
    })
}
