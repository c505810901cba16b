use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    pub paths: PathsConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub mapper: MapperConfig,
    #[serde(default)]
    pub stability: StabilityConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub portals: Vec<PortalConfig>,
    #[serde(default)]
    pub email: Option<EmailGroupConfig>,
    /// Extra raw-name → canonical-id entries merged over the built-in alias table.
    #[serde(default)]
    pub aliases: HashMap<String, String>,
    /// Canonical ids that are recognized but have no mapper.
    #[serde(default = "default_unimplemented")]
    pub unimplemented: Vec<String>,
}

pub fn default_unimplemented() -> Vec<String> {
    [
        "ALSAGR",
        "ALITTHIHAD",
        "TAKAFUL",
        "WATANIATAKAFUL",
        "UNION",
        "MEDGULF",
        "NGI",
        "ORIENT",
        "RAK",
        "DNI",
        "FIDELITY",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Defaults to `<data dir>/censusgen/censusgen.db`.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    pub staging_dir: PathBuf,
    #[serde(default)]
    pub extra_clear_dirs: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_idle_secs")]
    pub idle_secs: u64,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    #[serde(default = "default_error_backoff_secs")]
    pub error_backoff_secs: u64,
}

fn default_idle_secs() -> u64 {
    10
}

fn default_cooldown_secs() -> u64 {
    5
}

fn default_error_backoff_secs() -> u64 {
    10
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            idle_secs: default_idle_secs(),
            cooldown_secs: default_cooldown_secs(),
            error_backoff_secs: default_error_backoff_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapperConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    600
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl MapperConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StabilityConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_quiet_polls")]
    pub quiet_polls: u32,
    #[serde(default = "default_max_polls")]
    pub max_polls: u32,
    #[serde(default = "default_read_attempts")]
    pub read_attempts: u32,
    #[serde(default = "default_read_retry_delay_ms")]
    pub read_retry_delay_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_quiet_polls() -> u32 {
    2
}

fn default_max_polls() -> u32 {
    20
}

fn default_read_attempts() -> u32 {
    3
}

fn default_read_retry_delay_ms() -> u64 {
    2000
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            quiet_polls: default_quiet_polls(),
            max_polls: default_max_polls(),
            read_attempts: default_read_attempts(),
            read_retry_delay_ms: default_read_retry_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Text
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}

/// A file-generating portal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortalConfig {
    pub id: String,
    pub output_dir: PathBuf,
    pub output_file: String,
    pub command: Vec<String>,
    #[serde(default)]
    pub accepts_auxiliary_data: bool,
    /// Output is written by an external spreadsheet application; wait for
    /// the file to settle before reading it.
    #[serde(default)]
    pub external_generation: bool,
}

/// The email-only portals, which share one mapper and one output file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailGroupConfig {
    pub portals: Vec<String>,
    pub output_dir: PathBuf,
    pub output_file: String,
    pub command: Vec<String>,
}
