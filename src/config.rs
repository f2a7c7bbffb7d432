//! Process configuration.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use switchyard_core::{ConfigError, Device};
use switchyard_scheduler::SchedulerConfig;
use switchyard_worker::WorkerConfig;

/// Top-level configuration file. Every section has workable defaults, so
/// a missing file yields a fully-defaulted configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct Config {
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub broker: BrokerSection,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub plugins: PluginsSection,
    /// Managed devices, consumed by fan-out hooks.
    #[serde(default)]
    pub inventory: Vec<Device>,
    #[serde(default)]
    pub history: HistorySection,
    #[serde(default)]
    pub log: LogSection,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct StoreSection {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct BrokerSection {
    #[serde(default = "default_broker_path")]
    pub path: PathBuf,
    #[serde(default = "default_queue")]
    pub queue: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct PluginsSection {
    /// Statically-linked plugins to register, by name.
    #[serde(default = "default_plugins")]
    pub enabled: Vec<String>,
    /// Backup directory handed to the config-backup startup hook.
    #[serde(default = "default_backup_dir")]
    pub backup_dir: PathBuf,
    /// Command that per-device and retry-failed hooks fan out to.
    #[serde(default = "default_fanout_command")]
    pub fanout_command: String,
}

/// Read side of the external run-history store.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct HistorySection {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct LogSection {
    /// When set, daemon-mode logs go to daily-rotated files here instead
    /// of stderr.
    pub dir: Option<PathBuf>,
}

fn default_store_path() -> PathBuf {
    PathBuf::from("switchyard.db")
}

fn default_broker_path() -> PathBuf {
    PathBuf::from("switchyard-queue.db")
}

fn default_queue() -> String {
    "switchyard.work".to_string()
}

fn default_plugins() -> Vec<String> {
    vec![
        "config-backup".to_string(),
        "render-configs".to_string(),
        "per-device".to_string(),
        "retry-failed".to_string(),
    ]
}

fn default_backup_dir() -> PathBuf {
    PathBuf::from("/var/backups/switchyard")
}

fn default_fanout_command() -> String {
    "config-backup".to_string()
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            path: default_broker_path(),
            queue: default_queue(),
        }
    }
}

impl Default for PluginsSection {
    fn default() -> Self {
        Self {
            enabled: default_plugins(),
            backup_dir: default_backup_dir(),
            fanout_command: default_fanout_command(),
        }
    }
}

/// Load configuration from `path`. A missing file is not an error; a
/// present but unparsable file is.
pub(crate) fn load(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let text = fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    toml::from_str(&text).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}
