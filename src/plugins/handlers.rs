//! Demo command handlers.
//!
//! The device work itself (SSH, template rendering) belongs to the
//! suite's device crates; these handlers validate their arguments, log
//! the dispatch and stand in for the real implementations in lab setups.

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use switchyard_core::{ArgMap, Handler, HandlerError, HookError, StartupHook};

fn required_str<'a>(args: &'a ArgMap, key: &str) -> Result<&'a str, HandlerError> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerError::BadArgs(format!("missing string argument '{key}'")))
}

/// `config-backup`: fetch and store one device's running config.
pub(crate) struct ConfigBackupHandler;

#[async_trait]
impl Handler for ConfigBackupHandler {
    async fn run(&self, args: &ArgMap) -> Result<(), HandlerError> {
        let device = required_str(args, "device")?;
        let backup_dir = required_str(args, "backup_dir")?;
        info!(device, backup_dir, "config backup dispatched");
        Ok(())
    }
}

/// Startup hook for `config-backup`: resolves the backup directory once
/// per worker process instead of per message.
pub(crate) struct BackupStartup {
    backup_dir: PathBuf,
}

impl BackupStartup {
    pub(crate) fn new(backup_dir: PathBuf) -> Self {
        Self { backup_dir }
    }
}

#[async_trait]
impl StartupHook for BackupStartup {
    async fn load(&self) -> Result<ArgMap, HookError> {
        let mut config = ArgMap::new();
        config.insert("backup_dir".into(), json!(self.backup_dir.display().to_string()));
        Ok(config)
    }
}

/// `render-configs`: render one device's config from its template.
pub(crate) struct RenderConfigsHandler;

#[async_trait]
impl Handler for RenderConfigsHandler {
    async fn run(&self, args: &ArgMap) -> Result<(), HandlerError> {
        let device = required_str(args, "device")?;
        info!(device, "config render dispatched");
        Ok(())
    }
}
