//! Plugin wiring.
//!
//! Builds the handler/hook registry and the collaborator context from the
//! process configuration. Plugins are statically linked; the config's
//! `[plugins].enabled` list selects which of them get registered.

use std::sync::Arc;

use tracing::{info, warn};

use switchyard_core::{HookContext, HookError, Registry};

use crate::config::Config;
use crate::plugins::fanout::{PerDeviceHook, RetryFailedHook};
use crate::plugins::handlers::{BackupStartup, ConfigBackupHandler, RenderConfigsHandler};
use crate::plugins::history::SqliteRunHistory;
use crate::plugins::inventory::StaticInventory;

/// Register every enabled plugin. Unknown names are skipped with a
/// warning rather than failing the process.
pub(crate) fn build_registry(config: &Config) -> Registry {
    let mut registry = Registry::new();
    for name in &config.plugins.enabled {
        match name.as_str() {
            "config-backup" => {
                registry.register_handler("config-backup", Arc::new(ConfigBackupHandler));
                registry.register_startup_hook(
                    "config-backup",
                    Arc::new(BackupStartup::new(config.plugins.backup_dir.clone())),
                );
            }
            "render-configs" => {
                registry.register_handler("render-configs", Arc::new(RenderConfigsHandler));
            }
            "per-device" => {
                registry.register_pre_hook(
                    "per-device",
                    Arc::new(PerDeviceHook::new(config.plugins.fanout_command.clone())),
                );
            }
            "retry-failed" => {
                registry.register_pre_hook(
                    "retry-failed",
                    Arc::new(RetryFailedHook::new(config.plugins.fanout_command.clone())),
                );
            }
            other => warn!(plugin = other, "unknown plugin name, skipping"),
        }
    }
    info!(handlers = registry.len(), "plugin registry built");
    registry
}

/// Build the collaborator context handed to preprocessing hooks.
///
/// The inventory always comes from the config; the run-history store is
/// attached only when `[history].path` is set.
pub(crate) async fn build_hook_context(config: &Config) -> Result<HookContext, HookError> {
    let mut ctx = HookContext {
        inventory: Some(Arc::new(StaticInventory::new(config.inventory.clone()))),
        run_history: None,
    };
    if let Some(path) = &config.history.path {
        ctx.run_history = Some(Arc::new(SqliteRunHistory::open(path).await?));
    }
    Ok(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_registers_all_builtins() {
        let registry = build_registry(&Config::default());
        assert!(registry.resolve("config-backup").is_some());
        assert!(registry.resolve("render-configs").is_some());
        assert!(registry.startup_hook("config-backup").is_some());
        assert!(registry.pre_hook("per-device").is_some());
        assert!(registry.pre_hook("retry-failed").is_some());
    }

    #[test]
    fn unknown_plugin_names_are_skipped() {
        let mut config = Config::default();
        config.plugins.enabled = vec!["render-configs".into(), "bgp-audit".into()];
        let registry = build_registry(&config);
        assert_eq!(registry.len(), 1);
        assert!(registry.pre_hook("per-device").is_none());
    }

    #[tokio::test]
    async fn context_has_inventory_but_no_history_by_default() {
        let ctx = build_hook_context(&Config::default()).await.unwrap();
        assert!(ctx.inventory().is_ok());
        assert!(ctx.run_history().is_err());
    }
}
