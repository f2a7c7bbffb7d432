//! Built-in preprocessing hooks.

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use switchyard_core::{ArgMap, HookContext, HookError, PreprocessHook, WorkItem};

/// `per-device`: fans one firing out into one work item per inventory
/// device. The binding's arguments are copied into every item, with
/// `device` and `host` added per target.
pub(crate) struct PerDeviceHook {
    command: String,
}

impl PerDeviceHook {
    pub(crate) fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl PreprocessHook for PerDeviceHook {
    async fn expand(&self, ctx: &HookContext, args: &ArgMap) -> Result<Vec<WorkItem>, HookError> {
        let devices = ctx.inventory()?.devices().await?;
        debug!(count = devices.len(), command = %self.command, "fanning out over inventory");
        Ok(devices
            .into_iter()
            .map(|device| {
                let mut item_args = args.clone();
                item_args.insert("device".into(), json!(device.name));
                item_args.insert("host".into(), json!(device.host));
                WorkItem::new(&self.command, item_args)
            })
            .collect())
    }
}

/// `retry-failed`: re-targets only the devices whose last run of the
/// command did not pass. A clean history expands to nothing.
pub(crate) struct RetryFailedHook {
    command: String,
}

impl RetryFailedHook {
    pub(crate) fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl PreprocessHook for RetryFailedHook {
    async fn expand(&self, ctx: &HookContext, args: &ArgMap) -> Result<Vec<WorkItem>, HookError> {
        let records = ctx.run_history()?.records_for(&self.command).await?;
        let items: Vec<WorkItem> = records
            .into_iter()
            .filter(|record| !record.passed)
            .map(|record| {
                let mut item_args = args.clone();
                item_args.insert("device".into(), json!(record.device));
                WorkItem::new(&self.command, item_args)
            })
            .collect();
        debug!(count = items.len(), command = %self.command, "retrying failed devices");
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use switchyard_core::{Device, Inventory, RunHistory, RunRecord};

    use crate::plugins::inventory::StaticInventory;

    use super::*;

    struct FixedHistory(Vec<RunRecord>);

    #[async_trait]
    impl RunHistory for FixedHistory {
        async fn records_for(&self, command: &str) -> Result<Vec<RunRecord>, HookError> {
            Ok(self
                .0
                .iter()
                .filter(|r| r.command == command)
                .cloned()
                .collect())
        }
    }

    fn two_device_ctx() -> HookContext {
        let inventory: Arc<dyn Inventory> = Arc::new(StaticInventory::new(vec![
            Device {
                name: "sw1".into(),
                host: "10.0.0.1".into(),
                platform: Some("ios".into()),
            },
            Device {
                name: "sw2".into(),
                host: "10.0.0.2".into(),
                platform: None,
            },
        ]));
        HookContext {
            inventory: Some(inventory),
            run_history: None,
        }
    }

    #[tokio::test]
    async fn per_device_emits_one_item_per_device() {
        let hook = PerDeviceHook::new("config-backup");
        let mut args = ArgMap::new();
        args.insert("vrf".into(), json!("mgmt"));

        let items = hook.expand(&two_device_ctx(), &args).await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].cmd, "config-backup");
        assert_eq!(items[0].args["device"], "sw1");
        assert_eq!(items[0].args["host"], "10.0.0.1");
        assert_eq!(items[0].args["vrf"], "mgmt");
        assert_eq!(items[1].args["device"], "sw2");
    }

    #[tokio::test]
    async fn per_device_without_inventory_is_a_collaborator_error() {
        let hook = PerDeviceHook::new("config-backup");
        let err = hook
            .expand(&HookContext::default(), &ArgMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, HookError::Collaborator(_)));
    }

    #[tokio::test]
    async fn retry_failed_targets_only_failing_devices() {
        let record = |device: &str, passed: bool| RunRecord {
            device: device.into(),
            command: "config-backup".into(),
            last_attempt: Utc::now(),
            last_success: passed.then(Utc::now),
            passed,
            message: String::new(),
        };
        let history: Arc<dyn RunHistory> = Arc::new(FixedHistory(vec![
            record("sw1", true),
            record("sw2", false),
            record("sw3", false),
        ]));
        let ctx = HookContext {
            inventory: None,
            run_history: Some(history),
        };

        let hook = RetryFailedHook::new("config-backup");
        let items = hook.expand(&ctx, &ArgMap::new()).await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].args["device"], "sw2");
        assert_eq!(items[1].args["device"], "sw3");
    }

    #[tokio::test]
    async fn retry_failed_with_clean_history_expands_to_nothing() {
        let history: Arc<dyn RunHistory> = Arc::new(FixedHistory(vec![]));
        let ctx = HookContext {
            inventory: None,
            run_history: Some(history),
        };

        let hook = RetryFailedHook::new("config-backup");
        let items = hook.expand(&ctx, &ArgMap::new()).await.unwrap();
        assert!(items.is_empty());
    }
}
