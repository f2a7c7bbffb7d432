//! Config-file backed inventory.

use async_trait::async_trait;

use switchyard_core::{Device, HookError, Inventory};

/// Inventory read once from `[[inventory]]` entries in the process
/// configuration. The production suite swaps in its source-of-truth
/// client behind the same trait.
pub(crate) struct StaticInventory {
    devices: Vec<Device>,
}

impl StaticInventory {
    pub(crate) fn new(devices: Vec<Device>) -> Self {
        Self { devices }
    }
}

#[async_trait]
impl Inventory for StaticInventory {
    async fn devices(&self) -> Result<Vec<Device>, HookError> {
        Ok(self.devices.clone())
    }
}
