//! Collaborator traits consumed by preprocessing hooks.
//!
//! The dispatcher never talks to managed devices itself. Hooks that fan a
//! firing out across the estate query an [`Inventory`]; retry-oriented
//! hooks additionally read the [`RunHistory`] store that handlers write.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::HookError;

/// A managed device as the inventory reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    /// Inventory name, unique within the estate.
    pub name: String,
    /// Management address.
    pub host: String,
    /// Platform/OS label, when the inventory knows it.
    pub platform: Option<String>,
}

/// Per-device status of the last run of a command, written by handlers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub device: String,
    pub command: String,
    pub last_attempt: DateTime<Utc>,
    pub last_success: Option<DateTime<Utc>>,
    pub passed: bool,
    pub message: String,
}

/// Enumerates target devices for fan-out hooks.
#[async_trait]
pub trait Inventory: Send + Sync {
    /// All devices the suite manages.
    async fn devices(&self) -> Result<Vec<Device>, HookError>;
}

/// Read side of the external run-history store. The dispatcher never
/// writes to it; handlers do.
#[async_trait]
pub trait RunHistory: Send + Sync {
    /// Latest record per device for one command.
    async fn records_for(&self, command: &str) -> Result<Vec<RunRecord>, HookError>;
}
