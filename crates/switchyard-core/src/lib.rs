//! # Switchyard Core
//!
//! Shared building blocks for the Switchyard job dispatcher:
//!
//! - Model types: job definitions, schedule bindings, pending fires and the
//!   `{cmd, args}` work-item wire format
//! - Error taxonomy (config / store / transport / hook / handler)
//! - Five-field cron evaluation
//! - The handler, startup-hook and preprocessing-hook registry
//! - Collaborator traits (inventory, run history) consumed by hooks

pub mod collab;
pub mod cron;
pub mod error;
pub mod model;
pub mod registry;

pub use collab::{Device, Inventory, RunHistory, RunRecord};
pub use error::{ConfigError, HandlerError, HookError, StoreError, TransportError};
pub use model::{ArgMap, DueFire, JobDefinition, PendingFire, ScheduleBinding, WorkItem};
pub use registry::{Handler, HookContext, PreprocessHook, Registry, StartupHook};
