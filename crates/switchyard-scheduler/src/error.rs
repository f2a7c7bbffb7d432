//! Scheduler errors.

use thiserror::Error;

use switchyard_core::{ConfigError, HookError, StoreError, TransportError};

/// Errors surfaced by the scheduler loop and manual trigger.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A preprocessing hook raised; fatal for the current pass.
    #[error(transparent)]
    Hook(#[from] HookError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
