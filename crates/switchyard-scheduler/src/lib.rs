//! # Switchyard Scheduler
//!
//! The single active scheduler process: polls the store for due pending
//! fires, fans each one out through its job's preprocessing hook (when
//! configured), publishes the resulting work items to the broker and
//! advances the binding's pending fire. Exactly one instance runs at a
//! time, enforced by the store's advisory lease.

pub mod config;
pub mod error;
pub mod scheduler;

pub use config::SchedulerConfig;
pub use error::SchedulerError;
pub use scheduler::{PassStats, Scheduler};
