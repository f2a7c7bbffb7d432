//! # Switchyard Worker
//!
//! One worker process: consumes work items from the broker one at a time
//! (the broker's prefetch window of one is the only concurrency bound),
//! resolves each command in the handler registry, merges cached
//! per-command startup configuration into the message arguments and
//! invokes the handler. Acknowledgment follows the configured
//! [`AckPolicy`]. Scale throughput by running more worker processes.

pub mod config;
pub mod worker;

pub use config::{AckPolicy, WorkerConfig};
pub use worker::Worker;
