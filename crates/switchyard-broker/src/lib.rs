//! # Switchyard Broker
//!
//! The durable transport between the scheduler (producer) and workers
//! (consumers): one named queue of persistent `{cmd, args}` messages with
//! explicit acknowledgment and a one-message prefetch window per consumer.
//!
//! Two implementations of the [`Broker`] trait:
//!
//! - [`SqliteBroker`]: messages in a SQLite file shared by all processes;
//!   survives process and broker restart, redelivers messages a crashed
//!   consumer never acknowledged (at-least-once).
//! - [`MemoryBroker`]: in-process, for tests.

pub mod broker;
pub mod memory;
pub mod sqlite;

pub use broker::{Broker, Delivery, DEFAULT_MAX_ATTEMPTS};
pub use memory::MemoryBroker;
pub use sqlite::SqliteBroker;
