//! Error taxonomy shared across the dispatcher.

use thiserror::Error;

/// Configuration errors: malformed cron expressions, unparsable import or
/// process configuration files. Fatal to the operation that triggered them.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A cron expression that does not evaluate.
    #[error("invalid cron expression '{expr}': {reason}")]
    InvalidCron { expr: String, reason: String },

    /// Import or process configuration file could not be read.
    #[error("cannot read {path}: {reason}")]
    Io { path: String, reason: String },

    /// Import or process configuration file could not be parsed.
    #[error("cannot parse {path}: {reason}")]
    Parse { path: String, reason: String },

    /// Semantically invalid configuration.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Persistent store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Cannot open or talk to the database.
    #[error("store connection error: {0}")]
    Connection(String),

    /// A query or statement failed.
    #[error("store query error: {0}")]
    Query(String),

    /// A referenced row does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The scheduler lease is held by another instance.
    #[error("scheduler lease held by '{holder}' until {expires_at}")]
    LeaseHeld { holder: String, expires_at: String },
}

/// Broker transport errors. Connection/declare failures are fatal at
/// process startup for both the scheduler and the workers.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Cannot connect to the broker or declare the queue.
    #[error("broker connection error: {0}")]
    Connect(String),

    /// A publish failed.
    #[error("publish error: {0}")]
    Publish(String),

    /// A receive/ack/nack failed.
    #[error("consume error: {0}")]
    Consume(String),

    /// A consumer asked for a second delivery while one is unacknowledged.
    #[error("prefetch window exceeded: a delivery is still unacknowledged")]
    PrefetchExceeded,
}

/// Preprocessing or startup hook failures.
#[derive(Debug, Error)]
pub enum HookError {
    /// The job names a hook that is not registered.
    #[error("hook '{0}' is not registered")]
    NotFound(String),

    /// The hook itself raised.
    #[error("hook '{name}' failed: {reason}")]
    Failed { name: String, reason: String },

    /// A collaborator (inventory, run history) the hook depends on failed.
    #[error("collaborator error: {0}")]
    Collaborator(String),
}

/// A dispatched handler failed. Terminal for that delivery under the
/// default acknowledgment policy; visibility is limited to logs and
/// whatever the handler wrote to the run-history store before failing.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Handler execution failed.
    #[error("handler failed: {0}")]
    Failed(String),

    /// The handler was invoked with unusable arguments.
    #[error("bad arguments: {0}")]
    BadArgs(String),
}
