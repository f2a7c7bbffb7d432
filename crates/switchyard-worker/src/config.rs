//! Worker configuration.

use serde::{Deserialize, Serialize};

/// What happens to a delivery whose handler fails.
///
/// An explicit, named choice rather than an accident of control flow: a
/// crashing handler must never wedge the queue.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum AckPolicy {
    /// Acknowledge regardless of the handler outcome. A handler failure
    /// is terminal for that delivery; only a worker-process crash causes
    /// broker redelivery.
    AckAlways,

    /// Negatively acknowledge on handler failure: the broker redelivers
    /// until `max_attempts` is exhausted, then dead-letters the message.
    NackRequeue {
        #[serde(default = "default_max_attempts")]
        max_attempts: u32,
    },
}

fn default_max_attempts() -> u32 {
    switchyard_broker::DEFAULT_MAX_ATTEMPTS
}

impl Default for AckPolicy {
    fn default() -> Self {
        AckPolicy::AckAlways
    }
}

/// Worker loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Acknowledgment policy for failed handlers.
    #[serde(default)]
    pub ack_policy: AckPolicy,

    /// Sleep between polls when the queue is empty, in milliseconds.
    #[serde(default = "default_idle_wait")]
    pub idle_wait_ms: u64,
}

fn default_idle_wait() -> u64 {
    500
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            ack_policy: AckPolicy::default(),
            idle_wait_ms: default_idle_wait(),
        }
    }
}
