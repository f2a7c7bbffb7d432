//! Scheduler configuration.

use serde::{Deserialize, Serialize};

/// Scheduler loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Fixed polling interval in seconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Advisory lease time-to-live in seconds. Renewed every poll; must
    /// comfortably exceed the poll interval.
    #[serde(default = "default_lease_ttl")]
    pub lease_ttl_secs: u64,
}

fn default_poll_interval() -> u64 {
    10
}

fn default_lease_ttl() -> u64 {
    60
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            lease_ttl_secs: default_lease_ttl(),
        }
    }
}
