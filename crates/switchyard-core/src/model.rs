//! Model types and the work-item wire format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TransportError;

/// Argument map carried by jobs and work items. JSON object semantics,
/// insertion order preserved by `serde_json::Map`.
pub type ArgMap = serde_json::Map<String, serde_json::Value>;

/// A named, reusable unit of work.
///
/// Created wholesale by the administrative import; read-only to the
/// scheduler and workers afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDefinition {
    /// Unique job id. Assigned at import when the file does not provide one.
    pub id: String,
    /// Command name resolved against the handler registry.
    pub command: String,
    /// Human description.
    pub description: String,
    /// Optional preprocessing hook name (fan-out).
    pub pre_hook: Option<String>,
    /// Optional postprocessing hook name. Stored, unused at dispatch time.
    pub post_hook: Option<String>,
    /// Default arguments used when no preprocessing hook is configured.
    pub default_args: ArgMap,
}

impl JobDefinition {
    /// Create a job definition with a fresh id and empty arguments.
    pub fn new(command: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            command: command.into(),
            description: description.into(),
            pre_hook: None,
            post_hook: None,
            default_args: ArgMap::new(),
        }
    }

    /// Set the preprocessing hook name.
    pub fn with_pre_hook(mut self, name: impl Into<String>) -> Self {
        self.pre_hook = Some(name.into());
        self
    }

    /// Set the default arguments.
    pub fn with_default_args(mut self, args: ArgMap) -> Self {
        self.default_args = args;
        self
    }
}

/// A cron expression bound to one job definition. Many bindings may share
/// a job (independent cadences).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleBinding {
    /// Row id assigned by the store.
    pub id: i64,
    /// Owning job definition.
    pub job_id: String,
    /// Standard five-field cron expression.
    pub cron: String,
}

/// The single outstanding next-execution instant for one binding.
///
/// While the scheduler operates, each binding has exactly one pending
/// fire; it is replaced (old row deleted, new row inserted) on every fire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingFire {
    /// Row id assigned by the store.
    pub id: i64,
    /// Owning schedule binding.
    pub binding_id: i64,
    /// Next execution instant, strictly later than the instant used to
    /// compute it.
    pub fire_at: DateTime<Utc>,
}

/// A due pending fire joined with its binding and job definition, as
/// returned by the store's due-fire query.
#[derive(Debug, Clone)]
pub struct DueFire {
    pub fire: PendingFire,
    pub binding: ScheduleBinding,
    pub job: JobDefinition,
}

/// The ephemeral `{cmd, args}` message placed on the broker.
///
/// Exists only between producer and broker, and again between broker and a
/// worker; never addressable once published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Command name resolved against the handler registry by the worker.
    pub cmd: String,
    /// Per-message arguments.
    #[serde(default)]
    pub args: ArgMap,
}

impl WorkItem {
    /// Create a work item.
    pub fn new(cmd: impl Into<String>, args: ArgMap) -> Self {
        Self { cmd: cmd.into(), args }
    }

    /// The single default item for a job without a preprocessing hook:
    /// the job's command with its default arguments.
    pub fn from_job(job: &JobDefinition) -> Self {
        Self {
            cmd: job.command.clone(),
            args: job.default_args.clone(),
        }
    }

    /// Encode to the UTF-8 JSON wire format.
    pub fn to_bytes(&self) -> Result<Vec<u8>, TransportError> {
        serde_json::to_vec(self).map_err(|e| TransportError::Publish(e.to_string()))
    }

    /// Decode from the UTF-8 JSON wire format.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TransportError> {
        serde_json::from_slice(bytes).map_err(|e| TransportError::Consume(e.to_string()))
    }
}
