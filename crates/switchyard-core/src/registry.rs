//! Handler and hook registry.
//!
//! An explicit, constructed object: the binary registers its statically
//! linked plugins once at startup, then hands the registry to the
//! scheduler and worker behind an `Arc`. It is never mutated afterwards,
//! so lookups need no locking.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::collab::{Inventory, RunHistory};
use crate::error::{HandlerError, HookError};
use crate::model::{ArgMap, WorkItem};

/// A command handler executed by workers.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Execute the command with the merged arguments.
    async fn run(&self, args: &ArgMap) -> Result<(), HandlerError>;
}

/// Per-command, once-per-worker-process initializer.
///
/// Invoked a single time at worker startup; the returned map is cached and
/// merged into every message for that command (cached keys win on
/// collision).
#[async_trait]
pub trait StartupHook: Send + Sync {
    async fn load(&self) -> Result<ArgMap, HookError>;
}

/// A preprocessing (fan-out) hook: expands one schedule firing into zero
/// or more concrete work items.
#[async_trait]
pub trait PreprocessHook: Send + Sync {
    async fn expand(&self, ctx: &HookContext, args: &ArgMap) -> Result<Vec<WorkItem>, HookError>;
}

/// Collaborator handles passed to preprocessing hooks.
#[derive(Clone, Default)]
pub struct HookContext {
    pub inventory: Option<Arc<dyn Inventory>>,
    pub run_history: Option<Arc<dyn RunHistory>>,
}

impl HookContext {
    /// Inventory handle, or a hook error naming what is missing.
    pub fn inventory(&self) -> Result<&Arc<dyn Inventory>, HookError> {
        self.inventory
            .as_ref()
            .ok_or_else(|| HookError::Collaborator("no inventory configured".into()))
    }

    /// Run-history handle, or a hook error naming what is missing.
    pub fn run_history(&self) -> Result<&Arc<dyn RunHistory>, HookError> {
        self.run_history
            .as_ref()
            .ok_or_else(|| HookError::Collaborator("no run history configured".into()))
    }
}

/// Registry of command handlers, startup hooks and preprocessing hooks.
#[derive(Default)]
pub struct Registry {
    handlers: HashMap<String, Arc<dyn Handler>>,
    startup_hooks: HashMap<String, Arc<dyn StartupHook>>,
    pre_hooks: HashMap<String, Arc<dyn PreprocessHook>>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a command handler. Replaces any previous registration for
    /// the same command.
    pub fn register_handler(&mut self, command: impl Into<String>, handler: Arc<dyn Handler>) {
        self.handlers.insert(command.into(), handler);
    }

    /// Register a startup hook for a command.
    pub fn register_startup_hook(&mut self, command: impl Into<String>, hook: Arc<dyn StartupHook>) {
        self.startup_hooks.insert(command.into(), hook);
    }

    /// Register a preprocessing hook under its own name.
    pub fn register_pre_hook(&mut self, name: impl Into<String>, hook: Arc<dyn PreprocessHook>) {
        self.pre_hooks.insert(name.into(), hook);
    }

    /// Look up a command handler.
    pub fn resolve(&self, command: &str) -> Option<&Arc<dyn Handler>> {
        self.handlers.get(command)
    }

    /// Look up a startup hook for a command.
    pub fn startup_hook(&self, command: &str) -> Option<&Arc<dyn StartupHook>> {
        self.startup_hooks.get(command)
    }

    /// Look up a preprocessing hook by name.
    pub fn pre_hook(&self, name: &str) -> Option<&Arc<dyn PreprocessHook>> {
        self.pre_hooks.get(name)
    }

    /// All registered command names, for the worker's startup pass.
    pub fn commands(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handlers are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopHandler;

    #[async_trait]
    impl Handler for NoopHandler {
        async fn run(&self, _args: &ArgMap) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    struct FixedStartup;

    #[async_trait]
    impl StartupHook for FixedStartup {
        async fn load(&self) -> Result<ArgMap, HookError> {
            let mut m = ArgMap::new();
            m.insert("backup_dir".into(), serde_json::json!("/data"));
            Ok(m)
        }
    }

    #[test]
    fn resolve_registered_and_unknown() {
        let mut reg = Registry::new();
        reg.register_handler("backup", Arc::new(NoopHandler));

        assert!(reg.resolve("backup").is_some());
        assert!(reg.resolve("render").is_none());
        assert_eq!(reg.len(), 1);
    }

    #[tokio::test]
    async fn startup_hook_is_separate_from_handlers() {
        let mut reg = Registry::new();
        reg.register_handler("backup", Arc::new(NoopHandler));
        reg.register_startup_hook("backup", Arc::new(FixedStartup));

        let cfg = reg.startup_hook("backup").unwrap().load().await.unwrap();
        assert_eq!(cfg["backup_dir"], "/data");
        assert!(reg.startup_hook("render").is_none());
    }

    #[test]
    fn commands_enumerates_handlers() {
        let mut reg = Registry::new();
        reg.register_handler("backup", Arc::new(NoopHandler));
        reg.register_handler("render", Arc::new(NoopHandler));

        let mut cmds: Vec<_> = reg.commands().collect();
        cmds.sort();
        assert_eq!(cmds, vec!["backup", "render"]);
    }

    #[test]
    fn hook_context_reports_missing_collaborators() {
        let ctx = HookContext::default();
        assert!(ctx.inventory().is_err());
        assert!(ctx.run_history().is_err());
    }
}
