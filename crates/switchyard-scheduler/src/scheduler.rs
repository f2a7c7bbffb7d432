//! The scheduler loop.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use switchyard_broker::Broker;
use switchyard_core::{cron, DueFire, HookContext, HookError, JobDefinition, Registry, WorkItem};
use switchyard_store::Store;

use crate::config::SchedulerConfig;
use crate::error::SchedulerError;

/// Outcome of one scheduling pass.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct PassStats {
    /// Due fires processed to completion (published and advanced).
    pub fired: usize,
    /// Work items published.
    pub published: usize,
    /// Due fires skipped on a store or publish error, left due for the
    /// next poll.
    pub skipped: usize,
}

/// The polling scheduler.
///
/// Fires due pending fires: each is expanded through its job's
/// preprocessing hook (or to the single default `{command, default_args}`
/// item), every resulting work item is published, and only then is the
/// binding's pending fire advanced. A crash between publish and advance
/// therefore duplicates a firing rather than losing it.
pub struct Scheduler {
    store: Arc<Store>,
    broker: Arc<dyn Broker>,
    registry: Arc<Registry>,
    ctx: HookContext,
    config: SchedulerConfig,
    /// Lease holder identity for this process.
    holder: String,
}

impl Scheduler {
    pub fn new(
        store: Arc<Store>,
        broker: Arc<dyn Broker>,
        registry: Arc<Registry>,
        ctx: HookContext,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            broker,
            registry,
            ctx,
            config,
            holder: format!("scheduler-{}", Uuid::new_v4()),
        }
    }

    /// Create one pending fire per schedule binding, computed from "now".
    ///
    /// Assumes jobs and bindings were already imported; does not touch
    /// them. Run once after an import; it is not idempotent.
    pub async fn init(&self) -> Result<usize, SchedulerError> {
        Ok(self.store.init_pending_fires(Utc::now()).await?)
    }

    /// Expand a job into its concrete work items: through the job's
    /// preprocessing hook when configured, otherwise the single default
    /// item.
    async fn expand(&self, job: &JobDefinition) -> Result<Vec<WorkItem>, HookError> {
        match &job.pre_hook {
            Some(name) => {
                let hook = self
                    .registry
                    .pre_hook(name)
                    .ok_or_else(|| HookError::NotFound(name.clone()))?;
                let items = hook.expand(&self.ctx, &job.default_args).await?;
                debug!(job_id = %job.id, hook = %name, items = items.len(), "fan-out");
                Ok(items)
            }
            None => Ok(vec![WorkItem::from_job(job)]),
        }
    }

    /// One full pass over all currently-due fires.
    ///
    /// Per-fire store and publish errors are logged and the fire is left
    /// due for the next poll. A raising preprocessing hook propagates and
    /// ends the pass; the supervisor is expected to restart the process.
    pub async fn pass(&self, now: DateTime<Utc>) -> Result<PassStats, SchedulerError> {
        let due = self.store.due_fires(now).await?;
        let mut stats = PassStats::default();

        for fire in due {
            match self.fire_one(&fire, now).await {
                Ok(published) => {
                    stats.fired += 1;
                    stats.published += published;
                }
                Err(SchedulerError::Hook(e)) => return Err(e.into()),
                Err(e) => {
                    warn!(job_id = %fire.job.id, binding_id = fire.binding.id,
                          "fire skipped, will retry next poll: {e}");
                    stats.skipped += 1;
                }
            }
        }

        if stats.fired > 0 || stats.skipped > 0 {
            info!(fired = stats.fired, published = stats.published,
                  skipped = stats.skipped, "scheduling pass complete");
        }
        Ok(stats)
    }

    /// Publish one due fire's work items, then advance its pending fire.
    async fn fire_one(&self, due: &DueFire, now: DateTime<Utc>) -> Result<usize, SchedulerError> {
        let items = self.expand(&due.job).await?;
        for item in &items {
            self.broker.publish(item).await?;
        }

        // Next instant is computed from the pass reference, not from the
        // stored fire_at, so a long outage yields one catch-up firing
        // rather than a backlog.
        let next = cron::next_fire(&due.binding.cron, now)?;
        self.store
            .advance_fire(due.binding.id, due.fire.id, next)
            .await?;

        debug!(job_id = %due.job.id, binding_id = due.binding.id,
               items = items.len(), next = %next.to_rfc3339(), "fired");
        Ok(items.len())
    }

    /// Manual trigger: load one job by id, expand and publish. No pending
    /// fire bookkeeping; future scheduling is unaffected.
    pub async fn run_now(&self, job_id: &str) -> Result<usize, SchedulerError> {
        let job = self.store.get_job(job_id).await?;
        let items = self.expand(&job).await?;
        for item in &items {
            self.broker.publish(item).await?;
        }
        info!(job_id, items = items.len(), "manual trigger published");
        Ok(items.len())
    }

    /// The main loop.
    ///
    /// Acquires the advisory lease (refusing to start while another
    /// instance holds it), then polls on the fixed interval until
    /// `shutdown` flips to `true`. With `one_shot` set, runs a single
    /// pass over the currently-due fires and returns.
    pub async fn run(
        &self,
        one_shot: bool,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), SchedulerError> {
        let ttl = Duration::from_secs(self.config.lease_ttl_secs);
        self.store.acquire_lease(&self.holder, ttl, Utc::now()).await?;
        info!(holder = %self.holder, "scheduler lease acquired");

        let result = if one_shot {
            self.pass(Utc::now()).await.map(|_| ())
        } else {
            self.poll_loop(ttl, &mut shutdown).await
        };

        if let Err(e) = self.store.release_lease(&self.holder).await {
            warn!("failed to release scheduler lease: {e}");
        }
        info!(holder = %self.holder, "scheduler stopped");
        result
    }

    async fn poll_loop(
        &self,
        ttl: Duration,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), SchedulerError> {
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.poll_interval_secs));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.store.acquire_lease(&self.holder, ttl, Utc::now()).await?;
                    if let Err(e) = self.pass(Utc::now()).await {
                        // Hook failures end the loop; the supervisor restarts us.
                        error!("scheduling pass failed: {e}");
                        return Err(e);
                    }
                }
                changed = shutdown.changed() => {
                    // A dropped sender counts as shutdown.
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use switchyard_broker::MemoryBroker;
    use switchyard_core::{ArgMap, PreprocessHook};
    use switchyard_store::ImportedJob;

    struct PerDeviceFanOut(Vec<&'static str>);

    #[async_trait]
    impl PreprocessHook for PerDeviceFanOut {
        async fn expand(
            &self,
            _ctx: &HookContext,
            args: &ArgMap,
        ) -> Result<Vec<WorkItem>, HookError> {
            Ok(self
                .0
                .iter()
                .map(|device| {
                    let mut item_args = args.clone();
                    item_args.insert("device".into(), json!(device));
                    WorkItem::new("config-backup", item_args)
                })
                .collect())
        }
    }

    struct FailingHook;

    #[async_trait]
    impl PreprocessHook for FailingHook {
        async fn expand(
            &self,
            _ctx: &HookContext,
            _args: &ArgMap,
        ) -> Result<Vec<WorkItem>, HookError> {
            Err(HookError::Failed {
                name: "boom".into(),
                reason: "inventory unreachable".into(),
            })
        }
    }

    async fn store_with(jobs: Vec<ImportedJob>) -> Arc<Store> {
        let store = Store::in_memory().await.unwrap();
        store.replace_all_jobs(jobs).await.unwrap();
        Arc::new(store)
    }

    fn imported(id: &str, command: &str, pre_hook: Option<&str>, cron: &str) -> ImportedJob {
        let mut job = JobDefinition::new(command, format!("{command} job"));
        job.id = id.to_string();
        job.pre_hook = pre_hook.map(String::from);
        ImportedJob {
            job,
            schedules: vec![cron.to_string()],
        }
    }

    fn scheduler(
        store: Arc<Store>,
        broker: Arc<MemoryBroker>,
        registry: Registry,
    ) -> Scheduler {
        Scheduler::new(
            store,
            broker,
            Arc::new(registry),
            HookContext::default(),
            SchedulerConfig::default(),
        )
    }

    #[tokio::test]
    async fn pass_publishes_one_item_and_advances_fire() {
        let store = store_with(vec![imported("backup", "config-backup", None, "*/5 * * * *")])
            .await;
        let broker = Arc::new(MemoryBroker::new());
        let sched = scheduler(store.clone(), broker.clone(), Registry::new());

        let now = Utc::now();
        sched.init().await.unwrap();

        // Nothing due yet.
        let stats = sched.pass(now).await.unwrap();
        assert_eq!(stats, PassStats::default());
        assert_eq!(broker.depth().await.unwrap(), 0);

        // Jump to the fire instant.
        let fire_at = store.list_scheduled_fires(false).await.unwrap()[0]
            .fire_at
            .unwrap();
        assert!(fire_at > now);

        let stats = sched.pass(fire_at).await.unwrap();
        assert_eq!(stats.fired, 1);
        assert_eq!(stats.published, 1);
        assert_eq!(broker.depth().await.unwrap(), 1);

        let delivery = broker.receive().await.unwrap().unwrap();
        let item = delivery.work_item().unwrap();
        assert_eq!(item.cmd, "config-backup");
        assert!(item.args.is_empty());

        // Exactly one pending fire remains for the binding, strictly
        // later than the pass instant.
        let fires = store.list_scheduled_fires(false).await.unwrap();
        assert_eq!(fires.len(), 1);
        assert!(fires[0].fire_at.unwrap() > fire_at);
    }

    #[tokio::test]
    async fn pre_hook_fans_out_k_items_verbatim() {
        let store = store_with(vec![imported(
            "backup",
            "config-backup",
            Some("per-device"),
            "*/5 * * * *",
        )])
        .await;
        let broker = Arc::new(MemoryBroker::new());
        let mut registry = Registry::new();
        registry.register_pre_hook("per-device", Arc::new(PerDeviceFanOut(vec!["sw1", "sw2", "sw3"])));
        let sched = scheduler(store.clone(), broker.clone(), registry);

        sched.init().await.unwrap();
        let later = Utc::now() + chrono::Duration::minutes(6);
        let stats = sched.pass(later).await.unwrap();
        assert_eq!(stats.published, 3);

        for expected in ["sw1", "sw2", "sw3"] {
            let delivery = broker.receive().await.unwrap().unwrap();
            let item = delivery.work_item().unwrap();
            assert_eq!(item.cmd, "config-backup");
            assert_eq!(item.args["device"], expected);
            broker.ack(&delivery).await.unwrap();
        }
    }

    #[tokio::test]
    async fn raising_hook_ends_the_pass() {
        let store = store_with(vec![imported(
            "backup",
            "config-backup",
            Some("boom"),
            "*/5 * * * *",
        )])
        .await;
        let broker = Arc::new(MemoryBroker::new());
        let mut registry = Registry::new();
        registry.register_pre_hook("boom", Arc::new(FailingHook));
        let sched = scheduler(store.clone(), broker.clone(), registry);

        sched.init().await.unwrap();
        let later = Utc::now() + chrono::Duration::minutes(6);
        let err = sched.pass(later).await.unwrap_err();
        assert!(matches!(err, SchedulerError::Hook(HookError::Failed { .. })));

        // The fire was not advanced: it is still due next poll.
        assert_eq!(store.due_fires(later).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unregistered_hook_name_is_a_hook_error() {
        let store = store_with(vec![imported(
            "backup",
            "config-backup",
            Some("missing"),
            "*/5 * * * *",
        )])
        .await;
        let broker = Arc::new(MemoryBroker::new());
        let sched = scheduler(store, broker, Registry::new());

        sched.init().await.unwrap();
        let later = Utc::now() + chrono::Duration::minutes(6);
        let err = sched.pass(later).await.unwrap_err();
        assert!(matches!(err, SchedulerError::Hook(HookError::NotFound(_))));
    }

    #[tokio::test]
    async fn run_now_bypasses_pending_fires() {
        let store = store_with(vec![imported("backup", "config-backup", None, "*/5 * * * *")])
            .await;
        let broker = Arc::new(MemoryBroker::new());
        let sched = scheduler(store.clone(), broker.clone(), Registry::new());
        sched.init().await.unwrap();

        let before = store.list_scheduled_fires(false).await.unwrap();
        let published = sched.run_now("backup").await.unwrap();
        assert_eq!(published, 1);
        assert_eq!(broker.depth().await.unwrap(), 1);

        // Pending fires untouched.
        let after = store.list_scheduled_fires(false).await.unwrap();
        assert_eq!(before[0].fire_at, after[0].fire_at);

        assert!(matches!(
            sched.run_now("missing").await,
            Err(SchedulerError::Store(_))
        ));
    }

    #[tokio::test]
    async fn dropped_shutdown_sender_stops_the_loop() {
        let store = store_with(vec![]).await;
        let sched = scheduler(store, Arc::new(MemoryBroker::new()), Registry::new());

        let (tx, rx) = watch::channel(false);
        drop(tx);
        tokio::time::timeout(Duration::from_secs(2), sched.run(false, rx))
            .await
            .expect("loop did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn second_scheduler_instance_is_refused() {
        let store = store_with(vec![]).await;
        let broker = Arc::new(MemoryBroker::new());
        let first = scheduler(store.clone(), broker.clone(), Registry::new());
        let second = scheduler(store.clone(), broker.clone(), Registry::new());

        let (_tx, rx) = watch::channel(false);
        first.run(true, rx.clone()).await.unwrap();

        // One-shot releases the lease on exit, so the second may run.
        second.run(true, rx.clone()).await.unwrap();

        // But a held lease excludes others.
        let ttl = Duration::from_secs(60);
        store.acquire_lease("other", ttl, Utc::now()).await.unwrap();
        let err = first.run(true, rx).await.unwrap_err();
        assert!(matches!(err, SchedulerError::Store(_)));
    }
}
