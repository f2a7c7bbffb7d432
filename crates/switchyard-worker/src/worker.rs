//! The worker loop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use switchyard_broker::{Broker, Delivery};
use switchyard_core::{ArgMap, Registry, TransportError};

use crate::config::{AckPolicy, WorkerConfig};

/// Merge cached per-command startup configuration into the message
/// arguments. Cached keys overwrite same-named message keys: static
/// per-command configuration wins on collision. (Documented behavior of
/// the dispatch protocol; deliberately not inverted.)
pub fn merge_args(message: &ArgMap, cached: &ArgMap) -> ArgMap {
    let mut merged = message.clone();
    for (key, value) in cached {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// A single worker: one in-flight delivery, one handler call at a time.
pub struct Worker {
    broker: Arc<dyn Broker>,
    registry: Arc<Registry>,
    config: WorkerConfig,
    /// Startup-hook output cached per command, populated once at startup.
    startup_config: HashMap<String, ArgMap>,
    processed: AtomicU64,
    failed: AtomicU64,
}

impl Worker {
    /// Create a worker, running every registered startup hook once.
    ///
    /// A failing startup hook is logged and leaves its command without
    /// cached configuration; the worker still starts.
    pub async fn start(
        broker: Arc<dyn Broker>,
        registry: Arc<Registry>,
        config: WorkerConfig,
    ) -> Self {
        let mut startup_config = HashMap::new();
        for command in registry.commands() {
            let Some(hook) = registry.startup_hook(command) else {
                continue;
            };
            match hook.load().await {
                Ok(map) => {
                    debug!(command, keys = map.len(), "startup configuration cached");
                    startup_config.insert(command.to_string(), map);
                }
                Err(e) => {
                    warn!(command, "startup hook failed, continuing without cached config: {e}");
                }
            }
        }

        info!(
            commands = registry.len(),
            cached = startup_config.len(),
            "worker started"
        );
        Self {
            broker,
            registry,
            config,
            startup_config,
            processed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Deliveries processed (handler invoked or message discarded).
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::SeqCst)
    }

    /// Handler invocations that failed.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::SeqCst)
    }

    /// Receive and process at most one delivery. Returns whether a
    /// message was available.
    pub async fn run_once(&self) -> Result<bool, TransportError> {
        let Some(delivery) = self.broker.receive().await? else {
            return Ok(false);
        };
        self.process(delivery).await?;
        Ok(true)
    }

    /// The consume loop: one delivery at a time until `shutdown` flips to
    /// `true`, sleeping briefly while the queue is empty.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), TransportError> {
        let idle = Duration::from_millis(self.config.idle_wait_ms);
        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    // A dropped sender counts as shutdown.
                    if changed.is_err() || *shutdown.borrow() {
                        info!(processed = self.processed(), "worker shutting down");
                        return Ok(());
                    }
                }
                handled = self.run_once() => {
                    if !handled? {
                        tokio::time::sleep(idle).await;
                    }
                }
            }
        }
    }

    async fn process(&self, delivery: Delivery) -> Result<(), TransportError> {
        self.processed.fetch_add(1, Ordering::SeqCst);

        // A malformed message can never succeed; drop it rather than
        // letting the broker redeliver it forever.
        let item = match delivery.work_item() {
            Ok(item) => item,
            Err(e) => {
                error!(id = delivery.id, "discarding undecodable message: {e}");
                return self.broker.ack(&delivery).await;
            }
        };

        let args = match self.startup_config.get(&item.cmd) {
            Some(cached) => merge_args(&item.args, cached),
            None => item.args.clone(),
        };

        let Some(handler) = self.registry.resolve(&item.cmd) else {
            error!(cmd = %item.cmd, "no handler registered, discarding message");
            return self.broker.ack(&delivery).await;
        };

        debug!(cmd = %item.cmd, id = delivery.id, attempt = delivery.attempts, "dispatching");
        match handler.run(&args).await {
            Ok(()) => {
                debug!(cmd = %item.cmd, id = delivery.id, "handler completed");
                self.broker.ack(&delivery).await
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::SeqCst);
                error!(cmd = %item.cmd, id = delivery.id, "handler failed: {e}");
                match self.config.ack_policy {
                    AckPolicy::AckAlways => self.broker.ack(&delivery).await,
                    AckPolicy::NackRequeue { .. } => self.broker.nack(&delivery).await,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicU32;
    use switchyard_broker::MemoryBroker;
    use switchyard_core::{Handler, HandlerError, HookError, StartupHook, WorkItem};

    #[derive(Default)]
    struct RecordingHandler {
        calls: AtomicU32,
        last_args: std::sync::Mutex<Option<ArgMap>>,
        fail: bool,
    }

    impl RecordingHandler {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl Handler for RecordingHandler {
        async fn run(&self, args: &ArgMap) -> Result<(), HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_args.lock().unwrap() = Some(args.clone());
            if self.fail {
                Err(HandlerError::Failed("ssh timeout".into()))
            } else {
                Ok(())
            }
        }
    }

    struct CountingStartup {
        loads: Arc<AtomicU32>,
    }

    #[async_trait]
    impl StartupHook for CountingStartup {
        async fn load(&self) -> Result<ArgMap, HookError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            let mut m = ArgMap::new();
            m.insert("backup_dir".into(), json!("/data"));
            Ok(m)
        }
    }

    struct FailingStartup;

    #[async_trait]
    impl StartupHook for FailingStartup {
        async fn load(&self) -> Result<ArgMap, HookError> {
            Err(HookError::Failed {
                name: "creds".into(),
                reason: "vault unreachable".into(),
            })
        }
    }

    fn args(pairs: &[(&str, serde_json::Value)]) -> ArgMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn static_config_wins_on_collision() {
        let message = args(&[("name", json!("sw1")), ("backup_dir", json!("/tmp"))]);
        let cached = args(&[("backup_dir", json!("/data"))]);

        let merged = merge_args(&message, &cached);
        assert_eq!(merged["name"], "sw1");
        assert_eq!(merged["backup_dir"], "/data");
    }

    #[tokio::test]
    async fn startup_hooks_run_once_and_failures_are_tolerated() {
        let loads = Arc::new(AtomicU32::new(0));
        let mut registry = Registry::new();
        registry.register_handler("backup", Arc::new(RecordingHandler::default()));
        registry.register_handler("render", Arc::new(RecordingHandler::default()));
        registry.register_startup_hook("backup", Arc::new(CountingStartup { loads: loads.clone() }));
        registry.register_startup_hook("render", Arc::new(FailingStartup));

        let worker = Worker::start(
            Arc::new(MemoryBroker::new()),
            Arc::new(registry),
            WorkerConfig::default(),
        )
        .await;

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(worker.startup_config.contains_key("backup"));
        assert!(!worker.startup_config.contains_key("render"));
    }

    #[tokio::test]
    async fn merged_args_reach_the_handler() {
        let broker = Arc::new(MemoryBroker::new());
        let handler = Arc::new(RecordingHandler::default());
        let mut registry = Registry::new();
        registry.register_handler("backup", handler.clone());
        registry.register_startup_hook(
            "backup",
            Arc::new(CountingStartup {
                loads: Arc::new(AtomicU32::new(0)),
            }),
        );

        broker
            .publish(&WorkItem::new(
                "backup",
                args(&[("name", json!("sw1")), ("backup_dir", json!("/tmp"))]),
            ))
            .await
            .unwrap();

        let worker = Worker::start(broker.clone(), Arc::new(registry), WorkerConfig::default()).await;
        assert!(worker.run_once().await.unwrap());

        let got = handler.last_args.lock().unwrap().clone().unwrap();
        assert_eq!(got["name"], "sw1");
        assert_eq!(got["backup_dir"], "/data");
        assert!(broker.receive().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unregistered_command_is_acked_without_invocation() {
        let broker = Arc::new(MemoryBroker::new());
        let handler = Arc::new(RecordingHandler::default());
        let mut registry = Registry::new();
        registry.register_handler("backup", handler.clone());

        broker
            .publish(&WorkItem::new("unknown", ArgMap::new()))
            .await
            .unwrap();

        let worker = Worker::start(broker.clone(), Arc::new(registry), WorkerConfig::default()).await;
        assert!(worker.run_once().await.unwrap());

        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
        // Acked: gone from the queue.
        assert!(broker.receive().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dropped_shutdown_sender_stops_the_loop() {
        let worker = Worker::start(
            Arc::new(MemoryBroker::new()),
            Arc::new(Registry::new()),
            WorkerConfig::default(),
        )
        .await;

        let (tx, rx) = watch::channel(false);
        drop(tx);
        tokio::time::timeout(Duration::from_secs(1), worker.run(rx))
            .await
            .expect("loop did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn malformed_message_is_discarded() {
        let broker = Arc::new(MemoryBroker::new());
        broker.publish_raw(b"not json".to_vec()).await;

        let worker = Worker::start(
            broker.clone(),
            Arc::new(Registry::new()),
            WorkerConfig::default(),
        )
        .await;
        assert!(worker.run_once().await.unwrap());
        assert!(broker.receive().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failing_handler_is_acked_under_ack_always() {
        let broker = Arc::new(MemoryBroker::new());
        let handler = Arc::new(RecordingHandler::failing());
        let mut registry = Registry::new();
        registry.register_handler("backup", handler.clone());

        broker
            .publish(&WorkItem::new("backup", ArgMap::new()))
            .await
            .unwrap();

        let worker = Worker::start(broker.clone(), Arc::new(registry), WorkerConfig::default()).await;
        assert!(worker.run_once().await.unwrap());

        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(worker.failed(), 1);
        // Not redelivered.
        assert!(broker.receive().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failing_handler_is_redelivered_under_nack_requeue() {
        let broker = Arc::new(MemoryBroker::with_max_attempts(2));
        let handler = Arc::new(RecordingHandler::failing());
        let mut registry = Registry::new();
        registry.register_handler("backup", handler.clone());

        broker
            .publish(&WorkItem::new("backup", ArgMap::new()))
            .await
            .unwrap();

        let config = WorkerConfig {
            ack_policy: AckPolicy::NackRequeue { max_attempts: 2 },
            ..WorkerConfig::default()
        };
        let worker = Worker::start(broker.clone(), Arc::new(registry), config).await;

        assert!(worker.run_once().await.unwrap());
        assert!(worker.run_once().await.unwrap());
        assert!(!worker.run_once().await.unwrap());

        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
        assert_eq!(broker.dead_letters().await.len(), 1);
    }
}
