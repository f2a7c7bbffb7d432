//! Switchyard - cron-driven job dispatch for network automation.
//!
//! Main entry point for the switchyard CLI, scheduler and worker.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use switchyard_broker::{Broker, SqliteBroker};
use switchyard_scheduler::Scheduler;
use switchyard_store::{parse_import_file, Store};
use switchyard_worker::{AckPolicy, Worker};

mod cli;
mod config;
mod plugins;
mod register;

use cli::{Cli, Commands, RegistryAction, SchedulerAction, WorkerAction};
use config::Config;

/// Initialize tracing: console always, plus a daily-rotated file when a
/// log directory is configured.
fn init_tracing(log_dir: Option<&Path>) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true).with_ansi(true));

    match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating log directory {}", dir.display()))?;
            let file_appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix("switchyard")
                .filename_suffix("log")
                .max_log_files(30)
                .build(dir)?;
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            // Keep the writer guard alive for the program duration.
            static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
                std::sync::OnceLock::new();
            let _ = GUARD.set(guard);

            registry
                .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
                .init();
        }
        None => registry.init(),
    }
    Ok(())
}

/// Flip a shutdown flag on Ctrl-C.
fn shutdown_channel() -> tokio::sync::watch::Receiver<bool> {
    let (tx, rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            let _ = tx.send(true);
        }
    });
    rx
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = config::load(&cli.config)?;

    // File logging only makes sense for the long-running daemon modes.
    let daemon_mode = matches!(
        &cli.command,
        Commands::Scheduler {
            action: SchedulerAction::Schedule { no_daemon: false },
        } | Commands::Worker {
            action: WorkerAction::Start,
        }
    );
    let log_dir = if daemon_mode {
        config.log.dir.as_deref()
    } else {
        None
    };
    init_tracing(log_dir)?;

    match cli.command {
        Commands::Registry { action } => handle_registry(action, &config).await,
        Commands::Scheduler { action } => handle_scheduler(action, &config).await,
        Commands::Worker { action } => handle_worker(action, &config).await,
    }
}

async fn open_store(config: &Config) -> anyhow::Result<Store> {
    Store::open(&config.store.path)
        .await
        .with_context(|| format!("opening store {}", config.store.path.display()))
}

async fn handle_registry(action: RegistryAction, config: &Config) -> anyhow::Result<()> {
    let store = open_store(config).await?;
    match action {
        RegistryAction::Import { file } => {
            let jobs = parse_import_file(&file)?;
            let count = jobs.len();
            store.replace_all_jobs(jobs).await?;
            println!("Imported {count} job(s) from {}", file.display());
            println!("Run 'switchyard scheduler init' to create their pending fires.");
        }
        RegistryAction::Deregister { job_id } => {
            store.deregister_job(&job_id).await?;
            println!("Deregistered job '{job_id}'");
        }
        RegistryAction::DeregisterAll => {
            store.deregister_all().await?;
            println!("Deregistered all jobs");
        }
    }
    Ok(())
}

async fn handle_scheduler(action: SchedulerAction, config: &Config) -> anyhow::Result<()> {
    let store = open_store(config).await?;
    match action {
        SchedulerAction::Init => {
            let count = store.init_pending_fires(chrono::Utc::now()).await?;
            println!("Created {count} pending fire(s)");
        }
        SchedulerAction::ShowJobs => {
            let jobs = store.list_jobs().await?;
            if jobs.is_empty() {
                println!("No jobs registered.");
                return Ok(());
            }
            println!("{:<24} {:<20} {:<14} DESCRIPTION", "ID", "COMMAND", "PRE-HOOK");
            for job in jobs {
                let pre_hook = job.pre_hook.as_deref().unwrap_or("-");
                println!(
                    "{:<24} {:<20} {:<14} {}",
                    job.id, job.command, pre_hook, job.description
                );
            }
        }
        SchedulerAction::ShowScheduledJobs { all } => {
            let fires = store.list_scheduled_fires(all).await?;
            if fires.is_empty() {
                println!("No scheduled jobs.");
                return Ok(());
            }
            println!("{:<10} {:<24} {:<20} {:<18} NEXT FIRE", "BINDING", "JOB", "COMMAND", "CRON");
            for fire in fires {
                let next = fire
                    .fire_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:<10} {:<24} {:<20} {:<18} {}",
                    fire.binding_id, fire.job_id, fire.command, fire.cron, next
                );
            }
        }
        SchedulerAction::RunNow { job_id } => {
            let sched = build_scheduler(store, config).await?;
            let published = sched.run_now(&job_id).await?;
            println!("Published {published} work item(s) for job '{job_id}'");
        }
        SchedulerAction::Schedule { no_daemon } => {
            let sched = build_scheduler(store, config).await?;
            info!(
                poll_interval_secs = config.scheduler.poll_interval_secs,
                one_shot = no_daemon,
                "scheduler starting"
            );
            sched.run(no_daemon, shutdown_channel()).await?;
        }
    }
    Ok(())
}

async fn build_scheduler(store: Store, config: &Config) -> anyhow::Result<Scheduler> {
    let broker = SqliteBroker::open(&config.broker.path, &config.broker.queue)
        .await
        .with_context(|| format!("opening queue {}", config.broker.path.display()))?;
    let registry = register::build_registry(config);
    let ctx = register::build_hook_context(config).await?;
    Ok(Scheduler::new(
        Arc::new(store),
        Arc::new(broker),
        Arc::new(registry),
        ctx,
        config.scheduler.clone(),
    ))
}

async fn handle_worker(action: WorkerAction, config: &Config) -> anyhow::Result<()> {
    match action {
        WorkerAction::Start => {
            let mut broker = SqliteBroker::open_consumer(&config.broker.path, &config.broker.queue)
                .await
                .with_context(|| format!("opening queue {}", config.broker.path.display()))?;
            if let AckPolicy::NackRequeue { max_attempts } = config.worker.ack_policy {
                broker = broker.with_max_attempts(max_attempts);
            }
            let broker: Arc<dyn Broker> = Arc::new(broker);

            let registry = Arc::new(register::build_registry(config));
            let worker = Worker::start(broker, registry, config.worker.clone()).await;
            worker.run(shutdown_channel()).await?;
        }
    }
    Ok(())
}
