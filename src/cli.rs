//! CLI definitions for Switchyard.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Switchyard CLI.
#[derive(Parser)]
#[command(name = "switchyard")]
#[command(about = "Cron-driven job dispatch for network automation")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config/default.toml", global = true)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Job registry administration
    Registry {
        #[command(subcommand)]
        action: RegistryAction,
    },

    /// Scheduler operations
    Scheduler {
        #[command(subcommand)]
        action: SchedulerAction,
    },

    /// Worker operations
    Worker {
        #[command(subcommand)]
        action: WorkerAction,
    },
}

#[derive(Subcommand)]
pub(crate) enum RegistryAction {
    /// Replace all jobs, bindings and pending fires from an import file
    Import {
        /// Declarative TOML job file
        file: PathBuf,
    },

    /// Remove one job with its bindings and pending fires
    Deregister {
        /// Job id
        job_id: String,
    },

    /// Remove every job, binding and pending fire
    DeregisterAll,
}

#[derive(Subcommand)]
pub(crate) enum SchedulerAction {
    /// Create the initial pending fire for every schedule binding
    Init,

    /// List registered jobs
    ShowJobs,

    /// List schedule bindings and their pending fires
    ShowScheduledJobs {
        /// Include bindings without a pending fire
        #[arg(long)]
        all: bool,
    },

    /// Publish one job's work items immediately, without touching its schedule
    RunNow {
        /// Job id
        job_id: String,
    },

    /// Run the scheduling loop
    Schedule {
        /// Run a single pass over the currently-due fires and exit
        #[arg(long)]
        no_daemon: bool,
    },
}

#[derive(Subcommand)]
pub(crate) enum WorkerAction {
    /// Consume and execute work items until interrupted
    Start,
}
