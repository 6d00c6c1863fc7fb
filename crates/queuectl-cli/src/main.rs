//! `queuectl`: command-line control surface for the job queue.
//!
//! Thin wrapper over the repository: every subcommand opens the store,
//! performs one operation, prints a result, and exits with a meaningful
//! code (0 ok, 2 invalid input, 3 duplicate id, 4 not dead, 5 not found,
//! 1 anything else).

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use queuectl_core::QueueError;

mod cmd;

use cmd::Ctx;

#[derive(Parser)]
#[command(name = "queuectl", version, about = "Durable single-node background job queue")]
struct Cli {
    /// Path of the queue database file
    #[arg(long, global = true, default_value = "queue.db")]
    db: PathBuf,

    /// Path of the queue config file
    #[arg(long, global = true, default_value = "queue_config.json")]
    config: PathBuf,

    /// Directory holding per-job log files
    #[arg(long, global = true, default_value = "logs")]
    logs_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Add a job from a JSON spec, e.g. '{"id":"a","command":"echo ok"}'
    Enqueue {
        /// Job spec: required "id" and "command"; optional "max_retries",
        /// "base_backoff", "priority", "timeout_seconds", "run_at"
        json: String,
    },
    /// Manage worker processes
    Worker {
        #[command(subcommand)]
        command: WorkerCommand,
    },
    /// Show per-state job counts
    Status,
    /// List jobs, oldest first
    List {
        /// Restrict to one state (pending|processing|completed|dead, or "all")
        #[arg(long)]
        state: Option<String>,
    },
    /// Inspect and revive dead-lettered jobs
    Dlq {
        #[command(subcommand)]
        command: DlqCommand,
    },
    /// Show the tail of a job's log file
    Logs {
        id: String,
        /// Number of trailing lines to print
        #[arg(long, default_value_t = 20)]
        tail: usize,
    },
    /// Show aggregate queue metrics
    Metrics,
    /// Read or update the queue config file
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Return jobs stuck in processing (e.g. after a killed worker) to pending
    Reap {
        /// Only touch jobs processing for longer than this many seconds
        #[arg(long, default_value_t = 300.0)]
        stale_after: f64,
    },
    /// Back up queue state into backup_<timestamp>/, then wipe and reinitialize
    Reset {
        /// Skip the interactive confirmation
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum WorkerCommand {
    /// Spawn a pool of worker processes and wait for them
    Start {
        /// Number of worker processes
        #[arg(long, default_value_t = 1)]
        count: usize,
        /// Seconds without work before a worker exits (default from config)
        #[arg(long)]
        idle_timeout: Option<f64>,
    },
    /// Run a single worker loop in this process (spawned by `worker start`)
    #[command(hide = true)]
    RunOne {
        #[arg(long)]
        idle_timeout: Option<f64>,
    },
}

#[derive(Subcommand)]
enum DlqCommand {
    /// List dead jobs
    List,
    /// Move a dead job back to pending with a clean slate
    Retry { id: String },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print the effective configuration
    Get,
    /// Update one key in the config file
    Set { key: String, value: String },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            exit_code_for(&err)
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let ctx = Ctx {
        db: cli.db,
        config_path: cli.config,
        logs_dir: cli.logs_dir,
    };

    match cli.command {
        Command::Enqueue { json } => cmd::enqueue::run(&ctx, &json).await?,
        Command::Worker { command } => {
            return match command {
                WorkerCommand::Start { count, idle_timeout } => {
                    cmd::worker::start(&ctx, count, idle_timeout).await
                }
                WorkerCommand::RunOne { idle_timeout } => {
                    cmd::worker::run_one(&ctx, idle_timeout).await
                }
            };
        }
        Command::Status => cmd::status::run(&ctx).await?,
        Command::List { state } => cmd::list::run(&ctx, state.as_deref()).await?,
        Command::Dlq { command } => match command {
            DlqCommand::List => cmd::dlq::list(&ctx).await?,
            DlqCommand::Retry { id } => cmd::dlq::retry(&ctx, &id).await?,
        },
        Command::Logs { id, tail } => cmd::logs::run(&ctx, &id, tail).await?,
        Command::Metrics => cmd::metrics::run(&ctx).await?,
        Command::Config { command } => match command {
            ConfigCommand::Get => cmd::config::get(&ctx)?,
            ConfigCommand::Set { key, value } => cmd::config::set(&ctx, &key, &value)?,
        },
        Command::Reap { stale_after } => cmd::reap::run(&ctx, stale_after).await?,
        Command::Reset { yes } => cmd::reset::run(&ctx, yes).await?,
    }
    Ok(0)
}

/// Map engine errors onto the documented exit codes.
fn exit_code_for(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<QueueError>() {
        Some(QueueError::InvalidSpec(_)) => 2,
        Some(QueueError::DuplicateId(_)) => 3,
        Some(QueueError::NotDead { .. }) => 4,
        Some(QueueError::NotFound(_)) => 5,
        _ => 1,
    }
}
