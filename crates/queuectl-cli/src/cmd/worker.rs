//! `worker start` spawns the supervisor over N re-exec'd copies of this
//! binary; the hidden `worker run-one` is what those children execute.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::process::Command;

use queuectl_core::{supervisor, QueueError, ShutdownFlag, Worker, WorkerSettings};

use super::Ctx;

pub async fn start(ctx: &Ctx, count: usize, idle_timeout: Option<f64>) -> Result<i32> {
    if count == 0 {
        return Err(QueueError::InvalidSpec("--count must be at least 1".into()).into());
    }
    validate_idle_timeout(idle_timeout)?;

    // Fail early on a bad config or unwritable database instead of having
    // every child discover it independently.
    ctx.load_config()?;
    ctx.open_store().await?;

    let exe = std::env::current_exe().context("resolve current executable")?;
    let code = supervisor::run(count, |_slot| {
        let mut command = Command::new(&exe);
        command
            .arg("--db")
            .arg(&ctx.db)
            .arg("--config")
            .arg(&ctx.config_path)
            .arg("--logs-dir")
            .arg(&ctx.logs_dir)
            .arg("worker")
            .arg("run-one");
        if let Some(seconds) = idle_timeout {
            command.arg("--idle-timeout").arg(seconds.to_string());
        }
        command
    })
    .await?;
    Ok(code)
}

pub async fn run_one(ctx: &Ctx, idle_timeout: Option<f64>) -> Result<i32> {
    validate_idle_timeout(idle_timeout)?;

    let mut config = ctx.load_config()?;
    if let Some(seconds) = idle_timeout {
        config.idle_timeout = seconds;
    }

    let store = ctx.open_store().await?;
    let shutdown = ShutdownFlag::new();
    shutdown.install_signal_handlers().context("install signal handlers")?;

    let settings = WorkerSettings::from_config(&config, ctx.logs_dir.clone());
    let worker = Worker::new(Arc::new(store), settings, shutdown);
    worker.run().await?;
    Ok(0)
}

fn validate_idle_timeout(idle_timeout: Option<f64>) -> Result<()> {
    if let Some(seconds) = idle_timeout {
        if !(seconds.is_finite() && seconds > 0.0) {
            return Err(QueueError::InvalidSpec(format!(
                "--idle-timeout must be a positive number, got {seconds}"
            ))
            .into());
        }
    }
    Ok(())
}
