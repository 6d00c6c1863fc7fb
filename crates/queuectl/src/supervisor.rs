//! Spawns and babysits a pool of worker processes.
//!
//! The supervisor is deliberately small: start `count` children, forward
//! the first SIGINT/SIGTERM to each child exactly once, wait for them all,
//! and report an aggregate exit status. It never restarts a worker; a
//! dying worker is terminal for that slot.

use anyhow::Context;
use tokio::process::Command;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::error::QueueError;

/// Spawn `count` worker processes and wait for all of them.
///
/// `make_command` builds the command for each slot (typically a re-exec of
/// the current binary with a hidden single-worker subcommand).
///
/// Returns `0` when every child exited 0, otherwise `1`.
pub async fn run(
    count: usize,
    mut make_command: impl FnMut(usize) -> Command,
) -> Result<i32, QueueError> {
    let mut children = Vec::with_capacity(count);
    for slot in 0..count {
        let mut command = make_command(slot);
        let child = command
            .spawn()
            .with_context(|| format!("spawn worker process {slot}"))?;
        info!(slot, pid = child.id(), "worker process spawned");
        children.push(child);
    }

    let pids: Vec<u32> = children.iter().filter_map(|c| c.id()).collect();

    let mut waits = JoinSet::new();
    for (slot, mut child) in children.into_iter().enumerate() {
        waits.spawn(async move { (slot, child.wait().await) });
    }

    #[cfg(unix)]
    let (mut sigterm, mut sigint) = {
        use tokio::signal::unix::{signal, SignalKind};
        (
            signal(SignalKind::terminate()).context("install SIGTERM handler")?,
            signal(SignalKind::interrupt()).context("install SIGINT handler")?,
        )
    };

    let mut forwarded = false;
    let mut failures = 0usize;

    loop {
        tokio::select! {
            waited = waits.join_next() => match waited {
                Some(Ok((slot, Ok(status)))) => {
                    let code = status.code().unwrap_or(-1);
                    if status.success() {
                        info!(slot, "worker exited cleanly");
                    } else {
                        failures += 1;
                        error!(slot, code, "worker exited with failure");
                    }
                }
                Some(Ok((slot, Err(e)))) => {
                    failures += 1;
                    error!(slot, error = %e, "failed to wait for worker");
                }
                Some(Err(e)) => {
                    failures += 1;
                    error!(error = %e, "worker wait task panicked");
                }
                None => break,
            },
            _ = sigterm.recv(), if !forwarded => {
                forward_term(&pids);
                forwarded = true;
            }
            _ = sigint.recv(), if !forwarded => {
                forward_term(&pids);
                forwarded = true;
            }
        }
    }

    Ok(if failures == 0 { 0 } else { 1 })
}

/// Re-send the shutdown request to every child, once.
#[cfg(unix)]
fn forward_term(pids: &[u32]) {
    info!(workers = pids.len(), "forwarding SIGTERM to workers");
    for &pid in pids {
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut command = Command::new("sh");
        command.arg("-c").arg(script);
        command
    }

    #[tokio::test]
    async fn all_children_clean_exits_zero() {
        let code = run(3, |_| sh("exit 0")).await.unwrap();
        assert_eq!(code, 0);
    }

    #[tokio::test]
    async fn one_failing_child_makes_aggregate_nonzero() {
        let code = run(2, |slot| if slot == 0 { sh("exit 0") } else { sh("exit 3") })
            .await
            .unwrap();
        assert_eq!(code, 1);
    }

    #[tokio::test]
    async fn zero_children_is_a_clean_noop() {
        let code = run(0, |_| sh("exit 0")).await.unwrap();
        assert_eq!(code, 0);
    }
}
