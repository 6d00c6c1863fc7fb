//! The worker loop: claim, execute, finalize, repeat.
//!
//! One worker is one OS process. It polls the store for ready jobs,
//! executes at most one child process at a time, and feeds every outcome
//! back through `complete`/`fail`. Between claims it sleeps with jitter so
//! a pool of workers does not stampede the write lock in lockstep.
//!
//! Shutdown semantics: a signal during an execution lets the child finish
//! (its own timeout still applies), finalizes, and exits without claiming
//! again. A signal while idle or claiming exits immediately. A worker that
//! sees no work for `idle_timeout` exits 0 on its own.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::error::QueueError;
use crate::executor::{self, ExecOutcome};
use crate::job::{format_ts, Job, JobState};
use crate::shutdown::ShutdownFlag;
use crate::store::JobStore;

/// Consecutive non-transient store failures tolerated before the worker
/// gives up.
const MAX_CONSECUTIVE_STORE_ERRORS: u32 = 3;

/// Bounded retries for finalization so an outcome is not dropped on a
/// momentarily contended store.
const FINALIZE_ATTEMPTS: u32 = 5;

/// Tuning knobs for one worker process, frozen at start.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub poll_interval: Duration,
    pub idle_timeout: Duration,
    pub logs_dir: PathBuf,
}

impl WorkerSettings {
    /// Snapshot the relevant config values. Config changes take effect on
    /// the next worker launch, not mid-loop.
    pub fn from_config(config: &QueueConfig, logs_dir: PathBuf) -> Self {
        Self {
            poll_interval: Duration::from_secs_f64(config.poll_interval),
            idle_timeout: Duration::from_secs_f64(config.idle_timeout),
            logs_dir,
        }
    }
}

/// A single claim/execute/finalize loop over a shared [`JobStore`].
pub struct Worker {
    id: String,
    store: Arc<dyn JobStore>,
    settings: WorkerSettings,
    shutdown: ShutdownFlag,
}

impl Worker {
    pub fn new(store: Arc<dyn JobStore>, settings: WorkerSettings, shutdown: ShutdownFlag) -> Self {
        // PID for operator ergonomics, UUID suffix against PID reuse.
        let id = format!("{}-{}", std::process::id(), short_uuid());
        Self { id, store, settings, shutdown }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Run until shutdown, idle timeout, or a fatal store error.
    pub async fn run(&self) -> Result<(), QueueError> {
        info!(worker_id = %self.id, "worker started");
        let mut last_activity = Instant::now();
        let mut store_errors = 0u32;

        loop {
            if self.shutdown.is_set() {
                info!(worker_id = %self.id, "shutting down");
                break;
            }

            match self.store.claim_one(&self.id, Utc::now()).await {
                Ok(Some(job)) => {
                    store_errors = 0;
                    last_activity = Instant::now();
                    self.process(job).await?;
                }
                Ok(None) => {
                    store_errors = 0;
                    if last_activity.elapsed() >= self.settings.idle_timeout {
                        info!(worker_id = %self.id, "idle timeout reached, exiting");
                        break;
                    }
                    self.idle_sleep().await;
                }
                Err(QueueError::Busy) => {
                    // Contended write lock counts as an empty tick, not a
                    // failure.
                    warn!(worker_id = %self.id, "store busy, will retry next tick");
                    if last_activity.elapsed() >= self.settings.idle_timeout {
                        break;
                    }
                    self.idle_sleep().await;
                }
                Err(e) => {
                    store_errors += 1;
                    error!(worker_id = %self.id, error = %e, attempt = store_errors, "claim failed");
                    if store_errors >= MAX_CONSECUTIVE_STORE_ERRORS {
                        return Err(e);
                    }
                    self.idle_sleep().await;
                }
            }
        }
        Ok(())
    }

    /// Execute one claimed job and record its outcome.
    async fn process(&self, job: Job) -> Result<(), QueueError> {
        let log_path = job.log_path(&self.settings.logs_dir);
        info!(worker_id = %self.id, job_id = %job.id, command = %job.command, "executing");

        let outcome = executor::execute(&job, &log_path).await;

        match outcome {
            ExecOutcome::Success => {
                self.finalize_success(&job.id).await?;
                info!(worker_id = %self.id, job_id = %job.id, "completed");
            }
            ExecOutcome::NonZero { brief, .. } => {
                self.finalize_failure(&job.id, &brief).await?;
            }
            ExecOutcome::Timeout => {
                let brief = match job.timeout_seconds {
                    Some(t) => format!("timed out after {t}s"),
                    None => "timed out".to_string(),
                };
                self.finalize_failure(&job.id, &brief).await?;
            }
            ExecOutcome::SpawnError(msg) => {
                self.finalize_failure(&job.id, &msg).await?;
            }
        }
        Ok(())
    }

    async fn finalize_success(&self, id: &str) -> Result<(), QueueError> {
        for attempt in 1..=FINALIZE_ATTEMPTS {
            match self.store.complete(id, Utc::now()).await {
                Err(QueueError::Busy) if attempt < FINALIZE_ATTEMPTS => {
                    tokio::time::sleep(finalize_backoff(attempt)).await;
                }
                other => return other,
            }
        }
        unreachable!("finalize loop returns on the last attempt")
    }

    async fn finalize_failure(&self, id: &str, brief: &str) -> Result<(), QueueError> {
        for attempt in 1..=FINALIZE_ATTEMPTS {
            match self.store.fail(id, Utc::now(), brief).await {
                Ok(updated) => {
                    match updated.state {
                        JobState::Dead => {
                            warn!(
                                worker_id = %self.id,
                                job_id = %updated.id,
                                attempts = updated.attempts,
                                error = brief,
                                "retries exhausted, job dead-lettered"
                            );
                        }
                        _ => {
                            info!(
                                worker_id = %self.id,
                                job_id = %updated.id,
                                attempts = updated.attempts,
                                retry_at = %format_ts(updated.available_at),
                                error = brief,
                                "execution failed, retry scheduled"
                            );
                        }
                    }
                    return Ok(());
                }
                Err(QueueError::Busy) if attempt < FINALIZE_ATTEMPTS => {
                    tokio::time::sleep(finalize_backoff(attempt)).await;
                }
                Err(e) => return Err(e),
            }
        }
        unreachable!("finalize loop returns on the last attempt")
    }

    /// Sleep one poll interval, plus up to 20% jitter, waking early on
    /// shutdown.
    async fn idle_sleep(&self) {
        let base = self.settings.poll_interval;
        let jitter = base.mul_f64(fastrand::f64() * 0.2);
        tokio::select! {
            _ = self.shutdown.notified() => {}
            _ = tokio::time::sleep(base + jitter) => {}
        }
    }
}

fn finalize_backoff(attempt: u32) -> Duration {
    Duration::from_millis(50 * u64::from(attempt))
}

fn short_uuid() -> String {
    let mut s = Uuid::new_v4().simple().to_string();
    s.truncate(8);
    s
}
