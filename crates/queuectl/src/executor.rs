//! Runs one job's shell command and reports the outcome.
//!
//! The executor never returns `Err` to the worker: non-zero exits,
//! timeouts, and spawn failures are all ordinary [`ExecOutcome`] values
//! that feed the retry policy.
//!
//! Output handling: the job log is opened in append mode, a
//! `--- START <iso-utc> ---` marker is written, then stdout and stderr are
//! streamed into the file interleaved as produced, and the run is closed
//! with an `END`, `TIMEOUT`, or `EXCEPTION` marker.

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use chrono::Utc;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::job::{format_ts, Job};

/// Grace period between the polite SIGTERM and the follow-up SIGKILL when
/// a job overruns its timeout.
pub const KILL_GRACE: Duration = Duration::from_secs(2);

/// The result of one execution attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecOutcome {
    /// The command exited 0.
    Success,
    /// The command exited non-zero (or died to a signal, reported as
    /// `128 + signo`).
    NonZero { code: i32, brief: String },
    /// The command overran `timeout_seconds` and was killed.
    Timeout,
    /// The command (or its log file) could not be started at all.
    SpawnError(String),
}

impl ExecOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecOutcome::Success)
    }
}

/// Execute `job.command` under `sh -c`, appending output to `log_path`.
///
/// Blocks (asynchronously) for up to `job.timeout_seconds` plus the kill
/// grace. Infallible by design; see [`ExecOutcome`].
pub async fn execute(job: &Job, log_path: &Path) -> ExecOutcome {
    match run(job, log_path).await {
        Ok(outcome) => outcome,
        Err(e) => ExecOutcome::SpawnError(e.to_string()),
    }
}

async fn run(job: &Job, log_path: &Path) -> std::io::Result<ExecOutcome> {
    if let Some(parent) = log_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut log = open_append(log_path).await?;
    write_marker(&mut log, &format!("--- START {} ---", format_ts(Utc::now()))).await?;

    // Through a shell so that pipelines, quoting, and builtins behave the
    // way the user typed them.
    let mut command = Command::new("sh");
    command
        .arg("-c")
        .arg(&job.command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            write_marker(
                &mut log,
                &format!("--- EXCEPTION {}: {e} ---", format_ts(Utc::now())),
            )
            .await?;
            return Ok(ExecOutcome::SpawnError(format!("failed to spawn: {e}")));
        }
    };
    let pid = child.id();
    debug!(job_id = %job.id, pid, "child spawned");

    // Both streams append to the same file through separate O_APPEND
    // handles; each write lands atomically at the end, so chunks
    // interleave in production order without a shared lock.
    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        let _ = child.kill().await;
        return Ok(ExecOutcome::SpawnError("failed to capture child output".into()));
    };
    let mut stdout_sink = open_append(log_path).await?;
    let mut stderr_sink = open_append(log_path).await?;
    let copy_out = tokio::spawn(async move {
        let mut stdout = stdout;
        let _ = tokio::io::copy(&mut stdout, &mut stdout_sink).await;
        let _ = stdout_sink.flush().await;
    });
    let copy_err = tokio::spawn(async move {
        let mut stderr = stderr;
        let _ = tokio::io::copy(&mut stderr, &mut stderr_sink).await;
        let _ = stderr_sink.flush().await;
    });

    let status = if let Some(limit) = job.timeout() {
        match tokio::time::timeout(limit, child.wait()).await {
            Ok(waited) => waited?,
            Err(_) => {
                warn!(job_id = %job.id, timeout = ?limit, "execution timed out, terminating child");
                terminate(&mut child, pid).await;
                let _ = copy_out.await;
                let _ = copy_err.await;
                write_marker(
                    &mut log,
                    &format!("--- TIMEOUT {} ---", format_ts(Utc::now())),
                )
                .await?;
                return Ok(ExecOutcome::Timeout);
            }
        }
    } else {
        child.wait().await?
    };

    let _ = copy_out.await;
    let _ = copy_err.await;

    let code = exit_code(status);
    write_marker(
        &mut log,
        &format!("--- END {} rc={code} ---", format_ts(Utc::now())),
    )
    .await?;

    if status.success() {
        Ok(ExecOutcome::Success)
    } else {
        Ok(ExecOutcome::NonZero {
            code,
            brief: format!("command exited with status {code}"),
        })
    }
}

/// SIGTERM first; SIGKILL after [`KILL_GRACE`] if the child is still up.
async fn terminate(child: &mut Child, pid: Option<u32>) {
    #[cfg(unix)]
    if let Some(pid) = pid {
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
    if tokio::time::timeout(KILL_GRACE, child.wait()).await.is_err() {
        let _ = child.kill().await;
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signo) = status.signal() {
            return 128 + signo;
        }
    }
    status.code().unwrap_or(-1)
}

async fn open_append(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path).await
}

async fn write_marker(log: &mut File, line: &str) -> std::io::Result<()> {
    log.write_all(line.as_bytes()).await?;
    log.write_all(b"\n").await?;
    log.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::job::EnqueueSpec;

    fn job(command: &str, timeout_seconds: Option<f64>) -> Job {
        let spec = EnqueueSpec {
            id: "t".into(),
            command: command.into(),
            timeout_seconds,
            ..EnqueueSpec::default()
        };
        spec.resolve(&QueueConfig::default(), Utc::now()).unwrap()
    }

    #[tokio::test]
    async fn success_writes_start_end_markers_and_output() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("job_t.log");

        let outcome = execute(&job("echo hello", None), &log).await;
        assert_eq!(outcome, ExecOutcome::Success);

        let contents = std::fs::read_to_string(&log).unwrap();
        assert!(contents.contains("--- START "));
        assert!(contents.contains("hello"));
        assert!(contents.contains("rc=0 ---"));
    }

    #[tokio::test]
    async fn nonzero_exit_is_an_outcome_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("job_t.log");

        match execute(&job("exit 7", None), &log).await {
            ExecOutcome::NonZero { code, brief } => {
                assert_eq!(code, 7);
                assert!(brief.contains('7'));
            }
            other => panic!("expected NonZero, got {other:?}"),
        }
        let contents = std::fs::read_to_string(&log).unwrap();
        assert!(contents.contains("rc=7 ---"));
    }

    #[tokio::test]
    async fn stderr_is_captured_too() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("job_t.log");

        execute(&job("echo oops >&2", None), &log).await;
        assert!(std::fs::read_to_string(&log).unwrap().contains("oops"));
    }

    #[tokio::test]
    async fn overrunning_command_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("job_t.log");

        let started = std::time::Instant::now();
        let outcome = execute(&job("sleep 10", Some(0.3)), &log).await;
        assert_eq!(outcome, ExecOutcome::Timeout);
        // Terminated well before the sleep would have finished.
        assert!(started.elapsed() < Duration::from_secs(8));

        let contents = std::fs::read_to_string(&log).unwrap();
        assert!(contents.contains("--- TIMEOUT "));
    }

    #[tokio::test]
    async fn missing_binary_is_nonzero_under_sh() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("job_t.log");

        // sh reports 127 for an unknown command; that is a NonZero outcome,
        // not a SpawnError (the shell itself spawned fine).
        match execute(&job("definitely-not-a-real-binary-xyz", None), &log).await {
            ExecOutcome::NonZero { code, .. } => assert_eq!(code, 127),
            other => panic!("expected NonZero, got {other:?}"),
        }
    }
}
