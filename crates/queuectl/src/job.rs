//! The job model: the one first-class entity in the queue.
//!
//! A [`Job`] is a shell command with retry policy and scheduling metadata.
//! Rows are created by [`EnqueueSpec::resolve`] and afterwards mutated only
//! through store transitions (`claim`, `complete`, `fail`, `dlq retry`).
//!
//! All timestamps cross every boundary (store, log markers, CLI output) as
//! RFC-3339 UTC with a trailing `Z` and fixed microsecond width, so the
//! stored text sorts chronologically.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::config::QueueConfig;
use crate::error::QueueError;

/// Format a timestamp for storage and display.
///
/// Fixed-width microsecond precision keeps lexicographic order equal to
/// chronological order, which the store relies on for `available_at`
/// comparisons and claim ordering.
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a boundary timestamp. Accepts any RFC-3339 offset and normalizes
/// to UTC.
pub fn parse_ts(raw: &str) -> Result<DateTime<Utc>, QueueError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| QueueError::InvalidSpec(format!("unparseable timestamp '{raw}': {e}")))
}

/// Drop sub-microsecond precision so an in-memory timestamp equals its
/// stored-and-reparsed self.
fn truncate_to_micros(ts: DateTime<Utc>) -> DateTime<Utc> {
    use chrono::Timelike;
    ts.with_nanosecond(ts.nanosecond() / 1_000 * 1_000).unwrap_or(ts)
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Waiting to be claimed (includes scheduled jobs and retry waits).
    Pending,
    /// Claimed by exactly one worker; a child process may be running.
    Processing,
    /// Terminal success.
    Completed,
    /// Terminal failure: retries exhausted (the dead-letter queue).
    Dead,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Dead => "dead",
        }
    }

    /// Terminal states carry a `finished_at` timestamp.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Dead)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobState::Pending),
            "processing" => Ok(JobState::Processing),
            "completed" => Ok(JobState::Completed),
            "dead" => Ok(JobState::Dead),
            other => Err(QueueError::InvalidSpec(format!(
                "unknown job state '{other}' (expected pending|processing|completed|dead)"
            ))),
        }
    }
}

/// A materialized job row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    /// Client-supplied primary key, unique across all states.
    pub id: String,
    /// Shell command line, run via `sh -c`.
    pub command: String,
    pub state: JobState,
    /// Completed execution tries so far.
    pub attempts: i64,
    /// Retries permitted after the first failure.
    pub max_retries: i64,
    /// Backoff base: the retry delay is `base_backoff ^ attempts` seconds.
    pub base_backoff: f64,
    /// Higher values are claimed first.
    pub priority: i64,
    /// Wall-clock limit per execution, if any.
    pub timeout_seconds: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Earliest instant the job may be claimed.
    pub available_at: DateTime<Utc>,
    /// Set on the most recent claim; cleared when a failure re-pends the job.
    pub started_at: Option<DateTime<Utc>>,
    /// Set on entering a terminal state.
    pub finished_at: Option<DateTime<Utc>>,
    /// Short diagnostic from the last failed execution.
    pub last_error: Option<String>,
}

impl Job {
    /// Path of the job's append-only log file under `logs_dir`.
    ///
    /// Derived, never stored: distinct jobs map to distinct files, so no
    /// two workers ever share a log handle.
    pub fn log_path(&self, logs_dir: &Path) -> PathBuf {
        logs_dir.join(format!("job_{}.log", self.id))
    }

    /// Execution timeout as a [`Duration`], if configured.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_seconds.map(Duration::from_secs_f64)
    }
}

/// Client input for `enqueue`: the JSON object accepted on the command
/// line. Only `id` and `command` are required; missing retry/backoff
/// fields default from the config snapshot at enqueue time.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnqueueSpec {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub command: String,
    pub max_retries: Option<i64>,
    pub base_backoff: Option<f64>,
    pub priority: Option<i64>,
    pub timeout_seconds: Option<f64>,
    /// ISO-8601 UTC; interpreted as `available_at`. Defaults to now.
    pub run_at: Option<String>,
}

impl EnqueueSpec {
    /// Validate the spec and materialize a fresh `pending` row.
    ///
    /// # Errors
    ///
    /// [`QueueError::InvalidSpec`] on a blank `id` or `command`, negative
    /// or non-finite numeric fields, or an unparseable `run_at`.
    pub fn resolve(&self, defaults: &QueueConfig, now: DateTime<Utc>) -> Result<Job, QueueError> {
        let id = self.id.trim();
        if id.is_empty() {
            return Err(QueueError::InvalidSpec("'id' must be a non-empty string".into()));
        }
        if self.command.trim().is_empty() {
            return Err(QueueError::InvalidSpec("'command' must be a non-empty string".into()));
        }

        let max_retries = self.max_retries.unwrap_or(i64::from(defaults.max_retries));
        if max_retries < 0 {
            return Err(QueueError::InvalidSpec("'max_retries' must not be negative".into()));
        }

        let base_backoff = self.base_backoff.unwrap_or(defaults.base_backoff);
        if !(base_backoff.is_finite() && base_backoff > 0.0) {
            return Err(QueueError::InvalidSpec("'base_backoff' must be a positive number".into()));
        }

        let timeout_seconds = self.timeout_seconds.or(defaults.default_timeout_seconds);
        if let Some(t) = timeout_seconds {
            if !(t.is_finite() && t > 0.0) {
                return Err(QueueError::InvalidSpec(
                    "'timeout_seconds' must be a positive number".into(),
                ));
            }
        }

        // Timestamps persist at microsecond width; truncate up front so
        // the returned row equals the stored one.
        let now = truncate_to_micros(now);

        // Scheduled jobs may not be claimed before run_at; a run_at in the
        // past clamps to now so available_at never precedes created_at.
        let available_at = match &self.run_at {
            Some(raw) => truncate_to_micros(parse_ts(raw)?).max(now),
            None => now,
        };

        Ok(Job {
            id: id.to_string(),
            command: self.command.clone(),
            state: JobState::Pending,
            attempts: 0,
            max_retries,
            base_backoff,
            priority: self.priority.unwrap_or(0),
            timeout_seconds,
            created_at: now,
            updated_at: now,
            available_at,
            started_at: None,
            finished_at: None,
            last_error: None,
        })
    }
}
