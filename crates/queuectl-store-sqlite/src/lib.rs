//! SQLite implementation of the queuectl job repository.
//!
//! This crate provides the single-file, multi-process implementation of
//! the `JobStore` trait from queuectl-core, plus the aggregate queries the
//! control surface needs (listing, status, metrics, DLQ, reaping).
//!
//! # Features
//!
//! - Single-statement atomic claims serialized by the SQLite write lock
//! - Exponential backoff retry logic with a 24-hour ceiling
//! - Dead letter queue for permanently failed jobs
//! - WAL journaling so readers never block behind writers
//! - 5-second busy wait; residual contention surfaces as `QueueError::Busy`
//!
//! # Database Schema
//!
//! ```sql
//! CREATE TABLE jobs (
//!     id              TEXT PRIMARY KEY,
//!     command         TEXT NOT NULL,
//!
//!     -- Execution
//!     state           TEXT NOT NULL DEFAULT 'pending',
//!     attempts        INTEGER NOT NULL DEFAULT 0,
//!     max_retries     INTEGER NOT NULL DEFAULT 3,
//!     base_backoff    REAL NOT NULL DEFAULT 2.0,
//!     timeout_seconds REAL,
//!
//!     -- Scheduling
//!     priority        INTEGER NOT NULL DEFAULT 0,
//!     available_at    TEXT NOT NULL,
//!
//!     -- Error tracking
//!     last_error      TEXT,
//!
//!     -- Timestamps (RFC-3339 UTC, fixed microsecond width)
//!     created_at      TEXT NOT NULL,
//!     updated_at      TEXT NOT NULL,
//!     started_at      TEXT,
//!     finished_at     TEXT
//! );
//!
//! CREATE INDEX idx_jobs_ready ON jobs (priority DESC, created_at, id)
//!     WHERE state = 'pending';
//! ```
//!
//! # Concurrency Model
//!
//! Every mutation takes SQLite's exclusive write lock before reading
//! anything it depends on, so there is no read-then-update window to
//! lose. The claim and the simple transitions are single guarded
//! statements (`UPDATE ... WHERE <expected state> ... RETURNING`), which
//! acquire the lock at statement start and commit atomically. `fail`
//! needs the incremented attempt count to pick its retry-or-dead branch,
//! so it runs as one short transaction whose *first* statement is the
//! guarded increment: the write lock is held from that statement through
//! commit, giving the transaction immediate-write semantics with no read
//! snapshot to upgrade.
//!
//! # Usage
//!
//! ```rust,ignore
//! use queuectl_store_sqlite::SqliteJobStore;
//!
//! let store = SqliteJobStore::open("queue.db".as_ref()).await?;
//!
//! // Use with the queuectl worker loop
//! let worker = Worker::new(Arc::new(store), settings, shutdown);
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use queuectl_core::{
    format_ts, parse_ts, EnqueueSpec, Job, JobState, JobStore, QueueConfig, QueueError,
};

/// How long a contended writer waits for the write lock before the store
/// reports `Busy`.
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Ceiling on the retry backoff delay. `base_backoff ^ attempts` grows
/// without bound; anything past a day would schedule jobs absurdly far in
/// the future.
const MAX_BACKOFF_SECS: f64 = 86_400.0;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id              TEXT PRIMARY KEY,
    command         TEXT NOT NULL,
    state           TEXT NOT NULL DEFAULT 'pending',
    attempts        INTEGER NOT NULL DEFAULT 0,
    max_retries     INTEGER NOT NULL DEFAULT 3,
    base_backoff    REAL NOT NULL DEFAULT 2.0,
    timeout_seconds REAL,
    priority        INTEGER NOT NULL DEFAULT 0,
    available_at    TEXT NOT NULL,
    last_error      TEXT,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL,
    started_at      TEXT,
    finished_at     TEXT
);

CREATE INDEX IF NOT EXISTS idx_jobs_ready
    ON jobs (priority DESC, created_at, id)
    WHERE state = 'pending';
"#;

const JOB_COLUMNS: &str = "id, command, state, attempts, max_retries, base_backoff, \
     timeout_seconds, priority, available_at, last_error, created_at, updated_at, \
     started_at, finished_at";

/// SQLite job store shared by every worker and CLI process on the host.
#[derive(Clone)]
pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    /// Open (and initialize, if needed) the store at `path`.
    ///
    /// Idempotent: enables WAL, sets the busy wait, and creates the schema
    /// when absent. Safe to call concurrently from multiple processes.
    pub async fn open(path: &Path) -> Result<Self, QueueError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(BUSY_TIMEOUT)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(map_sqlx)?;

        sqlx::raw_sql(SCHEMA).execute(&pool).await.map_err(map_sqlx)?;

        Ok(Self { pool })
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert a new job.
    ///
    /// Missing retry/backoff/timeout fields default from the supplied
    /// config snapshot. Fails with [`QueueError::DuplicateId`] when the id
    /// exists in any state, [`QueueError::InvalidSpec`] on bad input.
    pub async fn enqueue(
        &self,
        spec: &EnqueueSpec,
        defaults: &QueueConfig,
        now: DateTime<Utc>,
    ) -> Result<Job, QueueError> {
        let job = spec.resolve(defaults, now)?;

        let result = sqlx::query(
            r#"
            INSERT INTO jobs (id, command, state, attempts, max_retries, base_backoff,
                              timeout_seconds, priority, available_at,
                              created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
            "#,
        )
        .bind(&job.id)
        .bind(&job.command)
        .bind(job.state.as_str())
        .bind(job.attempts)
        .bind(job.max_retries)
        .bind(job.base_backoff)
        .bind(job.timeout_seconds)
        .bind(job.priority)
        .bind(format_ts(job.available_at))
        .bind(format_ts(now))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(job),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(QueueError::DuplicateId(job.id))
            }
            Err(e) => Err(map_sqlx(e)),
        }
    }

    /// Fetch one job by id.
    pub async fn get(&self, id: &str) -> Result<Option<Job>, QueueError> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;
        row.map(|r| job_from_row(&r)).transpose()
    }

    /// List jobs, optionally restricted to one state, oldest first.
    ///
    /// The id tie-breaker keeps the order total for jobs created within
    /// the same microsecond.
    pub async fn list(&self, filter: Option<JobState>) -> Result<Vec<Job>, QueueError> {
        let rows = match filter {
            Some(state) => {
                sqlx::query(&format!(
                    "SELECT {JOB_COLUMNS} FROM jobs WHERE state = ?1 ORDER BY created_at ASC, id ASC"
                ))
                .bind(state.as_str())
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at ASC, id ASC"
                ))
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(map_sqlx)?;

        rows.iter().map(job_from_row).collect()
    }

    /// Move a dead job back to `pending` with a clean slate.
    ///
    /// Idempotent under concurrency: the `dead → pending` write is guarded
    /// on the current state, so a second caller sees [`QueueError::NotDead`].
    pub async fn dlq_retry(&self, id: &str, now: DateTime<Utc>) -> Result<Job, QueueError> {
        let ts = format_ts(now);
        let done = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'pending',
                attempts = 0,
                available_at = ?1,
                updated_at = ?1,
                started_at = NULL,
                finished_at = NULL,
                last_error = NULL
            WHERE id = ?2 AND state = 'dead'
            "#,
        )
        .bind(&ts)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        if done.rows_affected() == 0 {
            return match self.get(id).await? {
                None => Err(QueueError::NotFound(id.to_string())),
                Some(job) => Err(QueueError::NotDead { id: id.to_string(), state: job.state }),
            };
        }

        self.get(id)
            .await?
            .ok_or_else(|| QueueError::NotFound(id.to_string()))
    }

    /// Counts per state, in one pass over the table.
    pub async fn status_summary(&self) -> Result<StatusSummary, QueueError> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE state = 'pending')    AS pending,
                COUNT(*) FILTER (WHERE state = 'processing') AS processing,
                COUNT(*) FILTER (WHERE state = 'completed')  AS completed,
                COUNT(*) FILTER (WHERE state = 'dead')       AS dead
            FROM jobs
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx)?;

        Ok(StatusSummary {
            pending: row.get("pending"),
            processing: row.get("processing"),
            completed: row.get("completed"),
            dead: row.get("dead"),
        })
    }

    /// Aggregate health metrics for the `metrics` command.
    pub async fn metrics(&self) -> Result<QueueMetrics, QueueError> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*)                                    AS total,
                COUNT(*) FILTER (WHERE state = 'completed') AS completed,
                COUNT(*) FILTER (WHERE state = 'dead')      AS dead,
                AVG(attempts) FILTER (WHERE state != 'pending') AS mean_attempts,
                AVG((julianday(finished_at) - julianday(started_at)) * 86400.0)
                    FILTER (WHERE state = 'completed' AND started_at IS NOT NULL)
                    AS mean_duration_seconds
            FROM jobs
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx)?;

        Ok(QueueMetrics {
            total: row.get("total"),
            completed: row.get("completed"),
            dead: row.get("dead"),
            mean_attempts: row.get("mean_attempts"),
            mean_duration_seconds: row.get("mean_duration_seconds"),
        })
    }

    /// Reclaim `processing` rows abandoned by a killed worker.
    ///
    /// A worker that died mid-execution (kill -9, host crash) leaks its
    /// claimed row; anything processing since before `now - stale_after`
    /// goes back to `pending`. Not run automatically; see the `reap` CLI
    /// command. Returns how many rows were reclaimed.
    pub async fn reap_zombie_processing(
        &self,
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> Result<u64, QueueError> {
        let cutoff = now
            - chrono::Duration::from_std(stale_after)
                .map_err(|e| QueueError::InvalidSpec(format!("stale_after out of range: {e}")))?;

        let done = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'pending',
                started_at = NULL,
                available_at = ?1,
                updated_at = ?1
            WHERE state = 'processing' AND started_at < ?2
            "#,
        )
        .bind(format_ts(now))
        .bind(format_ts(cutoff))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        Ok(done.rows_affected())
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    /// Claim the single best ready job.
    ///
    /// Selection and the `pending → processing` flip are one statement, so
    /// concurrent workers are serialized by the write lock and can never
    /// return the same row.
    async fn claim_one(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>, QueueError> {
        let ts = format_ts(now);
        let row = sqlx::query(&format!(
            r#"
            UPDATE jobs
            SET state = 'processing',
                started_at = ?1,
                updated_at = ?1
            WHERE id = (
                SELECT id FROM jobs
                WHERE state = 'pending' AND available_at <= ?2
                ORDER BY priority DESC, created_at ASC, id ASC
                LIMIT 1
            )
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(&ts)
        .bind(&ts)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;

        let claimed = row.map(|r| job_from_row(&r)).transpose()?;
        if let Some(job) = &claimed {
            debug!(worker_id, job_id = %job.id, "claimed");
        }
        Ok(claimed)
    }

    /// Mark a job as successfully completed.
    async fn complete(&self, id: &str, now: DateTime<Utc>) -> Result<(), QueueError> {
        let ts = format_ts(now);
        let done = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'completed',
                finished_at = ?1,
                updated_at = ?1
            WHERE id = ?2 AND state = 'processing'
            "#,
        )
        .bind(&ts)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        if done.rows_affected() == 0 {
            return Err(self.transition_conflict(id, "complete").await);
        }
        Ok(())
    }

    /// Mark a job as failed and apply the retry policy.
    ///
    /// Runs as one immediate write transaction: the first statement is the
    /// guarded attempts increment, so the exclusive write lock is taken at
    /// transaction start and there is no read snapshot to upgrade. The
    /// branch decision and the branch write happen under that same lock.
    ///
    /// # Retry Logic
    ///
    /// - Retries remaining: back to `pending` with
    ///   `available_at = now + base_backoff ^ attempts` (clamped to 24 h)
    /// - Retries exhausted (`attempts > max_retries`): dead letter
    async fn fail(&self, id: &str, now: DateTime<Utc>, error: &str) -> Result<Job, QueueError> {
        let ts = format_ts(now);
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;

        // Write-first: incrementing before reading acquires the write lock
        // for the whole transaction and hands back the values the branch
        // decision needs.
        let counters = sqlx::query(
            r#"
            UPDATE jobs
            SET attempts = attempts + 1,
                last_error = ?1,
                updated_at = ?2
            WHERE id = ?3 AND state = 'processing'
            RETURNING attempts, max_retries, base_backoff
            "#,
        )
        .bind(error)
        .bind(&ts)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        let Some(counters) = counters else {
            let _ = tx.rollback().await;
            return Err(self.transition_conflict(id, "fail").await);
        };
        let attempts: i64 = counters.try_get("attempts").map_err(map_sqlx)?;
        let max_retries: i64 = counters.try_get("max_retries").map_err(map_sqlx)?;
        let base_backoff: f64 = counters.try_get("base_backoff").map_err(map_sqlx)?;

        let row = if attempts > max_retries {
            sqlx::query(&format!(
                r#"
                UPDATE jobs
                SET state = 'dead',
                    finished_at = ?1
                WHERE id = ?2
                RETURNING {JOB_COLUMNS}
                "#
            ))
            .bind(&ts)
            .bind(id)
            .fetch_one(&mut *tx)
            .await
        } else {
            let retry_at = now + backoff_delay(base_backoff, attempts);
            sqlx::query(&format!(
                r#"
                UPDATE jobs
                SET state = 'pending',
                    available_at = ?1,
                    started_at = NULL
                WHERE id = ?2
                RETURNING {JOB_COLUMNS}
                "#
            ))
            .bind(format_ts(retry_at))
            .bind(id)
            .fetch_one(&mut *tx)
            .await
        }
        .map_err(map_sqlx)?;

        let job = job_from_row(&row)?;
        tx.commit().await.map_err(map_sqlx)?;
        Ok(job)
    }
}

impl SqliteJobStore {
    async fn transition_conflict(&self, id: &str, op: &str) -> QueueError {
        match self.get(id).await {
            Ok(Some(job)) => QueueError::Store(anyhow!(
                "cannot {op} job '{id}': state is {}, expected processing",
                job.state
            )),
            Ok(None) => QueueError::NotFound(id.to_string()),
            Err(e) => e,
        }
    }
}

/// Retry delay for the given attempt count, clamped to [`MAX_BACKOFF_SECS`].
fn backoff_delay(base: f64, attempts: i64) -> chrono::Duration {
    let secs = base.powi(attempts.min(i64::from(i32::MAX)) as i32);
    let clamped = if secs.is_finite() { secs.min(MAX_BACKOFF_SECS) } else { MAX_BACKOFF_SECS };
    chrono::Duration::milliseconds((clamped * 1000.0) as i64)
}

fn job_from_row(row: &SqliteRow) -> Result<Job, QueueError> {
    let state: String = row.try_get("state").map_err(map_sqlx)?;
    let created_at: String = row.try_get("created_at").map_err(map_sqlx)?;
    let updated_at: String = row.try_get("updated_at").map_err(map_sqlx)?;
    let available_at: String = row.try_get("available_at").map_err(map_sqlx)?;
    let started_at: Option<String> = row.try_get("started_at").map_err(map_sqlx)?;
    let finished_at: Option<String> = row.try_get("finished_at").map_err(map_sqlx)?;

    Ok(Job {
        id: row.try_get("id").map_err(map_sqlx)?,
        command: row.try_get("command").map_err(map_sqlx)?,
        state: state
            .parse()
            .map_err(|_| QueueError::Corrupt(format!("unknown state '{state}' in jobs table")))?,
        attempts: row.try_get("attempts").map_err(map_sqlx)?,
        max_retries: row.try_get("max_retries").map_err(map_sqlx)?,
        base_backoff: row.try_get("base_backoff").map_err(map_sqlx)?,
        priority: row.try_get("priority").map_err(map_sqlx)?,
        timeout_seconds: row.try_get("timeout_seconds").map_err(map_sqlx)?,
        created_at: parse_row_ts(&created_at)?,
        updated_at: parse_row_ts(&updated_at)?,
        available_at: parse_row_ts(&available_at)?,
        started_at: started_at.as_deref().map(parse_row_ts).transpose()?,
        finished_at: finished_at.as_deref().map(parse_row_ts).transpose()?,
        last_error: row.try_get("last_error").map_err(map_sqlx)?,
    })
}

/// A malformed timestamp in an existing row is damage, not bad input.
fn parse_row_ts(raw: &str) -> Result<DateTime<Utc>, QueueError> {
    parse_ts(raw).map_err(|_| QueueError::Corrupt(format!("bad timestamp '{raw}' in jobs table")))
}

fn map_sqlx(err: sqlx::Error) -> QueueError {
    if let sqlx::Error::Database(db) = &err {
        let message = db.message().to_ascii_lowercase();
        if message.contains("database is locked") || message.contains("database is busy") {
            return QueueError::Busy;
        }
        if message.contains("malformed") || message.contains("not a database") {
            return QueueError::Corrupt(db.message().to_string());
        }
    }
    QueueError::Store(err.into())
}

/// Per-state job counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusSummary {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub dead: i64,
}

impl StatusSummary {
    pub fn total(&self) -> i64 {
        self.pending + self.processing + self.completed + self.dead
    }
}

/// Aggregate queue health numbers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueueMetrics {
    pub total: i64,
    pub completed: i64,
    pub dead: i64,
    /// Mean attempts across non-pending jobs; `None` when there are none.
    pub mean_attempts: Option<f64>,
    /// Mean `finished_at - started_at` across completed jobs, in seconds.
    pub mean_duration_seconds: Option<f64>,
}
