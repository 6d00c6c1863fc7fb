//! The worker-facing store contract.
//!
//! queuectl-core owns interfaces only. Retry policy (backoff arithmetic,
//! dead-letter cutoff) belongs to the store implementation; the worker
//! loop stays dumb and just reports outcomes.
//!
//! # Implementer Notes
//!
//! - The claim must be one immediate write transaction: selection and the
//!   `pending → processing` flip are inseparable, so concurrent workers
//!   see disjoint jobs.
//! - Claim order must be total and deterministic:
//!   `priority DESC, created_at ASC, id ASC`.
//! - `fail` owns the retry decision: increment `attempts`, then either
//!   re-pend with `available_at = now + base_backoff ^ attempts` (clamped)
//!   or dead-letter when `attempts > max_retries`.
//! - Contention past the busy-wait window surfaces as
//!   [`QueueError::Busy`], never as a blocked future.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::QueueError;
use crate::job::Job;

/// Claiming and finalizing jobs against persistent storage.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Atomically claim the single best ready job, if any.
    ///
    /// Ready means `state = pending` and `available_at <= now`. On success
    /// the returned row is already in `processing` with `started_at = now`.
    ///
    /// `worker_id` identifies the caller for logs and diagnostics only;
    /// exclusivity comes from the store's write serialization.
    async fn claim_one(&self, worker_id: &str, now: DateTime<Utc>)
        -> Result<Option<Job>, QueueError>;

    /// Finalize a successful execution: `processing → completed`.
    async fn complete(&self, id: &str, now: DateTime<Utc>) -> Result<(), QueueError>;

    /// Record a failed execution and apply the retry policy.
    ///
    /// Returns the updated row so the caller can log whether the job was
    /// re-pended or dead-lettered.
    async fn fail(&self, id: &str, now: DateTime<Utc>, error: &str) -> Result<Job, QueueError>;
}
