//! Structured error types for the queue engine.
//!
//! `QueueError` provides pattern-matchable errors instead of generic
//! `anyhow::Error`: the CLI maps variants to exit codes and workers decide
//! retry-vs-fatal from them.
//!
//! # The Error Boundary Rule
//!
//! > **Execution failures are not errors.**
//!
//! A child process exiting non-zero, timing out, or failing to spawn is a
//! normal job outcome ([`crate::ExecOutcome`]) fed back into the retry
//! policy. `QueueError` is reserved for the engine itself: bad input,
//! store trouble, impossible transitions.

use thiserror::Error;

use crate::job::JobState;

/// Errors surfaced by the queue engine.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Malformed enqueue input, config value, or CLI argument.
    #[error("invalid input: {0}")]
    InvalidSpec(String),

    /// Enqueue collided with an existing job id (in any state).
    #[error("a job with id '{0}' already exists")]
    DuplicateId(String),

    /// Lookup by id matched nothing.
    #[error("no job with id '{0}'")]
    NotFound(String),

    /// DLQ retry attempted on a job that is not dead.
    ///
    /// Concurrent `dlq retry` callers race on the serialized `dead →
    /// pending` write; losers land here and fail cleanly.
    #[error("job '{id}' is {state}, not dead")]
    NotDead { id: String, state: JobState },

    /// Transient store contention that outlasted the busy-wait window.
    ///
    /// Callers retry with a small backoff; a worker treats this as "no
    /// claim this tick".
    #[error("store busy: write lock contended past the busy-wait window")]
    Busy,

    /// The store file is damaged. Fatal; the process should exit non-zero.
    #[error("store corrupt: {0}")]
    Corrupt(String),

    /// Any other store-layer failure.
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl QueueError {
    /// Whether a caller may reasonably retry the operation as-is.
    pub fn is_transient(&self) -> bool {
        matches!(self, QueueError::Busy)
    }
}
