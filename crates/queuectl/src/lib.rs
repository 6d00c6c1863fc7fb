//! # queuectl-core
//!
//! The engine behind `queuectl`: a durable, single-node background job
//! queue where independent worker processes claim shell-command jobs from
//! a shared store, execute them with a timeout, and retry failures with
//! exponential backoff until they succeed or dead-letter.
//!
//! ## Core Concepts
//!
//! queuectl separates **policy** from **storage**:
//! - [`JobStore`] = the claim/complete/fail contract a backing store must honor
//! - [`Worker`] = the loop that turns claimed jobs into outcomes
//!
//! The key principle: **one claim = one immediate write transaction**.
//! A job can only move out of `pending` inside a single serialized store
//! write, so two workers can never observe the same job in `processing`.
//!
//! ## Architecture
//!
//! ```text
//! queuectl enqueue ──► jobs table (pending)
//!                           │
//!                           ▼ claim_one()            ┌────────────────┐
//! Supervisor ──spawns N──► Worker loop ──execute()──►│ sh -c <command>│
//!                           │        ▲               └───────┬────────┘
//!                           │        │ outcome               │ stdout/stderr
//!                           ▼        │                       ▼
//!                    complete()/fail()              logs/job_<id>.log
//!                           │
//!                           ▼
//!            completed │ pending (retry, backoff) │ dead (DLQ)
//! ```
//!
//! ## Key Invariants
//!
//! 1. **Claims are exclusive** - at most one worker holds a job in `processing`
//! 2. **Outcomes are never lost** - every execution ends in `complete` or `fail`
//! 3. **Backoff is bounded** - `base_backoff ^ attempts`, clamped to 24 hours
//! 4. **Shutdown is graceful** - an in-flight child finishes; no new claims
//! 5. **Workers are dumb** - retry policy lives in the store, not the loop
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use queuectl_core::{QueueConfig, ShutdownFlag, Worker, WorkerSettings};
//!
//! let config = QueueConfig::load("queue_config.json".as_ref())?;
//! let shutdown = ShutdownFlag::new();
//! shutdown.install_signal_handlers()?;
//!
//! let worker = Worker::new(store, WorkerSettings::from_config(&config, "logs".into()), shutdown);
//! worker.run().await?;
//! ```
//!
//! ## What This Is Not
//!
//! queuectl-core is **not**:
//! - A distributed queue (one host, one database file)
//! - A workflow engine (no job dependencies or DAGs)
//! - An in-process task scheduler (workers are OS processes)
//!
//! It **is**:
//! > A claim/execute/retry/DLQ state machine over a shared transactional
//! > store, plus the process plumbing to run it as a worker pool.

// Core modules
mod config;
mod error;
mod job;
mod shutdown;
mod store;

// Execution
pub mod executor;
pub mod supervisor;
mod worker;

// Re-export job model types
pub use crate::job::{format_ts, parse_ts, EnqueueSpec, Job, JobState};

// Re-export error types
pub use crate::error::QueueError;

// Re-export configuration
pub use crate::config::QueueConfig;

// Re-export store contract
pub use crate::store::JobStore;

// Re-export executor types
pub use crate::executor::ExecOutcome;

// Re-export worker types
pub use crate::worker::{Worker, WorkerSettings};

// Re-export shutdown plumbing
pub use crate::shutdown::ShutdownFlag;

// Re-export commonly used external types
pub use async_trait::async_trait;
