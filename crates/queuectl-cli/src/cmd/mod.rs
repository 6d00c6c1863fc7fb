//! Subcommand implementations. Each one is a thin call into the
//! repository plus stdout formatting; the engine owns all semantics.

use std::path::PathBuf;

use queuectl_core::{QueueConfig, QueueError};
use queuectl_store_sqlite::SqliteJobStore;

pub mod config;
pub mod dlq;
pub mod enqueue;
pub mod list;
pub mod logs;
pub mod metrics;
pub mod reap;
pub mod reset;
pub mod status;
pub mod worker;

/// Paths shared by every subcommand, resolved from the global CLI flags.
pub struct Ctx {
    pub db: PathBuf,
    pub config_path: PathBuf,
    pub logs_dir: PathBuf,
}

impl Ctx {
    pub async fn open_store(&self) -> Result<SqliteJobStore, QueueError> {
        SqliteJobStore::open(&self.db).await
    }

    pub fn load_config(&self) -> Result<QueueConfig, QueueError> {
        QueueConfig::load(&self.config_path)
    }
}
