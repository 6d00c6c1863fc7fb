use anyhow::Result;
use chrono::Utc;

use queuectl_core::{format_ts, EnqueueSpec, QueueError};

use super::Ctx;

pub async fn run(ctx: &Ctx, json: &str) -> Result<()> {
    let spec: EnqueueSpec = serde_json::from_str(json)
        .map_err(|e| QueueError::InvalidSpec(format!("invalid enqueue JSON: {e}")))?;

    let config = ctx.load_config()?;
    let store = ctx.open_store().await?;
    let job = store.enqueue(&spec, &config, Utc::now()).await?;

    println!(
        "enqueued '{}' (priority {}, max_retries {}, available at {})",
        job.id,
        job.priority,
        job.max_retries,
        format_ts(job.available_at)
    );
    Ok(())
}
