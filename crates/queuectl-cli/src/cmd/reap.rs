use std::time::Duration;

use anyhow::Result;
use chrono::Utc;

use queuectl_core::QueueError;

use super::Ctx;

pub async fn run(ctx: &Ctx, stale_after: f64) -> Result<()> {
    if !(stale_after.is_finite() && stale_after >= 0.0) {
        return Err(QueueError::InvalidSpec(format!(
            "--stale-after must be a non-negative number, got {stale_after}"
        ))
        .into());
    }

    let store = ctx.open_store().await?;
    let reaped = store
        .reap_zombie_processing(Utc::now(), Duration::from_secs_f64(stale_after))
        .await?;
    println!("{reaped} stale processing job(s) returned to pending");
    Ok(())
}
