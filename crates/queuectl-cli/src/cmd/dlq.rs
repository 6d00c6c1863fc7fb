use anyhow::Result;
use chrono::Utc;

use queuectl_core::{format_ts, JobState};

use super::Ctx;

pub async fn list(ctx: &Ctx) -> Result<()> {
    let store = ctx.open_store().await?;
    let dead = store.list(Some(JobState::Dead)).await?;
    if dead.is_empty() {
        println!("dead-letter queue is empty");
        return Ok(());
    }

    println!("{:<24} {:>8} {:<27} {}", "ID", "ATTEMPTS", "DIED AT", "LAST ERROR");
    for job in &dead {
        println!(
            "{:<24} {:>8} {:<27} {}",
            job.id,
            job.attempts,
            job.finished_at.map(format_ts).unwrap_or_else(|| "-".into()),
            job.last_error.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

pub async fn retry(ctx: &Ctx, id: &str) -> Result<()> {
    let store = ctx.open_store().await?;
    let job = store.dlq_retry(id, Utc::now()).await?;
    println!("job '{}' moved back to pending (attempts reset)", job.id);
    Ok(())
}
