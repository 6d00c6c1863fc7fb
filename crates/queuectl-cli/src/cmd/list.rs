use anyhow::Result;

use queuectl_core::{format_ts, Job, JobState};

use super::Ctx;

pub async fn run(ctx: &Ctx, state: Option<&str>) -> Result<()> {
    let filter = match state {
        None | Some("all") => None,
        Some(raw) => Some(raw.parse::<JobState>()?),
    };

    let store = ctx.open_store().await?;
    let jobs = store.list(filter).await?;
    if jobs.is_empty() {
        println!("no jobs");
        return Ok(());
    }

    println!(
        "{:<24} {:<10} {:>8} {:>8} {:<27} {}",
        "ID", "STATE", "ATTEMPTS", "PRIORITY", "AVAILABLE AT", "LAST ERROR"
    );
    for job in &jobs {
        println!("{}", render(job));
    }
    Ok(())
}

fn render(job: &Job) -> String {
    format!(
        "{:<24} {:<10} {:>8} {:>8} {:<27} {}",
        job.id,
        job.state,
        job.attempts,
        job.priority,
        format_ts(job.available_at),
        job.last_error.as_deref().unwrap_or("-")
    )
}
