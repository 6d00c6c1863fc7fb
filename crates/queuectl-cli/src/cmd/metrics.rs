use anyhow::Result;

use super::Ctx;

pub async fn run(ctx: &Ctx) -> Result<()> {
    let store = ctx.open_store().await?;
    let metrics = store.metrics().await?;

    println!("total jobs       {}", metrics.total);
    println!("completed        {}", metrics.completed);
    println!("dead             {}", metrics.dead);
    println!("mean attempts    {}", fmt_mean(metrics.mean_attempts, ""));
    println!("mean duration    {}", fmt_mean(metrics.mean_duration_seconds, "s"));
    Ok(())
}

fn fmt_mean(value: Option<f64>, unit: &str) -> String {
    match value {
        Some(v) => format!("{v:.2}{unit}"),
        None => "n/a".to_string(),
    }
}
