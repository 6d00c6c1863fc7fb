use anyhow::Result;

use super::Ctx;

pub async fn run(ctx: &Ctx) -> Result<()> {
    let store = ctx.open_store().await?;
    let summary = store.status_summary().await?;

    println!("pending     {}", summary.pending);
    println!("processing  {}", summary.processing);
    println!("completed   {}", summary.completed);
    println!("dead        {}", summary.dead);
    println!("total       {}", summary.total());
    println!();
    println!("workers are independent OS processes and are not tracked in the store;");
    println!("check your process table (e.g. `pgrep -af 'queuectl.*worker'`).");
    Ok(())
}
