use anyhow::Result;

use queuectl_core::QueueError;

use super::Ctx;

pub async fn run(ctx: &Ctx, id: &str, tail: usize) -> Result<()> {
    // Resolve through the store so an unknown id is exit code 5, not a
    // confusing missing-file message.
    let store = ctx.open_store().await?;
    let job = store
        .get(id)
        .await?
        .ok_or_else(|| QueueError::NotFound(id.to_string()))?;

    let path = job.log_path(&ctx.logs_dir);
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            println!("(no log output yet for job '{id}')");
            return Ok(());
        }
        Err(e) => return Err(anyhow::anyhow!("read {}: {e}", path.display())),
    };

    let lines: Vec<&str> = contents.lines().collect();
    for line in lines.iter().skip(lines.len().saturating_sub(tail)) {
        println!("{line}");
    }
    Ok(())
}
