use anyhow::Result;

use super::Ctx;

pub fn get(ctx: &Ctx) -> Result<()> {
    let config = ctx.load_config()?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

pub fn set(ctx: &Ctx, key: &str, value: &str) -> Result<()> {
    let mut config = ctx.load_config()?;
    config.set(key, value)?;
    config.save(&ctx.config_path)?;
    println!("set {key} = {value} (takes effect on the next worker launch)");
    Ok(())
}
