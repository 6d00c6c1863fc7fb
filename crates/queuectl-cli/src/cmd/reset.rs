//! `reset`: confirm, snapshot everything into `backup_<timestamp>/`, wipe
//! the database (with its WAL sidecars) and the logs directory, then
//! reinitialize an empty schema.

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;

use super::Ctx;

pub async fn run(ctx: &Ctx, yes: bool) -> Result<()> {
    if !yes && !confirm(ctx)? {
        println!("reset aborted");
        return Ok(());
    }

    let stamp = Utc::now().format("%Y%m%dT%H%M%SZ");
    let backup_dir = PathBuf::from(format!("backup_{stamp}"));
    std::fs::create_dir_all(&backup_dir)
        .with_context(|| format!("create {}", backup_dir.display()))?;

    for path in db_files(&ctx.db) {
        if path.exists() {
            let name = path.file_name().map(|n| n.to_owned()).unwrap_or_default();
            std::fs::copy(&path, backup_dir.join(name))
                .with_context(|| format!("back up {}", path.display()))?;
        }
    }
    if ctx.logs_dir.exists() {
        copy_dir(&ctx.logs_dir, &backup_dir.join("logs"))?;
    }

    for path in db_files(&ctx.db) {
        if path.exists() {
            std::fs::remove_file(&path).with_context(|| format!("remove {}", path.display()))?;
        }
    }
    if ctx.logs_dir.exists() {
        std::fs::remove_dir_all(&ctx.logs_dir)
            .with_context(|| format!("remove {}", ctx.logs_dir.display()))?;
    }

    // Reinitialize an empty schema so the next command starts clean.
    ctx.open_store().await?;

    println!("queue reset; previous state saved to {}", backup_dir.display());
    Ok(())
}

fn confirm(ctx: &Ctx) -> Result<bool> {
    eprint!(
        "this deletes {} and {}; type 'yes' to continue: ",
        ctx.db.display(),
        ctx.logs_dir.display()
    );
    std::io::stderr().flush().ok();

    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("read confirmation")?;
    Ok(line.trim() == "yes")
}

/// The database file plus the WAL sidecars SQLite keeps next to it.
fn db_files(db: &Path) -> Vec<PathBuf> {
    let base = db.as_os_str().to_string_lossy().into_owned();
    vec![
        db.to_path_buf(),
        PathBuf::from(format!("{base}-wal")),
        PathBuf::from(format!("{base}-shm")),
    ]
}

fn copy_dir(src: &Path, dst: &Path) -> Result<()> {
    std::fs::create_dir_all(dst).with_context(|| format!("create {}", dst.display()))?;
    for entry in std::fs::read_dir(src).with_context(|| format!("read {}", src.display()))? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)
                .with_context(|| format!("back up {}", entry.path().display()))?;
        }
    }
    Ok(())
}
