//! Last-id state files.
//!
//! Each resource keeps an append-only text file with one identifier per
//! line. The last non-empty line is the "last id". Files are never truncated
//! or rotated, and there is no locking: one writer at a time.

use std::path::Path;

use anyhow::{Context, Result};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Append `id` to the state file, creating it if needed
pub async fn persist_last_id(path: &Path, id: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create state directory: {}", parent.display()))?;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .with_context(|| format!("Failed to open state file: {}", path.display()))?;

    file.write_all(format!("{}\n", id).as_bytes())
        .await
        .with_context(|| format!("Failed to write state file: {}", path.display()))?;
    file.flush().await.context("Failed to flush state file")?;

    Ok(())
}

/// Read the most recently appended id, if any
pub async fn read_last_id(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read state file: {}", path.display()))?;

    Ok(content
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string))
}

/// Use `explicit` when given and non-empty, otherwise the state file's last id
pub async fn resolve_id(explicit: Option<String>, path: &Path) -> Result<Option<String>> {
    match explicit.filter(|id| !id.trim().is_empty()) {
        Some(id) => Ok(Some(id)),
        None => read_last_id(path).await,
    }
}
