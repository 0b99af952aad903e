use anyhow::Result;
use log::warn;
use std::fs;
use std::path::PathBuf;

use crate::config::ProjectPaths;

/// Delete pull backups beyond the newest `keep`.
///
/// Archive file names start with their UTC timestamp, so lexical order is
/// chronological order.
///
/// # Returns
/// The archives that were (or, with `dry_run`, would be) deleted
pub fn cleanup_pull_backups(
    paths: &ProjectPaths,
    keep: usize,
    dry_run: bool,
) -> Result<Vec<PathBuf>> {
    let dir = paths.pull_backups_dir();
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut archives: Vec<PathBuf> = fs::read_dir(&dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
        .collect();

    // Newest first
    archives.sort();
    archives.reverse();

    let to_delete: Vec<PathBuf> = archives.into_iter().skip(keep).collect();

    if !dry_run {
        for path in &to_delete {
            if let Err(e) = fs::remove_file(path) {
                warn!("Failed to delete pull backup {}: {}", path.display(), e);
            }
        }
    }

    Ok(to_delete)
}
