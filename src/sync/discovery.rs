use anyhow::{Context, Result};
use colored::Colorize;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::backend::ResourceBackend;
use crate::config::{ProjectPaths, STATE_DIR};
use crate::entries::{ContentHash, EntrySet};
use crate::filter::ResourceFilter;

/// Threshold for warning about large resource files (10 MB)
pub(crate) const LARGE_FILE_WARNING_THRESHOLD: u64 = 10 * 1024 * 1024;

/// A language file as it currently is on disk.
#[derive(Debug, Clone)]
pub struct LocalFile {
    pub path: String,
    pub entries: EntrySet,
    pub hash: ContentHash,
    pub modified: Option<chrono::DateTime<chrono::Utc>>,
}

/// Walk the resource directory and return the project-relative paths the
/// filter accepts, sorted.
pub(crate) fn list_resource_files(
    paths: &ProjectPaths,
    resource_dir: &Path,
    filter: &ResourceFilter,
) -> Result<Vec<(String, PathBuf)>> {
    if !resource_dir.exists() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(resource_dir)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.file_name() != STATE_DIR)
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if !entry.file_type().is_file() || !ResourceFilter::is_resource_file(path) {
            continue;
        }
        let rel = paths.relative(path)?;
        if filter.should_include(&rel) {
            files.push((rel, path.to_path_buf()));
        }
    }
    files.sort();
    Ok(files)
}

/// Read and hash every resource file, in parallel.
///
/// A file that cannot be parsed fails the whole discovery: skipping it
/// would make it look deleted to the sync client.
pub(crate) fn discover_resources(
    paths: &ProjectPaths,
    resource_dir: &Path,
    filter: &ResourceFilter,
    backend: &dyn ResourceBackend,
) -> Result<BTreeMap<String, LocalFile>> {
    let files = list_resource_files(paths, resource_dir, filter)?;
    warn_large_files(files.iter().map(|(_, path)| path));

    let loaded: Result<Vec<LocalFile>> = files
        .par_iter()
        .map(|(rel, path)| {
            let entries = backend
                .read_entry_set(path)
                .with_context(|| format!("Failed to read resource file {rel}"))?;
            let hash = entries.content_hash();
            let modified = fs::metadata(path)
                .and_then(|m| m.modified())
                .ok()
                .map(chrono::DateTime::<chrono::Utc>::from);
            Ok(LocalFile {
                path: rel.clone(),
                entries,
                hash,
                modified,
            })
        })
        .collect();

    let loaded = loaded?;
    log::debug!("Discovered {} resource file(s)", loaded.len());
    Ok(loaded.into_iter().map(|file| (file.path.clone(), file)).collect())
}

/// Check for large resource files and emit warnings
pub(crate) fn warn_large_files<P, I>(file_paths: I)
where
    P: AsRef<Path>,
    I: IntoIterator<Item = P>,
{
    for path in file_paths {
        let path = path.as_ref();

        if let Ok(metadata) = fs::metadata(path) {
            let size = metadata.len();

            if size >= LARGE_FILE_WARNING_THRESHOLD {
                let size_mb = size as f64 / (1024.0 * 1024.0);
                println!(
                    "  {} Large resource file detected: {} ({:.1} MB)",
                    "⚠️ ".yellow().bold(),
                    path.file_name()
                        .and_then(|n| n.to_str())
                        .unwrap_or("unknown"),
                    size_mb
                );
            }
        }
    }
}
