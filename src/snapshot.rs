//! User-named checkpoints of the whole remote project.
//!
//! Snapshots are created, stored and deleted by the server and are never
//! rotated automatically. Restoring one makes the local working copy match
//! it: snapshot files are written, resource files it does not contain are
//! removed and its configuration document replaces `lrm.toml`. Every live
//! file that changes is versioned first; a following push makes the restored
//! state the remote head.

use anyhow::{Context, Result};
use std::fs;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use crate::backend::ResourceBackend;
use crate::backup::{LocalVersionStore, VersionRecord};
use crate::config::PROJECT_CONFIG_FILE;
use crate::context::SyncContext;
use crate::diff::{diff_optional, FileDiff};
use crate::entries::EntrySet;
use crate::filter::ResourceFilter;
use crate::remote::{FilePayload, RemoteService};
use crate::sync::list_resource_files;

/// Full project content at the moment the snapshot was taken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub actor: String,
    pub project_version: u64,
    pub files: Vec<FilePayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<String>,
}

impl Snapshot {
    fn by_path(&self) -> BTreeMap<&str, &EntrySet> {
        self.files
            .iter()
            .map(|file| (file.path.as_str(), &file.entries))
            .collect()
    }

    pub fn entry_count(&self) -> usize {
        self.files.iter().map(|file| file.entries.len()).sum()
    }
}

/// Listing row; the bundle itself is fetched with `show`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotSummary {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub actor: String,
    pub project_version: u64,
    pub file_count: usize,
}

/// One page of snapshots, newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotPage {
    pub snapshots: Vec<SnapshotSummary>,
    pub page: usize,
    pub page_size: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Default)]
pub struct SnapshotRestoreOutcome {
    /// Files written from the snapshot
    pub written: Vec<String>,
    /// Files already identical to the snapshot
    pub unchanged: Vec<String>,
    /// Resource files the snapshot does not contain, removed
    pub deleted: Vec<String>,
    /// Whether `lrm.toml` was replaced by the snapshot's copy
    pub config_written: bool,
    /// Versions taken before overwriting or removing
    pub pre_restore: Vec<VersionRecord>,
}

/// Compare two snapshot bundles file by file.
///
/// Files present in only one bundle diff against an empty set. Files with no
/// differences are left out.
pub fn diff_snapshots(from: &Snapshot, to: &Snapshot) -> Vec<FileDiff> {
    let before = from.by_path();
    let after = to.by_path();
    let paths: BTreeSet<&str> = before.keys().chain(after.keys()).copied().collect();

    paths
        .into_iter()
        .filter_map(|path| {
            let old = before.get(path).copied();
            let new = after.get(path).copied();
            let language = new.or(old).map(|s| s.language_code.as_str()).unwrap_or_default();
            let diff = diff_optional(language, old, new);
            (!diff.is_empty()).then(|| FileDiff {
                path: path.to_string(),
                diff,
            })
        })
        .collect()
}

/// Thin client over the server's snapshot endpoints plus local restore.
pub struct SnapshotManager {
    remote: Arc<dyn RemoteService>,
}

impl SnapshotManager {
    pub fn new(remote: Arc<dyn RemoteService>) -> Self {
        Self { remote }
    }

    pub fn create(&self, message: Option<&str>, actor: &str) -> Result<Snapshot> {
        let snapshot = self
            .remote
            .create_snapshot(message, actor)
            .context("Failed to create snapshot")?;
        info!(
            "Created snapshot {} at project version {} ({} files)",
            snapshot.id,
            snapshot.project_version,
            snapshot.files.len()
        );
        Ok(snapshot)
    }

    pub fn list(&self, page: usize, page_size: usize) -> Result<SnapshotPage> {
        self.remote.list_snapshots(page, page_size)
    }

    pub fn show(&self, id: &str) -> Result<Snapshot> {
        self.remote.get_snapshot(id)
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        self.remote
            .delete_snapshot(id)
            .with_context(|| format!("Failed to delete snapshot {id}"))?;
        info!("Deleted snapshot {}", id);
        Ok(())
    }

    pub fn diff(&self, from_id: &str, to_id: &str) -> Result<Vec<FileDiff>> {
        let from = self.show(from_id)?;
        let to = self.show(to_id)?;
        Ok(diff_snapshots(&from, &to))
    }

    /// Make the working copy match the snapshot.
    ///
    /// Every target path is validated and every existing file that would
    /// change or be removed is versioned (`pre-restore`) before the first
    /// write. Sync state is left alone, so the result shows up as local
    /// changes.
    pub fn restore(
        &self,
        id: &str,
        ctx: &SyncContext,
        store: &LocalVersionStore,
        backend: &Arc<dyn ResourceBackend>,
    ) -> Result<SnapshotRestoreOutcome> {
        let snapshot = self.show(id)?;
        let mut outcome = SnapshotRestoreOutcome::default();
        let read_live = |rel: &str| -> Result<Option<EntrySet>> {
            let live_path = ctx.paths.resolve(rel);
            if !live_path.exists() {
                return Ok(None);
            }
            backend
                .read_entry_set(&live_path)
                .map(Some)
                .with_context(|| format!("Failed to read {rel}"))
        };

        let mut in_snapshot = BTreeSet::new();
        let mut to_write = Vec::new();
        for file in &snapshot.files {
            let rel = ctx.paths.relative(Path::new(&file.path))?;
            in_snapshot.insert(rel.clone());
            let live = read_live(&rel)?;
            if live.as_ref() == Some(&file.entries) {
                outcome.unchanged.push(rel);
                continue;
            }
            to_write.push((rel, live, &file.entries));
        }

        let filter = ResourceFilter::from_config(&ctx.config.resources);
        let mut to_delete = Vec::new();
        let resource_dir = ctx.config.resource_dir(&ctx.paths);
        for (rel, _) in list_resource_files(&ctx.paths, &resource_dir, &filter)? {
            if in_snapshot.contains(&rel) {
                continue;
            }
            let live = read_live(&rel)?;
            to_delete.push((rel, live));
        }

        let config = match &snapshot.config {
            Some(document) => {
                let current = match fs::read_to_string(ctx.paths.config_file()) {
                    Ok(content) => Some(content),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
                    Err(e) => {
                        return Err(e).with_context(|| format!("Failed to read {PROJECT_CONFIG_FILE}"))
                    }
                };
                (current.as_ref() != Some(document)).then_some(document)
            }
            None => None,
        };

        let existing = to_write
            .iter()
            .map(|(rel, live, _)| (rel, live))
            .chain(to_delete.iter().map(|(rel, live)| (rel, live)));
        for (rel, live) in existing {
            if let Some(live) = live {
                let record = store
                    .create_version_of(rel, live, "pre-restore", &ctx.actor)
                    .with_context(|| format!("Failed to back up {rel} before snapshot restore"))?;
                outcome.pre_restore.push(record);
            }
        }

        let mut applied: Vec<String> = Vec::new();
        for (rel, _, entries) in to_write {
            ctx.cancel.check(&applied)?;
            backend
                .write_entry_set(entries, &ctx.paths.resolve(&rel))
                .with_context(|| format!("Failed to write {rel}"))?;
            applied.push(rel.clone());
            outcome.written.push(rel);
        }

        for (rel, _) in to_delete {
            ctx.cancel.check(&applied)?;
            match fs::remove_file(ctx.paths.resolve(&rel)) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e).with_context(|| format!("Failed to delete {rel}")),
            }
            applied.push(rel.clone());
            outcome.deleted.push(rel);
        }

        if let Some(document) = config {
            ctx.cancel.check(&applied)?;
            fs::write(ctx.paths.config_file(), document)
                .with_context(|| format!("Failed to write {PROJECT_CONFIG_FILE}"))?;
            outcome.config_written = true;
        }

        info!(
            "Restored snapshot {}: {} written, {} deleted, {} unchanged",
            snapshot.id,
            outcome.written.len(),
            outcome.deleted.len(),
            outcome.unchanged.len()
        );
        Ok(outcome)
    }
}
