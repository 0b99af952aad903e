use anyhow::{Context, Result};
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;

use crate::backend::ResourceBackend;
use crate::config::ProjectPaths;
use crate::diff::{diff_entry_sets, DiffResult};
use crate::entries::{ContentHash, EntrySet};
use crate::error::LrmError;

use super::manifest::{Manifest, VersionRecord};
use super::storage::VersionStorage;

const MANIFEST_NAME: &str = "manifest.json";

/// Right-hand side of a version diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffTarget {
    Version(u32),
    /// The live file on disk
    Current,
}

#[derive(Debug, Clone)]
pub struct RestoreOptions {
    /// Take a `pre-restore` version of the live file first
    pub backup: bool,
    pub actor: String,
}

impl RestoreOptions {
    pub fn new(actor: impl Into<String>) -> Self {
        Self {
            backup: true,
            actor: actor.into(),
        }
    }

    pub fn without_backup(mut self) -> Self {
        self.backup = false;
        self
    }
}

#[derive(Debug, Clone)]
pub struct RestoreOutcome {
    /// Entry set written to the live file
    pub applied: EntrySet,
    pub restored_keys: Vec<String>,
    /// Version taken of the live file before it was overwritten
    pub pre_restore: Option<VersionRecord>,
}

/// A version record together with its verified content.
#[derive(Debug, Clone)]
pub struct VersionInfo {
    pub record: VersionRecord,
    pub entries: EntrySet,
}

/// Per-file history of entry-set snapshots.
///
/// Every destructive operation on a language file goes through
/// [`LocalVersionStore::create_version`] first, so the previous content can
/// always be brought back. Stored blobs are checked against their recorded
/// hash on every read.
pub struct LocalVersionStore {
    paths: ProjectPaths,
    storage: Box<dyn VersionStorage>,
    backend: Arc<dyn ResourceBackend>,
    retention: usize,
}

impl LocalVersionStore {
    pub fn new(
        paths: ProjectPaths,
        storage: Box<dyn VersionStorage>,
        backend: Arc<dyn ResourceBackend>,
        retention: usize,
    ) -> Self {
        Self {
            paths,
            storage,
            backend,
            retention,
        }
    }

    pub fn retention(&self) -> usize {
        self.retention
    }

    pub fn paths(&self) -> &ProjectPaths {
        &self.paths
    }

    fn manifest_key(file: &str) -> String {
        format!("{file}/{MANIFEST_NAME}")
    }

    fn blob_key(file: &str, version: u32) -> String {
        format!("{file}/v{version:04}.json")
    }

    /// Manifest for a file; empty if the file was never backed up.
    pub fn load_manifest(&self, file: &str) -> Result<Manifest> {
        let Some(bytes) = self.storage.get(&Self::manifest_key(file))? else {
            return Ok(Manifest::new(file));
        };

        serde_json::from_slice(&bytes).map_err(|e| {
            LrmError::ManifestCorrupted {
                file: file.to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    fn save_manifest(&self, manifest: &Manifest) -> Result<()> {
        let json = serde_json::to_vec_pretty(manifest).context("Failed to serialize manifest")?;
        self.storage
            .put(&Self::manifest_key(&manifest.file), &json)
            .with_context(|| format!("Failed to save manifest for {}", manifest.file))
    }

    fn non_empty_manifest(&self, file: &str) -> Result<Manifest> {
        let manifest = self.load_manifest(file)?;
        if manifest.is_empty() {
            return Err(LrmError::EmptyManifest {
                file: file.to_string(),
            }
            .into());
        }
        Ok(manifest)
    }

    fn find_record(manifest: &Manifest, version: u32) -> Result<VersionRecord> {
        manifest.find(version).cloned().ok_or_else(|| {
            LrmError::VersionNotFound {
                file: manifest.file.clone(),
                version,
            }
            .into()
        })
    }

    /// Load a stored version, refusing blobs whose hash does not match.
    fn read_verified(&self, file: &str, record: &VersionRecord) -> Result<EntrySet> {
        let corrupted = |actual: String| LrmError::BackupCorrupted {
            file: file.to_string(),
            version: record.version,
            expected: record.hash.to_string(),
            actual,
        };

        let bytes = self
            .storage
            .get(&record.storage_key)?
            .ok_or_else(|| corrupted("missing blob".to_string()))?;

        let actual = ContentHash::of_bytes(&bytes);
        if actual != record.hash {
            return Err(corrupted(actual.to_string()).into());
        }

        EntrySet::from_canonical_bytes(&bytes).map_err(|_| corrupted(actual.to_string()).into())
    }

    fn read_live(&self, file: &str) -> Result<EntrySet> {
        self.backend.read_entry_set(&self.paths.resolve(file))
    }

    /// Snapshot the current on-disk content of `file`.
    pub fn create_version(&self, file: &Path, operation: &str, actor: &str) -> Result<VersionRecord> {
        let rel = self.paths.relative(file)?;
        let current = self
            .read_live(&rel)
            .with_context(|| format!("Failed to read {rel} for backup"))?;
        self.create_version_of(&rel, &current, operation, actor)
    }

    /// Record `content` as the newest version of `file`.
    pub(crate) fn create_version_of(
        &self,
        file: &str,
        content: &EntrySet,
        operation: &str,
        actor: &str,
    ) -> Result<VersionRecord> {
        let mut manifest = self.load_manifest(file)?;
        let bytes = content.canonical_bytes();
        let hash = ContentHash::of_bytes(&bytes);

        let changed_count = match manifest.latest() {
            None => content.len(),
            Some(previous) if previous.hash == hash => 0,
            Some(previous) => match self.read_verified(file, previous) {
                Ok(before) => diff_entry_sets(&before, content, false).change_count(),
                Err(e) => {
                    log::warn!("Could not compare with version {} of {}: {}", previous.version, file, e);
                    content.len()
                }
            },
        };

        let version = manifest.next_version();
        let storage_key = Self::blob_key(file, version);

        // Blob before manifest: a crash leaves an orphan blob, never a dangling record
        self.storage
            .put(&storage_key, &bytes)
            .with_context(|| format!("Failed to store version {version} of {file}"))?;

        let record = VersionRecord {
            version,
            timestamp: Utc::now(),
            operation: operation.to_string(),
            actor: actor.to_string(),
            entry_count: content.len(),
            changed_count,
            hash,
            storage_key,
        };
        manifest.push(record.clone());

        let rotated = manifest.rotation_candidates(self.retention);
        if !rotated.is_empty() {
            let numbers: Vec<u32> = rotated.iter().map(|r| r.version).collect();
            manifest.remove_versions(&numbers);
        }
        self.save_manifest(&manifest)?;

        for old in &rotated {
            if let Err(e) = self.storage.delete(&old.storage_key) {
                log::warn!("Failed to delete rotated version {} of {}: {}", old.version, file, e);
            }
        }

        log::info!(
            "Backed up {} as version {} ({}, {} entries, {} changed)",
            file,
            version,
            operation,
            record.entry_count,
            changed_count
        );
        Ok(record)
    }

    /// Retained versions, ascending.
    pub fn list_versions(&self, file: &Path) -> Result<Vec<VersionRecord>> {
        let rel = self.paths.relative(file)?;
        Ok(self.load_manifest(&rel)?.versions)
    }

    pub fn latest_version(&self, file: &Path) -> Result<Option<VersionRecord>> {
        let rel = self.paths.relative(file)?;
        Ok(self.load_manifest(&rel)?.latest().cloned())
    }

    /// Files that have at least a manifest in storage.
    pub fn tracked_files(&self) -> Result<Vec<String>> {
        let suffix = format!("/{MANIFEST_NAME}");
        Ok(self
            .storage
            .list("")?
            .into_iter()
            .filter_map(|key| key.strip_suffix(&suffix).map(str::to_string))
            .collect())
    }

    /// Verified content of one version.
    pub fn info(&self, file: &Path, version: u32) -> Result<VersionInfo> {
        let rel = self.paths.relative(file)?;
        let manifest = self.non_empty_manifest(&rel)?;
        let record = Self::find_record(&manifest, version)?;
        let entries = self.read_verified(&rel, &record)?;
        Ok(VersionInfo { record, entries })
    }

    pub fn diff(&self, file: &Path, version: u32, target: DiffTarget) -> Result<DiffResult> {
        let rel = self.paths.relative(file)?;
        let manifest = self.non_empty_manifest(&rel)?;

        let before_record = Self::find_record(&manifest, version)?;
        let before = self.read_verified(&rel, &before_record)?;

        let after = match target {
            DiffTarget::Version(other) => {
                let record = Self::find_record(&manifest, other)?;
                self.read_verified(&rel, &record)?
            }
            DiffTarget::Current => self.read_live(&rel)?,
        };

        Ok(diff_entry_sets(&before, &after, false))
    }

    /// Bring back a stored version, fully or for the given keys only.
    ///
    /// Everything is validated (manifest, version, integrity, keys) before
    /// the live file is touched.
    pub fn restore(
        &self,
        file: &Path,
        version: u32,
        keys: Option<&[String]>,
        options: &RestoreOptions,
    ) -> Result<RestoreOutcome> {
        let rel = self.paths.relative(file)?;
        let live_path = self.paths.resolve(&rel);
        let manifest = self.non_empty_manifest(&rel)?;
        let record = Self::find_record(&manifest, version)?;
        let target = self.read_verified(&rel, &record)?;

        let (applied, restored_keys) = match keys {
            Some(keys) => {
                let mut picked = Vec::with_capacity(keys.len());
                for key in keys {
                    let entry = target.get(key).ok_or_else(|| LrmError::KeyNotInVersion {
                        key: key.clone(),
                        version,
                    })?;
                    picked.push(entry.clone());
                }

                let mut merged = if live_path.exists() {
                    self.read_live(&rel)?
                } else {
                    EntrySet::new(target.language_code.clone())
                };
                let restored: Vec<String> = picked.iter().map(|e| e.key.clone()).collect();
                for entry in picked {
                    merged.upsert(entry);
                }
                (merged, restored)
            }
            None => {
                let restored: Vec<String> = target.iter().map(|e| e.key.clone()).collect();
                (target, restored)
            }
        };

        let pre_restore = if options.backup && live_path.exists() {
            Some(
                self.create_version(Path::new(&rel), "pre-restore", &options.actor)
                    .context("Failed to back up live file before restore")?,
            )
        } else {
            None
        };

        self.backend
            .write_entry_set(&applied, &live_path)
            .with_context(|| format!("Failed to write restored {rel}"))?;

        log::info!(
            "Restored {} key(s) of {} from version {}",
            restored_keys.len(),
            rel,
            version
        );

        Ok(RestoreOutcome {
            applied,
            restored_keys,
            pre_restore,
        })
    }

    /// Versions outside a retention window of `keep`, oldest first.
    /// Nothing is deleted when `dry_run` is set.
    pub fn prune(&self, file: &Path, keep: usize, dry_run: bool) -> Result<Vec<VersionRecord>> {
        let rel = self.paths.relative(file)?;
        let mut manifest = self.load_manifest(&rel)?;
        let removable = manifest.rotation_candidates(keep);

        if dry_run || removable.is_empty() {
            return Ok(removable);
        }

        let numbers: Vec<u32> = removable.iter().map(|r| r.version).collect();
        manifest.remove_versions(&numbers);
        self.save_manifest(&manifest)?;

        for record in &removable {
            self.storage.delete(&record.storage_key)?;
        }

        log::info!("Pruned {} version(s) of {}", removable.len(), rel);
        Ok(removable)
    }
}
