use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::config::{ProjectPaths, PROJECT_CONFIG_FILE};

use super::{LocalVersionStore, VersionRecord};

/// Raw bytes of every local file a pull is about to overwrite or delete.
///
/// Complements the per-file versions in the [`super::LocalVersionStore`]:
/// the archive also covers the configuration document and files the
/// resource backend cannot parse, and it captures the whole pull in one
/// place so it can be put back in one step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullBackupArchive {
    pub archive_id: String,

    pub timestamp: chrono::DateTime<chrono::Utc>,

    /// Remote project version the pull was going to apply
    pub remote_version: u64,

    /// Project-relative path to file content
    ///
    /// Bytes are stored as base64 strings so the archive stays plain JSON.
    #[serde(with = "base64_map")]
    pub files: BTreeMap<String, Vec<u8>>,

    /// Files the pull was about to create; undoing the pull removes them
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub created: Vec<String>,
}

/// What undoing a pull changed in the working copy.
#[derive(Debug, Clone, Default)]
pub struct PullUndoOutcome {
    /// Files written back with their pre-pull bytes
    pub restored: Vec<String>,
    /// Files the pull had created, now removed
    pub removed: Vec<String>,
    /// Versions taken of the live files before they were replaced
    pub pre_restore: Vec<VersionRecord>,
}

/// Custom serialization for `BTreeMap<String, Vec<u8>>` using base64 encoding
mod base64_map {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<S>(map: &BTreeMap<String, Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let encoded: BTreeMap<&String, String> =
            map.iter().map(|(k, v)| (k, STANDARD.encode(v))).collect();
        encoded.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<BTreeMap<String, Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded: BTreeMap<String, String> = BTreeMap::deserialize(deserializer)?;
        encoded
            .into_iter()
            .map(|(k, v)| {
                STANDARD
                    .decode(&v)
                    .map(|bytes| (k, bytes))
                    .map_err(serde::de::Error::custom)
            })
            .collect()
    }
}

impl PullBackupArchive {
    /// Capture the current bytes of the given project-relative files.
    ///
    /// Files that do not exist yet are listed in `created` instead.
    pub fn capture<I, S>(paths: &ProjectPaths, files: I, remote_version: u64) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut captured = BTreeMap::new();
        let mut created = Vec::new();
        for rel in files {
            let rel = rel.as_ref();
            let path = paths.resolve(rel);

            // Read directly instead of checking existence first to avoid TOCTOU
            match fs::read(&path) {
                Ok(content) => {
                    captured.insert(rel.to_string(), content);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    created.push(rel.to_string());
                }
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("Failed to read file for pull backup: {}", path.display())
                    });
                }
            }
        }

        Ok(Self {
            archive_id: Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now(),
            remote_version,
            files: captured,
            created,
        })
    }

    /// True when the archive holds nothing to put back or remove.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.created.is_empty()
    }

    fn file_name(&self) -> String {
        format!(
            "{}-{}.json",
            self.timestamp.format("%Y%m%dT%H%M%S%3fZ"),
            self.archive_id.chars().take(8).collect::<String>()
        )
    }

    /// Write the archive into `.lrm/pull-backups/`.
    pub fn save(&self, paths: &ProjectPaths) -> Result<PathBuf> {
        let dir = paths.pull_backups_dir();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create pull backup directory: {}", dir.display()))?;

        let archive_path = dir.join(self.file_name());
        let json = serde_json::to_string_pretty(self).context("Failed to serialize pull backup")?;
        fs::write(&archive_path, &json)
            .with_context(|| format!("Failed to write pull backup: {}", archive_path.display()))?;

        log::info!(
            "Created pull backup {} ({} files, {:.1} KB)",
            archive_path.display(),
            self.files.len(),
            json.len() as f64 / 1024.0
        );

        Ok(archive_path)
    }

    pub fn load(archive_path: &Path) -> Result<Self> {
        let content = fs::read_to_string(archive_path).with_context(|| {
            format!("Failed to read pull backup: {}", archive_path.display())
        })?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse pull backup: {}", archive_path.display()))
    }

    /// Put the working copy back to how it was before the pull.
    ///
    /// Archived files are rewritten with their captured bytes and files the
    /// pull created are removed. Every live resource file about to change is
    /// versioned (`pre-restore`) before the first write, so the undo can
    /// itself be undone.
    pub fn restore(
        &self,
        paths: &ProjectPaths,
        store: &LocalVersionStore,
        actor: &str,
    ) -> Result<PullUndoOutcome> {
        for rel in self.files.keys().chain(&self.created) {
            if rel.split('/').any(|part| part == ".." || part.is_empty()) {
                return Err(anyhow!(
                    "Security: refusing to restore {} outside the project root",
                    rel
                ));
            }
        }

        let mut outcome = PullUndoOutcome::default();
        for rel in self.files.keys().chain(&self.created) {
            let live = paths.resolve(rel);
            if rel == PROJECT_CONFIG_FILE || !live.exists() {
                continue;
            }
            let record = store
                .create_version(&live, "pre-restore", actor)
                .with_context(|| format!("Failed to back up {rel}; nothing was restored"))?;
            outcome.pre_restore.push(record);
        }

        for (rel, content) in &self.files {
            let path = paths.resolve(rel);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
            }
            fs::write(&path, content)
                .with_context(|| format!("Failed to restore file: {}", path.display()))?;
            outcome.restored.push(rel.clone());
        }

        for rel in &self.created {
            let path = paths.resolve(rel);
            match fs::remove_file(&path) {
                Ok(()) => outcome.removed.push(rel.clone()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("Failed to remove file: {}", path.display()))
                }
            }
        }

        log::info!(
            "Undid pull {}: {} restored, {} removed",
            self.archive_id,
            outcome.restored.len(),
            outcome.removed.len()
        );
        Ok(outcome)
    }
}
