use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entries::ContentHash;

/// One stored version of a language file. Never modified after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRecord {
    /// Monotonically increasing per file, starting at 1
    pub version: u32,

    pub timestamp: DateTime<Utc>,

    /// What triggered the backup (`manual`, `pre-pull`, `pre-restore`, ...)
    pub operation: String,

    pub actor: String,

    pub entry_count: usize,

    /// Keys that differ from the previous version
    pub changed_count: usize,

    /// SHA-256 of the stored blob
    pub hash: ContentHash,

    /// Blob key in the version storage
    pub storage_key: String,
}

/// Ordered index of the retained versions of one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Project-relative file identifier
    pub file: String,

    /// Highest version number ever assigned, kept across pruning
    #[serde(default)]
    pub last_version: u32,

    /// Retained records, ascending by version
    #[serde(default)]
    pub versions: Vec<VersionRecord>,
}

impl Manifest {
    pub fn new(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            last_version: 0,
            versions: Vec::new(),
        }
    }

    pub fn next_version(&self) -> u32 {
        let highest_kept = self.versions.last().map_or(0, |r| r.version);
        self.last_version.max(highest_kept) + 1
    }

    pub fn push(&mut self, record: VersionRecord) {
        self.last_version = self.last_version.max(record.version);
        self.versions.push(record);
    }

    pub fn latest(&self) -> Option<&VersionRecord> {
        self.versions.last()
    }

    pub fn find(&self, version: u32) -> Option<&VersionRecord> {
        self.versions.iter().find(|r| r.version == version)
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    /// Records that fall outside a retention window of `keep`, oldest first.
    ///
    /// The newest record is always retained, so a non-empty manifest never
    /// becomes empty, even with `keep == 0`.
    pub fn rotation_candidates(&self, keep: usize) -> Vec<VersionRecord> {
        let keep = keep.max(1);
        if self.versions.len() <= keep {
            return Vec::new();
        }
        let excess = self.versions.len() - keep;
        self.versions[..excess].to_vec()
    }

    pub fn remove_versions(&mut self, versions: &[u32]) {
        self.versions.retain(|r| !versions.contains(&r.version));
    }
}
