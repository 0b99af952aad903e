//! The remote sync service.
//!
//! [`RemoteService`] is the seam between the sync client and the server. The
//! server owns the authoritative copy of every file, the project version used
//! for optimistic locking, the history and the snapshots.

mod http;
mod memory;
mod retry;

pub use http::HttpRemote;
pub use memory::InMemoryRemote;
pub use retry::RetryPolicy;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::diff::FileDiff;
use crate::entries::{ContentHash, EntrySet};
use crate::history::{HistoryEntry, HistoryPage};
use crate::snapshot::{Snapshot, SnapshotPage};

/// Full content of one language file on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilePayload {
    pub path: String,
    pub entries: EntrySet,
}

impl FilePayload {
    pub fn new(path: impl Into<String>, entries: EntrySet) -> Self {
        Self {
            path: path.into(),
            entries,
        }
    }

    pub fn hash(&self) -> ContentHash {
        self.entries.content_hash()
    }
}

/// Who last changed a remote file, and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub updated_by: String,
}

/// Hashes of everything the server holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteState {
    pub project_version: u64,
    #[serde(default)]
    pub files: BTreeMap<String, ContentHash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_hash: Option<ContentHash>,
    #[serde(default)]
    pub file_meta: BTreeMap<String, FileMeta>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushRequest {
    /// Project version the client last synced with
    pub base_version: u64,
    pub files: Vec<FilePayload>,
    #[serde(default)]
    pub deleted: Vec<String>,
    /// Configuration document, when it changed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub actor: String,
    /// Skip the optimistic lock check
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushResponse {
    pub project_version: u64,
    pub history: HistoryEntry,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PullRequest {
    /// Only include entries in this workflow state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_filter: Option<String>,
    #[serde(default)]
    pub config_only: bool,
    #[serde(default)]
    pub resources_only: bool,
}

/// Full file snapshots; the server never sends partial files.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PullResponse {
    pub project_version: u64,
    #[serde(default)]
    pub files: Vec<FilePayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<String>,
    #[serde(default)]
    pub file_meta: BTreeMap<String, FileMeta>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevertRequest {
    /// Lock check as for pushes; `None` skips it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_version: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub actor: String,
    #[serde(default)]
    pub dry_run: bool,
}

/// Either a preview of what the revert would change or the recorded entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RevertResponse {
    pub project_version: u64,
    #[serde(default)]
    pub preview: Vec<FileDiff>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<HistoryEntry>,
}

/// Operations the sync client needs from the server.
pub trait RemoteService: Send + Sync {
    fn state(&self) -> Result<RemoteState>;

    /// Fails with `VersionMismatch` when `base_version` is stale and
    /// `force` is not set.
    fn push(&self, request: &PushRequest) -> Result<PushResponse>;

    fn pull(&self, request: &PullRequest) -> Result<PullResponse>;

    /// Newest first; pages start at 1.
    fn history(&self, page: usize, page_size: usize) -> Result<HistoryPage>;

    fn history_entry(&self, id: &str) -> Result<HistoryEntry>;

    fn revert(&self, id: &str, request: &RevertRequest) -> Result<RevertResponse>;

    fn create_snapshot(&self, message: Option<&str>, actor: &str) -> Result<Snapshot>;

    fn list_snapshots(&self, page: usize, page_size: usize) -> Result<SnapshotPage>;

    fn get_snapshot(&self, id: &str) -> Result<Snapshot>;

    fn delete_snapshot(&self, id: &str) -> Result<()>;
}
