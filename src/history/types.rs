use serde::{Deserialize, Serialize};

/// Kind of server-confirmed change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    /// Local changes uploaded to the remote
    Push,
    /// Undo of an earlier entry
    Revert,
}

impl OperationType {
    /// Returns a human-readable string representation
    pub fn as_str(&self) -> &str {
        match self {
            OperationType::Push => "push",
            OperationType::Revert => "revert",
        }
    }
}

/// One record of the remote project's append-only history.
///
/// Identity and ordering belong to the server; the client only reads these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,

    pub timestamp: chrono::DateTime<chrono::Utc>,

    pub operation_type: OperationType,

    pub added_count: usize,
    pub modified_count: usize,
    pub deleted_count: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    pub actor: String,

    /// Entry a revert undid
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    /// Project version after this change
    pub project_version: u64,

    /// Files touched by this change
    #[serde(default)]
    pub files: Vec<String>,
}

impl HistoryEntry {
    /// First 8 characters of the id, for compact listings.
    pub fn short_id(&self) -> &str {
        let end = self.id.char_indices().nth(8).map_or(self.id.len(), |(i, _)| i);
        &self.id[..end]
    }

    pub fn change_count(&self) -> usize {
        self.added_count + self.modified_count + self.deleted_count
    }
}

/// One page of history, newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryPage {
    pub entries: Vec<HistoryEntry>,
    pub page: usize,
    pub page_size: usize,
    pub total: usize,
}

impl HistoryPage {
    pub fn has_more(&self) -> bool {
        self.page.saturating_mul(self.page_size) < self.total
    }
}
