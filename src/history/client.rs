use anyhow::{Context, Result};
use colored::Colorize;
use log::info;
use std::sync::Arc;

use crate::diff::FileDiff;
use crate::remote::{RemoteService, RevertRequest};

use super::types::{HistoryEntry, HistoryPage, OperationType};

/// Result of a revert request.
#[derive(Debug, Clone)]
pub enum RevertOutcome {
    /// Dry run: what the revert would change
    Preview(Vec<FileDiff>),
    /// The new `revert` entry recorded by the server
    Applied(HistoryEntry),
}

/// Read access to the server's history plus revert.
pub struct HistoryLog {
    remote: Arc<dyn RemoteService>,
}

impl HistoryLog {
    pub fn new(remote: Arc<dyn RemoteService>) -> Self {
        Self { remote }
    }

    pub fn log(&self, page: usize, page_size: usize) -> Result<HistoryPage> {
        self.remote
            .history(page, page_size)
            .context("Failed to fetch history")
    }

    pub fn show(&self, id: &str) -> Result<HistoryEntry> {
        self.remote
            .history_entry(id)
            .with_context(|| format!("Failed to fetch history entry {id}"))
    }

    /// Undo history entry `id` on the server.
    ///
    /// The server rebuilds the state the touched files had right before
    /// `id` and records it as a new `revert` entry, so history only grows.
    /// The current project version is sent as the lock token.
    pub fn revert(
        &self,
        id: &str,
        message: Option<&str>,
        actor: &str,
        dry_run: bool,
    ) -> Result<RevertOutcome> {
        let head = self.remote.state().context("Failed to fetch remote state")?;
        let request = RevertRequest {
            base_version: Some(head.project_version),
            message: message.map(str::to_string),
            actor: actor.to_string(),
            dry_run,
        };

        let response = self
            .remote
            .revert(id, &request)
            .with_context(|| format!("Failed to revert {id}"))?;

        match response.entry {
            Some(entry) if !dry_run => {
                info!(
                    "Reverted {} as {} (project version {})",
                    id, entry.id, response.project_version
                );
                Ok(RevertOutcome::Applied(entry))
            }
            _ => Ok(RevertOutcome::Preview(response.preview)),
        }
    }
}

/// Render one history entry, either as a single line or as a detail block.
pub fn format_entry(entry: &HistoryEntry, oneline: bool) -> String {
    let operation = match entry.operation_type {
        OperationType::Push => entry.operation_type.as_str().green(),
        OperationType::Revert => entry.operation_type.as_str().yellow(),
    };
    let counts = format!(
        "+{} ~{} -{}",
        entry.added_count, entry.modified_count, entry.deleted_count
    );

    if oneline {
        return format!(
            "{} {:<6} {} {} {}",
            entry.short_id().cyan(),
            operation,
            counts,
            entry.actor.bold(),
            entry.message.as_deref().unwrap_or("").dimmed()
        );
    }

    let mut out = String::new();
    out.push_str(&format!("{} {}\n", "entry".yellow(), entry.id.yellow()));
    out.push_str(&format!("Operation: {}\n", operation));
    out.push_str(&format!("Author:    {}\n", entry.actor));
    out.push_str(&format!(
        "Date:      {}\n",
        entry.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    out.push_str(&format!("Version:   {}\n", entry.project_version));
    if let Some(parent) = &entry.parent_id {
        out.push_str(&format!("Reverts:   {}\n", parent));
    }
    out.push_str(&format!("Changes:   {}\n", counts));
    if !entry.files.is_empty() {
        out.push_str("Files:\n");
        for file in &entry.files {
            out.push_str(&format!("  {}\n", file));
        }
    }
    if let Some(message) = &entry.message {
        out.push_str(&format!("\n    {}\n", message));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> HistoryEntry {
        HistoryEntry {
            id: "0123456789abcdef".into(),
            timestamp: chrono::Utc::now(),
            operation_type: OperationType::Revert,
            added_count: 1,
            modified_count: 2,
            deleted_count: 0,
            message: Some("Undo bad import".into()),
            actor: "alice".into(),
            parent_id: Some("fedcba".into()),
            project_version: 9,
            files: vec!["locales/fr.json".into()],
        }
    }

    #[test]
    fn test_format_oneline() {
        colored::control::set_override(false);
        let line = format_entry(&entry(), true);
        assert!(line.starts_with("01234567 revert"));
        assert!(line.contains("+1 ~2 -0"));
        assert!(line.contains("Undo bad import"));
        assert!(!line.contains('\n'));
    }

    #[test]
    fn test_format_detail() {
        colored::control::set_override(false);
        let block = format_entry(&entry(), false);
        assert!(block.contains("Reverts:   fedcba"));
        assert!(block.contains("  locales/fr.json"));
        assert!(block.contains("Version:   9"));
    }
}
