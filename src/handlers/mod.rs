//! Command handler modules
//!
//! Each handler prints its own report and returns a [`CommandStatus`] that
//! `main` turns into the process exit code.

pub mod backup;
pub mod history;
pub mod snapshot;
pub mod sync;

use anyhow::{Context, Result};
use colored::Colorize;
use std::path::Path;
use std::sync::Arc;

use crate::backend::JsonBackend;
use crate::conflict::Conflict;
use crate::context::SyncContext;
use crate::diff::FileDiff;
use crate::interactive_conflict::{self, print_entry_diff};
use crate::sync::{connect_remote, SyncClient};

pub use backup::{
    handle_backup_create, handle_backup_diff, handle_backup_info, handle_backup_list,
    handle_backup_prune, handle_backup_restore, handle_undo_pull,
};
pub use history::{handle_log, handle_revert, handle_show};
pub use snapshot::{
    handle_snapshot_create, handle_snapshot_delete, handle_snapshot_diff, handle_snapshot_list,
    handle_snapshot_restore, handle_snapshot_show,
};
pub use sync::{handle_init, handle_pull, handle_push, handle_status};

/// How a command finished, beyond plain failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Success,
    /// Conflicts left unresolved or a push that lost the race
    Unresolved,
    /// A dry run found conflicts
    PreviewConflicts,
}

impl CommandStatus {
    pub fn exit_code(self) -> u8 {
        match self {
            CommandStatus::Success => 0,
            CommandStatus::Unresolved => 1,
            CommandStatus::PreviewConflicts => 2,
        }
    }
}

/// Load the project around `start` for a command.
pub fn open_context(start: &Path) -> Result<SyncContext> {
    let ctx = SyncContext::load(start).context("Failed to open project")?;
    Ok(ctx.with_interactive(interactive_conflict::is_interactive()))
}

/// Connect to the configured remote with the JSON resource backend.
pub fn open_client(ctx: SyncContext) -> Result<SyncClient> {
    let remote = connect_remote(&ctx)?;
    Ok(SyncClient::new(ctx, remote, Arc::new(JsonBackend)))
}

pub(crate) fn print_conflicts(conflicts: &[Conflict]) {
    println!("\n{} {}", "Conflicts:".red().bold(), conflicts.len());
    for conflict in conflicts {
        println!("  {} {}", "!".red(), conflict.description());
        for change in &conflict.config_changes {
            println!(
                "    {} local={} remote={}",
                change.path,
                change.local.as_deref().unwrap_or("-"),
                change.remote.as_deref().unwrap_or("-")
            );
        }
    }
}

pub(crate) fn print_file_diffs(diffs: &[FileDiff]) {
    if diffs.iter().all(|d| d.diff.is_empty()) {
        println!("{}", "No differences.".green());
        return;
    }
    for file in diffs.iter().filter(|d| !d.diff.is_empty()) {
        println!("\n{} {}", file.path.cyan().bold(), file.diff.summary().dimmed());
        print_entry_diff(&file.diff);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(CommandStatus::Success.exit_code(), 0);
        assert_eq!(CommandStatus::Unresolved.exit_code(), 1);
        assert_eq!(CommandStatus::PreviewConflicts.exit_code(), 2);
    }
}
