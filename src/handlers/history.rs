//! History command handlers
//!
//! Page through the remote's append-only push history, inspect one entry and
//! revert it.

use anyhow::{Context, Result};
use colored::Colorize;
use inquire::Confirm;

use crate::history::{format_entry, HistoryLog, RevertOutcome};
use crate::interactive_conflict;

use super::{print_file_diffs, CommandStatus};

pub fn handle_log(history: &HistoryLog, page: usize, page_size: usize, oneline: bool) -> Result<CommandStatus> {
    let page = history.log(page, page_size)?;

    if page.entries.is_empty() {
        println!("{}", "No operations in history.".yellow());
        return Ok(CommandStatus::Success);
    }

    if !oneline {
        println!("{}", "Sync History".cyan().bold());
        println!("{}", "=".repeat(80).cyan());
    }
    for entry in &page.entries {
        println!("{}", format_entry(entry, oneline));
        if !oneline {
            println!();
        }
    }

    if page.has_more() {
        println!(
            "{} Showing page {} of {} entries; use --page {} for more",
            "Note:".yellow(),
            page.page,
            page.total,
            page.page + 1
        );
    }
    Ok(CommandStatus::Success)
}

pub fn handle_show(history: &HistoryLog, id: &str) -> Result<CommandStatus> {
    let entry = history.show(id)?;
    println!("{}", format_entry(&entry, false));
    Ok(CommandStatus::Success)
}

/// Revert a history entry on the remote. Run `pull` afterwards to bring the
/// reverted files into the working copy.
pub fn handle_revert(
    history: &HistoryLog,
    id: &str,
    message: Option<&str>,
    actor: &str,
    dry_run: bool,
) -> Result<CommandStatus> {
    if !dry_run && interactive_conflict::is_interactive() {
        if let RevertOutcome::Preview(preview) = history.revert(id, message, actor, true)? {
            println!("{} {}", "Reverting".cyan().bold(), id);
            print_file_diffs(&preview);
        }
        let confirm = Confirm::new("Do you want to proceed with this revert?")
            .with_default(false)
            .with_help_message("A new revert entry is recorded on the remote")
            .prompt()
            .context("Failed to get confirmation")?;
        if !confirm {
            println!("\n{}", "Revert cancelled.".yellow());
            return Ok(CommandStatus::Success);
        }
    }

    match history.revert(id, message, actor, dry_run)? {
        RevertOutcome::Preview(preview) => {
            println!("{} reverting {} would change:", "Dry run:".yellow(), id);
            print_file_diffs(&preview);
        }
        RevertOutcome::Applied(entry) => {
            println!("{}", "✓ Reverted".green().bold());
            println!("{}", format_entry(&entry, false));
            println!("{}", "Run 'lrm-sync pull' to update the working copy.".dimmed());
        }
    }
    Ok(CommandStatus::Success)
}
