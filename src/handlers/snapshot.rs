//! Snapshot command handlers

use anyhow::{Context, Result};
use colored::Colorize;
use inquire::Confirm;

use crate::interactive_conflict;
use crate::snapshot::Snapshot;
use crate::sync::SyncClient;

use super::{print_file_diffs, CommandStatus};

fn print_snapshot_header(snapshot: &Snapshot) {
    println!("{} {}", "snapshot".yellow(), snapshot.id.yellow());
    println!("Author:  {}", snapshot.actor);
    println!("Date:    {}", snapshot.timestamp.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("Version: {}", snapshot.project_version);
    if let Some(message) = &snapshot.message {
        println!("\n    {message}");
    }
}

pub fn handle_snapshot_create(client: &SyncClient, message: Option<&str>) -> Result<CommandStatus> {
    let snapshot = client.snapshots().create(message, &client.context().actor)?;
    println!(
        "{} {} ({} files, {} entries, version {})",
        "✓ Created snapshot".green().bold(),
        snapshot.id.cyan(),
        snapshot.files.len(),
        snapshot.entry_count(),
        snapshot.project_version
    );
    Ok(CommandStatus::Success)
}

pub fn handle_snapshot_list(client: &SyncClient, page: usize, page_size: usize) -> Result<CommandStatus> {
    let page = client.snapshots().list(page, page_size)?;
    if page.snapshots.is_empty() {
        println!("{}", "No snapshots.".yellow());
        return Ok(CommandStatus::Success);
    }

    for summary in &page.snapshots {
        println!(
            "{} {} v{} {} file(s) {} {}",
            summary.id.cyan(),
            summary.timestamp.format("%Y-%m-%d %H:%M"),
            summary.project_version,
            summary.file_count,
            summary.actor.bold(),
            summary.message.as_deref().unwrap_or("").dimmed()
        );
    }
    if page.page * page.page_size < page.total {
        println!(
            "{} {} snapshots in total; use --page {} for more",
            "Note:".yellow(),
            page.total,
            page.page + 1
        );
    }
    Ok(CommandStatus::Success)
}

pub fn handle_snapshot_show(client: &SyncClient, id: &str) -> Result<CommandStatus> {
    let snapshot = client.snapshots().show(id)?;
    print_snapshot_header(&snapshot);
    println!();
    for file in &snapshot.files {
        println!("  {} ({} entries)", file.path, file.entries.len());
    }
    if snapshot.config.is_some() {
        println!("  {}", "lrm.toml".dimmed());
    }
    Ok(CommandStatus::Success)
}

pub fn handle_snapshot_delete(client: &SyncClient, id: &str) -> Result<CommandStatus> {
    client.snapshots().delete(id)?;
    println!("{} {}", "✓ Deleted snapshot".green().bold(), id);
    Ok(CommandStatus::Success)
}

pub fn handle_snapshot_diff(client: &SyncClient, from: &str, to: &str) -> Result<CommandStatus> {
    let diffs = client.snapshots().diff(from, to)?;
    println!("{} {} → {}", "Snapshot diff".cyan().bold(), from, to);
    print_file_diffs(&diffs);
    Ok(CommandStatus::Success)
}

/// Write a snapshot into the working copy. The restored files then show up
/// as local changes for the next push.
pub fn handle_snapshot_restore(client: &SyncClient, id: &str) -> Result<CommandStatus> {
    if interactive_conflict::is_interactive() {
        let snapshot = client.snapshots().show(id)?;
        print_snapshot_header(&snapshot);
        let confirm = Confirm::new("Do you want to restore this snapshot into the working copy?")
            .with_default(false)
            .with_help_message("Files not in the snapshot are removed; changed files are backed up first")
            .prompt()
            .context("Failed to get confirmation")?;
        if !confirm {
            println!("\n{}", "Restore cancelled.".yellow());
            return Ok(CommandStatus::Success);
        }
    }

    let outcome =
        client
            .snapshots()
            .restore(id, client.context(), client.store(), client.backend())?;

    for path in &outcome.written {
        println!("  {} {}", "↓".green(), path);
    }
    for path in &outcome.deleted {
        println!("  {} {}", "-".red(), path);
    }
    if outcome.config_written {
        println!("  {} lrm.toml", "↓".green());
    }
    println!(
        "{} {} file(s) written, {} removed, {} unchanged, {} backed up",
        "✓ Restored".green().bold(),
        outcome.written.len(),
        outcome.deleted.len(),
        outcome.unchanged.len(),
        outcome.pre_restore.len()
    );
    println!("{}", "Run 'lrm-sync push' to publish the restored files.".dimmed());
    Ok(CommandStatus::Success)
}
