use anyhow::{Context, Result};
use colored::Colorize;
use inquire::Select;

use crate::conflict::{Conflict, ConflictChooser, ConflictKind, Resolution};
use crate::diff::DiffResult;

/// Resolution action chosen by the user
#[derive(Debug, Clone, Copy)]
enum ResolutionAction {
    KeepLocal,
    KeepRemote,
    Skip,
    /// Show hashes, timestamps and the entry/config differences (does not resolve)
    ViewDetails,
}

impl std::fmt::Display for ResolutionAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolutionAction::KeepLocal => write!(f, "Keep Local Version (push it later)"),
            ResolutionAction::KeepRemote => write!(f, "Take Remote Version (overwrite local, after backup)"),
            ResolutionAction::Skip => write!(f, "Skip (leave the file untouched)"),
            ResolutionAction::ViewDetails => write!(f, "View Detailed Comparison"),
        }
    }
}

/// Check if we're running in an interactive terminal
pub fn is_interactive() -> bool {
    atty::is(atty::Stream::Stdin) && atty::is(atty::Stream::Stdout)
}

fn hash_line(label: &str, hash: Option<&crate::entries::ContentHash>) -> String {
    match hash {
        Some(hash) => format!("  {label}: {}", hash.short()),
        None => format!("  {label}: {}", "absent".dimmed()),
    }
}

/// Print the added, modified, deleted and re-commented keys of a diff
pub(crate) fn print_entry_diff(diff: &DiffResult) {
    for key in &diff.added {
        println!("  {} {}", "+".green(), key);
    }
    for entry in &diff.modified {
        println!(
            "  {} {}: {} → {}",
            "~".yellow(),
            entry.key,
            entry.old_value.dimmed(),
            entry.new_value
        );
    }
    for key in &diff.deleted {
        println!("  {} {}", "-".red(), key);
    }
    for key in &diff.comment_changed {
        println!("  {} {} (comment)", "#".cyan(), key);
    }
}

/// Display detailed conflict information
fn display_conflict_details(conflict: &Conflict) {
    println!("\n{}", "=".repeat(80).cyan());
    println!("{}", "Conflict Details".bold().cyan());
    println!("{}", "=".repeat(80).cyan());

    println!("\n{} {}", "File:".bold(), conflict.path.cyan());
    println!("{} {}", "Kind:".bold(), conflict.kind.as_str());

    println!("\n{}", "Local".bold().green());
    println!("{}", hash_line("Content hash", conflict.local_hash.as_ref()));
    if let Some(ts) = &conflict.local_timestamp {
        println!("  Last updated: {}", ts.to_rfc3339().dimmed());
    }

    println!("\n{}", "Remote".bold().yellow());
    println!("{}", hash_line("Content hash", conflict.remote_hash.as_ref()));
    if let Some(ts) = &conflict.remote_timestamp {
        println!("  Last updated: {}", ts.to_rfc3339().dimmed());
    }
    if let Some(author) = &conflict.remote_author {
        println!("  Author: {}", author.yellow());
    }

    println!("\n{}", hash_line("Last synced", conflict.base_hash.as_ref()));

    if conflict.kind == ConflictKind::ConfigurationConflict {
        println!("\n{:<32} {:<22} {:<22}", "Setting".bold(), "Local".green(), "Remote".yellow());
        for change in &conflict.config_changes {
            println!(
                "{:<32} {:<22} {:<22}",
                change.path,
                change.local.as_deref().unwrap_or("-"),
                change.remote.as_deref().unwrap_or("-")
            );
        }
    }

    if let Some(diff) = &conflict.entry_diff {
        println!("\n{} {}", "Local → remote:".bold(), diff.summary());
        print_entry_diff(diff);
    }

    println!("{}", "=".repeat(80).cyan());
}

/// Asks the user about each conflict with an `inquire` menu.
#[derive(Debug, Default)]
pub struct TerminalChooser {
    asked: usize,
}

impl TerminalChooser {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConflictChooser for TerminalChooser {
    fn choose(&mut self, conflict: &Conflict) -> Result<Resolution> {
        self.asked += 1;
        loop {
            println!("\n{} #{}", "Conflict Detected!".yellow().bold(), self.asked);
            println!("  {}", conflict.description().dimmed());

            let options = vec![
                ResolutionAction::KeepLocal,
                ResolutionAction::KeepRemote,
                ResolutionAction::Skip,
                ResolutionAction::ViewDetails,
            ];

            let action = Select::new("How would you like to resolve this conflict?", options)
                .with_help_message("Use arrow keys to navigate, Enter to select")
                .prompt()
                .context("Failed to get resolution action")?;

            match action {
                ResolutionAction::ViewDetails => {
                    display_conflict_details(conflict);
                    continue;
                }
                ResolutionAction::KeepLocal => return Ok(Resolution::KeepLocal),
                ResolutionAction::KeepRemote => return Ok(Resolution::KeepRemote),
                ResolutionAction::Skip => return Ok(Resolution::Skip),
            }
        }
    }
}
