//! Init, status, push and pull handlers

use anyhow::{Context, Result};
use colored::Colorize;
use inquire::Text;
use std::path::Path;

use crate::config::{ProjectConfig, ProjectPaths, PROJECT_CONFIG_FILE};
use crate::conflict::{ConflictChooser, ConflictKind, ResolutionStrategy};
use crate::interactive_conflict::{self, TerminalChooser};
use crate::sync::{PullOptions, PushOptions, SyncClient, SyncPhase};

use super::{print_conflicts, CommandStatus};

/// Create `lrm.toml` and the `.lrm` state directory in `root`.
///
/// Without `--remote`, an interactive terminal is asked for the remote URL;
/// otherwise the project starts without one.
pub fn handle_init(root: &Path, remote: Option<String>, resource_dir: Option<String>) -> Result<CommandStatus> {
    let paths = ProjectPaths::new(root);
    if paths.config_file().exists() {
        println!(
            "{} {} already exists in {}",
            "Note:".yellow(),
            PROJECT_CONFIG_FILE,
            root.display()
        );
        paths.ensure_state_dir()?;
        return Ok(CommandStatus::Success);
    }

    let remote = match remote {
        Some(url) => Some(url),
        None if interactive_conflict::is_interactive() => {
            let url = Text::new("Remote URL (leave empty to configure later):")
                .with_help_message("https://... or file:<path> for a local remote")
                .prompt()
                .context("Failed to read remote URL")?;
            Some(url.trim().to_string()).filter(|url| !url.is_empty())
        }
        None => None,
    };

    let mut config = ProjectConfig::default();
    config.sync.remote_url = remote;
    if let Some(dir) = resource_dir {
        config.resources.dir = dir;
    }
    config.save(&paths)?;
    paths.ensure_state_dir()?;

    println!("{}", "✓ Project initialized".green().bold());
    println!("  Config:    {}", paths.config_file().display());
    println!("  Resources: {}", config.resource_dir(&paths).display());
    match &config.sync.remote_url {
        Some(url) => println!("  Remote:    {}", url.cyan()),
        None => println!("  Remote:    {}", "not configured".yellow()),
    }
    Ok(CommandStatus::Success)
}

pub fn handle_status(client: &SyncClient, paths: &[String]) -> Result<CommandStatus> {
    let status = client.status(paths)?;

    println!("{}", "=== Sync Status ===".bold().cyan());
    println!(
        "  Remote version: {}",
        status.remote_project_version.to_string().cyan()
    );
    match status.last_synced_at {
        Some(at) => println!("  Last synced:    {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
        None => println!("  Last synced:    {}", "never".yellow()),
    }

    if status.is_clean() {
        println!("\n{}", "Working copy is in sync.".green());
        return Ok(CommandStatus::Success);
    }

    println!("\n{}", "Local changes:".bold());
    for path in &status.added {
        println!("  {} {}", "added:   ".green(), path);
    }
    for path in &status.modified {
        println!("  {} {}", "modified:".yellow(), path);
    }
    for path in &status.deleted {
        println!("  {} {}", "deleted: ".red(), path);
    }
    if status.config_changed {
        println!("  {} {}", "modified:".yellow(), PROJECT_CONFIG_FILE);
    }
    Ok(CommandStatus::Success)
}

pub fn handle_push(client: &SyncClient, options: &PushOptions) -> Result<CommandStatus> {
    if options.dry_run {
        println!("{}", "Dry run: nothing will be uploaded".yellow());
    }
    let outcome = client.push(options)?;

    if outcome.no_changes() {
        println!("{}", "Nothing to push.".green());
        return Ok(CommandStatus::Success);
    }

    if let Some((sent, current)) = outcome.version_mismatch {
        println!(
            "{} remote moved from version {} to {} while pushing; nothing was uploaded",
            "Rejected:".red().bold(),
            sent,
            current
        );
    }
    if !outcome.conflicts.is_empty() {
        print_conflicts(&outcome.conflicts);
        println!(
            "\n{}",
            "Pull and resolve these conflicts, or push with --force.".yellow()
        );
        return Ok(if outcome.dry_run {
            CommandStatus::PreviewConflicts
        } else {
            CommandStatus::Unresolved
        });
    }
    if outcome.version_mismatch.is_some() {
        println!("{}", "Pull and push again.".yellow());
        return Ok(CommandStatus::Unresolved);
    }

    let verb = if outcome.dry_run { "Would upload" } else { "Uploaded" };
    for path in &outcome.uploaded {
        println!("  {} {}", "↑".green(), path);
    }
    for path in &outcome.deleted {
        println!("  {} {}", "✗".red(), path);
    }
    if outcome.config_pushed {
        println!("  {} {}", "↑".green(), PROJECT_CONFIG_FILE);
    }
    println!(
        "{} {} file(s), {} deletion(s)",
        verb.bold(),
        outcome.uploaded.len(),
        outcome.deleted.len()
    );
    if let (Some(id), Some(version)) = (&outcome.history_id, outcome.project_version) {
        println!("  History entry {} at version {}", id.cyan(), version);
    }
    Ok(CommandStatus::Success)
}

pub fn handle_pull(client: &SyncClient, options: &PullOptions) -> Result<CommandStatus> {
    let strategy = if options.force {
        ResolutionStrategy::Remote
    } else {
        options.strategy.unwrap_or(client.context().strategy)
    };
    let mut terminal = match strategy {
        ResolutionStrategy::Prompt if client.context().interactive => Some(TerminalChooser::new()),
        _ => None,
    };
    let chooser = terminal.as_mut().map(|c| c as &mut dyn ConflictChooser);

    if options.dry_run {
        println!("{}", "Dry run: nothing will be written".yellow());
    }
    let outcome = client.pull(options, chooser)?;

    let (write_verb, delete_verb) = if outcome.dry_run {
        ("would write", "would delete")
    } else {
        ("written", "deleted")
    };
    for path in &outcome.written {
        println!("  {} {} ({})", "↓".green(), path, write_verb);
    }
    for path in &outcome.deleted {
        println!("  {} {} ({})", "✗".red(), path, delete_verb);
    }
    if outcome.config_written {
        println!("  {} {} ({})", "↓".green(), PROJECT_CONFIG_FILE, write_verb);
    }
    for path in &outcome.kept_local {
        println!("  {} {} (local changes kept)", "•".cyan(), path);
    }

    if let Some(path) = &outcome.backup_path {
        println!(
            "  {} {} ({} file version(s))",
            "Backup:".dimmed(),
            path.display(),
            outcome.pre_pull_versions
        );
    }

    if !outcome.conflicts.is_empty() {
        print_conflicts(&outcome.conflicts);
        let unsynced_config = outcome
            .conflicts
            .iter()
            .any(|c| c.kind == ConflictKind::ConfigurationConflict && c.base_hash.is_none());
        if unsynced_config {
            println!(
                "  {} {} has never been synced here. Pull with --resources-only to leave it out, \
                 or choose a side with --strategy local or remote.",
                "Hint:".cyan(),
                PROJECT_CONFIG_FILE
            );
        }
    }

    if outcome.dry_run {
        if outcome.conflicts.is_empty() {
            return Ok(CommandStatus::Success);
        }
        return Ok(CommandStatus::PreviewConflicts);
    }

    if outcome.has_unresolved() {
        println!(
            "\n{} {} file(s) left untouched: {}",
            "Unresolved:".red().bold(),
            outcome.skipped.len(),
            outcome.skipped.join(", ")
        );
        return Ok(CommandStatus::Unresolved);
    }

    if outcome.phases.last() == Some(&SyncPhase::Done) {
        println!(
            "{} at version {} ({} unchanged)",
            "✓ Pulled".green().bold(),
            outcome.project_version,
            outcome.unchanged.len()
        );
    }
    Ok(CommandStatus::Success)
}
