//! Local backup handlers
//!
//! Create, inspect, diff, restore and prune the per-file versions under
//! `.lrm/backups`, and roll back the last pull from its raw-byte archive.

use anyhow::{anyhow, Context, Result};
use colored::Colorize;
use inquire::Confirm;
use std::fs;
use std::path::{Path, PathBuf};

use crate::backup::{DiffTarget, LocalVersionStore, PullBackupArchive, RestoreOptions};
use crate::config::ProjectPaths;
use crate::interactive_conflict::{self, print_entry_diff};

use super::CommandStatus;

fn confirm(question: &str, help: &str) -> Result<bool> {
    if !interactive_conflict::is_interactive() {
        return Ok(true);
    }
    Confirm::new(question)
        .with_default(false)
        .with_help_message(help)
        .prompt()
        .context("Failed to get confirmation")
}

pub fn handle_backup_create(store: &LocalVersionStore, file: &Path, actor: &str) -> Result<CommandStatus> {
    let record = store.create_version(file, "manual", actor)?;
    println!(
        "{} version {} of {} ({} entries, {} changed)",
        "✓ Created".green().bold(),
        record.version,
        file.display(),
        record.entry_count,
        record.changed_count
    );
    Ok(CommandStatus::Success)
}

pub fn handle_backup_list(store: &LocalVersionStore, file: Option<&Path>) -> Result<CommandStatus> {
    let Some(file) = file else {
        let tracked = store.tracked_files()?;
        if tracked.is_empty() {
            println!("{}", "No backups yet.".yellow());
        }
        for rel in tracked {
            let versions = store.list_versions(Path::new(&rel))?;
            println!("  {} ({} version(s))", rel.cyan(), versions.len());
        }
        return Ok(CommandStatus::Success);
    };

    let versions = store.list_versions(file)?;
    if versions.is_empty() {
        println!("{} {}", "No backups for".yellow(), file.display());
        return Ok(CommandStatus::Success);
    }

    println!("{} {}", "Versions of".cyan().bold(), file.display());
    println!("{}", "=".repeat(80).cyan());
    println!(
        "{:>7}  {:<20}  {:<12}  {:<14}  {:>7}  {:>7}",
        "Version", "Time", "Operation", "Actor", "Entries", "Changed"
    );
    for record in versions.iter().rev() {
        println!(
            "{:>7}  {:<20}  {:<12}  {:<14}  {:>7}  {:>7}",
            record.version.to_string().bold(),
            record.timestamp.format("%Y-%m-%d %H:%M:%S"),
            record.operation,
            record.actor,
            record.entry_count,
            record.changed_count
        );
    }
    Ok(CommandStatus::Success)
}

pub fn handle_backup_info(store: &LocalVersionStore, file: &Path, version: u32) -> Result<CommandStatus> {
    let info = store.info(file, version)?;
    let record = &info.record;

    println!("{} {} {}", "Version".bold(), record.version, file.display());
    println!("  Time:      {}", record.timestamp.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("  Operation: {}", record.operation);
    println!("  Actor:     {}", record.actor);
    println!("  Hash:      {}", record.hash.short().dimmed());
    println!("  Language:  {}", info.entries.language_code);
    println!("  Entries:   {}", info.entries.len());
    println!("  Changed:   {}", record.changed_count);
    Ok(CommandStatus::Success)
}

/// Diff a version against another version, or against the live file.
pub fn handle_backup_diff(
    store: &LocalVersionStore,
    file: &Path,
    version: u32,
    against: Option<u32>,
) -> Result<CommandStatus> {
    let (target, label) = match against {
        Some(other) => (DiffTarget::Version(other), format!("version {other}")),
        None => (DiffTarget::Current, "current file".to_string()),
    };
    let diff = store.diff(file, version, target)?;

    println!(
        "{} version {} → {}: {}",
        file.display().to_string().cyan(),
        version,
        label,
        diff.summary()
    );
    if diff.is_empty() {
        println!("{}", "No differences.".green());
    } else {
        print_entry_diff(&diff);
    }
    Ok(CommandStatus::Success)
}

pub fn handle_backup_restore(
    store: &LocalVersionStore,
    file: &Path,
    version: u32,
    keys: &[String],
    no_backup: bool,
    actor: &str,
) -> Result<CommandStatus> {
    // Validates the version and its integrity before asking anything
    let preview = store.diff(file, version, DiffTarget::Current)?;
    if keys.is_empty() {
        println!(
            "Restoring {} to version {} reverts: {}",
            file.display(),
            version,
            preview.summary()
        );
    }

    if !confirm(
        "Do you want to restore this version?",
        "The current file is backed up first unless --no-backup is given",
    )? {
        println!("\n{}", "Restore cancelled.".yellow());
        return Ok(CommandStatus::Success);
    }

    let mut options = RestoreOptions::new(actor);
    if no_backup {
        options = options.without_backup();
    }
    let keys = (!keys.is_empty()).then_some(keys);
    let outcome = store.restore(file, version, keys, &options)?;

    println!(
        "{} {} key(s) from version {}",
        "✓ Restored".green().bold(),
        outcome.restored_keys.len(),
        version
    );
    if let Some(record) = outcome.pre_restore {
        println!("  Previous content saved as version {}", record.version);
    }
    Ok(CommandStatus::Success)
}

/// Prune one file, or every backed-up file when `file` is `None`.
pub fn handle_backup_prune(
    store: &LocalVersionStore,
    file: Option<&Path>,
    keep: Option<usize>,
    dry_run: bool,
) -> Result<CommandStatus> {
    let keep = keep.unwrap_or_else(|| store.retention());
    let files: Vec<PathBuf> = match file {
        Some(file) => vec![file.to_path_buf()],
        None => store.tracked_files()?.into_iter().map(PathBuf::from).collect(),
    };

    let mut total = 0;
    for file in &files {
        let removable = store.prune(file, keep, dry_run)?;
        if removable.is_empty() {
            continue;
        }
        total += removable.len();
        let versions: Vec<String> = removable.iter().map(|r| r.version.to_string()).collect();
        println!(
            "  {} {}: version(s) {}",
            if dry_run { "would prune" } else { "pruned" },
            file.display(),
            versions.join(", ")
        );
    }

    if total == 0 {
        println!("{}", "Nothing to prune.".green());
    } else if dry_run {
        println!("{} {} version(s) would be removed", "Dry run:".yellow(), total);
    } else {
        println!("{} {} version(s)", "✓ Pruned".green().bold(), total);
    }
    Ok(CommandStatus::Success)
}

fn latest_pull_archive(paths: &ProjectPaths) -> Result<PathBuf> {
    let dir = paths.pull_backups_dir();
    let mut archives: Vec<PathBuf> = match fs::read_dir(&dir) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(e) => return Err(e).with_context(|| format!("Failed to read {}", dir.display())),
    };
    archives.sort();
    archives
        .pop()
        .ok_or_else(|| anyhow!("No pull backups found in {}", dir.display()))
}

/// Put back the files a pull overwrote, from its archive.
pub fn handle_undo_pull(
    paths: &ProjectPaths,
    store: &LocalVersionStore,
    archive: Option<&Path>,
    actor: &str,
) -> Result<CommandStatus> {
    let archive_path = match archive {
        Some(path) => path.to_path_buf(),
        None => latest_pull_archive(paths)?,
    };
    let archive = PullBackupArchive::load(&archive_path)?;

    println!(
        "{} {} (taken {}, pulling version {})",
        "Pull backup".cyan().bold(),
        archive_path.display(),
        archive.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
        archive.remote_version
    );
    for rel in archive.files.keys() {
        println!("  {} {}", "restore".green(), rel);
    }
    for rel in &archive.created {
        println!("  {} {}", "remove ".red(), rel);
    }

    if !confirm(
        "Do you want to restore these files?",
        "Live files are versioned first; the sync state is left as is",
    )? {
        println!("\n{}", "Undo cancelled.".yellow());
        return Ok(CommandStatus::Success);
    }

    let outcome = archive.restore(paths, store, actor)?;
    println!("{} {} file(s)", "✓ Restored".green().bold(), outcome.restored.len());
    if !outcome.removed.is_empty() {
        println!("{} {} file(s) created by the pull", "✓ Removed".green().bold(), outcome.removed.len());
    }
    if !outcome.pre_restore.is_empty() {
        println!(
            "  {} previous content saved as {} version(s)",
            "→".dimmed(),
            outcome.pre_restore.len()
        );
    }
    Ok(CommandStatus::Success)
}
