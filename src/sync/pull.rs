use anyhow::{Context, Result};
use log::{info, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::backup::{cleanup_pull_backups, PullBackupArchive};
use crate::config::PROJECT_CONFIG_FILE;
use crate::conflict::{
    classify, structural_config_diff, Conflict, ConflictChooser, ConflictKind, ConflictResolver,
    FileSync, ResolutionStrategy,
};
use crate::diff::diff_entry_sets;
use crate::entries::{ContentHash, EntrySet};
use crate::remote::{FileMeta, PullRequest};

use super::phase::{PhaseLog, SyncPhase};
use super::state::SyncState;
use super::{config_hash, SyncClient};

#[derive(Debug, Clone, Default)]
pub struct PullOptions {
    /// Project-relative files or directories; empty means everything
    pub paths: Vec<String>,
    /// Classify and report only
    pub dry_run: bool,
    /// Take the remote side of every conflict
    pub force: bool,
    /// Skip the pre-pull versions and archive
    pub no_backup: bool,
    /// Overrides `[sync] default_strategy`
    pub strategy: Option<ResolutionStrategy>,
    pub config_only: bool,
    pub resources_only: bool,
    /// Overrides `[sync] status_filter`
    pub status_filter: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PullOutcome {
    /// Files written from the remote (or that would be, in a dry run)
    pub written: Vec<String>,
    /// Files removed because the remote deleted them
    pub deleted: Vec<String>,
    pub unchanged: Vec<String>,
    /// Local changes left in place for the next push
    pub kept_local: Vec<String>,
    /// Every conflict detected, whatever its resolution
    pub conflicts: Vec<Conflict>,
    /// Conflicting files left untouched
    pub skipped: Vec<String>,
    pub config_written: bool,
    pub backup_path: Option<PathBuf>,
    pub pre_pull_versions: usize,
    pub project_version: u64,
    pub dry_run: bool,
    pub phases: Vec<SyncPhase>,
}

impl PullOutcome {
    pub fn has_unresolved(&self) -> bool {
        !self.skipped.is_empty()
    }
}

enum Change {
    Write(EntrySet),
    Delete,
}

struct Planned {
    path: String,
    change: Change,
    remote_hash: Option<ContentHash>,
}

fn conflict_with_meta(conflict: Conflict, meta: Option<&FileMeta>) -> Conflict {
    conflict.with_remote_meta(
        meta.map(|m| m.updated_at),
        meta.map(|m| m.updated_by.clone()),
    )
}

impl SyncClient {
    /// Bring remote changes into the working copy.
    ///
    /// Nothing is written until every conflict has a decision and, unless
    /// `no_backup` is set, every file about to change has been versioned and
    /// archived. A failed backup aborts the pull with zero writes.
    pub fn pull(
        &self,
        options: &PullOptions,
        chooser: Option<&mut dyn ConflictChooser>,
    ) -> Result<PullOutcome> {
        let strategy = if options.force {
            ResolutionStrategy::Remote
        } else {
            options.strategy.unwrap_or(self.ctx.strategy)
        };
        let mut resolver = ConflictResolver::new(strategy, chooser)?;

        let mut phases = PhaseLog::default();
        let mut outcome = PullOutcome {
            dry_run: options.dry_run,
            ..Default::default()
        };
        let paths = &self.ctx.paths;

        phases.enter(SyncPhase::ComputingLocalChanges);
        let filter = self.filter(&options.paths);
        let local = if options.config_only {
            BTreeMap::new()
        } else {
            self.discover(&filter)?
        };
        let mut state = SyncState::load(paths)?;

        phases.enter(SyncPhase::Downloading);
        let response = self
            .remote
            .pull(&PullRequest {
                status_filter: options
                    .status_filter
                    .clone()
                    .or_else(|| self.ctx.config.sync.status_filter.clone()),
                config_only: options.config_only,
                resources_only: options.resources_only,
            })
            .context("Failed to download remote files")?;
        outcome.project_version = response.project_version;

        phases.enter(SyncPhase::ConflictDetection);
        let mut remote_files: BTreeMap<String, EntrySet> = BTreeMap::new();
        if !options.config_only {
            for payload in &response.files {
                let rel = paths
                    .relative(Path::new(&payload.path))
                    .with_context(|| format!("Remote sent an invalid path: {}", payload.path))?;
                if filter.should_include(&rel) {
                    remote_files.insert(rel, payload.entries.clone());
                }
            }
        }

        let mut planned: Vec<Planned> = Vec::new();
        let mut conflicts: Vec<Conflict> = Vec::new();
        let mut base_updates: Vec<(String, Option<ContentHash>)> = Vec::new();

        if !options.config_only {
            let candidates: BTreeSet<String> = remote_files
                .keys()
                .cloned()
                .chain(
                    state
                        .files
                        .keys()
                        .filter(|path| filter.should_include(path))
                        .cloned(),
                )
                .collect();

            for path in candidates {
                let local_file = local.get(&path);
                let remote_set = remote_files.get(&path);
                let remote_hash = remote_set.map(EntrySet::content_hash);
                let base = state.base_hash(&path).cloned();

                match classify(
                    local_file.map(|f| &f.hash),
                    remote_hash.as_ref(),
                    base.as_ref(),
                ) {
                    FileSync::Unchanged => {
                        outcome.unchanged.push(path.clone());
                        base_updates.push((path, remote_hash));
                    }
                    FileSync::FastForward => planned.push(Planned {
                        change: match remote_set {
                            Some(set) => Change::Write(set.clone()),
                            None => Change::Delete,
                        },
                        path,
                        remote_hash,
                    }),
                    FileSync::LocalOnly => outcome.kept_local.push(path),
                    FileSync::Conflict(kind) => {
                        let mut conflict = Conflict::new(
                            path.clone(),
                            kind,
                            local_file.map(|f| f.hash.clone()),
                            remote_hash,
                            base,
                        )
                        .with_local_timestamp(local_file.and_then(|f| f.modified));
                        if let (Some(local_file), Some(remote_set)) = (local_file, remote_set) {
                            conflict = conflict
                                .with_entry_diff(diff_entry_sets(&local_file.entries, remote_set, false));
                        }
                        conflicts.push(conflict_with_meta(conflict, response.file_meta.get(&path)));
                    }
                }
            }
        }

        let mut config_plan: Option<String> = None;
        let mut config_base: Option<Option<ContentHash>> = None;
        let remote_config = if options.resources_only {
            None
        } else {
            response.config.as_ref()
        };
        if let Some(remote_config) = remote_config {
            let local_config = self.read_config_document()?;
            let remote_hash = config_hash(Some(remote_config));
            let local_hash = config_hash(local_config.as_ref());

            match classify(
                local_hash.as_ref(),
                remote_hash.as_ref(),
                state.config_hash.as_ref(),
            ) {
                FileSync::Unchanged => config_base = Some(remote_hash),
                FileSync::FastForward => config_plan = Some(remote_config.clone()),
                FileSync::LocalOnly => outcome.kept_local.push(PROJECT_CONFIG_FILE.to_string()),
                FileSync::Conflict(_) => conflicts.push(
                    Conflict::new(
                        PROJECT_CONFIG_FILE,
                        ConflictKind::ConfigurationConflict,
                        local_hash,
                        remote_hash,
                        state.config_hash.clone(),
                    )
                    .with_config_changes(structural_config_diff(
                        local_config.as_deref(),
                        Some(remote_config.as_str()),
                    )),
                ),
            }
        }

        // A preview only lists conflicts; choosing is left to the real pull
        if !conflicts.is_empty() && !options.dry_run {
            phases.enter(SyncPhase::Resolving);
            let result = resolver.resolve_all(&conflicts)?;

            for conflict in &result.keep_remote {
                if conflict.kind == ConflictKind::ConfigurationConflict {
                    config_plan = remote_config.cloned();
                    continue;
                }
                planned.push(Planned {
                    path: conflict.path.clone(),
                    change: match remote_files.get(&conflict.path) {
                        Some(set) => Change::Write(set.clone()),
                        None => Change::Delete,
                    },
                    remote_hash: conflict.remote_hash.clone(),
                });
            }
            // The remote hash becomes the base, so the local copy reads as a
            // local-only change on the next push
            for conflict in &result.keep_local {
                if conflict.kind == ConflictKind::ConfigurationConflict {
                    config_base = Some(conflict.remote_hash.clone());
                } else {
                    base_updates.push((conflict.path.clone(), conflict.remote_hash.clone()));
                }
                outcome.kept_local.push(conflict.path.clone());
            }
            for conflict in &result.skipped {
                outcome.skipped.push(conflict.path.clone());
            }
            if !result.skipped.is_empty() {
                warn!(
                    "{} conflicting file(s) left untouched: {}",
                    result.skipped.len(),
                    outcome.skipped.join(", ")
                );
            }
        }
        outcome.conflicts = conflicts;

        if options.dry_run {
            for change in &planned {
                match change.change {
                    Change::Write(_) => outcome.written.push(change.path.clone()),
                    Change::Delete => outcome.deleted.push(change.path.clone()),
                }
            }
            outcome.config_written = config_plan.is_some();
            phases.enter(SyncPhase::Done);
            outcome.phases = phases.into_phases();
            return Ok(outcome);
        }

        let has_writes = !planned.is_empty() || config_plan.is_some();
        if has_writes && !options.no_backup {
            for change in &planned {
                if let Some(local_file) = local.get(&change.path) {
                    self.store
                        .create_version_of(&change.path, &local_file.entries, "pre-pull", &self.ctx.actor)
                        .with_context(|| {
                            format!("Pre-pull backup of {} failed; nothing was written", change.path)
                        })?;
                    outcome.pre_pull_versions += 1;
                }
            }

            let mut archived: Vec<String> = planned.iter().map(|c| c.path.clone()).collect();
            if config_plan.is_some() {
                archived.push(PROJECT_CONFIG_FILE.to_string());
            }
            let archive = PullBackupArchive::capture(paths, &archived, response.project_version)
                .context("Pull backup failed; nothing was written")?;
            if !archive.is_empty() {
                outcome.backup_path = Some(
                    archive
                        .save(paths)
                        .context("Pull backup failed; nothing was written")?,
                );
            }
        }

        phases.enter(SyncPhase::Apply);
        if let Err(e) = self.apply_changes(&planned, config_plan.as_deref(), &mut state, &mut outcome) {
            // Keep the bases of files that did get written
            if let Err(save_err) = state.save(paths) {
                warn!("Failed to save sync state after interrupted pull: {}", save_err);
            }
            phases.enter(SyncPhase::Aborted);
            return Err(e);
        }

        for (path, hash) in base_updates {
            state.record(&path, hash);
        }
        if let Some(hash) = config_base {
            state.config_hash = hash;
        }
        state.mark_synced(response.project_version);
        state.save(paths)?;

        if outcome.backup_path.is_some() {
            if let Err(e) =
                cleanup_pull_backups(paths, self.ctx.config.backup.pull_backup_retention, false)
            {
                warn!("Failed to clean up old pull backups: {}", e);
            }
        }

        info!(
            "Pulled version {}: {} written, {} deleted, {} unchanged, {} skipped",
            response.project_version,
            outcome.written.len(),
            outcome.deleted.len(),
            outcome.unchanged.len(),
            outcome.skipped.len()
        );
        phases.enter(SyncPhase::Done);
        outcome.phases = phases.into_phases();
        Ok(outcome)
    }

    /// Write planned changes, checking for cancellation before each file.
    fn apply_changes(
        &self,
        planned: &[Planned],
        config: Option<&str>,
        state: &mut SyncState,
        outcome: &mut PullOutcome,
    ) -> Result<()> {
        let paths = &self.ctx.paths;
        let mut applied: Vec<String> = Vec::new();

        for change in planned {
            self.ctx.cancel.check(&applied)?;
            let target = paths.resolve(&change.path);
            match &change.change {
                Change::Write(set) => {
                    self.backend
                        .write_entry_set(set, &target)
                        .with_context(|| format!("Failed to write {}", change.path))?;
                    outcome.written.push(change.path.clone());
                }
                Change::Delete => {
                    match fs::remove_file(&target) {
                        Ok(()) => {}
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                        Err(e) => {
                            return Err(e)
                                .with_context(|| format!("Failed to delete {}", change.path))
                        }
                    }
                    outcome.deleted.push(change.path.clone());
                }
            }
            state.record(&change.path, change.remote_hash.clone());
            applied.push(change.path.clone());
        }

        if let Some(config) = config {
            self.ctx.cancel.check(&applied)?;
            fs::write(paths.config_file(), config)
                .with_context(|| format!("Failed to write {}", PROJECT_CONFIG_FILE))?;
            state.config_hash = config_hash(Some(&config.to_string()));
            outcome.config_written = true;
        }

        Ok(())
    }
}
