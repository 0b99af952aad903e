use anyhow::{Context, Result};
use log::{info, warn};
use std::collections::BTreeMap;

use crate::config::PROJECT_CONFIG_FILE;
use crate::conflict::{classify, structural_config_diff, Conflict, ConflictKind, FileSync};
use crate::error::{find_lrm_error, LrmError};
use crate::remote::{FilePayload, PullRequest, PushRequest, RemoteState};

use super::discovery::LocalFile;
use super::phase::{PhaseLog, SyncPhase};
use super::state::SyncState;
use super::{config_hash, SyncClient};

#[derive(Debug, Clone, Default)]
pub struct PushOptions {
    /// Project-relative files or directories; empty means everything
    pub paths: Vec<String>,
    /// Classify and report, but upload nothing and keep the sync state
    pub dry_run: bool,
    /// Skip conflict detection and the server's lock check
    pub force: bool,
    pub config_only: bool,
    pub resources_only: bool,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PushOutcome {
    /// Files sent (or, in a dry run, that would be sent)
    pub uploaded: Vec<String>,
    /// Tracked files deleted locally and removed remotely
    pub deleted: Vec<String>,
    /// Files that already matched the remote; only the sync state moved
    pub already_synced: Vec<String>,
    pub config_pushed: bool,
    pub conflicts: Vec<Conflict>,
    pub history_id: Option<String>,
    pub project_version: Option<u64>,
    /// Set when the server rejected a stale base version: (sent, current)
    pub version_mismatch: Option<(u64, u64)>,
    pub dry_run: bool,
    pub phases: Vec<SyncPhase>,
}

impl PushOutcome {
    pub fn no_changes(&self) -> bool {
        self.phases.contains(&SyncPhase::NoChanges)
    }

    /// Whether the push left work undone (conflicts or a lost race).
    pub fn is_blocked(&self) -> bool {
        !self.conflicts.is_empty() || self.version_mismatch.is_some()
    }
}

/// Local changes relative to the last sync.
struct LocalChanges {
    changed: Vec<String>,
    deleted: Vec<String>,
    config: Option<String>,
    config_changed: bool,
}

impl LocalChanges {
    fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.deleted.is_empty() && !self.config_changed
    }
}

/// What to do with each changed path after looking at the remote.
#[derive(Default)]
struct PushPlan {
    upload: Vec<String>,
    delete: Vec<String>,
    already_synced: Vec<String>,
    conflicts: Vec<Conflict>,
    config_conflict: bool,
}

impl SyncClient {
    /// Upload local changes.
    ///
    /// Divergence is returned as conflicts on the outcome, not as an error.
    /// The sync state is only written after the server accepted the push.
    pub fn push(&self, options: &PushOptions) -> Result<PushOutcome> {
        let mut phases = PhaseLog::default();
        let mut outcome = PushOutcome {
            dry_run: options.dry_run,
            ..Default::default()
        };

        phases.enter(SyncPhase::ComputingLocalChanges);
        let filter = self.filter(&options.paths);
        let local = if options.config_only {
            BTreeMap::new()
        } else {
            self.discover(&filter)?
        };
        for file in local.values() {
            file.entries.validate(&file.path)?;
        }

        let mut state = SyncState::load(&self.ctx.paths)?;
        let changes = self.local_changes(options, &filter, &local, &state)?;

        if changes.is_empty() {
            phases.enter(SyncPhase::NoChanges);
            info!("Nothing to push");
            outcome.phases = phases.into_phases();
            return Ok(outcome);
        }

        phases.enter(SyncPhase::CheckingRemoteState);
        let remote_state = self.remote.state().context("Failed to fetch remote state")?;

        let plan = if options.force {
            PushPlan {
                upload: changes.changed.clone(),
                delete: changes.deleted.clone(),
                ..Default::default()
            }
        } else {
            if remote_state.project_version != state.remote_project_version {
                phases.enter(SyncPhase::ConflictDetection);
            }
            self.plan(&changes, &local, &state, &remote_state)?
        };

        outcome.uploaded = plan.upload.clone();
        outcome.deleted = plan.delete.clone();
        outcome.already_synced = plan.already_synced.clone();
        outcome.config_pushed = changes.config_changed && !plan.config_conflict;

        if !plan.conflicts.is_empty() {
            warn!("Push blocked by {} conflict(s)", plan.conflicts.len());
            outcome.conflicts = plan.conflicts;
            phases.enter(SyncPhase::Aborted);
            outcome.phases = phases.into_phases();
            return Ok(outcome);
        }

        if options.dry_run {
            phases.enter(SyncPhase::Done);
            outcome.phases = phases.into_phases();
            return Ok(outcome);
        }

        self.ctx.cancel.check(&[])?;

        if plan.upload.is_empty() && plan.delete.is_empty() && !outcome.config_pushed {
            // Everything already matched the remote
            for path in &plan.already_synced {
                state.record(path, local.get(path).map(|f| f.hash.clone()));
            }
            state.mark_synced(remote_state.project_version);
            state.save(&self.ctx.paths)?;
            phases.enter(SyncPhase::Done);
            outcome.project_version = Some(remote_state.project_version);
            outcome.phases = phases.into_phases();
            return Ok(outcome);
        }

        phases.enter(SyncPhase::Uploading);
        let request = PushRequest {
            base_version: state.remote_project_version,
            files: plan
                .upload
                .iter()
                .filter_map(|path| local.get(path))
                .map(|file| FilePayload::new(file.path.clone(), file.entries.clone()))
                .collect(),
            deleted: plan.delete.clone(),
            config: if outcome.config_pushed {
                changes.config.clone()
            } else {
                None
            },
            message: options.message.clone(),
            actor: self.ctx.actor.clone(),
            force: options.force,
        };

        let response = match self.remote.push(&request) {
            Ok(response) => response,
            Err(e) => {
                if let Some(LrmError::VersionMismatch { expected, actual }) = find_lrm_error(&e) {
                    warn!(
                        "Remote moved from version {} to {} during push; re-checking",
                        expected, actual
                    );
                    outcome.version_mismatch = Some((*expected, *actual));
                    outcome.uploaded.clear();
                    outcome.deleted.clear();
                    outcome.config_pushed = false;
                    phases.enter(SyncPhase::ConflictDetection);
                    let fresh = self
                        .remote
                        .state()
                        .context("Failed to re-fetch remote state")?;
                    outcome.conflicts = self.plan(&changes, &local, &state, &fresh)?.conflicts;
                    phases.enter(SyncPhase::Aborted);
                    outcome.phases = phases.into_phases();
                    return Ok(outcome);
                }
                return Err(e).context("Push failed; nothing was changed locally");
            }
        };

        phases.enter(SyncPhase::Apply);
        for path in plan.upload.iter().chain(&plan.already_synced) {
            state.record(path, local.get(path).map(|f| f.hash.clone()));
        }
        for path in &plan.delete {
            state.record(path, None);
        }
        if outcome.config_pushed {
            state.config_hash = config_hash(changes.config.as_ref());
        }
        state.mark_synced(response.project_version);
        state.save(&self.ctx.paths)?;

        info!(
            "Pushed {} file(s), deleted {} (history {}, version {})",
            plan.upload.len(),
            plan.delete.len(),
            response.history.id,
            response.project_version
        );
        outcome.history_id = Some(response.history.id);
        outcome.project_version = Some(response.project_version);
        phases.enter(SyncPhase::Done);
        outcome.phases = phases.into_phases();
        Ok(outcome)
    }

    fn local_changes(
        &self,
        options: &PushOptions,
        filter: &crate::filter::ResourceFilter,
        local: &BTreeMap<String, LocalFile>,
        state: &SyncState,
    ) -> Result<LocalChanges> {
        let changed = local
            .values()
            .filter(|file| state.base_hash(&file.path) != Some(&file.hash))
            .map(|file| file.path.clone())
            .collect();

        let deleted = if options.config_only {
            Vec::new()
        } else {
            state
                .files
                .keys()
                .filter(|path| filter.should_include(path) && !local.contains_key(*path))
                .cloned()
                .collect()
        };

        let (config, config_changed) = if options.resources_only {
            (None, false)
        } else {
            let config = self.read_config_document()?;
            let changed = config.is_some() && config_hash(config.as_ref()) != state.config_hash;
            (config, changed)
        };

        Ok(LocalChanges {
            changed,
            deleted,
            config,
            config_changed,
        })
    }

    /// Classify each changed path against the remote.
    fn plan(
        &self,
        changes: &LocalChanges,
        local: &BTreeMap<String, LocalFile>,
        state: &SyncState,
        remote: &RemoteState,
    ) -> Result<PushPlan> {
        let mut plan = PushPlan::default();

        for path in changes.changed.iter().chain(&changes.deleted) {
            let local_file = local.get(path);
            let local_hash = local_file.map(|f| &f.hash);
            let remote_hash = remote.files.get(path);
            let base = state.base_hash(path);

            match classify(local_hash, remote_hash, base) {
                FileSync::Unchanged => plan.already_synced.push(path.clone()),
                FileSync::LocalOnly | FileSync::FastForward => {
                    if local_file.is_some() {
                        plan.upload.push(path.clone());
                    } else {
                        plan.delete.push(path.clone());
                    }
                }
                FileSync::Conflict(kind) => {
                    let meta = remote.file_meta.get(path);
                    plan.conflicts.push(
                        Conflict::new(
                            path.clone(),
                            kind,
                            local_hash.cloned(),
                            remote_hash.cloned(),
                            base.cloned(),
                        )
                        .with_local_timestamp(local_file.and_then(|f| f.modified))
                        .with_remote_meta(
                            meta.map(|m| m.updated_at),
                            meta.map(|m| m.updated_by.clone()),
                        ),
                    );
                }
            }
        }

        if changes.config_changed {
            let local_hash = config_hash(changes.config.as_ref());
            let remote_moved = remote.config_hash.is_some()
                && remote.config_hash != state.config_hash
                && remote.config_hash != local_hash;
            if remote_moved {
                let remote_config = self
                    .remote
                    .pull(&PullRequest {
                        config_only: true,
                        ..Default::default()
                    })
                    .context("Failed to fetch remote configuration")?
                    .config;
                plan.config_conflict = true;
                plan.conflicts.push(
                    Conflict::new(
                        PROJECT_CONFIG_FILE,
                        ConflictKind::ConfigurationConflict,
                        local_hash,
                        remote.config_hash.clone(),
                        state.config_hash.clone(),
                    )
                    .with_config_changes(structural_config_diff(
                        changes.config.as_deref(),
                        remote_config.as_deref(),
                    )),
                );
            }
        }

        Ok(plan)
    }
}
