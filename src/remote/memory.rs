use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::config::PROJECT_CONFIG_FILE;
use crate::diff::{diff_optional, FileDiff};
use crate::entries::{fold_key, ContentHash, EntrySet};
use crate::error::LrmError;
use crate::history::{HistoryEntry, HistoryPage, OperationType};
use crate::snapshot::{Snapshot, SnapshotPage, SnapshotSummary};

use super::{
    FileMeta, FilePayload, PullRequest, PullResponse, PushRequest, PushResponse, RemoteService,
    RemoteState, RevertRequest, RevertResponse,
};

/// Default number of snapshots a project may hold.
pub const DEFAULT_SNAPSHOT_LIMIT: usize = 10;

/// A history entry plus what the touched files looked like around it.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEntry {
    entry: HistoryEntry,
    before: BTreeMap<String, Option<EntrySet>>,
    after: BTreeMap<String, Option<EntrySet>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    config_before: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    config_after: Option<Option<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ServerState {
    version: u64,
    files: BTreeMap<String, EntrySet>,
    meta: BTreeMap<String, FileMeta>,
    config: Option<String>,
    /// Oldest first
    history: Vec<StoredEntry>,
    snapshots: Vec<Snapshot>,
    /// path -> folded key -> workflow status
    statuses: BTreeMap<String, BTreeMap<String, String>>,
}

/// A change to apply atomically to the server state.
struct ChangeSet {
    files: BTreeMap<String, Option<EntrySet>>,
    config: Option<Option<String>>,
}

/// In-process sync server.
///
/// Enforces the server side of the protocol: optimistic locking on the
/// project version, an append-only history whose entries can be reverted,
/// and a snapshot quota. Optionally persisted to a JSON file so it can act as
/// an offline remote across runs (`remote_url = "file:..."`).
pub struct InMemoryRemote {
    state: Mutex<ServerState>,
    persist_to: Option<PathBuf>,
    snapshot_limit: usize,
    pending_failure: Mutex<Option<LrmError>>,
    pending_interleave: Mutex<Option<PushRequest>>,
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ServerState::default()),
            persist_to: None,
            snapshot_limit: DEFAULT_SNAPSHOT_LIMIT,
            pending_failure: Mutex::new(None),
            pending_interleave: Mutex::new(None),
        }
    }

    /// Load (or start) a server persisted at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let state = match fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse remote file: {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ServerState::default(),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read remote file: {}", path.display()))
            }
        };
        Ok(Self {
            state: Mutex::new(state),
            persist_to: Some(path.to_path_buf()),
            ..Self::new()
        })
    }

    pub fn with_snapshot_limit(mut self, limit: usize) -> Self {
        self.snapshot_limit = limit;
        self
    }

    fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, state: &ServerState) -> Result<()> {
        let Some(path) = &self.persist_to else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(state).context("Failed to serialize remote")?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)
            .with_context(|| format!("Failed to write remote file: {}", tmp.display()))?;
        fs::rename(&tmp, path)
            .with_context(|| format!("Failed to replace remote file: {}", path.display()))?;
        Ok(())
    }

    /// Persist `next`, then make it the live state. A failed write leaves
    /// the live state as it was.
    fn commit(&self, live: &mut ServerState, next: ServerState) -> Result<()> {
        self.persist(&next)?;
        *live = next;
        Ok(())
    }

    /// Make the next call fail with `err` (e.g. a transient timeout).
    pub fn fail_next(&self, err: LrmError) {
        *self
            .pending_failure
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(err);
    }

    /// Apply `request` as another client's push right before the next push
    /// is handled, simulating a concurrent writer.
    pub fn interleave_before_next_push(&self, request: PushRequest) {
        *self
            .pending_interleave
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(request);
    }

    fn take_failure(&self) -> Result<()> {
        let pending = self
            .pending_failure
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        match pending {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    /// Record a workflow status for one entry, used by status-filtered pulls.
    pub fn set_entry_status(&self, path: &str, key: &str, status: &str) {
        self.lock()
            .statuses
            .entry(path.to_string())
            .or_default()
            .insert(fold_key(key), status.to_string());
    }

    pub fn project_version(&self) -> u64 {
        self.lock().version
    }

    pub fn file(&self, path: &str) -> Option<EntrySet> {
        self.lock().files.get(path).cloned()
    }

    pub fn config(&self) -> Option<String> {
        self.lock().config.clone()
    }

    /// Apply a change set and append a history entry for it.
    fn apply(
        state: &mut ServerState,
        changes: ChangeSet,
        operation_type: OperationType,
        actor: &str,
        message: Option<String>,
        parent_id: Option<String>,
    ) -> HistoryEntry {
        let mut before = BTreeMap::new();
        let mut after = BTreeMap::new();
        let (mut added, mut modified, mut deleted) = (0, 0, 0);
        let now = chrono::Utc::now();

        for (path, content) in changes.files {
            let previous = state.files.get(&path).cloned();
            let language = content
                .as_ref()
                .or(previous.as_ref())
                .map(|set| set.language_code.clone())
                .unwrap_or_default();
            let diff = diff_optional(&language, previous.as_ref(), content.as_ref());
            added += diff.added.len();
            modified += diff.modified.len() + diff.comment_changed.len();
            deleted += diff.deleted.len();

            match &content {
                Some(set) => {
                    state.files.insert(path.clone(), set.clone());
                    state.meta.insert(
                        path.clone(),
                        FileMeta {
                            updated_at: now,
                            updated_by: actor.to_string(),
                        },
                    );
                }
                None => {
                    state.files.remove(&path);
                    state.meta.remove(&path);
                }
            }
            before.insert(path.clone(), previous);
            after.insert(path, content);
        }

        let (config_before, config_after) = match changes.config {
            Some(config) => {
                let previous = std::mem::replace(&mut state.config, config.clone());
                (Some(previous), Some(config))
            }
            None => (None, None),
        };

        let mut files: Vec<String> = after.keys().cloned().collect();
        if config_after.is_some() {
            files.push(PROJECT_CONFIG_FILE.to_string());
        }

        state.version += 1;
        let entry = HistoryEntry {
            id: Uuid::new_v4().to_string(),
            timestamp: now,
            operation_type,
            added_count: added,
            modified_count: modified,
            deleted_count: deleted,
            message,
            actor: actor.to_string(),
            parent_id,
            project_version: state.version,
            files,
        };
        state.history.push(StoredEntry {
            entry: entry.clone(),
            before,
            after,
            config_before,
            config_after,
        });
        entry
    }

    fn check_lock(state: &ServerState, base_version: u64) -> Result<()> {
        if base_version != state.version {
            return Err(LrmError::VersionMismatch {
                expected: base_version,
                actual: state.version,
            }
            .into());
        }
        Ok(())
    }

    fn push_locked(state: &mut ServerState, request: &PushRequest) -> Result<PushResponse> {
        if !request.force {
            Self::check_lock(state, request.base_version)?;
        }

        let mut files: BTreeMap<String, Option<EntrySet>> = request
            .files
            .iter()
            .map(|payload| (payload.path.clone(), Some(payload.entries.clone())))
            .collect();
        for path in &request.deleted {
            if state.files.contains_key(path) {
                files.insert(path.clone(), None);
            }
        }
        let config = request
            .config
            .as_ref()
            .filter(|config| state.config.as_ref() != Some(*config))
            .map(|config| Some(config.clone()));

        let history = Self::apply(
            state,
            ChangeSet { files, config },
            OperationType::Push,
            &request.actor,
            request.message.clone(),
            None,
        );
        Ok(PushResponse {
            project_version: state.version,
            history,
        })
    }

    fn filtered(state: &ServerState, path: &str, set: &EntrySet, status: &str) -> EntrySet {
        let statuses = state.statuses.get(path);
        EntrySet::from_entries(
            set.language_code.clone(),
            set.iter()
                .filter(|entry| {
                    statuses
                        .and_then(|s| s.get(&fold_key(&entry.key)))
                        .is_some_and(|s| s == status)
                })
                .cloned(),
        )
    }

    fn summary(snapshot: &Snapshot) -> SnapshotSummary {
        SnapshotSummary {
            id: snapshot.id.clone(),
            message: snapshot.message.clone(),
            timestamp: snapshot.timestamp,
            actor: snapshot.actor.clone(),
            project_version: snapshot.project_version,
            file_count: snapshot.files.len(),
        }
    }
}

fn page_bounds(page: usize, page_size: usize, total: usize) -> (usize, usize, usize, usize) {
    let page = page.max(1);
    let page_size = page_size.max(1);
    let start = ((page - 1) * page_size).min(total);
    let end = (start + page_size).min(total);
    (page, page_size, start, end)
}

impl RemoteService for InMemoryRemote {
    fn state(&self) -> Result<RemoteState> {
        self.take_failure()?;
        let state = self.lock();
        Ok(RemoteState {
            project_version: state.version,
            files: state
                .files
                .iter()
                .map(|(path, set)| (path.clone(), set.content_hash()))
                .collect(),
            config_hash: state
                .config
                .as_ref()
                .map(|config| ContentHash::of_bytes(config.as_bytes())),
            file_meta: state.meta.clone(),
        })
    }

    fn push(&self, request: &PushRequest) -> Result<PushResponse> {
        let mut state = self.lock();

        let interleaved = self
            .pending_interleave
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(other) = interleaved {
            let mut next = state.clone();
            Self::push_locked(&mut next, &other)?;
            self.commit(&mut state, next)?;
        }

        self.take_failure()?;
        let mut next = state.clone();
        let response = Self::push_locked(&mut next, request)?;
        self.commit(&mut state, next)?;
        log::debug!(
            "Remote accepted push {} at version {}",
            response.history.id,
            response.project_version
        );
        Ok(response)
    }

    fn pull(&self, request: &PullRequest) -> Result<PullResponse> {
        self.take_failure()?;
        let state = self.lock();

        let files = if request.config_only {
            Vec::new()
        } else {
            state
                .files
                .iter()
                .map(|(path, set)| {
                    let entries = match &request.status_filter {
                        Some(status) => Self::filtered(&state, path, set, status),
                        None => set.clone(),
                    };
                    FilePayload::new(path.clone(), entries)
                })
                .collect()
        };
        let config = if request.resources_only {
            None
        } else {
            state.config.clone()
        };

        Ok(PullResponse {
            project_version: state.version,
            files,
            config,
            file_meta: state.meta.clone(),
        })
    }

    fn history(&self, page: usize, page_size: usize) -> Result<HistoryPage> {
        self.take_failure()?;
        let state = self.lock();
        let total = state.history.len();
        let (page, page_size, start, end) = page_bounds(page, page_size, total);

        Ok(HistoryPage {
            entries: state
                .history
                .iter()
                .rev()
                .skip(start)
                .take(end - start)
                .map(|stored| stored.entry.clone())
                .collect(),
            page,
            page_size,
            total,
        })
    }

    fn history_entry(&self, id: &str) -> Result<HistoryEntry> {
        self.take_failure()?;
        self.lock()
            .history
            .iter()
            .find(|stored| stored.entry.id == id)
            .map(|stored| stored.entry.clone())
            .ok_or_else(|| LrmError::NotFound(format!("history entry {id}")).into())
    }

    fn revert(&self, id: &str, request: &RevertRequest) -> Result<RevertResponse> {
        self.take_failure()?;
        let mut state = self.lock();

        let target = state
            .history
            .iter()
            .find(|stored| stored.entry.id == id)
            .cloned()
            .ok_or_else(|| LrmError::NotFound(format!("history entry {id}")))?;

        if let Some(base_version) = request.base_version {
            Self::check_lock(&state, base_version)?;
        }

        let preview: Vec<FileDiff> = target
            .before
            .iter()
            .filter_map(|(path, restored)| {
                let current = state.files.get(path);
                let language = restored
                    .as_ref()
                    .or(current)
                    .map(|set| set.language_code.clone())
                    .unwrap_or_default();
                let diff = diff_optional(&language, current, restored.as_ref());
                (!diff.is_empty()).then(|| FileDiff {
                    path: path.clone(),
                    diff,
                })
            })
            .collect();

        if request.dry_run {
            return Ok(RevertResponse {
                project_version: state.version,
                preview,
                entry: None,
            });
        }

        let message = request.message.clone().or_else(|| {
            Some(format!("Revert \"{}\"", target.entry.message.as_deref().unwrap_or(id)))
        });
        let mut next = state.clone();
        let entry = Self::apply(
            &mut next,
            ChangeSet {
                files: target.before.clone(),
                config: target.config_before.clone(),
            },
            OperationType::Revert,
            &request.actor,
            message,
            Some(target.entry.id.clone()),
        );
        self.commit(&mut state, next)?;

        Ok(RevertResponse {
            project_version: state.version,
            preview,
            entry: Some(entry),
        })
    }

    fn create_snapshot(&self, message: Option<&str>, actor: &str) -> Result<Snapshot> {
        self.take_failure()?;
        let mut state = self.lock();
        if state.snapshots.len() >= self.snapshot_limit {
            return Err(LrmError::SnapshotQuotaExceeded {
                limit: self.snapshot_limit,
            }
            .into());
        }

        let snapshot = Snapshot {
            id: Uuid::new_v4().to_string(),
            message: message.map(str::to_string),
            timestamp: chrono::Utc::now(),
            actor: actor.to_string(),
            project_version: state.version,
            files: state
                .files
                .iter()
                .map(|(path, set)| FilePayload::new(path.clone(), set.clone()))
                .collect(),
            config: state.config.clone(),
        };
        let mut next = state.clone();
        next.snapshots.push(snapshot.clone());
        self.commit(&mut state, next)?;
        Ok(snapshot)
    }

    fn list_snapshots(&self, page: usize, page_size: usize) -> Result<SnapshotPage> {
        self.take_failure()?;
        let state = self.lock();
        let total = state.snapshots.len();
        let (page, page_size, start, end) = page_bounds(page, page_size, total);

        Ok(SnapshotPage {
            snapshots: state
                .snapshots
                .iter()
                .rev()
                .skip(start)
                .take(end - start)
                .map(Self::summary)
                .collect(),
            page,
            page_size,
            total,
        })
    }

    fn get_snapshot(&self, id: &str) -> Result<Snapshot> {
        self.take_failure()?;
        self.lock()
            .snapshots
            .iter()
            .find(|snapshot| snapshot.id == id)
            .cloned()
            .ok_or_else(|| LrmError::NotFound(format!("snapshot {id}")).into())
    }

    fn delete_snapshot(&self, id: &str) -> Result<()> {
        self.take_failure()?;
        let mut state = self.lock();
        if !state.snapshots.iter().any(|snapshot| snapshot.id == id) {
            return Err(LrmError::NotFound(format!("snapshot {id}")).into());
        }
        let mut next = state.clone();
        next.snapshots.retain(|snapshot| snapshot.id != id);
        self.commit(&mut state, next)
    }
}
