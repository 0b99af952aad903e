use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::diff::DiffResult;
use crate::entries::ContentHash;
use crate::error::LrmError;

/// How a diverged file (or the configuration document) is settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionStrategy {
    /// Keep the local copy; it is pushed on the next push
    Local,
    /// Overwrite the local copy with the remote one (after backup)
    Remote,
    /// Ask per conflict; only valid with an interactive chooser
    Prompt,
    /// Skip conflicting files, apply everything else, exit non-zero
    #[default]
    Abort,
}

impl ResolutionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionStrategy::Local => "local",
            ResolutionStrategy::Remote => "remote",
            ResolutionStrategy::Prompt => "prompt",
            ResolutionStrategy::Abort => "abort",
        }
    }
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResolutionStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(ResolutionStrategy::Local),
            "remote" => Ok(ResolutionStrategy::Remote),
            "prompt" => Ok(ResolutionStrategy::Prompt),
            "abort" => Ok(ResolutionStrategy::Abort),
            other => Err(anyhow!(
                "Unknown strategy '{other}'; expected local, remote, prompt or abort"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    BothModified,
    DeletedLocallyModifiedRemotely,
    DeletedRemotelyModifiedLocally,
    ConfigurationConflict,
}

impl ConflictKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictKind::BothModified => "both modified",
            ConflictKind::DeletedLocallyModifiedRemotely => "deleted locally, modified remotely",
            ConflictKind::DeletedRemotelyModifiedLocally => "deleted remotely, modified locally",
            ConflictKind::ConfigurationConflict => "configuration conflict",
        }
    }
}

/// Where a file stands relative to the last successful sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileSync {
    /// Local and remote already agree
    Unchanged,
    /// Only the remote side moved; take it
    FastForward,
    /// Only the local side moved; keep it for the next push
    LocalOnly,
    Conflict(ConflictKind),
}

/// Three-way classification by content hash. `None` means the file does not
/// exist on that side (or, for `base`, was never synced).
pub fn classify(
    local: Option<&ContentHash>,
    remote: Option<&ContentHash>,
    base: Option<&ContentHash>,
) -> FileSync {
    if local == remote {
        return FileSync::Unchanged;
    }

    match base {
        None => match (local, remote) {
            (None, Some(_)) => FileSync::FastForward,
            (Some(_), None) => FileSync::LocalOnly,
            _ => FileSync::Conflict(ConflictKind::BothModified),
        },
        Some(_) if local == base => FileSync::FastForward,
        Some(_) if remote == base => FileSync::LocalOnly,
        Some(_) => match (local, remote) {
            (None, _) => FileSync::Conflict(ConflictKind::DeletedLocallyModifiedRemotely),
            (_, None) => FileSync::Conflict(ConflictKind::DeletedRemotelyModifiedLocally),
            _ => FileSync::Conflict(ConflictKind::BothModified),
        },
    }
}

/// One key of the configuration document that differs between the sides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigChange {
    /// Dotted TOML path, e.g. `sync.timeout_secs`
    pub path: String,
    pub local: Option<String>,
    pub remote: Option<String>,
}

fn flatten_toml(prefix: &str, value: &toml::Value, out: &mut BTreeMap<String, String>) {
    match value {
        toml::Value::Table(table) => {
            for (key, child) in table {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten_toml(&path, child, out);
            }
        }
        other => {
            out.insert(prefix.to_string(), other.to_string());
        }
    }
}

/// Key-by-key comparison of two configuration documents.
///
/// Documents that do not parse as TOML are compared as a whole.
pub fn structural_config_diff(local: Option<&str>, remote: Option<&str>) -> Vec<ConfigChange> {
    fn flatten(doc: Option<&str>) -> Option<BTreeMap<String, String>> {
        let mut out = BTreeMap::new();
        if let Some(doc) = doc {
            let value: toml::Value = toml::from_str(doc).ok()?;
            flatten_toml("", &value, &mut out);
        }
        Some(out)
    }

    let (Some(local_map), Some(remote_map)) = (flatten(local), flatten(remote)) else {
        return vec![ConfigChange {
            path: "<document>".to_string(),
            local: local.map(str::to_string),
            remote: remote.map(str::to_string),
        }];
    };

    let mut keys: Vec<&String> = local_map.keys().chain(remote_map.keys()).collect();
    keys.sort();
    keys.dedup();

    keys.into_iter()
        .filter(|key| local_map.get(*key) != remote_map.get(*key))
        .map(|key| ConfigChange {
            path: key.clone(),
            local: local_map.get(key).cloned(),
            remote: remote_map.get(key).cloned(),
        })
        .collect()
}

/// A file (or the configuration document) that changed on both sides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    /// Project-relative path; the config file name for configuration conflicts
    pub path: String,
    pub kind: ConflictKind,
    pub local_hash: Option<ContentHash>,
    pub remote_hash: Option<ContentHash>,
    pub base_hash: Option<ContentHash>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_timestamp: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_timestamp: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_author: Option<String>,
    /// Only for configuration conflicts
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub config_changes: Vec<ConfigChange>,
    /// Entry-level difference from the local to the remote copy, when both exist
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_diff: Option<DiffResult>,
}

impl Conflict {
    pub fn new(
        path: impl Into<String>,
        kind: ConflictKind,
        local_hash: Option<ContentHash>,
        remote_hash: Option<ContentHash>,
        base_hash: Option<ContentHash>,
    ) -> Self {
        Self {
            path: path.into(),
            kind,
            local_hash,
            remote_hash,
            base_hash,
            local_timestamp: None,
            remote_timestamp: None,
            remote_author: None,
            config_changes: Vec::new(),
            entry_diff: None,
        }
    }

    pub fn with_remote_meta(
        mut self,
        timestamp: Option<chrono::DateTime<chrono::Utc>>,
        author: Option<String>,
    ) -> Self {
        self.remote_timestamp = timestamp;
        self.remote_author = author;
        self
    }

    pub fn with_local_timestamp(mut self, timestamp: Option<chrono::DateTime<chrono::Utc>>) -> Self {
        self.local_timestamp = timestamp;
        self
    }

    pub fn with_entry_diff(mut self, diff: DiffResult) -> Self {
        self.entry_diff = Some(diff);
        self
    }

    pub fn with_config_changes(mut self, changes: Vec<ConfigChange>) -> Self {
        self.config_changes = changes;
        self
    }

    /// Get a human-readable description of the conflict
    pub fn description(&self) -> String {
        let short = |h: &Option<ContentHash>| {
            h.as_ref()
                .map(|h| h.short().to_string())
                .unwrap_or_else(|| "absent".to_string())
        };
        format!(
            "{} ({}):\n  Local: {}, last update: {}\n  Remote: {}, last update: {} by {}",
            self.path,
            self.kind.as_str(),
            short(&self.local_hash),
            self.local_timestamp
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "unknown".to_string()),
            short(&self.remote_hash),
            self.remote_timestamp
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "unknown".to_string()),
            self.remote_author.as_deref().unwrap_or("unknown")
        )
    }
}

/// Outcome for a single conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    KeepLocal,
    KeepRemote,
    /// Left unresolved; the file is not touched
    Skip,
}

/// Supplies per-conflict decisions for the `prompt` strategy.
///
/// The terminal implementation lives in [`crate::interactive_conflict`];
/// tests pass scripted choosers.
pub trait ConflictChooser {
    fn choose(&mut self, conflict: &Conflict) -> Result<Resolution>;
}

/// Conflicts grouped by the decision taken.
#[derive(Debug, Default)]
pub struct ResolutionResult {
    pub keep_local: Vec<Conflict>,
    pub keep_remote: Vec<Conflict>,
    pub skipped: Vec<Conflict>,
}

impl ResolutionResult {
    pub fn total(&self) -> usize {
        self.keep_local.len() + self.keep_remote.len() + self.skipped.len()
    }

    pub fn decision_for(&self, path: &str) -> Option<Resolution> {
        let has = |list: &[Conflict]| list.iter().any(|c| c.path == path);
        if has(&self.keep_local) {
            Some(Resolution::KeepLocal)
        } else if has(&self.keep_remote) {
            Some(Resolution::KeepRemote)
        } else if has(&self.skipped) {
            Some(Resolution::Skip)
        } else {
            None
        }
    }
}

/// Applies a strategy to conflicts. Holds no I/O of its own; interactive
/// decisions come from the chooser the caller supplies.
pub struct ConflictResolver<'a> {
    strategy: ResolutionStrategy,
    chooser: Option<&'a mut dyn ConflictChooser>,
}

impl<'a> ConflictResolver<'a> {
    /// Fails with `PromptNotInteractive` when `prompt` is requested without
    /// a chooser, so callers can reject it before any I/O.
    pub fn new(
        strategy: ResolutionStrategy,
        chooser: Option<&'a mut dyn ConflictChooser>,
    ) -> Result<Self, LrmError> {
        if strategy == ResolutionStrategy::Prompt && chooser.is_none() {
            return Err(LrmError::PromptNotInteractive);
        }
        Ok(Self { strategy, chooser })
    }

    pub fn strategy(&self) -> ResolutionStrategy {
        self.strategy
    }

    pub fn resolve(&mut self, conflict: &Conflict) -> Result<Resolution> {
        match self.strategy {
            ResolutionStrategy::Local => Ok(Resolution::KeepLocal),
            ResolutionStrategy::Remote => Ok(Resolution::KeepRemote),
            ResolutionStrategy::Abort => Ok(Resolution::Skip),
            ResolutionStrategy::Prompt => match self.chooser.as_mut() {
                Some(chooser) => chooser.choose(conflict),
                None => Err(LrmError::PromptNotInteractive.into()),
            },
        }
    }

    pub fn resolve_all(&mut self, conflicts: &[Conflict]) -> Result<ResolutionResult> {
        let mut result = ResolutionResult::default();
        for conflict in conflicts {
            match self.resolve(conflict)? {
                Resolution::KeepLocal => result.keep_local.push(conflict.clone()),
                Resolution::KeepRemote => result.keep_remote.push(conflict.clone()),
                Resolution::Skip => result.skipped.push(conflict.clone()),
            }
        }
        Ok(result)
    }
}
