use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;

use crate::config::ProjectPaths;
use crate::entries::ContentHash;

/// What the working copy looked like at the last successful sync.
///
/// Stored as `.lrm/sync-state.json`. `files` holds the last-synced hash of
/// every tracked language file (the three-way merge base); the remote
/// project version is the optimistic lock token sent with the next push.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SyncState {
    #[serde(default)]
    pub files: BTreeMap<String, ContentHash>,

    /// Hash of `lrm.toml` at the last sync
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_hash: Option<ContentHash>,

    #[serde(default)]
    pub remote_project_version: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl SyncState {
    /// Loads the sync state, or an empty state if the project never synced.
    ///
    /// # Errors
    ///
    /// Fails if the state file exists but cannot be read or parsed.
    pub fn load(paths: &ProjectPaths) -> Result<Self> {
        let state_path = paths.sync_state_file();

        let content = match fs::read_to_string(&state_path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to read sync state: {}", state_path.display())
                })
            }
        };

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse sync state: {}", state_path.display()))
    }

    /// Write through a temporary file so an interrupted save never leaves a
    /// truncated state behind.
    pub(crate) fn save(&self, paths: &ProjectPaths) -> Result<()> {
        paths.ensure_state_dir()?;
        let state_path = paths.sync_state_file();
        let tmp_path = state_path.with_extension("json.tmp");

        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize sync state")?;

        fs::write(&tmp_path, content).context("Failed to write sync state")?;
        fs::rename(&tmp_path, &state_path).context("Failed to replace sync state")?;

        Ok(())
    }

    pub fn base_hash(&self, path: &str) -> Option<&ContentHash> {
        self.files.get(path)
    }

    /// Record `hash` as the merge base of `path`; `None` forgets the file.
    pub fn record(&mut self, path: &str, hash: Option<ContentHash>) {
        match hash {
            Some(hash) => {
                self.files.insert(path.to_string(), hash);
            }
            None => {
                self.files.remove(path);
            }
        }
    }

    pub fn mark_synced(&mut self, project_version: u64) {
        self.remote_project_version = project_version;
        self.last_synced_at = Some(chrono::Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_state_is_empty() -> Result<()> {
        let temp = TempDir::new()?;
        let state = SyncState::load(&ProjectPaths::new(temp.path()))?;
        assert_eq!(state, SyncState::default());
        Ok(())
    }

    #[test]
    fn test_save_and_load() -> Result<()> {
        let temp = TempDir::new()?;
        let paths = ProjectPaths::new(temp.path());

        let mut state = SyncState::default();
        state.record("locales/fr.json", Some(ContentHash::of_bytes(b"fr")));
        state.record("locales/de.json", Some(ContentHash::of_bytes(b"de")));
        state.record("locales/de.json", None);
        state.mark_synced(7);
        state.save(&paths)?;

        let loaded = SyncState::load(&paths)?;
        assert_eq!(loaded, state);
        assert_eq!(loaded.remote_project_version, 7);
        assert!(loaded.base_hash("locales/de.json").is_none());
        assert!(!paths.sync_state_file().with_extension("json.tmp").exists());
        Ok(())
    }

    #[test]
    fn test_corrupted_state_is_an_error() -> Result<()> {
        let temp = TempDir::new()?;
        let paths = ProjectPaths::new(temp.path());
        paths.ensure_state_dir()?;
        fs::write(paths.sync_state_file(), "{not json")?;
        assert!(SyncState::load(&paths).is_err());
        Ok(())
    }
}
