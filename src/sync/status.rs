use anyhow::Result;
use chrono::{DateTime, Utc};

use super::state::SyncState;
use super::{config_hash, SyncClient};

/// Working-copy changes since the last sync. Computed without touching the
/// network.
#[derive(Debug, Clone, Default)]
pub struct LocalStatus {
    /// Files never synced
    pub added: Vec<String>,
    pub modified: Vec<String>,
    /// Tracked files missing from disk
    pub deleted: Vec<String>,
    pub config_changed: bool,
    pub remote_project_version: u64,
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl LocalStatus {
    pub fn is_clean(&self) -> bool {
        self.change_count() == 0 && !self.config_changed
    }

    pub fn change_count(&self) -> usize {
        self.added.len() + self.modified.len() + self.deleted.len()
    }
}

impl SyncClient {
    pub fn status(&self, scopes: &[String]) -> Result<LocalStatus> {
        let filter = self.filter(scopes);
        let local = self.discover(&filter)?;
        let state = SyncState::load(&self.ctx.paths)?;

        let mut status = LocalStatus {
            remote_project_version: state.remote_project_version,
            last_synced_at: state.last_synced_at,
            ..Default::default()
        };

        for file in local.values() {
            match state.base_hash(&file.path) {
                None => status.added.push(file.path.clone()),
                Some(base) if base != &file.hash => status.modified.push(file.path.clone()),
                Some(_) => {}
            }
        }
        status.deleted = state
            .files
            .keys()
            .filter(|path| filter.should_include(path) && !local.contains_key(*path))
            .cloned()
            .collect();

        let config = self.read_config_document()?;
        status.config_changed = config.is_some() && config_hash(config.as_ref()) != state.config_hash;

        Ok(status)
    }
}
