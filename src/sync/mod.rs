//! Push/pull orchestration between the working copy and the remote.
//!
//! Every decision is a three-way comparison of content hashes: the local
//! file, the remote file and the last-synced hash from [`SyncState`].

mod discovery;
mod phase;
mod pull;
mod push;
mod state;
mod status;

pub(crate) use discovery::list_resource_files;
pub use discovery::LocalFile;
pub use phase::{PhaseLog, SyncPhase};
pub use pull::{PullOptions, PullOutcome};
pub use push::{PushOptions, PushOutcome};
pub use state::SyncState;
pub use status::LocalStatus;

use anyhow::{anyhow, Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::backend::ResourceBackend;
use crate::backup::LocalVersionStore;
use crate::context::SyncContext;
use crate::entries::ContentHash;
use crate::filter::ResourceFilter;
use crate::history::HistoryLog;
use crate::remote::{HttpRemote, InMemoryRemote, RemoteService, RetryPolicy};
use crate::snapshot::SnapshotManager;

/// Build the remote named by `[sync] remote_url`.
///
/// `http://` and `https://` URLs use the HTTP client; `file:<path>` opens a
/// JSON-persisted in-process remote (relative paths are taken from the
/// project root).
pub fn connect_remote(ctx: &SyncContext) -> Result<Arc<dyn RemoteService>> {
    let url = ctx
        .config
        .sync
        .remote_url
        .as_deref()
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .ok_or_else(|| anyhow!("No remote configured. Set [sync] remote_url in lrm.toml."))?;

    if let Some(location) = url.strip_prefix("file:") {
        let location = location.trim_start_matches("//");
        let path = Path::new(location);
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            ctx.paths.root().join(path)
        };
        log::debug!("Using file remote at {}", path.display());
        return Ok(Arc::new(InMemoryRemote::open(&path)?));
    }

    let token = ctx.credentials.as_ref().map(|c| c.token.clone());
    if token.is_none() {
        log::warn!("No credentials found; requests to {} are unauthenticated", url);
    }
    Ok(Arc::new(HttpRemote::new(
        url,
        token,
        ctx.config.sync.timeout(),
        RetryPolicy::with_max_attempts(ctx.config.sync.max_retries),
    )?))
}

/// Owns one sync session: context, remote, resource backend and the local
/// version store used for pre-pull and pre-restore backups.
pub struct SyncClient {
    ctx: SyncContext,
    remote: Arc<dyn RemoteService>,
    backend: Arc<dyn ResourceBackend>,
    store: LocalVersionStore,
}

impl SyncClient {
    pub fn new(
        ctx: SyncContext,
        remote: Arc<dyn RemoteService>,
        backend: Arc<dyn ResourceBackend>,
    ) -> Self {
        let store = ctx.version_store(backend.clone());
        Self {
            ctx,
            remote,
            backend,
            store,
        }
    }

    /// Replace the version store (e.g. with in-memory storage).
    pub fn with_store(mut self, store: LocalVersionStore) -> Self {
        self.store = store;
        self
    }

    pub fn context(&self) -> &SyncContext {
        &self.ctx
    }

    pub fn store(&self) -> &LocalVersionStore {
        &self.store
    }

    pub fn backend(&self) -> &Arc<dyn ResourceBackend> {
        &self.backend
    }

    pub fn history(&self) -> HistoryLog {
        HistoryLog::new(self.remote.clone())
    }

    pub fn snapshots(&self) -> SnapshotManager {
        SnapshotManager::new(self.remote.clone())
    }

    pub fn sync_state(&self) -> Result<SyncState> {
        SyncState::load(&self.ctx.paths)
    }

    fn filter(&self, scopes: &[String]) -> ResourceFilter {
        ResourceFilter::from_config(&self.ctx.config.resources).with_scopes(scopes.iter().cloned())
    }

    fn discover(&self, filter: &ResourceFilter) -> Result<BTreeMap<String, LocalFile>> {
        discovery::discover_resources(
            &self.ctx.paths,
            &self.ctx.config.resource_dir(&self.ctx.paths),
            filter,
            self.backend.as_ref(),
        )
    }

    /// Raw `lrm.toml`, if present.
    fn read_config_document(&self) -> Result<Option<String>> {
        let path = self.ctx.paths.config_file();
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }
}

pub(crate) fn config_hash(document: Option<&String>) -> Option<ContentHash> {
    document.map(|doc| ContentHash::of_bytes(doc.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProjectConfig, ProjectPaths};
    use tempfile::TempDir;

    #[test]
    fn test_connect_requires_remote_url() {
        let ctx = SyncContext::new(ProjectPaths::new("/tmp/project"), ProjectConfig::default());
        let err = connect_remote(&ctx).err().expect("error");
        assert!(err.to_string().contains("remote_url"));
    }

    #[test]
    fn test_connect_file_remote_relative_to_root() -> Result<()> {
        let temp = TempDir::new()?;
        let mut config = ProjectConfig::default();
        config.sync.remote_url = Some("file:remote/server.json".into());
        let ctx = SyncContext::new(ProjectPaths::new(temp.path()), config);

        let remote = connect_remote(&ctx)?;
        assert_eq!(remote.state()?.project_version, 0);
        Ok(())
    }

    #[test]
    fn test_connect_rejects_bad_url() {
        let mut config = ProjectConfig::default();
        config.sync.remote_url = Some("ftp://example.com".into());
        let ctx = SyncContext::new(ProjectPaths::new("/tmp/project"), config);
        assert!(connect_remote(&ctx).is_err());
    }
}
