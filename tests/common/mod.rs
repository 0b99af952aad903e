#![allow(dead_code)]

use anyhow::Result;
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

use lrm_sync::backend::{JsonBackend, ResourceBackend};
use lrm_sync::config::{ProjectConfig, ProjectPaths};
use lrm_sync::context::SyncContext;
use lrm_sync::entries::EntrySet;
use lrm_sync::remote::{InMemoryRemote, RemoteService};
use lrm_sync::sync::{PushOptions, SyncClient};

/// One working copy sharing a remote with other working copies.
pub struct Workspace {
    pub dir: TempDir,
    pub actor: String,
    pub remote: Arc<InMemoryRemote>,
}

impl Workspace {
    pub fn new(actor: &str, remote: &Arc<InMemoryRemote>) -> Result<Self> {
        let dir = TempDir::new()?;
        let paths = ProjectPaths::new(dir.path());
        ProjectConfig::default().save(&paths)?;
        fs::create_dir_all(dir.path().join("locales"))?;
        Ok(Self {
            dir,
            actor: actor.to_string(),
            remote: remote.clone(),
        })
    }

    pub fn paths(&self) -> ProjectPaths {
        ProjectPaths::new(self.dir.path())
    }

    pub fn context(&self) -> Result<SyncContext> {
        let paths = self.paths();
        let config = ProjectConfig::load(&paths)?;
        Ok(SyncContext::new(paths, config).with_actor(self.actor.clone()))
    }

    pub fn client(&self) -> Result<SyncClient> {
        let remote: Arc<dyn RemoteService> = self.remote.clone();
        Ok(SyncClient::new(self.context()?, remote, Arc::new(JsonBackend)))
    }

    /// Write `locales/<lang>.json` from key/value pairs.
    pub fn write(&self, lang: &str, entries: &[(&str, &str)]) -> Result<()> {
        let object: serde_json::Map<String, serde_json::Value> = entries
            .iter()
            .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string())))
            .collect();
        fs::write(
            self.file_path(lang),
            serde_json::to_string_pretty(&serde_json::Value::Object(object))?,
        )?;
        Ok(())
    }

    pub fn write_raw(&self, lang: &str, content: &str) -> Result<()> {
        fs::write(self.file_path(lang), content)?;
        Ok(())
    }

    pub fn read(&self, lang: &str) -> Result<EntrySet> {
        JsonBackend.read_entry_set(&self.file_path(lang))
    }

    pub fn value(&self, lang: &str, key: &str) -> Result<Option<String>> {
        Ok(self.read(lang)?.get(key).map(|e| e.value.clone()))
    }

    pub fn exists(&self, lang: &str) -> bool {
        self.file_path(lang).exists()
    }

    pub fn file_path(&self, lang: &str) -> std::path::PathBuf {
        self.dir.path().join("locales").join(format!("{lang}.json"))
    }

    pub fn push(&self) -> Result<lrm_sync::sync::PushOutcome> {
        self.client()?.push(&PushOptions::default())
    }
}

pub fn rel(lang: &str) -> String {
    format!("locales/{lang}.json")
}

pub fn shared_remote() -> Arc<InMemoryRemote> {
    Arc::new(InMemoryRemote::new())
}
