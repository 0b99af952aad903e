use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::conflict::ResolutionStrategy;

/// Name of the project configuration file at the project root.
pub const PROJECT_CONFIG_FILE: &str = "lrm.toml";

/// Name of the hidden per-project state directory.
pub const STATE_DIR: &str = ".lrm";

/// Location of everything the tool keeps for one project.
///
/// Layout:
/// ```text
/// <root>/lrm.toml
/// <root>/.lrm/sync-state.json
/// <root>/.lrm/backups/<file>/manifest.json
/// <root>/.lrm/pull-backups/<timestamp>-<id>.json
/// <root>/.lrm/lrm-sync.log
/// ```
#[derive(Debug, Clone)]
pub struct ProjectPaths {
    root: PathBuf,
}

impl ProjectPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Walk up from `start` until a directory holding `lrm.toml` is found.
    pub fn discover(start: &Path) -> Result<Self> {
        let mut current = Some(start);
        while let Some(dir) = current {
            if dir.join(PROJECT_CONFIG_FILE).exists() {
                return Ok(Self::new(dir));
            }
            current = dir.parent();
        }
        Err(anyhow!(
            "No {} found in {} or any parent directory. Run 'lrm-sync init' first.",
            PROJECT_CONFIG_FILE,
            start.display()
        ))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join(PROJECT_CONFIG_FILE)
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.join(STATE_DIR)
    }

    pub fn sync_state_file(&self) -> PathBuf {
        self.state_dir().join("sync-state.json")
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.state_dir().join("backups")
    }

    pub fn pull_backups_dir(&self) -> PathBuf {
        self.state_dir().join("pull-backups")
    }

    pub fn log_file(&self) -> PathBuf {
        self.state_dir().join("lrm-sync.log")
    }

    /// Path of a resource file relative to the project root, with `/`
    /// separators. This string identifies the file in manifests, sync state
    /// and on the remote.
    pub fn relative(&self, path: &Path) -> Result<String> {
        let relative = if path.is_absolute() {
            path.strip_prefix(&self.root).with_context(|| {
                format!(
                    "{} is outside the project root {}",
                    path.display(),
                    self.root.display()
                )
            })?
        } else {
            path
        };

        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .filter(|c| c != ".")
            .collect();
        if parts.iter().any(|c| c == "..") {
            return Err(anyhow!("Path {} escapes the project root", path.display()));
        }
        Ok(parts.join("/"))
    }

    /// Absolute path for a project-relative identifier.
    pub fn resolve(&self, relative: &str) -> PathBuf {
        relative
            .split('/')
            .fold(self.root.clone(), |acc, part| acc.join(part))
    }

    pub fn ensure_state_dir(&self) -> Result<PathBuf> {
        let dir = self.state_dir();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create state directory: {}", dir.display()))?;
        Ok(dir)
    }
}

/// Which resource files belong to the project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourcesConfig {
    /// Directory holding the language files, relative to the project root
    #[serde(default = "default_resource_dir")]
    pub dir: String,

    /// Include only these path patterns (glob-style)
    #[serde(default)]
    pub include: Vec<String>,

    /// Exclude these path patterns (glob-style)
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// Remote service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_url: Option<String>,

    /// Per-request network timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Attempts for transient failures, including the first one
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Strategy used by `pull` when none is given on the command line
    #[serde(default)]
    pub default_strategy: ResolutionStrategy,

    /// Only pull entries in this workflow state (e.g. "approved")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_filter: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupSettings {
    /// Versions kept per file
    #[serde(default = "default_retention")]
    pub retention: usize,

    /// Pull archives kept
    #[serde(default = "default_pull_backup_retention")]
    pub pull_backup_retention: usize,
}

/// Contents of `lrm.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub resources: ResourcesConfig,
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub backup: BackupSettings,
}

fn default_resource_dir() -> String {
    "locales".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_retention() -> usize {
    10
}

fn default_pull_backup_retention() -> usize {
    5
}

impl Default for ResourcesConfig {
    fn default() -> Self {
        Self {
            dir: default_resource_dir(),
            include: Vec::new(),
            exclude: Vec::new(),
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            remote_url: None,
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            default_strategy: ResolutionStrategy::default(),
            status_filter: None,
        }
    }
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            retention: default_retention(),
            pull_backup_retention: default_pull_backup_retention(),
        }
    }
}

impl SyncSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

impl ProjectConfig {
    /// Load `lrm.toml`, falling back to defaults when it does not exist.
    pub fn load(paths: &ProjectPaths) -> Result<Self> {
        let config_path = paths.config_file();

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn save(&self, paths: &ProjectPaths) -> Result<()> {
        let config_path = paths.config_file();
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    pub fn resource_dir(&self, paths: &ProjectPaths) -> PathBuf {
        paths.resolve(&self.resources.dir)
    }
}
