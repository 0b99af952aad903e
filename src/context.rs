use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::backend::ResourceBackend;
use crate::backup::{FsStorage, LocalVersionStore};
use crate::config::{ProjectConfig, ProjectPaths};
use crate::conflict::ResolutionStrategy;
use crate::error::LrmError;

/// Environment variable that overrides any stored credential.
pub const TOKEN_ENV_VAR: &str = "LRM_API_TOKEN";

/// Environment variable naming the actor recorded in versions and history.
pub const ACTOR_ENV_VAR: &str = "LRM_ACTOR";

const CREDENTIALS_FILE: &str = "credentials.toml";

/// Shared cancellation flag, checked before remote writes and between local
/// file writes.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Fail with `Cancelled`, reporting what was already written.
    pub fn check(&self, applied: &[String]) -> Result<(), LrmError> {
        if self.is_cancelled() {
            return Err(LrmError::Cancelled {
                applied: applied.to_vec(),
            });
        }
        Ok(())
    }
}

/// Where a bearer token came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    Environment,
    ApiKey,
    Jwt,
}

/// Bearer token for the remote service.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub token: String,
    pub source: CredentialSource,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Credentials")
            .field("token", &"[REDACTED]")
            .field("source", &self.source)
            .finish()
    }
}

/// On-disk shape of `credentials.toml`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredCredentials {
    #[serde(default)]
    api_key: Option<String>,
    #[serde(default)]
    jwt: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Credentials {
    /// Default location of the user's credential file.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("lrm-sync").join(CREDENTIALS_FILE))
    }

    /// `LRM_API_TOKEN`, then the stored API key, then the stored JWT.
    pub fn resolve() -> Result<Option<Self>> {
        match Self::default_path() {
            Some(path) => Self::resolve_from(&path),
            None => Ok(Self::from_env()),
        }
    }

    pub fn resolve_from(credentials_file: &Path) -> Result<Option<Self>> {
        if let Some(credentials) = Self::from_env() {
            return Ok(Some(credentials));
        }

        let stored = match fs::read_to_string(credentials_file) {
            Ok(content) => toml::from_str::<StoredCredentials>(&content).with_context(|| {
                format!(
                    "Failed to parse credentials file: {}",
                    credentials_file.display()
                )
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to read credentials file: {}", credentials_file.display())
                })
            }
        };

        if let Some(token) = non_empty(stored.api_key) {
            return Ok(Some(Self {
                token,
                source: CredentialSource::ApiKey,
            }));
        }
        Ok(non_empty(stored.jwt).map(|token| Self {
            token,
            source: CredentialSource::Jwt,
        }))
    }

    fn from_env() -> Option<Self> {
        non_empty(std::env::var(TOKEN_ENV_VAR).ok()).map(|token| Self {
            token,
            source: CredentialSource::Environment,
        })
    }
}

/// Name recorded as the author of versions and pushes.
pub fn default_actor() -> String {
    [ACTOR_ENV_VAR, "USER", "USERNAME"]
        .iter()
        .find_map(|var| non_empty(std::env::var(var).ok()))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Everything one operation needs, passed explicitly instead of living in
/// process-wide state.
#[derive(Debug, Clone)]
pub struct SyncContext {
    pub paths: ProjectPaths,
    pub config: ProjectConfig,
    pub credentials: Option<Credentials>,
    pub actor: String,
    pub strategy: ResolutionStrategy,
    /// Whether a user can answer prompts
    pub interactive: bool,
    pub cancel: CancelToken,
}

impl SyncContext {
    pub fn new(paths: ProjectPaths, config: ProjectConfig) -> Self {
        let strategy = config.sync.default_strategy;
        Self {
            paths,
            config,
            credentials: None,
            actor: default_actor(),
            strategy,
            interactive: false,
            cancel: CancelToken::new(),
        }
    }

    /// Discover the project from `start`, load `lrm.toml` and credentials.
    pub fn load(start: &Path) -> Result<Self> {
        let paths = ProjectPaths::discover(start)?;
        let config = ProjectConfig::load(&paths)?;
        let credentials = Credentials::resolve()?;
        Ok(Self::new(paths, config).with_credentials(credentials))
    }

    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    pub fn with_strategy(mut self, strategy: ResolutionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    /// Filesystem-backed version store under `.lrm/backups`.
    pub fn version_store(&self, backend: Arc<dyn ResourceBackend>) -> LocalVersionStore {
        LocalVersionStore::new(
            self.paths.clone(),
            Box::new(FsStorage::new(self.paths.backups_dir())),
            backend,
            self.config.backup.retention,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    #[serial]
    fn test_env_token_wins() -> Result<()> {
        let temp = TempDir::new()?;
        let file = temp.path().join(CREDENTIALS_FILE);
        fs::write(&file, "api_key = \"stored-key\"\n")?;

        std::env::set_var(TOKEN_ENV_VAR, "env-token");
        let resolved = Credentials::resolve_from(&file);
        std::env::remove_var(TOKEN_ENV_VAR);

        let credentials = resolved?.expect("credentials");
        assert_eq!(credentials.token, "env-token");
        assert_eq!(credentials.source, CredentialSource::Environment);
        Ok(())
    }

    #[test]
    #[serial]
    fn test_api_key_before_jwt() -> Result<()> {
        std::env::remove_var(TOKEN_ENV_VAR);
        let temp = TempDir::new()?;
        let file = temp.path().join(CREDENTIALS_FILE);

        fs::write(&file, "api_key = \"key\"\njwt = \"jwt\"\n")?;
        let credentials = Credentials::resolve_from(&file)?.expect("credentials");
        assert_eq!(credentials.source, CredentialSource::ApiKey);

        fs::write(&file, "api_key = \"  \"\njwt = \"jwt\"\n")?;
        let credentials = Credentials::resolve_from(&file)?.expect("credentials");
        assert_eq!(credentials.token, "jwt");
        assert_eq!(credentials.source, CredentialSource::Jwt);
        Ok(())
    }

    #[test]
    #[serial]
    fn test_missing_file_means_no_credentials() -> Result<()> {
        std::env::remove_var(TOKEN_ENV_VAR);
        let temp = TempDir::new()?;
        assert!(Credentials::resolve_from(&temp.path().join("nope.toml"))?.is_none());
        Ok(())
    }

    #[test]
    fn test_debug_redacts_token() {
        let credentials = Credentials {
            token: "secret".to_string(),
            source: CredentialSource::ApiKey,
        };
        let debug = format!("{credentials:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_cancel_token_reports_applied_files() {
        let token = CancelToken::new();
        assert!(token.check(&[]).is_ok());

        token.clone().cancel();
        match token.check(&["locales/fr.json".to_string()]) {
            Err(LrmError::Cancelled { applied }) => assert_eq!(applied, vec!["locales/fr.json"]),
            other => panic!("expected Cancelled, got {other:?}"),
        }
    }

    #[test]
    fn test_context_takes_strategy_from_config() {
        let mut config = ProjectConfig::default();
        config.sync.default_strategy = ResolutionStrategy::Remote;
        let ctx = SyncContext::new(ProjectPaths::new("/tmp/project"), config);
        assert_eq!(ctx.strategy, ResolutionStrategy::Remote);
        assert!(!ctx.interactive);
    }
}
