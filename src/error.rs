use thiserror::Error;

/// Typed failures raised by the versioning and sync core.
///
/// Most functions return `anyhow::Result` and attach context on the way up;
/// callers that need to branch on the failure class recover the variant with
/// `err.downcast_ref::<LrmError>()`.
#[derive(Debug, Error)]
pub enum LrmError {
    /// Network timeout, connection failure or a 5xx response.
    #[error("Transient remote failure: {0}")]
    Transient(String),

    /// Optimistic lock rejected by the server.
    #[error("Remote project moved on: expected version {expected}, server is at {actual}")]
    VersionMismatch { expected: u64, actual: u64 },

    /// Conflicts were left unresolved by the chosen strategy.
    #[error("{} conflict(s) unresolved: {}", .paths.len(), .paths.join(", "))]
    ConflictsUnresolved { paths: Vec<String> },

    #[error("Backup of {file} version {version} is corrupted: expected hash {expected}, found {actual}")]
    BackupCorrupted {
        file: String,
        version: u32,
        expected: String,
        actual: String,
    },

    #[error("Backup manifest for {file} is corrupted: {reason}")]
    ManifestCorrupted { file: String, reason: String },

    #[error("No backups exist for {file}")]
    EmptyManifest { file: String },

    #[error("Version {version} of {file} does not exist")]
    VersionNotFound { file: String, version: u32 },

    #[error("Key '{key}' is not present in version {version}")]
    KeyNotInVersion { key: String, version: u32 },

    #[error("{file} contains keys that differ only by case: {}", .keys.join(", "))]
    CaseVariantKeys { file: String, keys: Vec<String> },

    #[error("The 'prompt' strategy needs an interactive terminal; pass --strategy local|remote|abort")]
    PromptNotInteractive,

    #[error("Operation cancelled ({} file(s) already written: {})", .applied.len(), .applied.join(", "))]
    Cancelled { applied: Vec<String> },

    #[error("Remote rejected credentials: {0}")]
    Unauthorized(String),

    #[error("Not found on remote: {0}")]
    NotFound(String),

    #[error("Snapshot quota reached ({limit} snapshots); delete one before creating another")]
    SnapshotQuotaExceeded { limit: usize },

    #[error("Remote error ({status}): {message}")]
    Remote { status: u16, message: String },

    #[error("Invalid storage key: {0}")]
    InvalidStorageKey(String),
}

impl LrmError {
    /// Whether a retry may succeed without any change on the caller's side.
    pub fn is_transient(&self) -> bool {
        matches!(self, LrmError::Transient(_))
    }
}

/// Look through an `anyhow` chain for a typed core error.
pub fn find_lrm_error(err: &anyhow::Error) -> Option<&LrmError> {
    err.chain().find_map(|cause| cause.downcast_ref::<LrmError>())
}
