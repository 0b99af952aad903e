//! Local version store for language files.
//!
//! Every destructive operation snapshots the affected file first. Versions
//! live in a [`VersionStorage`] behind a per-file [`Manifest`]; pulls also
//! leave a raw-byte [`PullBackupArchive`].

mod archive;
mod cleanup;
mod manifest;
mod storage;
mod store;

pub use archive::{PullBackupArchive, PullUndoOutcome};
pub use cleanup::cleanup_pull_backups;
pub use manifest::{Manifest, VersionRecord};
pub use storage::{FsStorage, MemoryStorage, VersionStorage};
pub use store::{DiffTarget, LocalVersionStore, RestoreOptions, RestoreOutcome, VersionInfo};
