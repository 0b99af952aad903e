//! # lrm-sync
//!
//! Versioned backups and cloud synchronization for localization resource
//! files.
//!
//! ## Overview
//!
//! A project is a directory holding `lrm.toml` and a tree of language files
//! (one [`entries::EntrySet`] per file). `lrm-sync` keeps local, per-file
//! version history of those files and synchronizes them with a remote
//! service that owns the project's push history and snapshots.
//!
//! ## Key Features
//!
//! - **Local versions**: every destructive operation backs the file up first;
//!   versions are integrity-checked on every read
//! - **Three-way sync**: push and pull compare local, remote and last-synced
//!   content hashes; divergence is reported as conflicts, never guessed at
//! - **Optimistic locking**: pushes carry the project version they were based
//!   on and are rejected when the remote moved on
//! - **History and snapshots**: remote pushes can be reverted and whole
//!   project states captured and restored
//!
//! ## Architecture
//!
//! - Data model and comparison ([`entries`], [`diff`], [`backend`])
//! - Project layout and settings ([`config`], [`filter`], [`context`])
//! - Local versioning ([`backup`])
//! - Remote protocol ([`remote`], [`history`], [`snapshot`])
//! - Synchronization ([`sync`], [`conflict`], [`interactive_conflict`])
//! - Command-line surface ([`handlers`], [`logger`])

/// Reading and writing language files.
///
/// A [`backend::ResourceBackend`] turns a file on disk into an
/// [`entries::EntrySet`] and back. The JSON backend is the only one shipped.
pub mod backend;

/// Per-file version history under `.lrm/backups`, plus the raw-byte archives
/// taken before each pull.
pub mod backup;

/// Project discovery, layout and `lrm.toml` settings.
pub mod config;

/// Three-way classification of sync divergence and conflict resolution
/// strategies.
pub mod conflict;

/// Explicit per-operation context: paths, settings, credentials, actor,
/// strategy and cancellation.
pub mod context;

/// Key-level comparison of two entry sets.
pub mod diff;

/// Resource entries, entry sets and their content hashes.
pub mod entries;

/// Typed error taxonomy.
pub mod error;

/// Include/exclude rules selecting which files take part in sync.
pub mod filter;

/// Command handlers used by the `lrm-sync` binary.
pub mod handlers;

/// Remote push history: listing, inspecting and reverting entries.
pub mod history;

/// Interactive terminal-based conflict resolution interface.
///
/// Shows hashes, timestamps, entry differences and configuration changes
/// for each conflict and asks which side to keep.
pub mod interactive_conflict;

/// Logging configuration and utilities.
///
/// Console logging follows `RUST_LOG`; a project log file is kept in
/// `.lrm/lrm-sync.log` and rotated when it grows past 10 MB.
pub mod logger;

/// The remote sync service: wire types, the HTTP client and an in-process
/// implementation of the same contract.
pub mod remote;

/// Whole-project snapshots held by the remote.
pub mod snapshot;

/// Push, pull and status against the remote.
pub mod sync;
