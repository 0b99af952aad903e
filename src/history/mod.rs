//! Server-confirmed history of pushes and reverts.
//!
//! The server owns the append-only log; this module fetches, renders and
//! reverts entries.

mod client;
mod types;

pub use client::{format_entry, HistoryLog, RevertOutcome};
pub use types::{HistoryEntry, HistoryPage, OperationType};
