//! Error types for the ledger.

use rollcall_protocol::SyncTarget;
use std::path::PathBuf;
use thiserror::Error;

/// Ledger operation result type.
pub type Result<T> = std::result::Result<T, LedgerError>;

#[derive(Error, Debug)]
pub enum LedgerError {
    /// IO error (partition files, backups, lock file)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV encoding error while writing a partition
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// A partition file exists but cannot be read back. The file is left
    /// untouched; new scans go to a fresh segment.
    #[error("Corrupt ledger partition {}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    /// The record gained a timestamp after it was read for syncing.
    #[error("Stale {target} sync flag update for {identifier}: record changed since it was read")]
    StaleWrite { identifier: String, target: SyncTarget },

    #[error("No ledger record for {0}")]
    UnknownRecord(String),

    #[error("Scan identifier is empty")]
    EmptyIdentifier,

    /// Another process holds the ledger directory
    #[error("Ledger is locked by another process: {}", .0.display())]
    Locked(PathBuf),

    /// The ledger was closed for shutdown
    #[error("Ledger is closed")]
    Closed,

    #[error("Ledger partition lock poisoned")]
    LockPoisoned,
}

impl LedgerError {
    pub fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, LedgerError::StaleWrite { .. })
    }
}
