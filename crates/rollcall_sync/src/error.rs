use rollcall_ledger::LedgerError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Error, Debug)]
pub enum SyncError {
    /// Ledger failure outside a single record (snapshot, listing)
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// A background task panicked or was cancelled by the runtime
    #[error("Sync task failed: {0}")]
    Task(String),
}
