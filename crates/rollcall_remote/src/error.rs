//! Remote error taxonomy.
//!
//! `BackendError` is whatever the sheet transport reports. It never leaves
//! this crate's adapter: `SheetsAdapter` maps it to `RemoteError`, which is
//! all the reconciler sees.

use std::time::Duration;
use thiserror::Error;

/// Raw failure from a sheet backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("transport error: {0}")]
    Transport(String),

    /// Credentials expired or were refused; usually recovers on its own
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    Permission(String),

    #[error("invalid request: {0}")]
    Invalid(String),
}

pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Failure of a remote store operation as seen by the reconciler.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Network or auth trouble; retry later
    #[error("Remote store unavailable: {0}")]
    Unavailable(String),

    /// Row or column layout does not match, or the write is not allowed.
    /// Needs an operator; never retried automatically.
    #[error("Remote store rejected the write: {0}")]
    Rejected(String),
}

impl RemoteError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Unavailable(_))
    }

    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }
}

impl From<BackendError> for RemoteError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Transport(_) | BackendError::Auth(_) | BackendError::Timeout(_) => {
                RemoteError::Unavailable(err.to_string())
            }
            BackendError::NotFound(_) | BackendError::Permission(_) | BackendError::Invalid(_) => {
                RemoteError::Rejected(err.to_string())
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, RemoteError>;
