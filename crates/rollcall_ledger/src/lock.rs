//! Process-level ledger locking.
//!
//! Only one scanner process may append to a ledger directory. The lock is a
//! `.ledger.lock` file held with `fs2` (std's `File::lock` needs Rust 1.89+),
//! plus a JSON sidecar naming the holder for operators.

use crate::error::{LedgerError, Result};
use chrono::Utc;
use fs2::FileExt;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const LOCK_FILE_NAME: &str = ".ledger.lock";

/// Holds the ledger directory lock until dropped.
pub struct LedgerLockGuard {
    _file: File,
    lock_path: PathBuf,
    sidecar_path: Option<PathBuf>,
}

impl LedgerLockGuard {
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }
}

impl std::fmt::Debug for LedgerLockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerLockGuard")
            .field("lock_path", &self.lock_path)
            .finish()
    }
}

impl Drop for LedgerLockGuard {
    fn drop(&mut self) {
        debug!("Releasing ledger lock: {}", self.lock_path.display());
        if let Some(path) = &self.sidecar_path {
            if let Err(e) = fs::remove_file(path) {
                debug!("Failed to remove lock sidecar {}: {}", path.display(), e);
            }
        }
    }
}

#[derive(Serialize)]
struct LockSidecar {
    pid: u32,
    exe: Option<String>,
    timestamp: String,
}

fn sidecar_path_for(lock_path: &Path) -> PathBuf {
    lock_path.with_extension("lock.json")
}

fn write_lock_sidecar(lock_path: &Path) -> Option<PathBuf> {
    let sidecar = LockSidecar {
        pid: std::process::id(),
        exe: std::env::current_exe().ok().map(|p| p.display().to_string()),
        timestamp: Utc::now().to_rfc3339(),
    };
    let sidecar_path = sidecar_path_for(lock_path);
    match serde_json::to_vec_pretty(&sidecar)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
        .and_then(|payload| fs::write(&sidecar_path, payload))
    {
        Ok(()) => Some(sidecar_path),
        Err(e) => {
            warn!("Failed to write lock sidecar {}: {}", sidecar_path.display(), e);
            None
        }
    }
}

/// Take the exclusive lock on `ledger_dir` without waiting.
pub fn try_lock_ledger(ledger_dir: &Path) -> Result<LedgerLockGuard> {
    fs::create_dir_all(ledger_dir)?;
    let lock_path = ledger_dir.join(LOCK_FILE_NAME);

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)?;

    // Fully qualified so the fs2 method wins over the newer std one
    match FileExt::try_lock_exclusive(&file) {
        Ok(()) => {
            info!("Acquired ledger lock: {}", lock_path.display());
            let sidecar_path = write_lock_sidecar(&lock_path);
            Ok(LedgerLockGuard {
                _file: file,
                lock_path,
                sidecar_path,
            })
        }
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
            debug!("Ledger {} is locked by another process", ledger_dir.display());
            Err(LedgerError::Locked(ledger_dir.to_path_buf()))
        }
        Err(e) => Err(e.into()),
    }
}
