//! Remote store adapter for Rollcall.
//!
//! The reconciler talks to [`RemoteStore`]. [`SheetsAdapter`] implements it
//! over any [`SheetBackend`], translating backend failures into the two
//! outcomes the reconciler acts on: [`RemoteError::Unavailable`] (retry) and
//! [`RemoteError::Rejected`] (leave for the operator).

pub mod adapter;
pub mod backend;
pub mod error;
pub mod json_dir;
pub mod memory;

pub use adapter::{RemoteStore, SheetLayout, SheetsAdapter};
pub use backend::{SheetBackend, Workbook};
pub use error::{BackendError, RemoteError, Result};
pub use json_dir::JsonDirBackend;
pub use memory::MemoryBackend;

use rollcall_protocol::{RemoteBackendConfig, RollcallConfig};
use std::sync::Arc;
use tracing::info;

/// Build the remote store selected in the configuration.
pub fn open_remote(config: &RollcallConfig) -> Arc<dyn RemoteStore> {
    let layout = SheetLayout::from_config(config);
    match &config.remote {
        RemoteBackendConfig::Memory { roster } => {
            info!("Using in-memory sheets ({} roster entries); nothing is uploaded", roster.len());
            let backend = MemoryBackend::with_attendance_sheets(&layout, roster);
            Arc::new(SheetsAdapter::new(backend, layout))
        }
        RemoteBackendConfig::JsonDir { mirror_dir } => {
            info!("Using sheet mirror at {}", mirror_dir.display());
            Arc::new(SheetsAdapter::new(JsonDirBackend::new(mirror_dir.clone()), layout))
        }
    }
}
