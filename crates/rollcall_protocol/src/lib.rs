//! Shared vocabulary for Rollcall.
//!
//! Types here cross crate boundaries: the ledger stores them, the remote
//! adapter formats them, and the sync engine reports on them. Nothing in this
//! crate performs I/O beyond reading the config file.

pub mod config;
pub mod defaults;
pub mod paths;
pub mod sheet_format;
pub mod summary;
pub mod types;

pub use config::{ConfigError, RemoteBackendConfig, RollcallConfig};
pub use summary::{AbortReason, PassSummary, SyncReport, TargetCounts};
pub use types::{ConnectivityState, ScanEvent, SyncTarget};
