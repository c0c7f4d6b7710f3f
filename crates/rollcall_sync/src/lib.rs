//! Offline-first sync for Rollcall.
//!
//! - [`connectivity`]: ONLINE/OFFLINE state and the probe loop
//! - [`reconciler`]: passes pushing unsynced ledger records to the remote store
//! - [`ingestor`]: cooldown filter in front of the ledger append
//! - [`engine`]: background tasks, manual sync requests, status, shutdown

pub mod cancel;
pub mod connectivity;
pub mod engine;
pub mod error;
pub mod ingestor;
pub mod metrics;
pub mod reconciler;

pub use cancel::CancellationToken;
pub use connectivity::{ConnectivityHandle, ConnectivityMonitor, SyncTrigger, Transition};
pub use engine::{EngineConfig, EngineHandle, StatusReport, SyncEngine, SyncRequestOutcome};
pub use error::{Result, SyncError};
pub use ingestor::{Disposition, DisplayEvent, EventIngestor, IngestOutcome};
pub use metrics::{MetricsSnapshot, METRICS};
pub use reconciler::{PassMode, Reconciler, ReconcilerConfig};
