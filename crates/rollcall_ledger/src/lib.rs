//! Durable local ledger of scan events.
//!
//! One CSV partition per calendar day, readable in a spreadsheet:
//! an `ID` column, one `TimestampN` column per scan, and a sync flag per
//! remote target. Every mutation is flushed (temp file, fsync, rename)
//! before the call returns.
//!
//! ```text
//! <ledger_dir>/
//!   .ledger.lock
//!   2025-07-05_scans.csv
//!   2025-07-05_scans.1.csv        # only if the first segment became unreadable
//!   backups/2025-07-05_scans.pre_sync.20250705T090431250.csv
//! ```

pub mod backup;
pub mod error;
pub mod ledger;
pub mod lock;
pub mod partition;
pub mod record;

pub use backup::{BackupEntry, BackupStore, SnapshotPhase};
pub use error::{LedgerError, Result};
pub use ledger::{Ledger, LedgerOptions};
pub use record::{AppendOutcome, LedgerRecord, PartitionStats};
