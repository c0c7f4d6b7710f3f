//! The ledger facade shared by the ingestion and reconciliation paths.
//!
//! Each day partition sits behind its own mutex, so an `append` from the
//! scanner and a `mark_synced` from a sync pass never interleave on the same
//! partition. Partitions are loaded on first use and dropped from memory
//! again by [`Ledger::release_settled`] once nothing in them is left to sync.

use crate::backup::{BackupEntry, BackupStore, SnapshotPhase};
use crate::error::{LedgerError, Result};
use crate::lock::{try_lock_ledger, LedgerLockGuard};
use crate::partition::{parse_segment_file_name, Partition};
use crate::record::{AppendOutcome, LedgerRecord, PartitionStats};
use chrono::NaiveDate;
use rollcall_protocol::defaults::DEFAULT_BACKUP_RETENTION;
use rollcall_protocol::{ScanEvent, SyncTarget};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct LedgerOptions {
    /// Snapshot files kept per partition date (0 keeps all)
    pub backup_retention: usize,
}

impl Default for LedgerOptions {
    fn default() -> Self {
        Self {
            backup_retention: DEFAULT_BACKUP_RETENTION,
        }
    }
}

type SharedPartition = Arc<Mutex<Partition>>;

pub struct Ledger {
    dir: PathBuf,
    partitions: Mutex<HashMap<NaiveDate, SharedPartition>>,
    backups: BackupStore,
    closed: AtomicBool,
    lock: Mutex<Option<LedgerLockGuard>>,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("dir", &self.dir)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

impl Ledger {
    /// Open (creating if needed) the ledger in `dir` and take the process lock.
    pub fn open(dir: impl Into<PathBuf>, options: LedgerOptions) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let guard = try_lock_ledger(&dir)?;
        info!("Opened ledger at {}", dir.display());
        Ok(Self {
            backups: BackupStore::new(&dir, options.backup_retention),
            dir,
            partitions: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            lock: Mutex::new(Some(guard)),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn backups(&self) -> &BackupStore {
        &self.backups
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn partition(&self, date: NaiveDate) -> Result<SharedPartition> {
        let mut partitions = self.partitions.lock().map_err(|_| LedgerError::LockPoisoned)?;
        if self.is_closed() {
            return Err(LedgerError::Closed);
        }
        if let Some(partition) = partitions.get(&date) {
            return Ok(Arc::clone(partition));
        }
        let partition = Arc::new(Mutex::new(Partition::open(&self.dir, date)?));
        partitions.insert(date, Arc::clone(&partition));
        Ok(partition)
    }

    fn with_partition<T>(
        &self,
        date: NaiveDate,
        f: impl FnOnce(&mut Partition) -> Result<T>,
    ) -> Result<T> {
        let shared = self.partition(date)?;
        let mut partition = lock_partition(&shared)?;
        // Re-checked under the partition lock so nothing writes after close()
        if self.is_closed() {
            return Err(LedgerError::Closed);
        }
        f(&mut partition)
    }

    /// Record one scan. Returns once the partition is flushed to disk.
    pub fn append(&self, event: &ScanEvent) -> Result<AppendOutcome> {
        if event.identifier.is_empty() {
            return Err(LedgerError::EmptyIdentifier);
        }
        let outcome = self.with_partition(event.partition_date(), |p| p.append(event))?;
        debug!(
            identifier = %event.identifier,
            scans = outcome.record.timestamps.len(),
            "Appended scan to {}",
            outcome.path.display()
        );
        Ok(outcome)
    }

    /// Records of `date` whose `target` flag is clear, in identifier order.
    pub fn list_unsynced(&self, date: NaiveDate, target: SyncTarget) -> Result<Vec<LedgerRecord>> {
        self.with_partition(date, |p| Ok(p.list_unsynced(target)))
    }

    /// Set the `target` flag for `record`. Fails with `StaleWrite` when a scan
    /// was appended after `record` was read.
    pub fn mark_synced(&self, date: NaiveDate, record: &LedgerRecord, target: SyncTarget) -> Result<()> {
        self.with_partition(date, |p| p.mark_synced(record, target))
    }

    pub fn record(&self, date: NaiveDate, identifier: &str) -> Result<Option<LedgerRecord>> {
        self.with_partition(date, |p| Ok(p.get(identifier.trim()).cloned()))
    }

    pub fn partition_stats(&self, date: NaiveDate) -> Result<PartitionStats> {
        self.with_partition(date, |p| Ok(p.stats()))
    }

    /// Copy the partition file into the backup directory.
    ///
    /// Post-pass snapshots also apply the retention rule. Returns `None` when
    /// the partition has no file yet.
    pub fn snapshot(&self, date: NaiveDate, phase: SnapshotPhase) -> Result<Option<BackupEntry>> {
        let entry = self.with_partition(date, |p| self.backups.write_snapshot(p.path(), date, phase))?;
        if phase == SnapshotPhase::Post {
            self.backups.prune(date)?;
        }
        Ok(entry)
    }

    /// Dates with a partition on disk or in memory, ascending.
    pub fn partition_dates(&self) -> Result<Vec<NaiveDate>> {
        let mut dates: BTreeSet<NaiveDate> = self
            .partitions
            .lock()
            .map_err(|_| LedgerError::LockPoisoned)?
            .keys()
            .copied()
            .collect();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if let Some((date, _)) = entry.file_name().to_str().and_then(parse_segment_file_name) {
                dates.insert(date);
            }
        }
        Ok(dates.into_iter().collect())
    }

    /// Drop fully synced partitions other than `keep` from memory.
    ///
    /// A partition is only released while nothing else holds it; the next
    /// access reloads it from its segment file. Call between passes, never
    /// while a pass holds records read from the partition.
    pub fn release_settled(&self, keep: NaiveDate) -> Result<usize> {
        let mut partitions = self.partitions.lock().map_err(|_| LedgerError::LockPoisoned)?;
        let mut settled = Vec::new();
        for (date, shared) in partitions.iter() {
            if *date == keep || Arc::strong_count(shared) > 1 {
                continue;
            }
            let stats = lock_partition(shared)?.stats();
            if stats.unsynced_daily == 0 && stats.unsynced_master == 0 {
                settled.push(*date);
            }
        }
        for date in &settled {
            partitions.remove(date);
            debug!("Released settled partition {} from memory", date);
        }
        Ok(settled.len())
    }

    /// Dates whose partitions are currently held in memory, ascending.
    pub fn loaded_partitions(&self) -> Result<Vec<NaiveDate>> {
        let partitions = self.partitions.lock().map_err(|_| LedgerError::LockPoisoned)?;
        let mut dates: Vec<NaiveDate> = partitions.keys().copied().collect();
        dates.sort_unstable();
        Ok(dates)
    }

    /// Stop accepting writes, wait for in-flight ones, release the process lock.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let partitions: Vec<SharedPartition> = self
            .partitions
            .lock()
            .map_err(|_| LedgerError::LockPoisoned)?
            .values()
            .cloned()
            .collect();
        for partition in &partitions {
            // Taking the lock waits out any write that is mid-flush
            drop(lock_partition(partition)?);
        }
        self.lock.lock().map_err(|_| LedgerError::LockPoisoned)?.take();
        info!("Closed ledger at {}", self.dir.display());
        Ok(())
    }
}

fn lock_partition(partition: &SharedPartition) -> Result<MutexGuard<'_, Partition>> {
    partition.lock().map_err(|_| LedgerError::LockPoisoned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;
    use tempfile::TempDir;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 7, 5).unwrap()
    }

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        day().and_hms_opt(h, m, s).unwrap()
    }

    #[test]
    fn test_second_open_is_locked_out() {
        let temp = TempDir::new().unwrap();
        let ledger = Ledger::open(temp.path(), LedgerOptions::default()).unwrap();
        let err = Ledger::open(temp.path(), LedgerOptions::default()).unwrap_err();
        assert!(matches!(err, LedgerError::Locked(_)));

        ledger.close().unwrap();
        assert!(Ledger::open(temp.path(), LedgerOptions::default()).is_ok());
    }

    #[test]
    fn test_closed_ledger_refuses_appends() {
        let temp = TempDir::new().unwrap();
        let ledger = Ledger::open(temp.path(), LedgerOptions::default()).unwrap();
        ledger.append(&ScanEvent::new("A", at(9, 0, 0))).unwrap();
        ledger.close().unwrap();

        let err = ledger.append(&ScanEvent::new("B", at(9, 1, 0))).unwrap_err();
        assert!(matches!(err, LedgerError::Closed));
    }

    #[test]
    fn test_events_route_to_their_day() {
        let temp = TempDir::new().unwrap();
        let ledger = Ledger::open(temp.path(), LedgerOptions::default()).unwrap();
        let next_day = NaiveDate::from_ymd_opt(2025, 7, 6).unwrap();
        ledger.append(&ScanEvent::new("A", at(23, 59, 59))).unwrap();
        ledger
            .append(&ScanEvent::new("A", next_day.and_hms_opt(0, 0, 1).unwrap()))
            .unwrap();

        assert_eq!(ledger.partition_dates().unwrap(), vec![day(), next_day]);
        assert_eq!(ledger.partition_stats(day()).unwrap().scans, 1);
        assert_eq!(ledger.partition_stats(next_day).unwrap().scans, 1);
    }

    #[test]
    fn test_settled_past_partitions_leave_memory() {
        let temp = TempDir::new().unwrap();
        let ledger = Ledger::open(temp.path(), LedgerOptions::default()).unwrap();
        let next_day = NaiveDate::from_ymd_opt(2025, 7, 6).unwrap();
        let record = ledger.append(&ScanEvent::new("A", at(9, 0, 0))).unwrap().record;
        ledger.append(&ScanEvent::new("B", at(9, 0, 1))).unwrap();
        ledger
            .append(&ScanEvent::new("A", next_day.and_hms_opt(8, 0, 0).unwrap()))
            .unwrap();

        // B is still unsynced, so the older day stays loaded
        for target in SyncTarget::ALL {
            let current = ledger.record(day(), "A").unwrap().unwrap();
            ledger.mark_synced(day(), &current, target).unwrap();
        }
        assert_eq!(ledger.release_settled(next_day).unwrap(), 0);

        for target in SyncTarget::ALL {
            let current = ledger.record(day(), "B").unwrap().unwrap();
            ledger.mark_synced(day(), &current, target).unwrap();
        }
        assert_eq!(ledger.release_settled(next_day).unwrap(), 1);
        assert_eq!(ledger.loaded_partitions().unwrap(), vec![next_day]);

        // Reloaded from disk on the next read
        let reloaded = ledger.record(day(), "A").unwrap().unwrap();
        assert_eq!(reloaded.timestamps, record.timestamps);
        assert!(reloaded.synced_daily && reloaded.synced_master);
        assert_eq!(ledger.loaded_partitions().unwrap(), vec![day(), next_day]);
    }

    #[test]
    fn test_blank_identifier_rejected() {
        let temp = TempDir::new().unwrap();
        let ledger = Ledger::open(temp.path(), LedgerOptions::default()).unwrap();
        let err = ledger.append(&ScanEvent::new("   ", at(9, 0, 0))).unwrap_err();
        assert!(matches!(err, LedgerError::EmptyIdentifier));
        assert!(ledger.partition_dates().unwrap().is_empty());
    }
}
