//! Ledger behaviour against a real directory on disk.
//!
//! No mocks: every test opens a ledger in a temp dir, writes through the
//! public API and, where it matters, reopens the directory to check what
//! actually reached the file.

use chrono::{NaiveDate, NaiveDateTime};
use rollcall_ledger::{Ledger, LedgerError, LedgerOptions, SnapshotPhase};
use rollcall_protocol::{ScanEvent, SyncTarget};
use std::fs;
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 7, 5).unwrap()
}

fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
    day().and_hms_opt(h, m, s).unwrap()
}

fn open(temp: &TempDir) -> Ledger {
    Ledger::open(temp.path(), LedgerOptions::default()).unwrap()
}

// =============================================================================
// APPEND ORDER AND FLAG RESET
// =============================================================================

#[test]
fn test_timestamps_keep_append_order() {
    let temp = TempDir::new().unwrap();
    let ledger = open(&temp);

    // Out of chronological order on purpose: the ledger must not sort
    let times = [at(12, 0, 0), at(9, 0, 0), at(17, 30, 0), at(9, 0, 0)];
    for t in times {
        ledger.append(&ScanEvent::new("A", t)).unwrap();
    }

    let record = ledger.record(day(), "A").unwrap().unwrap();
    assert_eq!(record.timestamps, times.to_vec());

    ledger.close().unwrap();
    let reopened = open(&temp);
    let record = reopened.record(day(), "A").unwrap().unwrap();
    assert_eq!(record.timestamps, times.to_vec());
}

#[test]
fn test_sub_millisecond_times_survive_a_restart_unchanged() {
    let temp = TempDir::new().unwrap();
    let ledger = open(&temp);

    let raw = at(9, 0, 0) + chrono::Duration::nanoseconds(431_250_999);
    let record = ledger.append(&ScanEvent::new("A", raw)).unwrap().record;

    ledger.close().unwrap();
    let reopened = open(&temp);
    let reloaded = reopened.record(day(), "A").unwrap().unwrap();
    assert_eq!(reloaded.timestamps, record.timestamps);
    assert_eq!(reloaded.timestamps[0], at(9, 0, 0) + chrono::Duration::milliseconds(431));
}

#[test]
fn test_append_clears_both_flags() {
    let temp = TempDir::new().unwrap();
    let ledger = open(&temp);

    let record = ledger.append(&ScanEvent::new("A", at(9, 0, 0))).unwrap().record;
    ledger.mark_synced(day(), &record, SyncTarget::Daily).unwrap();
    let record = ledger.record(day(), "A").unwrap().unwrap();
    ledger.mark_synced(day(), &record, SyncTarget::Master).unwrap();

    let record = ledger.record(day(), "A").unwrap().unwrap();
    assert!(record.synced_daily && record.synced_master);
    assert_eq!(record.daily_pushed, 1);

    let outcome = ledger.append(&ScanEvent::new("A", at(12, 0, 0))).unwrap();
    assert!(!outcome.first_scan);
    assert!(!outcome.record.synced_daily);
    assert!(!outcome.record.synced_master);
    assert_eq!(outcome.record.unpushed_timestamps(), &[at(12, 0, 0)]);
}

#[test]
fn test_list_unsynced_in_identifier_order() {
    let temp = TempDir::new().unwrap();
    let ledger = open(&temp);
    for (id, t) in [("C", at(9, 0, 0)), ("A", at(9, 1, 0)), ("B", at(9, 2, 0))] {
        ledger.append(&ScanEvent::new(id, t)).unwrap();
    }
    let b = ledger.record(day(), "B").unwrap().unwrap();
    ledger.mark_synced(day(), &b, SyncTarget::Master).unwrap();

    let daily: Vec<String> = ledger
        .list_unsynced(day(), SyncTarget::Daily)
        .unwrap()
        .into_iter()
        .map(|r| r.identifier)
        .collect();
    let master: Vec<String> = ledger
        .list_unsynced(day(), SyncTarget::Master)
        .unwrap()
        .into_iter()
        .map(|r| r.identifier)
        .collect();
    assert_eq!(daily, vec!["A", "B", "C"]);
    assert_eq!(master, vec!["A", "C"]);
}

// =============================================================================
// STALENESS
// =============================================================================

#[test]
fn test_mark_synced_rejects_stale_read() {
    let temp = TempDir::new().unwrap();
    let ledger = open(&temp);
    ledger.append(&ScanEvent::new("A", at(9, 0, 0))).unwrap();

    let read_for_sync = ledger.list_unsynced(day(), SyncTarget::Daily).unwrap().remove(0);
    ledger.append(&ScanEvent::new("A", at(9, 5, 0))).unwrap();

    let err = ledger
        .mark_synced(day(), &read_for_sync, SyncTarget::Daily)
        .unwrap_err();
    assert!(err.is_stale());

    let record = ledger.record(day(), "A").unwrap().unwrap();
    assert!(!record.synced_daily);
    assert_eq!(record.daily_pushed, 0);
}

#[test]
fn test_unknown_record_is_reported() {
    let temp = TempDir::new().unwrap();
    let ledger = open(&temp);
    let record = ledger.append(&ScanEvent::new("A", at(9, 0, 0))).unwrap().record;
    let mut other = record.clone();
    other.identifier = "Z".to_string();

    let err = ledger.mark_synced(day(), &other, SyncTarget::Master).unwrap_err();
    assert!(matches!(err, LedgerError::UnknownRecord(id) if id == "Z"));
}

#[test]
fn test_concurrent_appends_are_all_kept() {
    let temp = TempDir::new().unwrap();
    let ledger = Arc::new(open(&temp));

    let handles: Vec<_> = (0..4)
        .map(|worker| {
            let ledger = Arc::clone(&ledger);
            thread::spawn(move || {
                for n in 0..10 {
                    let id = format!("W{worker}");
                    ledger.append(&ScanEvent::new(id, at(10, worker, n))).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let stats = ledger.partition_stats(day()).unwrap();
    assert_eq!(stats.records, 4);
    assert_eq!(stats.scans, 40);
}

// =============================================================================
// CORRUPTION
// =============================================================================

#[test]
fn test_corrupt_partition_does_not_stop_ingestion() {
    let temp = TempDir::new().unwrap();
    let corrupt = temp.path().join("2025-07-05_scans.csv");
    let garbage = b"ID,Timestamp1\n\xff\xfe,\x00\n";
    fs::write(&corrupt, garbage).unwrap();

    let ledger = open(&temp);
    let outcome = ledger.append(&ScanEvent::new("A", at(9, 0, 0))).unwrap();
    assert_eq!(outcome.path, temp.path().join("2025-07-05_scans.1.csv"));
    assert_eq!(fs::read(&corrupt).unwrap(), garbage.to_vec());

    let stats = ledger.partition_stats(day()).unwrap();
    assert_eq!(stats.corrupt_segments, vec![corrupt]);
    assert_eq!(stats.records, 1);
}

// =============================================================================
// SNAPSHOTS
// =============================================================================

#[test]
fn test_snapshots_copy_partition_and_respect_retention() {
    let temp = TempDir::new().unwrap();
    let ledger = Ledger::open(temp.path(), LedgerOptions { backup_retention: 4 }).unwrap();
    assert!(ledger.snapshot(day(), SnapshotPhase::Pre).unwrap().is_none());

    ledger.append(&ScanEvent::new("A", at(9, 0, 0))).unwrap();
    let pre = ledger.snapshot(day(), SnapshotPhase::Pre).unwrap().unwrap();
    assert_eq!(pre.phase, SnapshotPhase::Pre);
    assert_eq!(
        fs::read_to_string(&pre.path).unwrap(),
        fs::read_to_string(temp.path().join("2025-07-05_scans.csv")).unwrap()
    );

    for _ in 0..5 {
        ledger.snapshot(day(), SnapshotPhase::Pre).unwrap();
        ledger.snapshot(day(), SnapshotPhase::Post).unwrap();
    }
    let kept = ledger.backups().list(Some(day())).unwrap();
    assert_eq!(kept.len(), 4);
    assert_eq!(kept.last().map(|e| e.phase), Some(SnapshotPhase::Post));
    assert!(!pre.path.exists());
}
