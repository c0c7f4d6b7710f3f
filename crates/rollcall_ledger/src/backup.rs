//! Point-in-time partition snapshots taken around reconciliation passes.
//!
//! Snapshots live in `<ledger_dir>/backups/` as
//! `<date>_scans.<phase>.<YYYYmmddTHHMMSSmmm>.csv`. Only the newest
//! `retention` files per date are kept; zero keeps everything.

use crate::error::Result;
use crate::partition::atomic_write;
use chrono::{Duration, Local, NaiveDate, NaiveDateTime};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const BACKUP_DIR_NAME: &str = "backups";
const STAMP_FORMAT: &str = "%Y%m%dT%H%M%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SnapshotPhase {
    /// Before the pass reads anything
    Pre,
    /// After the pass has updated flags
    Post,
}

impl SnapshotPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotPhase::Pre => "pre_sync",
            SnapshotPhase::Post => "post_sync",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "pre_sync" => Some(SnapshotPhase::Pre),
            "post_sync" => Some(SnapshotPhase::Post),
            _ => None,
        }
    }
}

impl fmt::Display for SnapshotPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A snapshot file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupEntry {
    pub path: PathBuf,
    pub date: NaiveDate,
    pub phase: SnapshotPhase,
    pub taken_at: NaiveDateTime,
    /// Tie breaker for snapshots taken within the same millisecond
    seq: u32,
}

impl BackupEntry {
    fn parse(path: PathBuf) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        let stem = name.strip_suffix(".csv")?;
        let mut parts = stem.splitn(3, '.');
        let date_part = parts.next()?.strip_suffix("_scans")?;
        let phase = SnapshotPhase::parse(parts.next()?)?;
        let (taken_at, seq) = parse_stamp(parts.next()?)?;
        let date = NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()?;
        Some(Self {
            path,
            date,
            phase,
            taken_at,
            seq,
        })
    }
}

fn format_stamp(at: NaiveDateTime) -> String {
    format!("{}{}", at.format(STAMP_FORMAT), at.format("%3f"))
}

fn parse_stamp(stamp: &str) -> Option<(NaiveDateTime, u32)> {
    let (base, seq) = match stamp.split_once('-') {
        Some((base, seq)) => (base, seq.parse().ok()?),
        None => (stamp, 0),
    };
    if base.len() != 18 || !base.is_ascii() {
        return None;
    }
    let (seconds, millis) = base.split_at(15);
    let at = NaiveDateTime::parse_from_str(seconds, STAMP_FORMAT).ok()?;
    let millis: i64 = millis.parse().ok()?;
    Some((at + Duration::milliseconds(millis), seq))
}

/// Snapshot directory for one ledger.
#[derive(Debug, Clone)]
pub struct BackupStore {
    dir: PathBuf,
    retention: usize,
}

impl BackupStore {
    pub fn new(ledger_dir: &Path, retention: usize) -> Self {
        Self {
            dir: ledger_dir.join(BACKUP_DIR_NAME),
            retention,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Copy `source` into the backup directory. `Ok(None)` when the
    /// partition has never been written.
    pub fn write_snapshot(
        &self,
        source: &Path,
        date: NaiveDate,
        phase: SnapshotPhase,
    ) -> Result<Option<BackupEntry>> {
        if !source.exists() {
            debug!("No partition file for {}; skipping {} snapshot", date, phase);
            return Ok(None);
        }
        let content = fs::read(source)?;
        fs::create_dir_all(&self.dir)?;

        let base = format_stamp(Local::now().naive_local());
        let stamp = match self
            .list(Some(date))?
            .iter()
            .filter(|e| format_stamp(e.taken_at) == base)
            .map(|e| e.seq)
            .max()
        {
            Some(seq) => format!("{base}-{}", seq + 1),
            None => base,
        };
        let path = self.snapshot_path(date, phase, &stamp);

        atomic_write(&path, &content)?;
        debug!("Wrote {} snapshot {}", phase, path.display());
        Ok(BackupEntry::parse(path))
    }

    fn snapshot_path(&self, date: NaiveDate, phase: SnapshotPhase, stamp: &str) -> PathBuf {
        self.dir.join(format!(
            "{}_scans.{}.{}.csv",
            date.format("%Y-%m-%d"),
            phase.as_str(),
            stamp
        ))
    }

    /// Snapshots oldest first, optionally for one date only.
    pub fn list(&self, date: Option<NaiveDate>) -> Result<Vec<BackupEntry>> {
        let mut entries = Vec::new();
        if !self.dir.exists() {
            return Ok(entries);
        }
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if let Some(backup) = BackupEntry::parse(entry.path()) {
                if date.map_or(true, |d| d == backup.date) {
                    entries.push(backup);
                }
            }
        }
        entries.sort_by_key(|e| (e.date, e.taken_at, e.seq));
        Ok(entries)
    }

    /// Delete the oldest snapshots of `date` beyond the retention count.
    pub fn prune(&self, date: NaiveDate) -> Result<usize> {
        if self.retention == 0 {
            return Ok(0);
        }
        let entries = self.list(Some(date))?;
        if entries.len() <= self.retention {
            return Ok(0);
        }
        let excess = entries.len() - self.retention;
        let mut removed = 0;
        for entry in entries.into_iter().take(excess) {
            match fs::remove_file(&entry.path) {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to remove old snapshot {}: {}", entry.path.display(), e),
            }
        }
        debug!("Pruned {} snapshots for {}", removed, date);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 7, 5).unwrap()
    }

    #[test]
    fn test_stamp_parses_back() {
        let at = day().and_hms_milli_opt(9, 4, 31, 250).unwrap();
        let stamp = format_stamp(at);
        assert_eq!(stamp, "20250705T090431250");
        assert_eq!(parse_stamp(&stamp), Some((at, 0)));
        assert_eq!(parse_stamp(&format!("{stamp}-2")), Some((at, 2)));
        assert_eq!(parse_stamp("garbage"), None);
    }

    #[test]
    fn test_missing_partition_has_no_snapshot() {
        let temp = TempDir::new().unwrap();
        let store = BackupStore::new(temp.path(), 5);
        let snapshot = store
            .write_snapshot(&temp.path().join("2025-07-05_scans.csv"), day(), SnapshotPhase::Pre)
            .unwrap();
        assert!(snapshot.is_none());
        assert!(store.list(None).unwrap().is_empty());
    }

    #[test]
    fn test_prune_keeps_newest() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("2025-07-05_scans.csv");
        fs::write(&source, "ID,Timestamp1\n").unwrap();
        let store = BackupStore::new(temp.path(), 2);

        let mut written = Vec::new();
        for phase in [SnapshotPhase::Pre, SnapshotPhase::Post, SnapshotPhase::Pre] {
            written.push(store.write_snapshot(&source, day(), phase).unwrap().unwrap());
        }
        assert_eq!(store.prune(day()).unwrap(), 1);

        let kept: Vec<PathBuf> = store.list(Some(day())).unwrap().into_iter().map(|e| e.path).collect();
        assert_eq!(kept.len(), 2);
        assert!(!kept.contains(&written[0].path));
    }
}
