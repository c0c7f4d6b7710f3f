use chrono::{NaiveDate, NaiveDateTime};
use rollcall_protocol::SyncTarget;
use std::path::PathBuf;

/// One identifier's scans within a day partition.
///
/// `version` changes on every append and is what `mark_synced` compares
/// against; it lives in memory only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerRecord {
    pub identifier: String,
    /// One entry per occurrence, in append order
    pub timestamps: Vec<NaiveDateTime>,
    pub synced_daily: bool,
    pub synced_master: bool,
    /// Count of leading timestamps already confirmed on the daily sheet
    pub daily_pushed: usize,
    pub version: u64,
}

impl LedgerRecord {
    pub(crate) fn new(identifier: String, first: NaiveDateTime, version: u64) -> Self {
        Self {
            identifier,
            timestamps: vec![first],
            synced_daily: false,
            synced_master: false,
            daily_pushed: 0,
            version,
        }
    }

    pub fn is_synced(&self, target: SyncTarget) -> bool {
        match target {
            SyncTarget::Daily => self.synced_daily,
            SyncTarget::Master => self.synced_master,
        }
    }

    /// Timestamps the daily sheet has not confirmed yet.
    pub fn unpushed_timestamps(&self) -> &[NaiveDateTime] {
        let start = self.daily_pushed.min(self.timestamps.len());
        &self.timestamps[start..]
    }

    pub fn first_seen(&self) -> Option<NaiveDateTime> {
        self.timestamps.first().copied()
    }

    pub fn last_seen(&self) -> Option<NaiveDateTime> {
        self.timestamps.last().copied()
    }
}

/// Result of appending a scan to the ledger.
#[derive(Debug, Clone)]
pub struct AppendOutcome {
    pub record: LedgerRecord,
    /// The identifier had no record in this partition before
    pub first_scan: bool,
    /// Segment file the append was flushed to
    pub path: PathBuf,
}

/// Counts for a partition, shown by the status surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionStats {
    pub date: NaiveDate,
    pub path: PathBuf,
    pub records: usize,
    pub scans: usize,
    pub unsynced_daily: usize,
    pub unsynced_master: usize,
    /// Earlier segments of this day that could not be read
    pub corrupt_segments: Vec<PathBuf>,
}

impl PartitionStats {
    pub fn unsynced(&self, target: SyncTarget) -> usize {
        match target {
            SyncTarget::Daily => self.unsynced_daily,
            SyncTarget::Master => self.unsynced_master,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 7, 5)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn test_unpushed_timestamps_skip_confirmed_prefix() {
        let mut record = LedgerRecord::new("A".to_string(), at(9, 0, 0), 1);
        record.timestamps.push(at(12, 0, 0));
        record.timestamps.push(at(17, 0, 0));
        record.daily_pushed = 2;
        assert_eq!(record.unpushed_timestamps(), &[at(17, 0, 0)]);

        record.daily_pushed = 7;
        assert!(record.unpushed_timestamps().is_empty());
    }

    #[test]
    fn test_new_record_is_unsynced() {
        let record = LedgerRecord::new("A".to_string(), at(9, 0, 0), 1);
        assert!(!record.is_synced(SyncTarget::Daily));
        assert!(!record.is_synced(SyncTarget::Master));
        assert_eq!(record.first_seen(), record.last_seen());
    }
}
