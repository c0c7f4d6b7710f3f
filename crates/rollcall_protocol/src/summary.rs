//! Reconciliation pass summary surfaced to the operator.

use crate::types::SyncTarget;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-target outcome counters for one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetCounts {
    /// Records whose sync flag was set by this pass
    pub synced: usize,
    /// Records that exhausted their attempts or were rejected
    pub failed: usize,
    /// Subset of `failed` rejected by the remote schema (not retried)
    pub rejected: usize,
    /// Records pushed but whose flag update lost to a newer append
    pub stale: usize,
    /// Records not attempted because the pass stopped early
    pub not_attempted: usize,
    /// Rejected by an earlier pass and unchanged since; automatic passes leave
    /// them for the operator
    #[serde(default)]
    pub held: usize,
}

impl TargetCounts {
    /// Records left unsynced without being counted as failures.
    pub fn skipped(&self) -> usize {
        self.stale + self.not_attempted + self.held
    }

    pub fn total(&self) -> usize {
        self.synced + self.failed + self.skipped()
    }
}

/// Why a pass ended before visiting every unsynced record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    /// Consecutive records failed as unavailable; the monitor is forced offline
    SustainedOutage,
    /// Shutdown cancelled the pass
    Cancelled,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::SustainedOutage => write!(f, "remote unavailable"),
            AbortReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Summary of one reconciliation pass over one day partition.
///
/// `daily` and `master` count record-target pairs, so a record failing on
/// both targets counts once in each. `failed_records` counts identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassSummary {
    pub partition: NaiveDate,
    pub daily: TargetCounts,
    pub master: TargetCounts,
    /// Distinct identifiers that failed on at least one target
    #[serde(default)]
    pub failed_records: usize,
    pub aborted: Option<AbortReason>,
    pub elapsed_ms: u64,
    pub finished_at: Option<NaiveDateTime>,
}

impl PassSummary {
    pub fn new(partition: NaiveDate) -> Self {
        Self {
            partition,
            daily: TargetCounts::default(),
            master: TargetCounts::default(),
            failed_records: 0,
            aborted: None,
            elapsed_ms: 0,
            finished_at: None,
        }
    }

    pub fn counts(&self, target: SyncTarget) -> &TargetCounts {
        match target {
            SyncTarget::Daily => &self.daily,
            SyncTarget::Master => &self.master,
        }
    }

    pub fn counts_mut(&mut self, target: SyncTarget) -> &mut TargetCounts {
        match target {
            SyncTarget::Daily => &mut self.daily,
            SyncTarget::Master => &mut self.master,
        }
    }

    pub fn synced(&self) -> usize {
        self.daily.synced + self.master.synced
    }

    /// Failed record-target pairs. See `failed_records` for identifiers.
    pub fn failed(&self) -> usize {
        self.daily.failed + self.master.failed
    }

    pub fn skipped(&self) -> usize {
        self.daily.skipped() + self.master.skipped()
    }

    /// Every unsynced record reached its target.
    pub fn is_clean(&self) -> bool {
        self.aborted.is_none() && self.failed() == 0 && self.skipped() == 0
    }
}

impl fmt::Display for PassSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: synced {} (daily {}, master {}), failed {}, skipped {} in {}ms",
            self.partition,
            self.synced(),
            self.daily.synced,
            self.master.synced,
            self.failed_records,
            self.skipped(),
            self.elapsed_ms
        )?;
        if let Some(reason) = self.aborted {
            write!(f, " [aborted: {reason}]")?;
        }
        Ok(())
    }
}

/// Passes run for one sync trigger: every partition with unsynced records,
/// oldest first, ending with the active day.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub passes: Vec<PassSummary>,
}

impl SyncReport {
    pub fn pass(&self, partition: NaiveDate) -> Option<&PassSummary> {
        self.passes.iter().find(|p| p.partition == partition)
    }

    pub fn synced(&self) -> usize {
        self.passes.iter().map(PassSummary::synced).sum()
    }

    pub fn failed_records(&self) -> usize {
        self.passes.iter().map(|p| p.failed_records).sum()
    }

    pub fn skipped(&self) -> usize {
        self.passes.iter().map(PassSummary::skipped).sum()
    }

    /// The reason the sweep stopped early, if it did.
    pub fn aborted(&self) -> Option<AbortReason> {
        self.passes.iter().find_map(|p| p.aborted)
    }

    pub fn is_clean(&self) -> bool {
        self.passes.iter().all(PassSummary::is_clean)
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.passes.is_empty() {
            return write!(f, "nothing to sync");
        }
        for (idx, pass) in self.passes.iter().enumerate() {
            if idx > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{pass}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_totals_span_both_targets() {
        let mut summary = PassSummary::new(NaiveDate::from_ymd_opt(2025, 7, 5).unwrap());
        summary.daily.synced = 3;
        summary.daily.failed = 1;
        summary.master.synced = 4;
        summary.master.stale = 1;
        summary.master.not_attempted = 2;
        summary.master.held = 1;

        assert_eq!(summary.synced(), 7);
        assert_eq!(summary.failed(), 1);
        assert_eq!(summary.skipped(), 4);
        assert!(!summary.is_clean());
    }

    #[test]
    fn test_failed_counts_pairs_and_records_separately() {
        let mut summary = PassSummary::new(NaiveDate::from_ymd_opt(2025, 7, 5).unwrap());
        summary.daily.failed = 1;
        summary.master.failed = 1;
        summary.failed_records = 1;
        assert_eq!(summary.failed(), 2);
        assert!(summary.to_string().contains("failed 1,"));
    }

    #[test]
    fn test_report_is_dirty_when_any_partition_is() {
        let older = NaiveDate::from_ymd_opt(2025, 7, 4).unwrap();
        let today = NaiveDate::from_ymd_opt(2025, 7, 5).unwrap();
        let mut stuck = PassSummary::new(older);
        stuck.master.held = 1;
        let report = SyncReport {
            passes: vec![stuck, PassSummary::new(today)],
        };

        assert!(!report.is_clean());
        assert_eq!(report.skipped(), 1);
        assert_eq!(report.pass(today).map(|p| p.partition), Some(today));
        let text = report.to_string();
        assert!(text.starts_with("2025-07-04: synced 0"), "{text}");
        assert!(text.contains("; 2025-07-05: synced 0"), "{text}");
    }

    #[test]
    fn test_display_mentions_abort() {
        let mut summary = PassSummary::new(NaiveDate::from_ymd_opt(2025, 7, 5).unwrap());
        summary.aborted = Some(AbortReason::SustainedOutage);
        let text = summary.to_string();
        assert!(text.starts_with("2025-07-05: synced 0"));
        assert!(text.ends_with("[aborted: remote unavailable]"));
    }
}
