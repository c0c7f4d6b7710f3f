//! Reconciliation passes: push unsynced ledger records to the remote store.
//!
//! One pass over a day partition:
//!
//! 1. pre-pass snapshot
//! 2. read the unsynced records for both targets (identifier order)
//! 3. daily: push every unconfirmed timestamp, then set the flag
//! 4. master: mark present, then set the flag
//! 5. post-pass snapshot (also taken when the pass stops early)
//!
//! A record that keeps failing is left unsynced and the pass moves on.
//! Several consecutive records failing as unavailable end the pass and force
//! connectivity OFFLINE. A record the remote rejected is held: automatic
//! passes skip it until it gains a scan, manual passes try it again.
//!
//! [`Reconciler::run_backlog`] sweeps every partition that still has unsynced
//! records, so scans from earlier days are not stranded when connectivity
//! comes back after midnight.
//!
//! Passes block on the remote store; run them with `spawn_blocking`.

use crate::cancel::CancellationToken;
use crate::connectivity::{ConnectivityHandle, SyncTrigger};
use crate::error::Result;
use crate::metrics::METRICS;
use chrono::{Local, NaiveDate};
use rollcall_ledger::{Ledger, LedgerError, LedgerRecord, SnapshotPhase};
use rollcall_protocol::defaults::{
    DEFAULT_MAX_RETRY_ATTEMPTS, DEFAULT_RETRY_DELAY_MS, DEFAULT_UNAVAILABLE_ABORT_THRESHOLD,
};
use rollcall_protocol::{AbortReason, PassSummary, RollcallConfig, SyncReport, SyncTarget};
use rollcall_remote::{RemoteError, RemoteStore};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// Attempts per record per target within one pass
    pub max_retry_attempts: u32,
    /// Fixed pause between attempts on the same record
    pub retry_delay: Duration,
    /// Consecutive unavailable records that end the pass
    pub unavailable_abort_threshold: u32,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            max_retry_attempts: DEFAULT_MAX_RETRY_ATTEMPTS,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            unavailable_abort_threshold: DEFAULT_UNAVAILABLE_ABORT_THRESHOLD,
        }
    }
}

impl ReconcilerConfig {
    pub fn from_config(config: &RollcallConfig) -> Self {
        Self {
            max_retry_attempts: config.max_retry_attempts.max(1),
            retry_delay: config.retry_delay(),
            unavailable_abort_threshold: config.unavailable_abort_threshold.max(1),
        }
    }
}

/// Who asked for a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassMode {
    /// Connectivity transition or timer; held rejections are skipped
    Automatic,
    /// Operator request; every unsynced record is attempted
    Manual,
}

impl From<SyncTrigger> for PassMode {
    fn from(trigger: SyncTrigger) -> Self {
        match trigger {
            SyncTrigger::Manual => PassMode::Manual,
            SyncTrigger::CameOnline | SyncTrigger::Periodic => PassMode::Automatic,
        }
    }
}

/// (partition, identifier, target) of a rejected record
type HoldKey = (NaiveDate, String, SyncTarget);

/// What happened to one record for one target.
#[derive(Debug)]
enum RecordOutcome {
    Synced,
    /// Pushed, but a newer scan arrived before the flag could be set
    Stale,
    Rejected(RemoteError),
    Unavailable(RemoteError),
    Ledger(LedgerError),
    /// Rejected earlier with the same scans; left for the operator
    Held,
    Cancelled,
}

pub struct Reconciler {
    ledger: Arc<Ledger>,
    remote: Arc<dyn RemoteStore>,
    connectivity: ConnectivityHandle,
    config: ReconcilerConfig,
    /// Scan count of each record at the time the remote rejected it
    held: Mutex<HashMap<HoldKey, usize>>,
}

impl Reconciler {
    pub fn new(
        ledger: Arc<Ledger>,
        remote: Arc<dyn RemoteStore>,
        connectivity: ConnectivityHandle,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            ledger,
            remote,
            connectivity,
            config,
            held: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Run a pass over every partition with unsynced records, oldest first,
    /// always including `active`. Stops after a pass that ended early.
    ///
    /// Older partitions that cannot be read are logged and skipped; only a
    /// failure on `active` is returned as an error. Fully synced older
    /// partitions are released from memory afterwards.
    pub fn run_backlog(
        &self,
        active: NaiveDate,
        mode: PassMode,
        cancel: &CancellationToken,
    ) -> Result<SyncReport> {
        let mut dates = BTreeSet::from([active]);
        for date in self.ledger.partition_dates()? {
            if date == active {
                continue;
            }
            match self.ledger.partition_stats(date) {
                Ok(stats) if stats.unsynced_daily + stats.unsynced_master > 0 => {
                    dates.insert(date);
                }
                Ok(_) => {}
                Err(e) => error!("Skipping partition {}: {}", date, e),
            }
        }
        if dates.len() > 1 {
            info!("Sync backlog spans {} partitions", dates.len());
        }

        let mut report = SyncReport::default();
        for date in dates {
            let summary = match self.run_pass(date, mode, cancel) {
                Ok(summary) => summary,
                Err(e) if date != active => {
                    error!("Sync pass for {} failed: {}", date, e);
                    continue;
                }
                Err(e) => return Err(e),
            };
            let stop = summary.aborted.is_some();
            report.passes.push(summary);
            if stop {
                break;
            }
        }

        match self.ledger.release_settled(active) {
            Ok(0) => {}
            Ok(released) => debug!("Released {} settled partitions", released),
            Err(e) => warn!("Could not release settled partitions: {}", e),
        }
        Ok(report)
    }

    /// Run one pass over the `date` partition.
    ///
    /// Errors only when the ledger cannot be snapshotted or read; per-record
    /// failures are counted in the summary.
    pub fn run_pass(
        &self,
        date: NaiveDate,
        mode: PassMode,
        cancel: &CancellationToken,
    ) -> Result<PassSummary> {
        let started = Instant::now();
        METRICS.inc_passes_run();
        let mut summary = PassSummary::new(date);

        self.ledger.snapshot(date, SnapshotPhase::Pre)?;
        let worklist = [
            (SyncTarget::Daily, self.ledger.list_unsynced(date, SyncTarget::Daily)?),
            (SyncTarget::Master, self.ledger.list_unsynced(date, SyncTarget::Master)?),
        ];
        info!(
            "Sync pass for {}: {} daily, {} master records pending",
            date,
            worklist[0].1.len(),
            worklist[1].1.len()
        );

        // Shared by both targets, in processing order
        let mut consecutive_unavailable = 0u32;
        let mut failed_records = BTreeSet::new();

        'targets: for (target_idx, (target, records)) in worklist.iter().enumerate() {
            for (idx, record) in records.iter().enumerate() {
                let outcome = if cancel.is_cancelled() {
                    RecordOutcome::Cancelled
                } else if mode == PassMode::Automatic && self.is_held(date, *target, record) {
                    RecordOutcome::Held
                } else {
                    self.sync_record(date, *target, record, cancel)
                };

                let counts = summary.counts_mut(*target);
                match outcome {
                    RecordOutcome::Synced => {
                        counts.synced += 1;
                        consecutive_unavailable = 0;
                        METRICS.inc_records_synced();
                        self.release_hold(date, *target, record);
                    }
                    RecordOutcome::Held => {
                        counts.held += 1;
                        debug!(identifier = %record.identifier, %target, "Rejected earlier; waiting for the operator");
                    }
                    RecordOutcome::Stale => {
                        counts.stale += 1;
                        consecutive_unavailable = 0;
                        METRICS.inc_stale_writes();
                        debug!(identifier = %record.identifier, %target, "Scan arrived mid-sync; retrying next pass");
                    }
                    RecordOutcome::Rejected(e) => {
                        counts.failed += 1;
                        counts.rejected += 1;
                        consecutive_unavailable = 0;
                        METRICS.inc_records_failed();
                        failed_records.insert(record.identifier.as_str());
                        self.hold(date, *target, record);
                        error!(identifier = %record.identifier, %target, "Remote rejected record; needs operator attention: {}", e);
                    }
                    RecordOutcome::Ledger(e) => {
                        counts.failed += 1;
                        consecutive_unavailable = 0;
                        METRICS.inc_records_failed();
                        failed_records.insert(record.identifier.as_str());
                        error!(identifier = %record.identifier, %target, "Could not update sync flag: {}", e);
                    }
                    RecordOutcome::Unavailable(e) => {
                        counts.failed += 1;
                        consecutive_unavailable += 1;
                        METRICS.inc_records_failed();
                        failed_records.insert(record.identifier.as_str());
                        warn!(identifier = %record.identifier, %target, "Giving up on record for this pass: {}", e);
                    }
                    RecordOutcome::Cancelled => {
                        summary.aborted = Some(AbortReason::Cancelled);
                        not_attempted(&mut summary, &worklist, target_idx, idx);
                        break 'targets;
                    }
                }

                if consecutive_unavailable >= self.config.unavailable_abort_threshold {
                    summary.aborted = Some(AbortReason::SustainedOutage);
                    not_attempted(&mut summary, &worklist, target_idx, idx + 1);
                    warn!(
                        "{} consecutive records unavailable; ending pass early",
                        consecutive_unavailable
                    );
                    self.connectivity.force_offline();
                    break 'targets;
                }
            }
        }

        summary.failed_records = failed_records.len();

        if let Err(e) = self.ledger.snapshot(date, SnapshotPhase::Post) {
            error!("Post-sync snapshot of {} failed: {}", date, e);
        }

        if summary.aborted.is_some() {
            METRICS.inc_passes_aborted();
        }
        METRICS.record_pass_time(started);
        summary.elapsed_ms = started.elapsed().as_millis() as u64;
        summary.finished_at = Some(Local::now().naive_local());
        info!("Sync pass finished: {}", summary);
        Ok(summary)
    }

    fn holds(&self) -> MutexGuard<'_, HashMap<HoldKey, usize>> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Rejected before and no scan added since.
    fn is_held(&self, date: NaiveDate, target: SyncTarget, record: &LedgerRecord) -> bool {
        let key = (date, record.identifier.clone(), target);
        self.holds().get(&key) == Some(&record.timestamps.len())
    }

    fn hold(&self, date: NaiveDate, target: SyncTarget, record: &LedgerRecord) {
        self.holds()
            .insert((date, record.identifier.clone(), target), record.timestamps.len());
    }

    fn release_hold(&self, date: NaiveDate, target: SyncTarget, record: &LedgerRecord) {
        self.holds().remove(&(date, record.identifier.clone(), target));
    }

    fn sync_record(
        &self,
        date: NaiveDate,
        target: SyncTarget,
        record: &LedgerRecord,
        cancel: &CancellationToken,
    ) -> RecordOutcome {
        let attempts = self.config.max_retry_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            if attempt > 1 {
                if cancel.is_cancelled() {
                    return RecordOutcome::Cancelled;
                }
                METRICS.inc_remote_retries();
                std::thread::sleep(self.config.retry_delay);
            }

            match self.push(date, target, record) {
                Ok(()) => {
                    return match self.ledger.mark_synced(date, record, target) {
                        Ok(()) => RecordOutcome::Synced,
                        Err(e) if e.is_stale() => RecordOutcome::Stale,
                        Err(e) => RecordOutcome::Ledger(e),
                    };
                }
                Err(e) if e.is_permanent() => return RecordOutcome::Rejected(e),
                Err(e) => {
                    debug!(
                        identifier = %record.identifier,
                        %target,
                        "Attempt {}/{} failed: {}",
                        attempt,
                        attempts,
                        e
                    );
                    last_error = Some(e);
                }
            }
        }

        RecordOutcome::Unavailable(
            last_error.unwrap_or_else(|| RemoteError::Unavailable("no attempt made".to_string())),
        )
    }

    fn push(&self, date: NaiveDate, target: SyncTarget, record: &LedgerRecord) -> rollcall_remote::Result<()> {
        match target {
            SyncTarget::Daily => {
                for at in record.unpushed_timestamps() {
                    self.remote.push_timestamp(&record.identifier, *at)?;
                }
                Ok(())
            }
            SyncTarget::Master => self.remote.mark_present(&record.identifier, date),
        }
    }
}

/// Count records from `(target_idx, from)` onwards as not attempted.
fn not_attempted(
    summary: &mut PassSummary,
    worklist: &[(SyncTarget, Vec<LedgerRecord>)],
    target_idx: usize,
    from: usize,
) {
    for (idx, (target, records)) in worklist.iter().enumerate().skip(target_idx) {
        let start = if idx == target_idx { from } else { 0 };
        summary.counts_mut(*target).not_attempted += records.len().saturating_sub(start);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_ledger::LedgerOptions;
    use rollcall_protocol::ScanEvent;
    use rollcall_remote::{MemoryBackend, SheetLayout, SheetsAdapter};
    use tempfile::TempDir;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 7, 5).unwrap()
    }

    fn fast() -> ReconcilerConfig {
        ReconcilerConfig {
            retry_delay: Duration::ZERO,
            ..ReconcilerConfig::default()
        }
    }

    #[test]
    fn test_not_attempted_spans_later_targets() {
        let record = |id: &str| LedgerRecord {
            identifier: id.to_string(),
            timestamps: vec![day().and_hms_opt(9, 0, 0).unwrap()],
            synced_daily: false,
            synced_master: false,
            daily_pushed: 0,
            version: 1,
        };
        let worklist = [
            (SyncTarget::Daily, vec![record("A"), record("B"), record("C")]),
            (SyncTarget::Master, vec![record("A"), record("B")]),
        ];
        let mut summary = PassSummary::new(day());
        not_attempted(&mut summary, &worklist, 0, 1);
        assert_eq!(summary.daily.not_attempted, 2);
        assert_eq!(summary.master.not_attempted, 2);
    }

    #[test]
    fn test_cancelled_token_attempts_nothing() {
        let temp = TempDir::new().unwrap();
        let ledger = Arc::new(Ledger::open(temp.path(), LedgerOptions::default()).unwrap());
        ledger
            .append(&ScanEvent::new("A", day().and_hms_opt(9, 0, 0).unwrap()))
            .unwrap();
        let layout = SheetLayout::default();
        let backend = MemoryBackend::with_attendance_sheets(&layout, &["A"]);
        let reconciler = Reconciler::new(
            Arc::clone(&ledger),
            Arc::new(SheetsAdapter::new(backend.clone(), layout)),
            ConnectivityHandle::new(),
            fast(),
        );

        let cancel = CancellationToken::new();
        cancel.cancel();
        let summary = reconciler.run_pass(day(), PassMode::Automatic, &cancel).unwrap();
        assert_eq!(summary.aborted, Some(AbortReason::Cancelled));
        assert_eq!(summary.daily.not_attempted, 1);
        assert_eq!(summary.master.not_attempted, 1);
        assert_eq!(backend.call_count(), 0);
    }

    #[test]
    fn test_pass_mode_follows_trigger() {
        assert_eq!(PassMode::from(SyncTrigger::Manual), PassMode::Manual);
        assert_eq!(PassMode::from(SyncTrigger::CameOnline), PassMode::Automatic);
        assert_eq!(PassMode::from(SyncTrigger::Periodic), PassMode::Automatic);
    }
}
