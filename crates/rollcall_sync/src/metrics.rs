//! Process-wide counters for the status surface.
//!
//! Plain atomics, written from the ingestion loop and the background tasks,
//! read through [`SyncMetrics::snapshot`].

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

pub static METRICS: SyncMetrics = SyncMetrics::new();

pub struct SyncMetrics {
    // Ingestion
    pub scans_accepted: AtomicU64,
    pub scans_suppressed: AtomicU64,
    pub scans_rejected: AtomicU64,
    pub ledger_errors: AtomicU64,

    // Connectivity
    pub probes_ok: AtomicU64,
    pub probes_failed: AtomicU64,
    pub went_online: AtomicU64,
    pub went_offline: AtomicU64,

    // Reconciliation
    pub passes_run: AtomicU64,
    pub passes_aborted: AtomicU64,
    pub records_synced: AtomicU64,
    pub records_failed: AtomicU64,
    pub remote_retries: AtomicU64,
    pub stale_writes: AtomicU64,

    /// Cumulative pass time in milliseconds
    pub pass_time_ms: AtomicU64,
}

impl Default for SyncMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncMetrics {
    pub const fn new() -> Self {
        Self {
            scans_accepted: AtomicU64::new(0),
            scans_suppressed: AtomicU64::new(0),
            scans_rejected: AtomicU64::new(0),
            ledger_errors: AtomicU64::new(0),
            probes_ok: AtomicU64::new(0),
            probes_failed: AtomicU64::new(0),
            went_online: AtomicU64::new(0),
            went_offline: AtomicU64::new(0),
            passes_run: AtomicU64::new(0),
            passes_aborted: AtomicU64::new(0),
            records_synced: AtomicU64::new(0),
            records_failed: AtomicU64::new(0),
            remote_retries: AtomicU64::new(0),
            stale_writes: AtomicU64::new(0),
            pass_time_ms: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn inc_scans_accepted(&self) {
        self.scans_accepted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_scans_suppressed(&self) {
        self.scans_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_scans_rejected(&self) {
        self.scans_rejected.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_ledger_errors(&self) {
        self.ledger_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_probes_ok(&self) {
        self.probes_ok.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_probes_failed(&self) {
        self.probes_failed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_went_online(&self) {
        self.went_online.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_went_offline(&self) {
        self.went_offline.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_passes_run(&self) {
        self.passes_run.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_passes_aborted(&self) {
        self.passes_aborted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_records_synced(&self) {
        self.records_synced.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_records_failed(&self) {
        self.records_failed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_remote_retries(&self) {
        self.remote_retries.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_stale_writes(&self) {
        self.stale_writes.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_pass_time(&self, start: Instant) {
        let elapsed_ms = start.elapsed().as_millis() as u64;
        self.pass_time_ms.fetch_add(elapsed_ms, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            scans_accepted: self.scans_accepted.load(Ordering::Relaxed),
            scans_suppressed: self.scans_suppressed.load(Ordering::Relaxed),
            scans_rejected: self.scans_rejected.load(Ordering::Relaxed),
            ledger_errors: self.ledger_errors.load(Ordering::Relaxed),
            probes_ok: self.probes_ok.load(Ordering::Relaxed),
            probes_failed: self.probes_failed.load(Ordering::Relaxed),
            went_online: self.went_online.load(Ordering::Relaxed),
            went_offline: self.went_offline.load(Ordering::Relaxed),
            passes_run: self.passes_run.load(Ordering::Relaxed),
            passes_aborted: self.passes_aborted.load(Ordering::Relaxed),
            records_synced: self.records_synced.load(Ordering::Relaxed),
            records_failed: self.records_failed.load(Ordering::Relaxed),
            remote_retries: self.remote_retries.load(Ordering::Relaxed),
            stale_writes: self.stale_writes.load(Ordering::Relaxed),
            pass_time_ms: self.pass_time_ms.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub scans_accepted: u64,
    pub scans_suppressed: u64,
    pub scans_rejected: u64,
    pub ledger_errors: u64,
    pub probes_ok: u64,
    pub probes_failed: u64,
    pub went_online: u64,
    pub went_offline: u64,
    pub passes_run: u64,
    pub passes_aborted: u64,
    pub records_synced: u64,
    pub records_failed: u64,
    pub remote_retries: u64,
    pub stale_writes: u64,
    pub pass_time_ms: u64,
}

impl MetricsSnapshot {
    pub fn avg_pass_time_ms(&self) -> f64 {
        if self.passes_run == 0 {
            0.0
        } else {
            self.pass_time_ms as f64 / self.passes_run as f64
        }
    }
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "scans: {} accepted, {} suppressed, {} rejected, {} ledger errors",
            self.scans_accepted, self.scans_suppressed, self.scans_rejected, self.ledger_errors
        )?;
        writeln!(
            f,
            "probes: {} ok, {} failed ({} online / {} offline transitions)",
            self.probes_ok, self.probes_failed, self.went_online, self.went_offline
        )?;
        write!(
            f,
            "passes: {} run, {} aborted, avg {:.0}ms; records {} synced, {} failed, {} stale, {} retries",
            self.passes_run,
            self.passes_aborted,
            self.avg_pass_time_ms(),
            self.records_synced,
            self.records_failed,
            self.stale_writes,
            self.remote_retries
        )
    }
}
