//! Canonical default values shared across the ledger, adapter and engine.

/// Probe cadence of the connectivity monitor.
pub const DEFAULT_PROBE_INTERVAL_SECS: u64 = 30;
/// Upper bound on a single reachability probe.
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 5_000;
/// Attempts per record per target within one pass.
pub const DEFAULT_MAX_RETRY_ATTEMPTS: u32 = 3;
/// Fixed delay between attempts on the same record.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 500;
/// Consecutive unavailable records before a pass gives up.
pub const DEFAULT_UNAVAILABLE_ABORT_THRESHOLD: u32 = 3;
/// Decode suppression window in capture frames.
pub const DEFAULT_COOLDOWN_FRAMES: u64 = 10;
/// Effective frame spacing: every other frame of a 30 fps feed is decoded.
pub const DEFAULT_FRAME_INTERVAL_MS: u64 = 66;
/// Snapshot files kept per partition date.
pub const DEFAULT_BACKUP_RETENTION: usize = 20;
/// Grace period for background tasks at shutdown.
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 5_000;

pub const DEFAULT_DAILY_WORKBOOK: &str = "daily-attendance";
pub const DEFAULT_DAILY_TEMPLATE_SHEET: &str = "Temp";
pub const DEFAULT_MASTER_WORKBOOK: &str = "master-attendance";
pub const DEFAULT_MASTER_SHEET: &str = "Master";

pub const fn default_cooldown_ms() -> u64 {
    DEFAULT_COOLDOWN_FRAMES * DEFAULT_FRAME_INTERVAL_MS
}
