//! Background sync engine.
//!
//! Owns the two background tasks: the connectivity monitor and the
//! reconcile loop. Scan ingestion stays on the caller's loop through
//! [`EngineHandle::ingestor`] and never waits on either task.
//!
//! Passes are serialized by the reconcile loop itself: triggers arrive on a
//! channel with room for one pending request, so at most one pass runs and at
//! most one more is queued behind it.

use crate::cancel::CancellationToken;
use crate::connectivity::{ConnectivityHandle, ConnectivityMonitor, SyncTrigger};
use crate::ingestor::EventIngestor;
use crate::metrics::{MetricsSnapshot, METRICS};
use crate::reconciler::{PassMode, Reconciler, ReconcilerConfig};
use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use rollcall_ledger::{Ledger, PartitionStats};
use rollcall_protocol::{ConnectivityState, RollcallConfig, SyncReport};
use rollcall_remote::RemoteStore;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub probe_interval: Duration,
    pub probe_timeout: Duration,
    /// Extra passes while ONLINE; `None` disables the timer
    pub periodic_sync: Option<Duration>,
    pub reconciler: ReconcilerConfig,
    pub cooldown: Duration,
    pub shutdown_grace: Duration,
    /// Active partition for passes; today's local date when unset. Older
    /// partitions with unsynced records are swept before it.
    pub partition_date: Option<NaiveDate>,
}

impl EngineConfig {
    pub fn from_config(config: &RollcallConfig) -> Self {
        Self {
            probe_interval: config.probe_interval(),
            probe_timeout: config.probe_timeout(),
            periodic_sync: config.periodic_sync(),
            reconciler: ReconcilerConfig::from_config(config),
            cooldown: config.cooldown(),
            shutdown_grace: config.shutdown_grace(),
            partition_date: None,
        }
    }

    fn active_partition(&self) -> NaiveDate {
        self.partition_date
            .unwrap_or_else(|| Local::now().date_naive())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_config(&RollcallConfig::default())
    }
}

/// Answer to a manual sync request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncRequestOutcome {
    /// A pass will start shortly
    Scheduled,
    /// A pass is running; one more will follow it
    QueuedFollowUp,
    /// A pass is running and another is already queued; request dropped
    AlreadyInProgress,
    /// OFFLINE: an immediate probe was requested instead
    ProbeRequested,
    /// The engine is shutting down
    Stopped,
}

impl fmt::Display for SyncRequestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SyncRequestOutcome::Scheduled => "sync scheduled",
            SyncRequestOutcome::QueuedFollowUp => "sync running; another pass queued",
            SyncRequestOutcome::AlreadyInProgress => "sync already in progress",
            SyncRequestOutcome::ProbeRequested => "offline; checking connection",
            SyncRequestOutcome::Stopped => "sync engine stopped",
        };
        write!(f, "{}", text)
    }
}

/// Operator-facing status.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub connectivity: ConnectivityState,
    pub pass_running: bool,
    pub last_pass: Option<SyncReport>,
    /// Active partition counts; `None` when the ledger could not be read
    pub pending: Option<PartitionStats>,
    pub metrics: MetricsSnapshot,
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Status: {}", self.connectivity)?;
        if self.pass_running {
            writeln!(f, "Sync: in progress")?;
        }
        match &self.last_pass {
            Some(report) => writeln!(f, "Last sync: {}", report)?,
            None => writeln!(f, "Last sync: never")?,
        }
        if let Some(stats) = &self.pending {
            writeln!(
                f,
                "Pending: {} daily, {} master ({} records, {} scans today)",
                stats.unsynced_daily, stats.unsynced_master, stats.records, stats.scans
            )?;
            for path in &stats.corrupt_segments {
                writeln!(f, "Corrupt segment kept for recovery: {}", path.display())?;
            }
        }
        write!(f, "{}", self.metrics)
    }
}

struct Shared {
    pass_running: AtomicBool,
    last_pass: watch::Sender<Option<SyncReport>>,
    cancel: CancellationToken,
}

pub struct SyncEngine;

impl SyncEngine {
    /// Spawn the monitor and the reconcile loop. Must be called from within a
    /// tokio runtime.
    pub fn start(ledger: Arc<Ledger>, remote: Arc<dyn RemoteStore>, config: EngineConfig) -> EngineHandle {
        let connectivity = ConnectivityHandle::new();
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        let (last_pass, _) = watch::channel(None);
        let shared = Arc::new(Shared {
            pass_running: AtomicBool::new(false),
            last_pass,
            cancel: CancellationToken::new(),
        });

        let monitor = ConnectivityMonitor::new(
            Arc::clone(&remote),
            connectivity.clone(),
            config.probe_interval,
            config.probe_timeout,
        )
        .with_trigger(trigger_tx.clone());
        let probe_now = monitor.probe_notifier();
        let (monitor_shutdown_tx, monitor_shutdown_rx) = mpsc::channel(1);
        let monitor_task = tokio::spawn(monitor.run(monitor_shutdown_rx));

        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&ledger),
            remote,
            connectivity.clone(),
            config.reconciler.clone(),
        ));
        let (loop_shutdown_tx, loop_shutdown_rx) = mpsc::channel(1);
        let reconcile_task = tokio::spawn(reconcile_loop(
            reconciler,
            Arc::clone(&shared),
            connectivity.clone(),
            trigger_rx,
            loop_shutdown_rx,
            config.clone(),
        ));

        info!(
            "Sync engine started (probe every {:?}, periodic {:?})",
            config.probe_interval, config.periodic_sync
        );

        EngineHandle {
            ledger,
            connectivity,
            config,
            shared,
            trigger_tx,
            probe_now,
            monitor_shutdown_tx,
            loop_shutdown_tx,
            monitor_task,
            reconcile_task,
        }
    }
}

pub struct EngineHandle {
    ledger: Arc<Ledger>,
    connectivity: ConnectivityHandle,
    config: EngineConfig,
    shared: Arc<Shared>,
    trigger_tx: mpsc::Sender<SyncTrigger>,
    probe_now: Arc<Notify>,
    monitor_shutdown_tx: mpsc::Sender<()>,
    loop_shutdown_tx: mpsc::Sender<()>,
    monitor_task: JoinHandle<()>,
    reconcile_task: JoinHandle<()>,
}

impl EngineHandle {
    pub fn connectivity(&self) -> &ConnectivityHandle {
        &self.connectivity
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// A fresh ingestor bound to this engine's ledger and connectivity.
    pub fn ingestor(&self) -> EventIngestor {
        EventIngestor::new(
            Arc::clone(&self.ledger),
            self.connectivity.clone(),
            self.config.cooldown,
        )
    }

    /// Reports of completed sync rounds, newest only.
    pub fn subscribe_passes(&self) -> watch::Receiver<Option<SyncReport>> {
        self.shared.last_pass.subscribe()
    }

    pub fn pass_running(&self) -> bool {
        self.shared.pass_running.load(Ordering::SeqCst)
    }

    /// Manual sync nudge from the operator.
    pub fn request_sync(&self) -> SyncRequestOutcome {
        if self.shared.cancel.is_cancelled() {
            return SyncRequestOutcome::Stopped;
        }
        if !self.connectivity.state().is_online() {
            self.probe_now.notify_one();
            info!("Manual sync while OFFLINE; probing now");
            return SyncRequestOutcome::ProbeRequested;
        }

        let outcome = match self.trigger_tx.try_send(SyncTrigger::Manual) {
            Ok(()) if self.pass_running() => SyncRequestOutcome::QueuedFollowUp,
            Ok(()) => SyncRequestOutcome::Scheduled,
            Err(TrySendError::Full(_)) => SyncRequestOutcome::AlreadyInProgress,
            Err(TrySendError::Closed(_)) => SyncRequestOutcome::Stopped,
        };
        info!("Manual sync: {}", outcome);
        outcome
    }

    pub fn status(&self) -> StatusReport {
        let pending = match self.ledger.partition_stats(self.config.active_partition()) {
            Ok(stats) => Some(stats),
            Err(e) => {
                warn!("Could not read partition stats: {}", e);
                None
            }
        };
        StatusReport {
            connectivity: self.connectivity.state(),
            pass_running: self.pass_running(),
            last_pass: self.shared.last_pass.borrow().clone(),
            pending,
            metrics: METRICS.snapshot(),
        }
    }

    /// Stop the background tasks and close the ledger.
    ///
    /// A running pass is cancelled between records. Tasks still running after
    /// the grace period are aborted; the ledger close still waits for any
    /// partition write in flight.
    pub async fn shutdown(self) -> Result<()> {
        let Self {
            ledger,
            config,
            shared,
            monitor_shutdown_tx,
            loop_shutdown_tx,
            mut monitor_task,
            mut reconcile_task,
            ..
        } = self;

        info!("Stopping sync engine (grace {:?})...", config.shutdown_grace);
        shared.cancel.cancel();
        let _ = monitor_shutdown_tx.try_send(());
        let _ = loop_shutdown_tx.try_send(());

        let joined = tokio::time::timeout(config.shutdown_grace, async {
            if let Err(e) = (&mut monitor_task).await {
                warn!("Connectivity monitor task failed: {}", e);
            }
            if let Err(e) = (&mut reconcile_task).await {
                warn!("Reconcile task failed: {}", e);
            }
        })
        .await;
        if joined.is_err() {
            warn!("Shutdown grace period exceeded; abandoning background tasks");
            monitor_task.abort();
            reconcile_task.abort();
        }

        ledger.close().context("Failed to close ledger")?;
        info!("Sync engine stopped");
        Ok(())
    }
}

async fn reconcile_loop(
    reconciler: Arc<Reconciler>,
    shared: Arc<Shared>,
    connectivity: ConnectivityHandle,
    mut triggers: mpsc::Receiver<SyncTrigger>,
    mut shutdown_rx: mpsc::Receiver<()>,
    config: EngineConfig,
) {
    let mut periodic = config.periodic_sync.map(|period| {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });

    loop {
        let trigger = tokio::select! {
            biased;

            _ = shutdown_rx.recv() => break,
            trigger = triggers.recv() => match trigger {
                Some(trigger) => trigger,
                None => break,
            },
            _ = next_tick(&mut periodic) => SyncTrigger::Periodic,
        };

        if shared.cancel.is_cancelled() {
            break;
        }
        if !connectivity.state().is_online() {
            debug!("Skipping {} sync while OFFLINE", trigger);
            continue;
        }

        let date = config.active_partition();
        let mode = PassMode::from(trigger);
        info!("Starting {} sync for {}", trigger, date);
        shared.pass_running.store(true, Ordering::SeqCst);
        let pass = {
            let reconciler = Arc::clone(&reconciler);
            let cancel = shared.cancel.clone();
            tokio::task::spawn_blocking(move || reconciler.run_backlog(date, mode, &cancel)).await
        };
        shared.pass_running.store(false, Ordering::SeqCst);

        match pass {
            Ok(Ok(report)) => {
                shared.last_pass.send_replace(Some(report));
            }
            Ok(Err(e)) => error!("Sync pass for {} failed: {}", date, e),
            Err(e) => error!("Sync pass task failed: {}", e),
        }
    }
    debug!("Reconcile loop stopped");
}

async fn next_tick(periodic: &mut Option<Interval>) {
    match periodic {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_text_leads_with_connectivity() {
        let report = StatusReport {
            connectivity: ConnectivityState::Offline,
            pass_running: false,
            last_pass: None,
            pending: None,
            metrics: MetricsSnapshot::default(),
        };
        let text = report.to_string();
        assert!(text.starts_with("Status: OFFLINE\n"));
        assert!(text.contains("Last sync: never"));
        assert!(!text.contains("in progress"));
    }

    #[test]
    fn test_periodic_sync_off_by_default() {
        let config = EngineConfig::default();
        assert_eq!(config.periodic_sync, None);
        assert_eq!(config.probe_interval, Duration::from_secs(30));
        assert_eq!(config.reconciler.max_retry_attempts, 3);
    }
}
