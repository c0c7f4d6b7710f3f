//! ONLINE/OFFLINE tracking.
//!
//! The state lives in a `watch` channel so readers (ingestor, reconciler,
//! status surface) never wait on the monitor. Only the monitor's probe
//! results move it, except that a reconciliation pass that hits a sustained
//! outage may force it back to OFFLINE early.

use crate::metrics::METRICS;
use rollcall_protocol::ConnectivityState;
use rollcall_remote::RemoteStore;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Why a reconciliation pass was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    CameOnline,
    Manual,
    Periodic,
}

impl fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncTrigger::CameOnline => write!(f, "online"),
            SyncTrigger::Manual => write!(f, "manual"),
            SyncTrigger::Periodic => write!(f, "periodic"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    WentOnline,
    WentOffline,
}

/// Shared view of the connectivity state. Starts OFFLINE.
#[derive(Clone)]
pub struct ConnectivityHandle {
    tx: Arc<watch::Sender<ConnectivityState>>,
}

impl Default for ConnectivityHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConnectivityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectivityHandle")
            .field("state", &self.state())
            .finish()
    }
}

impl ConnectivityHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ConnectivityState::Offline);
        Self { tx: Arc::new(tx) }
    }

    pub fn state(&self) -> ConnectivityState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
        self.tx.subscribe()
    }

    /// Drop to OFFLINE without waiting for the next probe.
    pub fn force_offline(&self) -> Option<Transition> {
        let transition = self.set(ConnectivityState::Offline);
        if transition.is_some() {
            METRICS.inc_went_offline();
            warn!("Connectivity forced OFFLINE after sustained remote failures");
        }
        transition
    }

    fn set(&self, next: ConnectivityState) -> Option<Transition> {
        let changed = self.tx.send_if_modified(|state| {
            if *state == next {
                false
            } else {
                *state = next;
                true
            }
        });
        changed.then_some(match next {
            ConnectivityState::Online => Transition::WentOnline,
            ConnectivityState::Offline => Transition::WentOffline,
        })
    }
}

/// Periodic reachability probe driving [`ConnectivityHandle`].
pub struct ConnectivityMonitor {
    remote: Arc<dyn RemoteStore>,
    handle: ConnectivityHandle,
    interval: Duration,
    probe_timeout: Duration,
    on_online: Option<mpsc::Sender<SyncTrigger>>,
    probe_now: Arc<Notify>,
}

impl ConnectivityMonitor {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        handle: ConnectivityHandle,
        interval: Duration,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            remote,
            handle,
            interval,
            probe_timeout,
            on_online: None,
            probe_now: Arc::new(Notify::new()),
        }
    }

    /// Send a trigger here on every OFFLINE -> ONLINE transition.
    pub fn with_trigger(mut self, tx: mpsc::Sender<SyncTrigger>) -> Self {
        self.on_online = Some(tx);
        self
    }

    /// Notifying this makes the monitor probe immediately instead of at the next tick.
    pub fn probe_notifier(&self) -> Arc<Notify> {
        Arc::clone(&self.probe_now)
    }

    pub fn handle(&self) -> &ConnectivityHandle {
        &self.handle
    }

    /// Apply one probe result.
    pub fn observe(&self, probe_ok: bool) -> Option<Transition> {
        if probe_ok {
            METRICS.inc_probes_ok();
        } else {
            METRICS.inc_probes_failed();
        }

        let next = if probe_ok {
            ConnectivityState::Online
        } else {
            ConnectivityState::Offline
        };
        let transition = self.handle.set(next);
        match transition {
            Some(Transition::WentOnline) => {
                METRICS.inc_went_online();
                info!("Remote store reachable; connectivity ONLINE");
                if let Some(tx) = &self.on_online {
                    // A full channel already holds a pending pass
                    if tx.try_send(SyncTrigger::CameOnline).is_err() {
                        debug!("Sync already pending; not queueing another");
                    }
                }
            }
            Some(Transition::WentOffline) => {
                METRICS.inc_went_offline();
                warn!("Remote store unreachable; connectivity OFFLINE");
            }
            None => debug!("Probe {}; still {}", if probe_ok { "ok" } else { "failed" }, next),
        }
        transition
    }

    /// Run one probe off the runtime, bounded by the probe timeout.
    pub async fn probe_once(&self) -> bool {
        let remote = Arc::clone(&self.remote);
        let probe = tokio::task::spawn_blocking(move || remote.probe());
        match tokio::time::timeout(self.probe_timeout, probe).await {
            Ok(Ok(ok)) => ok,
            Ok(Err(e)) => {
                warn!("Probe task failed: {}", e);
                false
            }
            Err(_) => {
                debug!("Probe timed out after {:?}", self.probe_timeout);
                false
            }
        }
    }

    /// Probe on every tick (the first one immediately) until shutdown.
    pub async fn run(self, mut shutdown_rx: mpsc::Receiver<()>) {
        info!("Connectivity monitor started (every {:?})", self.interval);
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.recv() => break,
                _ = ticker.tick() => {}
                _ = self.probe_now.notified() => debug!("Probe requested"),
            }
            let ok = self.probe_once().await;
            self.observe(ok);
        }
        info!("Connectivity monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime};
    use rollcall_remote::RemoteError;

    struct Unreachable;

    impl RemoteStore for Unreachable {
        fn push_timestamp(&self, _: &str, _: NaiveDateTime) -> rollcall_remote::Result<()> {
            Err(RemoteError::Unavailable("offline".into()))
        }
        fn mark_present(&self, _: &str, _: NaiveDate) -> rollcall_remote::Result<()> {
            Err(RemoteError::Unavailable("offline".into()))
        }
        fn probe(&self) -> bool {
            false
        }
    }

    fn monitor() -> (ConnectivityMonitor, mpsc::Receiver<SyncTrigger>) {
        let (tx, rx) = mpsc::channel(1);
        let monitor = ConnectivityMonitor::new(
            Arc::new(Unreachable),
            ConnectivityHandle::new(),
            Duration::from_secs(30),
            Duration::from_secs(5),
        )
        .with_trigger(tx);
        (monitor, rx)
    }

    #[test]
    fn test_starts_offline() {
        assert_eq!(ConnectivityHandle::new().state(), ConnectivityState::Offline);
    }

    #[test]
    fn test_fail_fail_succeed_triggers_one_pass() {
        let (monitor, mut rx) = monitor();
        assert_eq!(monitor.observe(false), None);
        assert_eq!(monitor.observe(false), None);
        assert_eq!(monitor.observe(true), Some(Transition::WentOnline));
        assert_eq!(monitor.observe(true), None);

        assert_eq!(rx.try_recv().unwrap(), SyncTrigger::CameOnline);
        assert!(rx.try_recv().is_err());
        assert!(monitor.handle().state().is_online());
    }

    #[test]
    fn test_failure_after_online_goes_offline() {
        let (monitor, _rx) = monitor();
        monitor.observe(true);
        assert_eq!(monitor.observe(false), Some(Transition::WentOffline));
        assert_eq!(monitor.handle().state(), ConnectivityState::Offline);
    }

    #[test]
    fn test_force_offline_notifies_subscribers() {
        let handle = ConnectivityHandle::new();
        let mut rx = handle.subscribe();
        handle.set(ConnectivityState::Online);
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();

        assert_eq!(handle.force_offline(), Some(Transition::WentOffline));
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow(), ConnectivityState::Offline);
        assert_eq!(handle.force_offline(), None);
    }

    #[tokio::test]
    async fn test_probe_once_reports_failure() {
        let (monitor, _rx) = monitor();
        assert!(!monitor.probe_once().await);
    }
}
