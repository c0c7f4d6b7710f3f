use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use rollcall::app;
use rollcall_protocol::{RollcallConfig, SyncReport};
use rollcall_remote::open_remote;
use rollcall_sync::{
    CancellationToken, ConnectivityHandle, ConnectivityMonitor, PassMode, Reconciler,
    ReconcilerConfig,
};
use std::sync::Arc;
use tracing::info;

/// Probe, then sync if the remote store answered: only `date` when given,
/// otherwise every partition with unsynced records up to today.
pub async fn run(config: RollcallConfig, date: Option<NaiveDate>) -> Result<()> {
    let ledger = app::open_ledger(&config)?;
    let remote = open_remote(&config);
    let handle = ConnectivityHandle::new();

    let monitor = ConnectivityMonitor::new(
        Arc::clone(&remote),
        handle.clone(),
        config.probe_interval(),
        config.probe_timeout(),
    );
    let ok = monitor.probe_once().await;
    monitor.observe(ok);
    if !handle.state().is_online() {
        println!("Status: {}; nothing synced", handle.state());
        ledger.close()?;
        return Ok(());
    }

    let reconciler = Reconciler::new(
        Arc::clone(&ledger),
        remote,
        handle,
        ReconcilerConfig::from_config(&config),
    );
    let cancel = CancellationToken::new();
    let pass_cancel = cancel.clone();
    let mut pass = tokio::task::spawn_blocking(move || match date {
        Some(date) => reconciler
            .run_pass(date, PassMode::Manual, &pass_cancel)
            .map(|summary| SyncReport { passes: vec![summary] }),
        None => reconciler.run_backlog(Local::now().date_naive(), PassMode::Manual, &pass_cancel),
    });

    let report = tokio::select! {
        joined = &mut pass => joined,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted; stopping after the current record");
            cancel.cancel();
            pass.await
        }
    }
    .context("Sync pass task failed")??;

    println!("Sync: {}", report);
    ledger.close()?;
    Ok(())
}
