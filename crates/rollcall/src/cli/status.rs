use anyhow::Result;
use chrono::{Local, NaiveDate};
use rollcall::app;
use rollcall_ledger::PartitionStats;
use rollcall_protocol::{ConnectivityState, RollcallConfig};
use rollcall_remote::open_remote;
use rollcall_sync::{ConnectivityHandle, ConnectivityMonitor};

/// One probe plus the partition counts. Needs the ledger lock, so it cannot
/// run beside a scanner on the same ledger.
pub async fn run(config: RollcallConfig, date: Option<NaiveDate>, json: bool) -> Result<()> {
    let date = date.unwrap_or_else(|| Local::now().date_naive());
    let ledger = app::open_ledger(&config)?;

    let monitor = ConnectivityMonitor::new(
        open_remote(&config),
        ConnectivityHandle::new(),
        config.probe_interval(),
        config.probe_timeout(),
    );
    let ok = monitor.probe_once().await;
    monitor.observe(ok);
    let state = monitor.handle().state();

    let stats = ledger.partition_stats(date)?;
    let backups = ledger.backups().list(Some(date))?.len();
    ledger.close()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status_json(state, &stats, backups))?);
    } else {
        println!("Status: {}", state);
        println!("Partition: {} ({})", stats.date, stats.path.display());
        println!(
            "Pending: {} daily, {} master ({} records, {} scans)",
            stats.unsynced_daily, stats.unsynced_master, stats.records, stats.scans
        );
        println!("Snapshots: {}", backups);
        for path in &stats.corrupt_segments {
            println!("Corrupt segment kept for recovery: {}", path.display());
        }
    }
    Ok(())
}

fn status_json(state: ConnectivityState, stats: &PartitionStats, backups: usize) -> serde_json::Value {
    serde_json::json!({
        "connectivity": state,
        "date": stats.date,
        "partition": stats.path,
        "records": stats.records,
        "scans": stats.scans,
        "unsynced_daily": stats.unsynced_daily,
        "unsynced_master": stats.unsynced_master,
        "corrupt_segments": stats.corrupt_segments,
        "snapshots": backups,
    })
}
