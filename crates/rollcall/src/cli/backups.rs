use anyhow::Result;
use chrono::NaiveDate;
use rollcall_ledger::BackupStore;
use rollcall_protocol::RollcallConfig;

/// List snapshots oldest first. Reads the backup directory directly, so it
/// works while a scanner is running.
pub fn run(config: &RollcallConfig, date: Option<NaiveDate>) -> Result<()> {
    let store = BackupStore::new(&config.ledger_dir, config.backup_retention);
    let entries = store.list(date)?;
    if entries.is_empty() {
        println!("No snapshots in {}", store.dir().display());
        return Ok(());
    }

    println!("{:<12} {:<10} {:<24} PATH", "DATE", "PHASE", "TAKEN");
    for entry in &entries {
        println!(
            "{:<12} {:<10} {:<24} {}",
            entry.date.to_string(),
            entry.phase.as_str(),
            entry.taken_at.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
            entry.path.display()
        );
    }
    println!("{} snapshot(s)", entries.len());
    Ok(())
}
