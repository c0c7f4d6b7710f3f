//! Shared setup for the subcommands.

use anyhow::{Context, Result};
use rollcall_ledger::{Ledger, LedgerError, LedgerOptions};
use rollcall_protocol::RollcallConfig;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Load the configuration file (default location when `path` is `None`),
/// then apply `ROLLCALL_*` overrides.
pub fn load_config(path: Option<&Path>) -> Result<RollcallConfig> {
    let config = match path {
        Some(path) => RollcallConfig::load_with_env(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => RollcallConfig::load_default().context("Failed to load config")?,
    };
    Ok(config)
}

/// Open the ledger for writing. Fails if another scanner holds it.
pub fn open_ledger(config: &RollcallConfig) -> Result<Arc<Ledger>> {
    let options = LedgerOptions {
        backup_retention: config.backup_retention,
    };
    match Ledger::open(&config.ledger_dir, options) {
        Ok(ledger) => {
            info!("Ledger: {}", config.ledger_dir.display());
            Ok(Arc::new(ledger))
        }
        Err(LedgerError::Locked(dir)) => anyhow::bail!(
            "Ledger {} is in use by another rollcall process (see {}/.ledger.lock.json); \
             stop the running scanner first",
            dir.display(),
            dir.display()
        ),
        Err(e) => Err(e)
            .with_context(|| format!("Failed to open ledger at {}", config.ledger_dir.display())),
    }
}
