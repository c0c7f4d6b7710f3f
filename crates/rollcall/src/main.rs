//! Rollcall launcher
//!
//! - `run`: scanner loop; ledger append on every scan, background sync
//! - `status`: connectivity and pending counts
//! - `sync`: one reconciliation pass, then exit
//! - `backups`: list ledger snapshots

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use rollcall_logging::{init_logging, LogConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

mod cli;

/// How long runtime teardown waits for blocking work (stdin reader, a pass
/// abandoned at shutdown).
const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Parser, Debug)]
#[command(name = "rollcall", about = "QR attendance scanner with offline-first sheet sync")]
struct Cli {
    /// Enable verbose logging (info/debug to stderr)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Config file (default: ~/.rollcall/config.toml)
    #[arg(short = 'c', long, global = true, env = "ROLLCALL_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start scanning: one decoded payload per stdin line
    Run,

    /// Show connectivity and what is waiting to sync
    Status {
        /// Partition date (default: today)
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Probe the remote store and run one sync pass
    Sync {
        /// Partition date (default: today)
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// List ledger snapshots taken around sync passes
    Backups {
        /// Only snapshots of this partition date
        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

fn run_command(cli: Cli) -> Result<()> {
    let config = rollcall::app::load_config(cli.config.as_deref())?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("rollcall")
        .build()
        .context("Failed to start async runtime")?;

    let result = match cli.command {
        Commands::Run => runtime.block_on(cli::run::run(config)),
        Commands::Status { date, json } => runtime.block_on(cli::status::run(config, date, json)),
        Commands::Sync { date } => runtime.block_on(cli::sync::run(config, date)),
        Commands::Backups { date } => cli::backups::run(&config, date),
    };

    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);
    result
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // The scanner keeps the terminal for scan feedback; details go to the log file
    let quiet = matches!(cli.command, Commands::Run) && !cli.verbose;
    if let Err(e) = init_logging(LogConfig {
        app_name: "rollcall",
        verbose: cli.verbose,
        quiet,
        log_dir: None,
    }) {
        eprintln!("Warning: failed to initialize logging: {:#}", e);
    }

    match run_command(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::from(1)
        }
    }
}
