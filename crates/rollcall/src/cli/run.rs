//! The scanner loop.
//!
//! Reads one decoded payload per stdin line (the capture layer pipes its
//! decodes here) and hands it to the ingestor. Connectivity changes and pass
//! results are printed as they happen.

use anyhow::Result;
use chrono::Local;
use rollcall::app;
use rollcall::console::{parse_line, ConsoleInput, HELP_TEXT};
use rollcall_protocol::RollcallConfig;
use rollcall_remote::open_remote;
use rollcall_sync::{EngineConfig, SyncEngine};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::info;

pub async fn run(config: RollcallConfig) -> Result<()> {
    let ledger = app::open_ledger(&config)?;
    let remote = open_remote(&config);
    let engine = SyncEngine::start(ledger, remote, EngineConfig::from_config(&config));

    let (display_tx, mut display_rx) = mpsc::unbounded_channel();
    let mut ingestor = engine.ingestor().with_display(display_tx);
    let mut connectivity = engine.connectivity().subscribe();
    let mut passes = engine.subscribe_passes();

    println!("Rollcall ready. Status: {}", engine.connectivity().state());
    println!("{}", HELP_TEXT);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupted");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    info!("Input closed");
                    break;
                };
                match parse_line(&line) {
                    Some(ConsoleInput::Scan(payload)) => {
                        ingestor.on_decoded(&payload, Local::now().naive_local());
                        while let Ok(event) = display_rx.try_recv() {
                            println!("{}", event);
                        }
                    }
                    Some(ConsoleInput::Sync) => println!("{}", engine.request_sync()),
                    Some(ConsoleInput::Status) => println!("{}", engine.status()),
                    Some(ConsoleInput::Help) => println!("{}", HELP_TEXT),
                    Some(ConsoleInput::Quit) => break,
                    None => {}
                }
            }
            Ok(()) = connectivity.changed() => {
                let state = *connectivity.borrow_and_update();
                println!("Status: {}", state);
            }
            Ok(()) = passes.changed() => {
                if let Some(report) = passes.borrow_and_update().clone() {
                    println!("Sync: {}", report);
                }
            }
        }
    }

    println!("Shutting down...");
    engine.shutdown().await
}
