//! Scan ingestion: cooldown filtering and the synchronous ledger append.
//!
//! The capture layer hands every decode to [`EventIngestor::on_decoded`].
//! Repeat decodes of the same identifier inside the cooldown window are
//! camera noise and are dropped. Everything else is appended to the ledger
//! before the call returns, whatever the connectivity state.

use crate::connectivity::ConnectivityHandle;
use crate::metrics::METRICS;
use chrono::NaiveDateTime;
use rollcall_ledger::{Ledger, LedgerRecord};
use rollcall_protocol::{ConnectivityState, ScanEvent};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Prune the cooldown table once it holds this many identifiers.
const COOLDOWN_PRUNE_THRESHOLD: usize = 256;

#[derive(Debug)]
pub enum IngestOutcome {
    /// Appended and flushed to the ledger
    Accepted {
        record: LedgerRecord,
        first_scan: bool,
    },
    /// Inside the cooldown window of an earlier accepted decode
    Suppressed,
    /// Blank identifier
    Rejected,
    /// The ledger refused the append
    Failed(String),
}

impl IngestOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, IngestOutcome::Accepted { .. })
    }

    pub fn disposition(&self) -> Disposition {
        match self {
            IngestOutcome::Accepted { first_scan: true, .. } => Disposition::FirstScan,
            IngestOutcome::Accepted { first_scan: false, .. } => Disposition::RepeatScan,
            IngestOutcome::Suppressed => Disposition::Suppressed,
            IngestOutcome::Rejected => Disposition::Rejected,
            IngestOutcome::Failed(_) => Disposition::Failed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    FirstScan,
    RepeatScan,
    Suppressed,
    Rejected,
    Failed,
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Disposition::FirstScan => write!(f, "recorded (first today)"),
            Disposition::RepeatScan => write!(f, "recorded"),
            Disposition::Suppressed => write!(f, "suppressed"),
            Disposition::Rejected => write!(f, "rejected"),
            Disposition::Failed => write!(f, "NOT RECORDED"),
        }
    }
}

/// What the presentation layer shows for one decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayEvent {
    pub identifier: String,
    pub disposition: Disposition,
    pub connectivity: ConnectivityState,
    pub at: NaiveDateTime,
}

impl fmt::Display for DisplayEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {} ({})",
            self.at.format("%H:%M:%S"),
            self.identifier,
            self.disposition,
            self.connectivity
        )
    }
}

pub struct EventIngestor {
    ledger: Arc<Ledger>,
    connectivity: ConnectivityHandle,
    cooldown: chrono::Duration,
    /// Identifier -> decode time of its last accepted scan
    last_accepted: HashMap<String, NaiveDateTime>,
    display: Option<mpsc::UnboundedSender<DisplayEvent>>,
}

impl EventIngestor {
    pub fn new(ledger: Arc<Ledger>, connectivity: ConnectivityHandle, cooldown: Duration) -> Self {
        Self {
            ledger,
            connectivity,
            cooldown: chrono::Duration::from_std(cooldown).unwrap_or(chrono::Duration::zero()),
            last_accepted: HashMap::new(),
            display: None,
        }
    }

    pub fn with_display(mut self, tx: mpsc::UnboundedSender<DisplayEvent>) -> Self {
        self.display = Some(tx);
        self
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown.to_std().unwrap_or_default()
    }

    /// Handle one decode from the capture layer.
    pub fn on_decoded(&mut self, identifier: &str, at: NaiveDateTime) -> IngestOutcome {
        let identifier = identifier.trim();
        let outcome = if identifier.is_empty() {
            METRICS.inc_scans_rejected();
            debug!("Ignoring blank decode");
            IngestOutcome::Rejected
        } else if self.in_cooldown(identifier, at) {
            METRICS.inc_scans_suppressed();
            debug!(identifier, "Suppressed repeat decode");
            IngestOutcome::Suppressed
        } else {
            self.append(identifier, at)
        };

        self.emit(identifier, &outcome, at);
        outcome
    }

    fn in_cooldown(&self, identifier: &str, at: NaiveDateTime) -> bool {
        match self.last_accepted.get(identifier) {
            // A clock step backwards also counts as inside the window
            Some(last) => at.signed_duration_since(*last) < self.cooldown,
            None => false,
        }
    }

    fn append(&mut self, identifier: &str, at: NaiveDateTime) -> IngestOutcome {
        let event = ScanEvent::new(identifier, at);
        match self.ledger.append(&event) {
            Ok(outcome) => {
                METRICS.inc_scans_accepted();
                self.remember(identifier, at);
                info!(
                    identifier,
                    scans = outcome.record.timestamps.len(),
                    first_scan = outcome.first_scan,
                    "Scan recorded"
                );
                IngestOutcome::Accepted {
                    record: outcome.record,
                    first_scan: outcome.first_scan,
                }
            }
            Err(e) => {
                METRICS.inc_ledger_errors();
                error!(identifier, "Failed to record scan: {}", e);
                IngestOutcome::Failed(e.to_string())
            }
        }
    }

    fn remember(&mut self, identifier: &str, at: NaiveDateTime) {
        if self.last_accepted.len() >= COOLDOWN_PRUNE_THRESHOLD {
            let cooldown = self.cooldown;
            self.last_accepted
                .retain(|_, last| at.signed_duration_since(*last) < cooldown);
        }
        self.last_accepted.insert(identifier.to_string(), at);
    }

    fn emit(&self, identifier: &str, outcome: &IngestOutcome, at: NaiveDateTime) {
        let Some(tx) = &self.display else {
            return;
        };
        let event = DisplayEvent {
            identifier: identifier.to_string(),
            disposition: outcome.disposition(),
            connectivity: self.connectivity.state(),
            at,
        };
        // Nobody listening is fine
        let _ = tx.send(event);
    }
}
