use chrono::{NaiveDate, NaiveDateTime, SubsecRound};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A decoded scan accepted by the ingestor.
///
/// Immutable once built. The identifier is stored trimmed and the time is
/// truncated to milliseconds, the precision the ledger keeps on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanEvent {
    pub identifier: String,
    pub occurred_at: NaiveDateTime,
}

impl ScanEvent {
    pub fn new(identifier: impl AsRef<str>, occurred_at: NaiveDateTime) -> Self {
        Self {
            identifier: identifier.as_ref().trim().to_string(),
            occurred_at: occurred_at.trunc_subsecs(3),
        }
    }

    /// Calendar day the event belongs to. One ledger partition per day.
    pub fn partition_date(&self) -> NaiveDate {
        self.occurred_at.date()
    }
}

/// One of the two remote destinations a ledger record is mirrored to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTarget {
    /// Per-day log sheet: one row per identifier, one cell per scan.
    Daily,
    /// Master presence roster: one column per calendar date.
    Master,
}

impl SyncTarget {
    pub const ALL: [SyncTarget; 2] = [SyncTarget::Daily, SyncTarget::Master];

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncTarget::Daily => "daily",
            SyncTarget::Master => "master",
        }
    }
}

impl fmt::Display for SyncTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SyncTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(SyncTarget::Daily),
            "master" => Ok(SyncTarget::Master),
            other => Err(format!("unknown sync target: {other}")),
        }
    }
}

/// Reachability of the remote store as last observed by the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectivityState {
    Online,
    #[default]
    Offline,
}

impl ConnectivityState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectivityState::Online => "ONLINE",
            ConnectivityState::Offline => "OFFLINE",
        }
    }

    pub fn is_online(&self) -> bool {
        matches!(self, ConnectivityState::Online)
    }
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 7, 5)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn test_scan_event_trims_identifier() {
        let event = ScanEvent::new("  A-17 \n", at(9, 0, 0));
        assert_eq!(event.identifier, "A-17");
        assert_eq!(event.partition_date(), NaiveDate::from_ymd_opt(2025, 7, 5).unwrap());
    }

    #[test]
    fn test_scan_event_keeps_milliseconds_only() {
        let raw = at(9, 0, 0) + chrono::Duration::nanoseconds(250_123_456);
        let event = ScanEvent::new("A", raw);
        assert_eq!(event.occurred_at, at(9, 0, 0) + chrono::Duration::milliseconds(250));
    }

    #[test]
    fn test_sync_target_parse() {
        assert_eq!("Daily".parse::<SyncTarget>().unwrap(), SyncTarget::Daily);
        assert_eq!("master".parse::<SyncTarget>().unwrap(), SyncTarget::Master);
        assert!("roster".parse::<SyncTarget>().is_err());
    }

    #[test]
    fn test_connectivity_defaults_offline() {
        assert_eq!(ConnectivityState::default(), ConnectivityState::Offline);
        assert!(!ConnectivityState::default().is_online());
        assert_eq!(ConnectivityState::Online.to_string(), "ONLINE");
    }
}
