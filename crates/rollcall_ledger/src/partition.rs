//! Day partitions.
//!
//! A partition is the set of records for one calendar date, held in memory
//! as an identifier-ordered map and mirrored to a CSV segment file after
//! every mutation:
//!
//! ```text
//! ID,Timestamp1,Timestamp2,Synced_Daily,Synced_Master,Daily_Pushed
//! A-17,09:04:31.250,12:30:02.000,false,true,1
//! B-02,09:05:10.004,,true,true,1
//! ```
//!
//! Segment 0 is `<date>_scans.csv`. When the newest segment cannot be read a
//! new one (`<date>_scans.<n>.csv`) is started and the unreadable file is
//! never written again.

use crate::error::{LedgerError, Result};
use crate::record::{AppendOutcome, LedgerRecord, PartitionStats};
use chrono::{NaiveDate, NaiveTime};
use rollcall_protocol::{ScanEvent, SyncTarget};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

const FILE_SUFFIX: &str = "_scans";
const TIME_FORMAT_WRITE: &str = "%H:%M:%S%.3f";
const TIME_FORMAT_READ: &str = "%H:%M:%S%.f";

const COL_ID: &str = "ID";
const COL_TIMESTAMP_PREFIX: &str = "Timestamp";
const COL_SYNCED_DAILY: &str = "Synced_Daily";
const COL_SYNCED_MASTER: &str = "Synced_Master";
const COL_DAILY_PUSHED: &str = "Daily_Pushed";
// Column names written by the earlier single-file tool
const COL_SYNCED_DAILY_LEGACY: &str = "Synced_Sheet1";
const COL_SYNCED_MASTER_LEGACY: &str = "Synced_Sheet2";

/// File name of a partition segment.
pub fn segment_file_name(date: NaiveDate, segment: u32) -> String {
    if segment == 0 {
        format!("{}{}.csv", date.format("%Y-%m-%d"), FILE_SUFFIX)
    } else {
        format!("{}{}.{}.csv", date.format("%Y-%m-%d"), FILE_SUFFIX, segment)
    }
}

/// Inverse of [`segment_file_name`].
pub fn parse_segment_file_name(name: &str) -> Option<(NaiveDate, u32)> {
    let stem = name.strip_suffix(".csv")?;
    let (date_part, rest) = stem.split_at(stem.find(FILE_SUFFIX)?);
    let date = NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()?;
    let rest = &rest[FILE_SUFFIX.len()..];
    if rest.is_empty() {
        return Some((date, 0));
    }
    let segment = rest.strip_prefix('.')?.parse::<u32>().ok()?;
    (segment > 0).then_some((date, segment))
}

/// Segment numbers present on disk for `date`, ascending.
fn list_segments(dir: &Path, date: NaiveDate) -> Result<Vec<u32>> {
    let mut segments = Vec::new();
    if !dir.exists() {
        return Ok(segments);
    }
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some((seg_date, segment)) = parse_segment_file_name(name) {
            if seg_date == date {
                segments.push(segment);
            }
        }
    }
    segments.sort_unstable();
    Ok(segments)
}

pub(crate) struct Partition {
    date: NaiveDate,
    path: PathBuf,
    records: BTreeMap<String, LedgerRecord>,
    next_version: u64,
    corrupt_segments: Vec<PathBuf>,
}

impl Partition {
    fn empty(date: NaiveDate, path: PathBuf, corrupt_segments: Vec<PathBuf>) -> Self {
        Self {
            date,
            path,
            records: BTreeMap::new(),
            next_version: 1,
            corrupt_segments,
        }
    }

    /// Load the newest segment for `date`, starting a fresh one if it is unreadable.
    pub(crate) fn open(dir: &Path, date: NaiveDate) -> Result<Self> {
        let segments = list_segments(dir, date)?;
        let Some(&newest) = segments.last() else {
            return Ok(Self::empty(date, dir.join(segment_file_name(date, 0)), Vec::new()));
        };

        // Older segments only exist because they were unreadable when superseded
        let mut corrupt_segments: Vec<PathBuf> = segments[..segments.len() - 1]
            .iter()
            .map(|segment| dir.join(segment_file_name(date, *segment)))
            .collect();

        let path = dir.join(segment_file_name(date, newest));
        match read_segment(&path, date) {
            Ok(loaded) => {
                let mut partition = Self::empty(date, path, corrupt_segments);
                for mut record in loaded {
                    record.version = partition.bump_version();
                    partition.records.insert(record.identifier.clone(), record);
                }
                debug!(
                    "Loaded partition {} ({} records) from {}",
                    date,
                    partition.records.len(),
                    partition.path.display()
                );
                Ok(partition)
            }
            Err(LedgerError::Corrupt { path, reason }) => {
                error!(
                    "Ledger partition {} is unreadable ({}); preserving it and starting a new segment",
                    path.display(),
                    reason
                );
                corrupt_segments.push(path);
                let fresh = dir.join(segment_file_name(date, newest + 1));
                let partition = Self::empty(date, fresh, corrupt_segments);
                partition.persist()?;
                info!("Started ledger segment {}", partition.path.display());
                Ok(partition)
            }
            Err(err) => Err(err),
        }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    fn bump_version(&mut self) -> u64 {
        let version = self.next_version;
        self.next_version += 1;
        version
    }

    pub(crate) fn append(&mut self, event: &ScanEvent) -> Result<AppendOutcome> {
        if event.identifier.is_empty() {
            return Err(LedgerError::EmptyIdentifier);
        }
        let version = self.bump_version();
        let previous = self.records.get(&event.identifier).cloned();
        let first_scan = previous.is_none();

        match self.records.get_mut(&event.identifier) {
            Some(record) => {
                record.timestamps.push(event.occurred_at);
                record.synced_daily = false;
                record.synced_master = false;
                record.version = version;
            }
            None => {
                self.records.insert(
                    event.identifier.clone(),
                    LedgerRecord::new(event.identifier.clone(), event.occurred_at, version),
                );
            }
        }

        if let Err(err) = self.persist() {
            self.restore(&event.identifier, previous);
            return Err(err);
        }

        let record = self
            .records
            .get(&event.identifier)
            .cloned()
            .ok_or_else(|| LedgerError::UnknownRecord(event.identifier.clone()))?;
        Ok(AppendOutcome {
            record,
            first_scan,
            path: self.path.clone(),
        })
    }

    pub(crate) fn get(&self, identifier: &str) -> Option<&LedgerRecord> {
        self.records.get(identifier)
    }

    /// Records not yet synced to `target`, in identifier order.
    pub(crate) fn list_unsynced(&self, target: SyncTarget) -> Vec<LedgerRecord> {
        self.records
            .values()
            .filter(|record| !record.is_synced(target))
            .cloned()
            .collect()
    }

    /// Set the flag for `target`, provided nothing was appended since `seen` was read.
    pub(crate) fn mark_synced(&mut self, seen: &LedgerRecord, target: SyncTarget) -> Result<()> {
        let current = self
            .records
            .get_mut(&seen.identifier)
            .ok_or_else(|| LedgerError::UnknownRecord(seen.identifier.clone()))?;

        if current.version != seen.version {
            return Err(LedgerError::StaleWrite {
                identifier: seen.identifier.clone(),
                target,
            });
        }

        let previous = current.clone();
        match target {
            SyncTarget::Daily => {
                current.synced_daily = true;
                current.daily_pushed = current.timestamps.len();
            }
            SyncTarget::Master => current.synced_master = true,
        }
        if *current == previous {
            return Ok(());
        }

        if let Err(err) = self.persist() {
            self.restore(&seen.identifier, Some(previous));
            return Err(err);
        }
        Ok(())
    }

    fn restore(&mut self, identifier: &str, previous: Option<LedgerRecord>) {
        match previous {
            Some(record) => {
                self.records.insert(identifier.to_string(), record);
            }
            None => {
                self.records.remove(identifier);
            }
        }
    }

    pub(crate) fn stats(&self) -> PartitionStats {
        let mut stats = PartitionStats {
            date: self.date,
            path: self.path.clone(),
            records: self.records.len(),
            scans: 0,
            unsynced_daily: 0,
            unsynced_master: 0,
            corrupt_segments: self.corrupt_segments.clone(),
        };
        for record in self.records.values() {
            stats.scans += record.timestamps.len();
            if !record.synced_daily {
                stats.unsynced_daily += 1;
            }
            if !record.synced_master {
                stats.unsynced_master += 1;
            }
        }
        stats
    }

    /// Write the whole partition through a temp file and rename it into place.
    pub(crate) fn persist(&self) -> Result<()> {
        let bytes = encode(self.records.values())?;
        atomic_write(&self.path, &bytes)?;
        Ok(())
    }
}

fn encode<'a>(records: impl Iterator<Item = &'a LedgerRecord> + Clone) -> Result<Vec<u8>> {
    let width = records
        .clone()
        .map(|record| record.timestamps.len())
        .max()
        .unwrap_or(0)
        .max(1);

    let mut writer = csv::Writer::from_writer(Vec::new());
    let mut header = Vec::with_capacity(width + 4);
    header.push(COL_ID.to_string());
    header.extend((1..=width).map(|n| format!("{COL_TIMESTAMP_PREFIX}{n}")));
    header.push(COL_SYNCED_DAILY.to_string());
    header.push(COL_SYNCED_MASTER.to_string());
    header.push(COL_DAILY_PUSHED.to_string());
    writer.write_record(&header)?;

    for record in records {
        let mut row = Vec::with_capacity(width + 4);
        row.push(record.identifier.clone());
        for idx in 0..width {
            row.push(
                record
                    .timestamps
                    .get(idx)
                    .map(|at| at.format(TIME_FORMAT_WRITE).to_string())
                    .unwrap_or_default(),
            );
        }
        row.push(record.synced_daily.to_string());
        row.push(record.synced_master.to_string());
        row.push(record.daily_pushed.to_string());
        writer.write_record(&row)?;
    }

    writer.into_inner().map_err(|e| LedgerError::Io(e.into_error()))
}

/// Header positions of a segment file.
struct ColumnLayout {
    id: usize,
    timestamps: Vec<usize>,
    synced_daily: Option<usize>,
    synced_master: Option<usize>,
    daily_pushed: Option<usize>,
}

impl ColumnLayout {
    fn from_headers(headers: &csv::StringRecord) -> std::result::Result<Self, String> {
        let mut id = None;
        let mut timestamps: Vec<(u32, usize)> = Vec::new();
        let mut synced_daily = None;
        let mut synced_master = None;
        let mut daily_pushed = None;

        for (idx, raw) in headers.iter().enumerate() {
            let name = raw.trim();
            match name {
                COL_ID => id = Some(idx),
                COL_SYNCED_DAILY | COL_SYNCED_DAILY_LEGACY => synced_daily = Some(idx),
                COL_SYNCED_MASTER | COL_SYNCED_MASTER_LEGACY => synced_master = Some(idx),
                COL_DAILY_PUSHED => daily_pushed = Some(idx),
                _ => match name
                    .strip_prefix(COL_TIMESTAMP_PREFIX)
                    .and_then(|n| n.parse::<u32>().ok())
                {
                    Some(n) => timestamps.push((n, idx)),
                    None => debug!("Ignoring unknown ledger column {:?}", name),
                },
            }
        }

        let id = id.ok_or_else(|| format!("missing {COL_ID} column"))?;
        timestamps.sort_unstable();
        Ok(Self {
            id,
            timestamps: timestamps.into_iter().map(|(_, idx)| idx).collect(),
            synced_daily,
            synced_master,
            daily_pushed,
        })
    }
}

fn read_segment(path: &Path, date: NaiveDate) -> Result<Vec<LedgerRecord>> {
    let corrupt = |reason: String| LedgerError::corrupt(path, reason);

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|e| corrupt(e.to_string()))?;
    let headers = reader.headers().map_err(|e| corrupt(e.to_string()))?.clone();
    let layout = ColumnLayout::from_headers(&headers).map_err(corrupt)?;

    let mut records: Vec<LedgerRecord> = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for (row_idx, row) in reader.records().enumerate() {
        let line = row_idx + 2;
        let row = row.map_err(|e| corrupt(e.to_string()))?;
        let identifier = row.get(layout.id).unwrap_or_default().trim().to_string();
        if identifier.is_empty() {
            continue;
        }
        if !seen.insert(identifier.clone()) {
            return Err(corrupt(format!("line {line}: duplicate identifier {identifier}")));
        }

        let mut timestamps = Vec::new();
        for &idx in &layout.timestamps {
            let cell = row.get(idx).unwrap_or_default().trim();
            if cell.is_empty() {
                continue;
            }
            let time = NaiveTime::parse_from_str(cell, TIME_FORMAT_READ)
                .map_err(|e| corrupt(format!("line {line}: bad timestamp {cell:?}: {e}")))?;
            timestamps.push(date.and_time(time));
        }
        if timestamps.is_empty() {
            return Err(corrupt(format!("line {line}: {identifier} has no timestamps")));
        }

        let flag = |col: Option<usize>| -> Result<bool> {
            let cell = col.and_then(|idx| row.get(idx)).unwrap_or_default();
            parse_flag(cell).ok_or_else(|| corrupt(format!("line {line}: bad sync flag {cell:?}")))
        };
        let synced_daily = flag(layout.synced_daily)?;
        let synced_master = flag(layout.synced_master)?;

        let pushed_cell = layout
            .daily_pushed
            .and_then(|idx| row.get(idx))
            .unwrap_or_default()
            .trim();
        let daily_pushed = if pushed_cell.is_empty() {
            // Files without the column: a synced flag means everything went out
            if synced_daily { timestamps.len() } else { 0 }
        } else {
            pushed_cell
                .parse::<usize>()
                .map_err(|_| corrupt(format!("line {line}: bad pushed count {pushed_cell:?}")))?
                .min(timestamps.len())
        };

        records.push(LedgerRecord {
            identifier,
            timestamps,
            synced_daily,
            synced_master,
            daily_pushed,
            version: 0,
        });
    }
    Ok(records)
}

fn parse_flag(cell: &str) -> Option<bool> {
    match cell.trim().to_ascii_lowercase().as_str() {
        "" | "false" | "0" | "no" => Some(false),
        "true" | "1" | "yes" => Some(true),
        _ => None,
    }
}

/// Atomic write via temp file + fsync + rename.
pub(crate) fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;
    let temp_path = parent.join(format!(".tmp_{}", uuid::Uuid::new_v4()));
    {
        let mut file = File::create(&temp_path)?;
        file.write_all(content)?;
        file.sync_all()?;
    }
    if let Err(err) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(err.into());
    }
    sync_dir(parent);
    Ok(())
}

#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}
