//! Attendance semantics on top of a cell-level sheet backend.
//!
//! Daily workbook: one worksheet per date (named `M/D/YYYY`, duplicated from
//! a template on first use), one row per identifier, one `HH:MM:SS` cell per
//! scan to the right of the `ID` column.
//!
//! Master workbook: a hand-maintained roster with an `ID` column and one
//! column per date; a scanned identifier gets `Present` in today's column.

use crate::backend::SheetBackend;
use crate::error::{RemoteError, Result};
use chrono::{NaiveDate, NaiveDateTime};
use rollcall_protocol::defaults::{
    DEFAULT_DAILY_TEMPLATE_SHEET, DEFAULT_DAILY_WORKBOOK, DEFAULT_MASTER_SHEET,
    DEFAULT_MASTER_WORKBOOK,
};
use rollcall_protocol::sheet_format::{sheet_date_label, sheet_time_label, ID_HEADER, PRESENT_MARKER};
use rollcall_protocol::RollcallConfig;
use std::sync::Arc;
use tracing::{debug, info};

/// Operations the reconciler needs from the remote store.
///
/// Calls block; run them off the async runtime.
pub trait RemoteStore: Send + Sync {
    /// Put `at` into the identifier's row of that day's sheet. Pushing the
    /// same `(identifier, at)` again rewrites the same cell.
    fn push_timestamp(&self, identifier: &str, at: NaiveDateTime) -> Result<()>;

    /// Set the identifier's cell in the `date` column of the roster.
    fn mark_present(&self, identifier: &str, date: NaiveDate) -> Result<()>;

    /// Cheap reachability check. Never errors; any failure is `false`.
    fn probe(&self) -> bool;
}

impl<T: RemoteStore + ?Sized> RemoteStore for Arc<T> {
    fn push_timestamp(&self, identifier: &str, at: NaiveDateTime) -> Result<()> {
        (**self).push_timestamp(identifier, at)
    }

    fn mark_present(&self, identifier: &str, date: NaiveDate) -> Result<()> {
        (**self).mark_present(identifier, date)
    }

    fn probe(&self) -> bool {
        (**self).probe()
    }
}

/// Workbook and worksheet names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetLayout {
    pub daily_workbook: String,
    pub daily_template_sheet: String,
    pub master_workbook: String,
    pub master_sheet: String,
}

impl Default for SheetLayout {
    fn default() -> Self {
        Self {
            daily_workbook: DEFAULT_DAILY_WORKBOOK.to_string(),
            daily_template_sheet: DEFAULT_DAILY_TEMPLATE_SHEET.to_string(),
            master_workbook: DEFAULT_MASTER_WORKBOOK.to_string(),
            master_sheet: DEFAULT_MASTER_SHEET.to_string(),
        }
    }
}

impl SheetLayout {
    pub fn from_config(config: &RollcallConfig) -> Self {
        Self {
            daily_workbook: config.daily_workbook.clone(),
            daily_template_sheet: config.daily_template_sheet.clone(),
            master_workbook: config.master_workbook.clone(),
            master_sheet: config.master_sheet.clone(),
        }
    }
}

pub struct SheetsAdapter<B> {
    backend: B,
    layout: SheetLayout,
}

impl<B: SheetBackend> SheetsAdapter<B> {
    pub fn new(backend: B, layout: SheetLayout) -> Self {
        Self { backend, layout }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn layout(&self) -> &SheetLayout {
        &self.layout
    }

    /// Make sure the worksheet for `sheet` exists, copying the template if not.
    fn ensure_daily_sheet(&self, sheet: &str) -> Result<()> {
        let book = &self.layout.daily_workbook;
        if self.backend.worksheet_exists(book, sheet)? {
            return Ok(());
        }
        let template = &self.layout.daily_template_sheet;
        if !self.backend.worksheet_exists(book, template)? {
            return Err(RemoteError::Rejected(format!(
                "template worksheet '{template}' is missing from {book}"
            )));
        }
        self.backend.duplicate_worksheet(book, template, sheet)?;
        info!("Created daily worksheet {} from template {}", sheet, template);
        Ok(())
    }
}

impl<B: SheetBackend> RemoteStore for SheetsAdapter<B> {
    fn push_timestamp(&self, identifier: &str, at: NaiveDateTime) -> Result<()> {
        let book = &self.layout.daily_workbook;
        let sheet = sheet_date_label(at.date());
        self.ensure_daily_sheet(&sheet)?;

        let rows = self.backend.get_all_values(book, &sheet)?;
        let id_col = id_column(&rows).ok_or_else(|| {
            RemoteError::Rejected(format!("no '{ID_HEADER}' header in daily worksheet {sheet}"))
        })?;

        let (row_num, cells) = match find_row(&rows, id_col, identifier) {
            Some(idx) => (idx + 1, rows[idx].clone()),
            None => {
                let mut cells = vec![String::new(); id_col + 1];
                cells[id_col] = identifier.to_string();
                let row_num = self.backend.append_row(book, &sheet, &cells)?;
                debug!(identifier, row = row_num, "Added row to daily worksheet {}", sheet);
                (row_num, cells)
            }
        };

        let value = sheet_time_label(at);
        let after_id = || cells.iter().enumerate().skip(id_col + 1);
        let col = after_id()
            .find(|(_, cell)| cell.trim() == value)
            .or_else(|| after_id().find(|(_, cell)| cell.trim().is_empty()))
            .map(|(idx, _)| idx)
            .unwrap_or_else(|| cells.len().max(id_col + 1));

        self.backend.update_cell(book, &sheet, row_num, col + 1, &value)?;
        debug!(identifier, time = %value, "Pushed timestamp to daily worksheet {}", sheet);
        Ok(())
    }

    fn mark_present(&self, identifier: &str, date: NaiveDate) -> Result<()> {
        let book = &self.layout.master_workbook;
        let sheet = &self.layout.master_sheet;
        let rows = self.backend.get_all_values(book, sheet)?;
        let id_col = id_column(&rows).ok_or_else(|| {
            RemoteError::Rejected(format!("no '{ID_HEADER}' header in roster {sheet}"))
        })?;
        let row_idx = find_row(&rows, id_col, identifier).ok_or_else(|| {
            RemoteError::Rejected(format!("{identifier} is not on roster {sheet}"))
        })?;

        let label = sheet_date_label(date);
        let header = &rows[0];
        let date_col = match header.iter().position(|cell| cell.trim() == label) {
            Some(col) => col,
            None => {
                let col = header
                    .iter()
                    .rposition(|cell| !cell.trim().is_empty())
                    .map_or(0, |last| last + 1);
                self.backend.update_cell(book, sheet, 1, col + 1, &label)?;
                info!("Added date column {} to roster {}", label, sheet);
                col
            }
        };

        let current = self.backend.get_cell(book, sheet, row_idx + 1, date_col + 1)?;
        if !current.trim().is_empty() {
            debug!(identifier, "Already marked for {}", label);
            return Ok(());
        }
        self.backend
            .update_cell(book, sheet, row_idx + 1, date_col + 1, PRESENT_MARKER)?;
        debug!(identifier, "Marked present for {}", label);
        Ok(())
    }

    fn probe(&self) -> bool {
        match self
            .backend
            .get_cell(&self.layout.master_workbook, &self.layout.master_sheet, 1, 1)
        {
            Ok(_) => true,
            Err(e) => {
                debug!("Remote probe failed: {}", e);
                false
            }
        }
    }
}

fn id_column(rows: &[Vec<String>]) -> Option<usize> {
    rows.first()?.iter().position(|cell| cell.trim() == ID_HEADER)
}

/// Index into `rows` (header excluded) of the identifier's row.
fn find_row(rows: &[Vec<String>], id_col: usize, identifier: &str) -> Option<usize> {
    rows.iter()
        .enumerate()
        .skip(1)
        .find(|(_, row)| row.get(id_col).map(|cell| cell.trim()) == Some(identifier))
        .map(|(idx, _)| idx)
}
