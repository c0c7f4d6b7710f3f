//! Cell-level access to a spreadsheet service.
//!
//! Rows and columns are 1-based, as in the sheet UI. Implementations are
//! blocking; callers on an async runtime wrap them in `spawn_blocking`.

use crate::error::{BackendError, BackendResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub trait SheetBackend: Send + Sync {
    fn worksheet_exists(&self, workbook: &str, sheet: &str) -> BackendResult<bool>;

    /// Copy `source` (values included) to a new worksheet named `new_name`.
    fn duplicate_worksheet(&self, workbook: &str, source: &str, new_name: &str) -> BackendResult<()>;

    /// Every row of the sheet, ragged as stored.
    fn get_all_values(&self, workbook: &str, sheet: &str) -> BackendResult<Vec<Vec<String>>>;

    /// Value of one cell; empty when outside the used range.
    fn get_cell(&self, workbook: &str, sheet: &str, row: usize, col: usize) -> BackendResult<String>;

    fn update_cell(
        &self,
        workbook: &str,
        sheet: &str,
        row: usize,
        col: usize,
        value: &str,
    ) -> BackendResult<()>;

    /// Append a row after the last used one and return its row number.
    fn append_row(&self, workbook: &str, sheet: &str, values: &[String]) -> BackendResult<usize>;
}

/// A workbook as a map of worksheet name to rows.
///
/// Shared by the in-memory and JSON mirror backends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workbook {
    pub sheets: BTreeMap<String, Vec<Vec<String>>>,
}

impl Workbook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder used to seed fixtures.
    pub fn with_sheet(mut self, name: &str, rows: &[&[&str]]) -> Self {
        let rows = rows
            .iter()
            .map(|row| row.iter().map(|cell| cell.to_string()).collect())
            .collect();
        self.sheets.insert(name.to_string(), rows);
        self
    }

    pub fn has_sheet(&self, name: &str) -> bool {
        self.sheets.contains_key(name)
    }

    pub fn sheet(&self, name: &str) -> BackendResult<&Vec<Vec<String>>> {
        self.sheets
            .get(name)
            .ok_or_else(|| BackendError::NotFound(format!("worksheet '{name}'")))
    }

    fn sheet_mut(&mut self, name: &str) -> BackendResult<&mut Vec<Vec<String>>> {
        self.sheets
            .get_mut(name)
            .ok_or_else(|| BackendError::NotFound(format!("worksheet '{name}'")))
    }

    pub fn duplicate(&mut self, source: &str, new_name: &str) -> BackendResult<()> {
        if self.has_sheet(new_name) {
            return Err(BackendError::Invalid(format!("worksheet '{new_name}' already exists")));
        }
        let rows = self.sheet(source)?.clone();
        self.sheets.insert(new_name.to_string(), rows);
        Ok(())
    }

    pub fn cell(&self, sheet: &str, row: usize, col: usize) -> BackendResult<String> {
        check_coords(row, col)?;
        Ok(self
            .sheet(sheet)?
            .get(row - 1)
            .and_then(|cells| cells.get(col - 1))
            .cloned()
            .unwrap_or_default())
    }

    pub fn set_cell(&mut self, sheet: &str, row: usize, col: usize, value: &str) -> BackendResult<()> {
        check_coords(row, col)?;
        let rows = self.sheet_mut(sheet)?;
        if rows.len() < row {
            rows.resize_with(row, Vec::new);
        }
        let cells = &mut rows[row - 1];
        if cells.len() < col {
            cells.resize(col, String::new());
        }
        cells[col - 1] = value.to_string();
        Ok(())
    }

    pub fn append_row(&mut self, sheet: &str, values: &[String]) -> BackendResult<usize> {
        let rows = self.sheet_mut(sheet)?;
        // Trailing blank rows count as unused
        while rows.last().map_or(false, |r| r.iter().all(|c| c.trim().is_empty())) {
            rows.pop();
        }
        rows.push(values.to_vec());
        Ok(rows.len())
    }
}

fn check_coords(row: usize, col: usize) -> BackendResult<()> {
    if row == 0 || col == 0 {
        return Err(BackendError::Invalid(format!("cell ({row}, {col}) is not 1-based")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_cell_grows_grid() {
        let mut book = Workbook::new().with_sheet("Temp", &[&["ID"]]);
        book.set_cell("Temp", 3, 2, "09:00:00").unwrap();
        assert_eq!(book.cell("Temp", 3, 2).unwrap(), "09:00:00");
        assert_eq!(book.cell("Temp", 2, 1).unwrap(), "");
        assert_eq!(book.cell("Temp", 9, 9).unwrap(), "");
        assert!(book.set_cell("Temp", 0, 1, "x").is_err());
    }

    #[test]
    fn test_append_row_skips_trailing_blanks() {
        let mut book = Workbook::new().with_sheet("S", &[&["ID"], &[""], &[" "]]);
        let row = book.append_row("S", &["A".to_string()]).unwrap();
        assert_eq!(row, 2);
    }

    #[test]
    fn test_duplicate_refuses_existing_name() {
        let mut book = Workbook::new().with_sheet("Temp", &[&["ID"]]);
        book.duplicate("Temp", "7/5/2025").unwrap();
        assert!(book.duplicate("Temp", "7/5/2025").is_err());
        assert!(matches!(book.duplicate("Nope", "x"), Err(BackendError::NotFound(_))));
    }
}
