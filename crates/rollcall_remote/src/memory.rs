//! In-process sheet backend with fault injection.
//!
//! Used for dry runs and by the test suites: the workbook is real (cells are
//! stored and read back), only the network is missing. Clones share state,
//! so a test can keep a handle after giving one to the adapter.

use crate::adapter::SheetLayout;
use crate::backend::{SheetBackend, Workbook};
use crate::error::{BackendError, BackendResult};
use rollcall_protocol::sheet_format::ID_HEADER;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
struct MemoryState {
    workbooks: HashMap<String, Workbook>,
    offline: bool,
    fail_next: u32,
    /// Writes touching a row that holds one of these values fail with the error
    poisoned: HashMap<String, BackendError>,
    calls: usize,
    writes: usize,
}

#[derive(Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend").finish_non_exhaustive()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Daily workbook with an empty template and a master roster listing `roster`.
    pub fn with_attendance_sheets<S: AsRef<str>>(layout: &SheetLayout, roster: &[S]) -> Self {
        let backend = Self::new();
        let mut daily = Workbook::new();
        daily
            .sheets
            .insert(layout.daily_template_sheet.clone(), vec![vec![ID_HEADER.to_string()]]);
        let mut master = Workbook::new();
        let mut rows = vec![vec![ID_HEADER.to_string()]];
        rows.extend(roster.iter().map(|id| vec![id.as_ref().to_string()]));
        master.sheets.insert(layout.master_sheet.clone(), rows);

        backend.insert_workbook(&layout.daily_workbook, daily);
        backend.insert_workbook(&layout.master_workbook, master);
        backend
    }

    fn lock(&self) -> BackendResult<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| BackendError::Transport("memory backend lock poisoned".to_string()))
    }

    fn lock_quiet(&self) -> Option<MutexGuard<'_, MemoryState>> {
        self.state.lock().ok()
    }

    pub fn insert_workbook(&self, name: &str, workbook: Workbook) {
        if let Some(mut state) = self.lock_quiet() {
            state.workbooks.insert(name.to_string(), workbook);
        }
    }

    pub fn workbook(&self, name: &str) -> Option<Workbook> {
        self.lock_quiet()?.workbooks.get(name).cloned()
    }

    /// Rows of one worksheet, for assertions.
    pub fn sheet_rows(&self, workbook: &str, sheet: &str) -> Option<Vec<Vec<String>>> {
        self.workbook(workbook)?.sheets.get(sheet).cloned()
    }

    /// Every call fails with a transport error while set.
    pub fn set_offline(&self, offline: bool) {
        if let Some(mut state) = self.lock_quiet() {
            state.offline = offline;
        }
    }

    /// The next `n` calls fail with a transport error.
    pub fn fail_next(&self, n: u32) {
        if let Some(mut state) = self.lock_quiet() {
            state.fail_next = n;
        }
    }

    /// Writes involving `value` (usually an identifier) fail with `error`.
    pub fn poison(&self, value: &str, error: BackendError) {
        if let Some(mut state) = self.lock_quiet() {
            state.poisoned.insert(value.to_string(), error);
        }
    }

    pub fn clear_poison(&self) {
        if let Some(mut state) = self.lock_quiet() {
            state.poisoned.clear();
        }
    }

    /// Calls received, failed ones included.
    pub fn call_count(&self) -> usize {
        self.lock_quiet().map_or(0, |s| s.calls)
    }

    /// Cell or row writes that were applied.
    pub fn write_count(&self) -> usize {
        self.lock_quiet().map_or(0, |s| s.writes)
    }

    pub fn reset_counts(&self) {
        if let Some(mut state) = self.lock_quiet() {
            state.calls = 0;
            state.writes = 0;
        }
    }

    /// Count the call and apply connection-level faults.
    fn enter(&self) -> BackendResult<MutexGuard<'_, MemoryState>> {
        let mut state = self.lock()?;
        state.calls += 1;
        if state.offline {
            return Err(BackendError::Transport("connection refused".to_string()));
        }
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(BackendError::Transport("connection reset".to_string()));
        }
        Ok(state)
    }
}

impl MemoryState {
    fn book(&self, name: &str) -> BackendResult<&Workbook> {
        self.workbooks
            .get(name)
            .ok_or_else(|| BackendError::NotFound(format!("workbook '{name}'")))
    }

    fn book_mut(&mut self, name: &str) -> BackendResult<&mut Workbook> {
        self.workbooks
            .get_mut(name)
            .ok_or_else(|| BackendError::NotFound(format!("workbook '{name}'")))
    }

    fn check_poison<'a>(&self, mut values: impl Iterator<Item = &'a String>) -> BackendResult<()> {
        if self.poisoned.is_empty() {
            return Ok(());
        }
        match values.find_map(|v| self.poisoned.get(v.trim())) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

impl SheetBackend for MemoryBackend {
    fn worksheet_exists(&self, workbook: &str, sheet: &str) -> BackendResult<bool> {
        let state = self.enter()?;
        Ok(state.book(workbook)?.has_sheet(sheet))
    }

    fn duplicate_worksheet(&self, workbook: &str, source: &str, new_name: &str) -> BackendResult<()> {
        let mut state = self.enter()?;
        state.book_mut(workbook)?.duplicate(source, new_name)?;
        state.writes += 1;
        Ok(())
    }

    fn get_all_values(&self, workbook: &str, sheet: &str) -> BackendResult<Vec<Vec<String>>> {
        let state = self.enter()?;
        Ok(state.book(workbook)?.sheet(sheet)?.clone())
    }

    fn get_cell(&self, workbook: &str, sheet: &str, row: usize, col: usize) -> BackendResult<String> {
        let state = self.enter()?;
        state.book(workbook)?.cell(sheet, row, col)
    }

    fn update_cell(
        &self,
        workbook: &str,
        sheet: &str,
        row: usize,
        col: usize,
        value: &str,
    ) -> BackendResult<()> {
        let mut state = self.enter()?;
        if let Some(cells) = state.book(workbook)?.sheet(sheet)?.get(row.saturating_sub(1)) {
            state.check_poison(cells.iter())?;
        }
        state.book_mut(workbook)?.set_cell(sheet, row, col, value)?;
        state.writes += 1;
        Ok(())
    }

    fn append_row(&self, workbook: &str, sheet: &str, values: &[String]) -> BackendResult<usize> {
        let mut state = self.enter()?;
        state.check_poison(values.iter())?;
        let row = state.book_mut(workbook)?.append_row(sheet, values)?;
        state.writes += 1;
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> MemoryBackend {
        let backend = MemoryBackend::new();
        backend.insert_workbook("book", Workbook::new().with_sheet("S", &[&["ID"], &["A"]]));
        backend
    }

    #[test]
    fn test_fail_next_then_recovers() {
        let backend = backend();
        backend.fail_next(2);
        assert!(backend.get_cell("book", "S", 1, 1).is_err());
        assert!(backend.get_cell("book", "S", 1, 1).is_err());
        assert_eq!(backend.get_cell("book", "S", 1, 1).unwrap(), "ID");
        assert_eq!(backend.call_count(), 3);
    }

    #[test]
    fn test_poisoned_row_rejects_writes() {
        let backend = backend();
        backend.poison("A", BackendError::Permission("protected range".into()));
        let err = backend.update_cell("book", "S", 2, 2, "09:00:00").unwrap_err();
        assert!(matches!(err, BackendError::Permission(_)));
        assert_eq!(backend.write_count(), 0);

        // Other rows are unaffected
        backend.update_cell("book", "S", 3, 1, "B").unwrap();
        assert_eq!(backend.write_count(), 1);
    }

    #[test]
    fn test_clones_share_state() {
        let backend = backend();
        let other = backend.clone();
        other.set_offline(true);
        assert!(matches!(
            backend.worksheet_exists("book", "S"),
            Err(BackendError::Transport(_))
        ));
    }
}
