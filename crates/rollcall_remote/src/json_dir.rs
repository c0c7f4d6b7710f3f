//! Workbooks stored as JSON documents in a mirrored directory.
//!
//! The directory is typically a network share or a folder synced by another
//! tool. If it is not mounted every call fails as a transport error, which
//! is what drives the connectivity monitor offline.

use crate::backend::{SheetBackend, Workbook};
use crate::error::{BackendError, BackendResult};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

pub struct JsonDirBackend {
    dir: PathBuf,
    // Serializes read-modify-write cycles from this process
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for JsonDirBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonDirBackend").field("dir", &self.dir).finish()
    }
}

impl JsonDirBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn workbook_path(&self, name: &str) -> PathBuf {
        let file: String = name
            .chars()
            .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' { ch } else { '_' })
            .collect();
        self.dir.join(format!("{file}.json"))
    }

    /// Write a workbook file, creating the mirror directory. Used for seeding.
    pub fn save_workbook(&self, name: &str, workbook: &Workbook) -> BackendResult<()> {
        fs::create_dir_all(&self.dir).map_err(transport)?;
        self.store(name, workbook)
    }

    fn ensure_reachable(&self) -> BackendResult<()> {
        if self.dir.is_dir() {
            Ok(())
        } else {
            Err(BackendError::Transport(format!(
                "mirror directory {} is not reachable",
                self.dir.display()
            )))
        }
    }

    fn load(&self, name: &str) -> BackendResult<Workbook> {
        self.ensure_reachable()?;
        let path = self.workbook_path(name);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(BackendError::NotFound(format!("workbook '{name}'")));
            }
            Err(e) => return Err(transport(e)),
        };
        serde_json::from_slice(&bytes)
            .map_err(|e| BackendError::Invalid(format!("workbook {}: {e}", path.display())))
    }

    fn store(&self, name: &str, workbook: &Workbook) -> BackendResult<()> {
        let path = self.workbook_path(name);
        let payload = serde_json::to_vec_pretty(workbook)
            .map_err(|e| BackendError::Invalid(e.to_string()))?;
        let temp_path = self.dir.join(format!(".tmp_{}", uuid::Uuid::new_v4()));
        let result = (|| -> io::Result<()> {
            let mut file = File::create(&temp_path)?;
            file.write_all(&payload)?;
            file.sync_all()?;
            fs::rename(&temp_path, &path)
        })();
        if let Err(e) = result {
            let _ = fs::remove_file(&temp_path);
            return Err(transport(e));
        }
        debug!("Saved workbook {}", path.display());
        Ok(())
    }

    fn modify<T>(
        &self,
        name: &str,
        f: impl FnOnce(&mut Workbook) -> BackendResult<T>,
    ) -> BackendResult<T> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| BackendError::Transport("workbook lock poisoned".to_string()))?;
        let mut workbook = self.load(name)?;
        let value = f(&mut workbook)?;
        self.store(name, &workbook)?;
        Ok(value)
    }
}

fn transport(err: io::Error) -> BackendError {
    BackendError::Transport(err.to_string())
}

impl SheetBackend for JsonDirBackend {
    fn worksheet_exists(&self, workbook: &str, sheet: &str) -> BackendResult<bool> {
        Ok(self.load(workbook)?.has_sheet(sheet))
    }

    fn duplicate_worksheet(&self, workbook: &str, source: &str, new_name: &str) -> BackendResult<()> {
        self.modify(workbook, |book| book.duplicate(source, new_name))
    }

    fn get_all_values(&self, workbook: &str, sheet: &str) -> BackendResult<Vec<Vec<String>>> {
        Ok(self.load(workbook)?.sheet(sheet)?.clone())
    }

    fn get_cell(&self, workbook: &str, sheet: &str, row: usize, col: usize) -> BackendResult<String> {
        self.load(workbook)?.cell(sheet, row, col)
    }

    fn update_cell(
        &self,
        workbook: &str,
        sheet: &str,
        row: usize,
        col: usize,
        value: &str,
    ) -> BackendResult<()> {
        self.modify(workbook, |book| book.set_cell(sheet, row, col, value))
    }

    fn append_row(&self, workbook: &str, sheet: &str, values: &[String]) -> BackendResult<usize> {
        self.modify(workbook, |book| book.append_row(sheet, values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_unmounted_dir_is_transport_error() {
        let temp = TempDir::new().unwrap();
        let backend = JsonDirBackend::new(temp.path().join("share"));
        let err = backend.get_cell("book", "S", 1, 1).unwrap_err();
        assert!(matches!(err, BackendError::Transport(_)));
    }

    #[test]
    fn test_writes_persist_to_file() {
        let temp = TempDir::new().unwrap();
        let backend = JsonDirBackend::new(temp.path());
        backend
            .save_workbook("daily/attendance", &Workbook::new().with_sheet("Temp", &[&["ID"]]))
            .unwrap();

        backend.duplicate_worksheet("daily/attendance", "Temp", "7/5/2025").unwrap();
        let row = backend
            .append_row("daily/attendance", "7/5/2025", &["A".to_string()])
            .unwrap();
        backend.update_cell("daily/attendance", "7/5/2025", row, 2, "09:00:00").unwrap();

        let reopened = JsonDirBackend::new(temp.path());
        assert_eq!(
            reopened.get_all_values("daily/attendance", "7/5/2025").unwrap(),
            vec![vec!["ID".to_string()], vec!["A".to_string(), "09:00:00".to_string()]]
        );
        assert!(temp.path().join("daily_attendance.json").exists());
    }

    #[test]
    fn test_missing_workbook_is_not_found() {
        let temp = TempDir::new().unwrap();
        let backend = JsonDirBackend::new(temp.path());
        assert!(matches!(
            backend.worksheet_exists("nope", "S"),
            Err(BackendError::NotFound(_))
        ));
    }
}
