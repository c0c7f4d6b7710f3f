//! Logging setup for Rollcall binaries.
//!
//! Everything goes to a size-rotated file under `~/.rollcall/logs`; stderr
//! gets the same stream unless the scanner runs in quiet mode, where only
//! warnings reach the terminal.

use anyhow::{Context, Result};
use rollcall_protocol::paths;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str =
    "rollcall=info,rollcall_sync=info,rollcall_ledger=info,rollcall_remote=info";
/// Current file plus rolled generations
const LOG_GENERATIONS: usize = 5;
const MAX_LOG_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Logging configuration shared by Rollcall binaries.
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    pub verbose: bool,
    /// Keep the terminal clear for scan output (warnings only on stderr)
    pub quiet: bool,
    /// Log directory override; defaults to `~/.rollcall/logs`
    pub log_dir: Option<PathBuf>,
}

/// Initialize tracing with a rolling file writer and stderr output.
pub fn init_logging(config: LogConfig<'_>) -> Result<()> {
    let log_dir = config.log_dir.unwrap_or_else(paths::default_logs_dir);
    fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create logs directory: {}", log_dir.display()))?;
    let log_path = log_dir.join(format!("{}.log", config.app_name));
    let file_writer = SharedLogFile::open(log_path.clone(), LOG_GENERATIONS, MAX_LOG_FILE_SIZE)
        .with_context(|| format!("Failed to open log file {}", log_path.display()))?;

    let file_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let console_filter = if config.quiet && !config.verbose {
        EnvFilter::new("warn")
    } else {
        file_filter.clone()
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_filter(file_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_filter(console_filter),
        )
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(())
}

/// `<app>.log` plus `<app>.log.1 ..` older generations, rolled by size.
struct LogFile {
    path: PathBuf,
    generations: usize,
    limit: u64,
    file: File,
    written: u64,
}

impl LogFile {
    fn open(path: PathBuf, generations: usize, limit: u64) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            path,
            generations: generations.max(2),
            limit,
            file,
            written,
        })
    }

    fn generation(&self, n: usize) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(format!(".{n}"));
        PathBuf::from(name)
    }

    /// Shift every generation up by one, dropping the oldest, and start a
    /// fresh current file.
    fn roll(&mut self) -> io::Result<()> {
        self.file.flush()?;
        let oldest = self.generations - 1;
        if self.generation(oldest).exists() {
            fs::remove_file(self.generation(oldest))?;
        }
        for n in (1..oldest).rev() {
            let from = self.generation(n);
            if from.exists() {
                fs::rename(&from, self.generation(n + 1))?;
            }
        }
        fs::rename(&self.path, self.generation(1))?;
        self.file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.written = 0;
        Ok(())
    }
}

impl Write for LogFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.limit {
            self.roll()?;
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// The log file shared by every event the file layer writes.
#[derive(Clone)]
struct SharedLogFile(Arc<Mutex<LogFile>>);

impl SharedLogFile {
    fn open(path: PathBuf, generations: usize, limit: u64) -> io::Result<Self> {
        Ok(Self(Arc::new(Mutex::new(LogFile::open(path, generations, limit)?))))
    }

    fn lock(&self) -> io::Result<MutexGuard<'_, LogFile>> {
        self.0
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log file lock poisoned"))
    }
}

impl<'a> MakeWriter<'a> for SharedLogFile {
    type Writer = SharedLogFile;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

impl Write for SharedLogFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.lock()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.lock()?.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_rolling_keeps_a_bounded_number_of_files() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("scanner.log");
        let mut log = LogFile::open(path.clone(), 3, 16).unwrap();

        for _ in 0..10 {
            log.write_all(b"0123456789").unwrap();
        }
        log.flush().unwrap();

        assert!(path.exists());
        assert!(temp.path().join("scanner.log.1").exists());
        assert!(temp.path().join("scanner.log.2").exists());
        assert!(!temp.path().join("scanner.log.3").exists());
        assert_eq!(fs::read(&path).unwrap().len(), 10);
    }

    #[test]
    fn test_reopen_appends_to_existing_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("scanner.log");
        fs::write(&path, b"earlier run\n").unwrap();

        let mut writer = SharedLogFile::open(path.clone(), 5, 1024).unwrap().make_writer();
        writer.write_all(b"scan A\n").unwrap();
        writer.flush().unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "earlier run\nscan A\n");
    }
}
