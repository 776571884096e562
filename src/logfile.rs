//! Append-only text logs: session transcripts, error dumps and the
//! supervisor's failure log.
//!
//! A [`LogFile`] is created lazily on its first non-empty append, starting
//! with a banner line, and flushed after every write. A log that cannot be
//! written is reported once and then disabled; logging never fails a test.

use chrono::Local;
use log::warn;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

pub const ERROR_DUMP_BANNER: &str = "******ERROR DUMP MESSAGE******";
pub const FAILURE_BANNER: &str = "********FAILURE LOGGING********";

/// Timestamp prefix of every log file name, e.g. `Mar-07-1412-2025`.
const TIMESTAMP_FORMAT: &str = "%b-%d-%H%M-%Y";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    Transcript,
    ErrorDump,
    Failure,
}

/// Where a log of `kind` for `sequence` goes under `dir`.
pub fn log_path(dir: &Path, sequence: &str, kind: LogKind) -> PathBuf {
    let stamp = Local::now().format(TIMESTAMP_FORMAT);
    match kind {
        LogKind::Transcript => dir.join(format!("{stamp}_{sequence}.log")),
        LogKind::ErrorDump => dir
            .join("errordump")
            .join(format!("{stamp}_{sequence}_errordump.log")),
        LogKind::Failure => dir
            .join("failure")
            .join(format!("{stamp}_{sequence}_failure.log")),
    }
}

#[derive(Debug, Default)]
pub struct LogFile {
    path: Option<PathBuf>,
    banner: String,
    file: Option<File>,
}

impl LogFile {
    /// A log that discards everything.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn new(path: impl Into<PathBuf>, banner: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            banner: banner.into(),
            file: None,
        }
    }

    /// Path of the log, or `None` when disabled.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Whether anything has been written yet.
    pub fn exists(&self) -> bool {
        self.path.as_ref().is_some_and(|p| p.exists())
    }

    pub fn append(&mut self, text: &str) {
        if text.is_empty() || self.path.is_none() {
            return;
        }
        if let Err(e) = self.write(text) {
            if let Some(path) = self.path.take() {
                warn!("cannot write log {}: {e}, logging to it is disabled", path.display());
            }
            self.file = None;
        }
    }

    pub fn flush(&mut self) {
        if let Some(file) = self.file.as_mut() {
            if let Err(e) = file.flush() {
                warn!("cannot flush log: {e}");
            }
        }
    }

    /// Flush and release the file handle. A later append reopens it.
    pub fn close(&mut self) {
        self.flush();
        self.file = None;
    }

    fn write(&mut self, text: &str) -> io::Result<()> {
        if self.file.is_none() {
            self.file = Some(self.open()?);
        }
        let Some(file) = self.file.as_mut() else {
            return Ok(());
        };
        file.write_all(text.as_bytes())?;
        file.flush()
    }

    fn open(&self) -> io::Result<File> {
        let Some(path) = self.path.as_deref() else {
            return Err(io::Error::new(io::ErrorKind::NotFound, "log is disabled"));
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        if file.metadata()?.len() == 0 && !self.banner.is_empty() {
            writeln!(file, "{}", self.banner)?;
        }
        Ok(file)
    }
}
