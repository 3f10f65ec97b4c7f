/// The run log: one human-readable line per significant event
///
/// `RunLog` is handed explicitly to every component that reports progress.
/// When the log file could not be opened the handle is disabled and every
/// write is a no-op, so the retry loop keeps running without diagnostics.

use std::fmt::Display;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

#[derive(Debug)]
pub struct RunLog {
    sink: Option<File>,
}

impl RunLog {
    /// Open (and truncate) the log file for this run
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        Ok(Self { sink: Some(file) })
    }

    /// Open the log file, degrading to a disabled log on failure
    pub fn open_or_disabled(path: &Path) -> Self {
        match Self::open(path) {
            Ok(run_log) => run_log,
            Err(e) => {
                log::warn!("Run log {:?} unavailable, continuing without it: {}", path, e);
                Self::disabled()
            }
        }
    }

    /// A log that discards everything
    pub fn disabled() -> Self {
        Self { sink: None }
    }

    /// Second handle on the same file, for the ambient logger
    pub fn try_clone_file(&self) -> Option<File> {
        self.sink.as_ref().and_then(|file| file.try_clone().ok())
    }

    /// Append one line and flush it so external readers see it immediately
    pub fn line(&mut self, message: impl Display) {
        let Some(file) = self.sink.as_mut() else {
            return;
        };
        let written = writeln!(file, "{}", message).and_then(|_| file.flush());
        if let Err(e) = written {
            // A log that cannot be written is treated like one that never opened.
            log::debug!("Run log write failed, disabling: {}", e);
            self.sink = None;
        }
    }

    /// Sync and close the log
    pub fn close(mut self) {
        if let Some(file) = self.sink.take() {
            if let Err(e) = file.sync_all() {
                log::debug!("Run log sync failed: {}", e);
            }
        }
    }
}
