//! Session traffic log
//!
//! Appends everything received from and sent to the port to a text file,
//! one timestamped record per read or written line.

use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime};
use log::{error, info};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Rx,
    Tx,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Rx => write!(f, "RX"),
            Direction::Tx => write!(f, "TX"),
        }
    }
}

/// Format one record. Control characters in `text` are escaped so chunk
/// boundaries stay visible.
pub fn format_record(timestamp: NaiveDateTime, direction: Direction, text: &str) -> String {
    format!(
        "[{}] {} {}\n",
        timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
        direction,
        text.escape_debug()
    )
}

/// Append-only traffic log file
pub struct TrafficLog {
    path: PathBuf,
    file: File,
}

impl TrafficLog {
    /// Open `path` for appending, creating it and its parent directories
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Can't create parent directories of {}", path.display())
                })?;
            }
        }

        if !path.exists() {
            info!("File {} not found, creating it...", path.display());
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open log file: {}", path.display()))?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    /// Second append handle on the same file
    pub fn try_clone(&self) -> Result<Self> {
        let file = self
            .file
            .try_clone()
            .with_context(|| format!("Failed to clone log file: {}", self.path.display()))?;

        Ok(Self {
            path: self.path.clone(),
            file,
        })
    }

    /// Append a record; write failures are logged and otherwise ignored
    pub fn record(&mut self, direction: Direction, text: &str) {
        let line = format_record(Local::now().naive_local(), direction, text);
        if let Err(e) = self.file.write_all(line.as_bytes()) {
            error!("Can't write to file {}. {}", self.path.display(), e);
        }
    }
}
