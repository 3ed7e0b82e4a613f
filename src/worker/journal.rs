//! Human-readable per-unit outputs: the unit log and the progress ledger
//!
//! Both files are append-only and meant for operators and downstream tools.
//! Neither is consulted when deciding what to skip; that is the checkpoint
//! store's job.

use crate::error::{PipelineError, PipelineResult};
use chrono::Local;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::info;

/// Timestamp layout of unit log lines
pub const LOG_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

async fn open_append(path: &Path, what: &str) -> PipelineResult<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| PipelineError::io(format!("Failed to open {}", what), path, e))
}

/// `<state>/<unit>/<unit>.log`, one `time || unit || message` line per event
#[derive(Debug)]
pub struct UnitLog {
    unit: String,
    path: PathBuf,
    file: File,
}

impl UnitLog {
    pub async fn open(unit: &str, path: &Path) -> PipelineResult<Self> {
        let file = open_append(path, "unit log").await?;
        Ok(Self {
            unit: unit.to_string(),
            path: path.to_path_buf(),
            file,
        })
    }

    /// Write a line to the unit log and echo it to the process log
    pub async fn info(&mut self, message: impl AsRef<str>) -> PipelineResult<()> {
        let message = message.as_ref();
        info!(unit = %self.unit, "{}", message);
        self.write_line(message).await
    }

    /// Write a line to the unit log only
    pub async fn write_line(&mut self, message: &str) -> PipelineResult<()> {
        let timestamp = Local::now().format(LOG_TIME_FORMAT).to_string();
        let line = format_line(&timestamp, &self.unit, message);
        self.file
            .write_all(line.as_bytes())
            .await
            .map_err(|e| PipelineError::io("Failed to write unit log", &self.path, e))?;
        self.file
            .flush()
            .await
            .map_err(|e| PipelineError::io("Failed to flush unit log", &self.path, e))
    }
}

/// `<state>/<unit>/filelist`, one processed item name per line
#[derive(Debug)]
pub struct ProgressLedger {
    path: PathBuf,
    file: File,
}

impl ProgressLedger {
    pub async fn open(path: &Path) -> PipelineResult<Self> {
        let file = open_append(path, "progress ledger").await?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub async fn append(&mut self, name: &str) -> PipelineResult<()> {
        let fail = |e| PipelineError::io("Failed to append to progress ledger", &self.path, e);
        self.file
            .write_all(format!("{}\n", name).as_bytes())
            .await
            .map_err(fail)?;
        self.file.flush().await.map_err(fail)
    }
}

fn format_line(timestamp: &str, unit: &str, message: &str) -> String {
    format!("{} || {} || {}\n", timestamp, unit, message)
}

/// Render a duration as `H:MM:SS.mmm`
pub fn format_walltime(elapsed: Duration) -> String {
    let total_ms = elapsed.as_millis();
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms / 60_000) % 60;
    let seconds = (total_ms / 1_000) % 60;
    let millis = total_ms % 1_000;
    format!("{}:{:02}:{:02}.{:03}", hours, minutes, seconds, millis)
}
