//! Structured error types for the partitioning engine
//!
//! Errors local to one item or one work unit carry the peer rank, the unit
//! identifier and, where relevant, the item name so that operators can find
//! the failing file from a single log line.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result alias used throughout the engine
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Main error type for pipeline operations
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid configuration: {message}")]
    Config {
        message: String,
        path: Option<PathBuf>,
    },

    #[error("{context}: {}", .path.display())]
    Io {
        context: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Checkpoint log {} for unit {unit} is not usable", .path.display())]
    CheckpointIo {
        unit: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    ItemFailed(Box<ItemFailedError>),

    #[error("Worker for unit {unit} panicked: {details}")]
    WorkerPanicked { unit: String, details: String },

    #[error("{0}")]
    PoolFailure(Box<PoolFailureError>),
}

/// Boxed error data for the ItemFailed variant
#[derive(Debug)]
pub struct ItemFailedError {
    pub rank: usize,
    pub unit: String,
    pub item: String,
    pub elapsed: Duration,
    pub source: anyhow::Error,
}

impl fmt::Display for ItemFailedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Rank {} failed processing item {} of unit {} after {:.1}s: {:#}",
            self.rank,
            self.item,
            self.unit,
            self.elapsed.as_secs_f64(),
            self.source
        )
    }
}

/// Boxed error data for the PoolFailure variant
#[derive(Debug)]
pub struct PoolFailureError {
    pub rank: usize,
    pub unit: String,
    pub error: PipelineError,
    pub finished: usize,
    pub not_started: Vec<String>,
}

impl fmt::Display for PoolFailureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Rank {} stopped after unit {} failed ({} finished, {} not started): {}",
            self.rank,
            self.unit,
            self.finished,
            self.not_started.len(),
            self.error
        )
    }
}

impl PipelineError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            path: None,
        }
    }

    /// Create a configuration error tied to a file
    pub fn config_at(message: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self::Config {
            message: message.into(),
            path: Some(path.into()),
        }
    }

    /// Wrap an IO error with what was being attempted
    pub fn io(context: impl Into<String>, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            path: path.into(),
            source,
        }
    }

    /// Wrap an IO error raised while touching a checkpoint log
    pub fn checkpoint(unit: &str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::CheckpointIo {
            unit: unit.to_string(),
            path: path.into(),
            source,
        }
    }

    /// Item processing failure with full context
    pub fn item_failed(
        rank: usize,
        unit: &str,
        item: &str,
        elapsed: Duration,
        source: anyhow::Error,
    ) -> Self {
        Self::ItemFailed(Box::new(ItemFailedError {
            rank,
            unit: unit.to_string(),
            item: item.to_string(),
            elapsed,
            source,
        }))
    }

    /// Name of the failing item, when the error is an item failure
    pub fn failed_item(&self) -> Option<&str> {
        match self {
            Self::ItemFailed(e) => Some(e.item.as_str()),
            Self::PoolFailure(e) => e.error.failed_item(),
            _ => None,
        }
    }

    /// Whether the error stopped the whole peer rather than a single unit
    pub fn is_pool_failure(&self) -> bool {
        matches!(self, Self::PoolFailure(_))
    }
}
