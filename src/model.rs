//! Core data types: work units, items and source kinds

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Kind of input found in a unit's directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceKind {
    /// Raw voltage files that still need conversion
    Raw,
    /// Prepared filterbank files
    Prepared,
    /// Nothing usable in the directory
    None,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Raw => "RAW",
            Self::Prepared => "PREPARED",
            Self::None => "NONE",
        };
        f.write_str(s)
    }
}

/// Root directories shared by every unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub store_path: PathBuf,
    pub rfi_path: PathBuf,
    pub state_path: PathBuf,
}

/// One top-level job, a date's worth of data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkUnit {
    pub id: String,
    pub input_dir: PathBuf,
    /// Mitigation output directory
    pub rfi_dir: PathBuf,
    /// State and log directory, also home of the checkpoint logs
    pub state_dir: PathBuf,
}

impl WorkUnit {
    pub fn new(id: impl Into<String>, layout: &Layout) -> Self {
        let id = id.into();
        Self {
            input_dir: layout.store_path.join(&id),
            rfi_dir: layout.rfi_path.join(&id),
            state_dir: layout.state_path.join(&id),
            id,
        }
    }

    /// Timestamped, human-readable log for this unit
    pub fn log_path(&self) -> PathBuf {
        self.state_dir.join(format!("{}.log", self.id))
    }

    /// Append-only list of processed item names
    pub fn ledger_path(&self) -> PathBuf {
        self.state_dir.join("filelist")
    }
}

/// One file-level task inside a unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    /// Stable name used for checkpoint dedup
    pub name: String,
    pub path: PathBuf,
    /// Index in the sorted source listing
    pub position: usize,
}

impl Item {
    pub fn from_path(path: &Path, position: usize) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_string();
        Some(Self {
            name,
            path: path.to_path_buf(),
            position,
        })
    }
}
