//! Durable, append-only completion records
//!
//! Each peer owns one JSON Lines log per unit, named from the unit and the
//! peer's rank. A record, once appended, marks its item as done for every
//! later run of that unit, whatever peer count produced it. Readers union the
//! logs of every historical rank they can find in the unit's state directory.

pub mod log;
pub mod store;

pub use log::{parse_log, LogEntry, LogScan, SessionHeader};
pub use store::{CheckpointStore, CheckpointWriter, DiscoveredLog, Reconciliation};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Metadata returned by the per-item processing step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemMetadata {
    /// Stable item name; the only field the engine interprets
    pub name: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl ItemMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            extra: serde_json::Map::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }
}

/// Persisted fact that an item of a unit was processed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub item: String,
    pub unit: String,
    pub rank: usize,
    /// Run that produced the record; absent in logs from older releases
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    pub completed_at: DateTime<Utc>,
    pub metadata: ItemMetadata,
}

/// Checkpoint log file name for a unit and rank
pub fn log_file_name(unit: &str, rank: usize) -> String {
    format!("{}.history_{}.jsonl", unit, rank)
}

/// Recover the rank from a checkpoint log file name belonging to `unit`
pub fn parse_log_file_name(unit: &str, file_name: &str) -> Option<usize> {
    let rank = file_name
        .strip_prefix(unit)?
        .strip_prefix(".history_")?
        .strip_suffix(".jsonl")?;
    if rank.is_empty() || !rank.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    rank.parse().ok()
}
