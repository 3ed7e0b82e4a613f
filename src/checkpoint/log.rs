//! Line format of checkpoint logs
//!
//! Pure parsing, no IO. A log is a sequence of JSON lines; anything that does
//! not parse is counted and skipped, so a torn final record reads as "not
//! completed" instead of failing the whole reconciliation.

use super::CompletionRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Written whenever a peer opens its log for a new run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionHeader {
    pub rank: usize,
    pub peer_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    pub host: String,
    pub started_at: DateTime<Utc>,
}

/// One line of a checkpoint log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogEntry {
    Session(SessionHeader),
    Completed(CompletionRecord),
}

impl LogEntry {
    /// Serialize to a single newline-terminated line
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// Outcome of reading one log
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogScan {
    pub sessions: Vec<SessionHeader>,
    pub records: Vec<CompletionRecord>,
    /// Lines that failed to parse, with their 1-based line numbers
    pub malformed: Vec<usize>,
}

impl LogScan {
    /// No completion has ever been recorded in this log
    pub fn is_fresh(&self) -> bool {
        self.records.is_empty()
    }

    pub fn completed_names(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(|r| r.item.as_str())
    }
}

/// Parse a whole log's contents
pub fn parse_log(contents: &str) -> LogScan {
    let mut scan = LogScan::default();

    for (index, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<LogEntry>(line) {
            Ok(LogEntry::Session(header)) => scan.sessions.push(header),
            Ok(LogEntry::Completed(record)) => scan.records.push(record),
            Err(_) => scan.malformed.push(index + 1),
        }
    }

    scan
}
