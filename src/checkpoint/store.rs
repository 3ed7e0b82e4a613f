//! File-backed checkpoint store
//!
//! Logs live in the unit's state directory as `<unit>.history_<rank>.jsonl`.
//! Writers only ever append to their own rank's log; readers may read any.
//!
//! Records are split by the run that wrote them. Only records of earlier
//! runs decide what gets partitioned: siblings of the current run may already
//! be appending while a slower peer reconciles, and counting their records
//! would shrink that peer's list and leave items owned by nobody.

use super::log::{parse_log, LogEntry, LogScan, SessionHeader};
use super::{log_file_name, parse_log_file_name, CompletionRecord};
use crate::error::{PipelineError, PipelineResult};
use crate::model::{Item, WorkUnit};
use crate::peer::{Peer, RunId};
use chrono::Utc;
use std::collections::HashSet;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info, warn};

/// A checkpoint log found on disk
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredLog {
    pub rank: usize,
    pub path: PathBuf,
    pub records: usize,
    pub sessions: usize,
    pub malformed: usize,
}

/// Completed items of a unit, unioned over every historical rank
#[derive(Debug, Clone, Default)]
pub struct Reconciliation {
    /// Items recorded by earlier runs
    pub completed: HashSet<String>,
    /// Items already recorded under the current run id
    pub this_run: HashSet<String>,
    pub logs: Vec<DiscoveredLog>,
    /// True when no log existed and empty ones were created for this run
    pub bootstrapped: bool,
}

impl Reconciliation {
    pub fn is_completed(&self, name: &str) -> bool {
        self.completed.contains(name)
    }

    /// Recorded earlier in the current run, e.g. by a restart reusing the run id
    pub fn is_done_this_run(&self, name: &str) -> bool {
        self.this_run.contains(name)
    }

    /// Drop every item whose name has a completion record, keeping order
    pub fn remaining(&self, items: Vec<Item>) -> Vec<Item> {
        items
            .into_iter()
            .filter(|item| !self.is_completed(&item.name))
            .collect()
    }
}

/// Entry point for reading and writing checkpoint logs
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    host: String,
    run: RunId,
}

impl Default for CheckpointStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CheckpointStore {
    /// Store for a run no other peer takes part in
    pub fn new() -> Self {
        Self::for_run(RunId::unique())
    }

    /// Store for a run shared with the other peers under `run`
    pub fn for_run(run: RunId) -> Self {
        let host = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string());
        Self { host, run }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run
    }

    pub fn log_path(&self, unit: &WorkUnit, rank: usize) -> PathBuf {
        unit.state_dir.join(log_file_name(&unit.id, rank))
    }

    /// Find every checkpoint log of `unit`, for any rank, ordered by rank
    pub async fn discover(&self, unit: &WorkUnit) -> PipelineResult<Vec<(usize, PathBuf)>> {
        let mut found = Vec::new();

        let mut entries = match fs::read_dir(&unit.state_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(found),
            Err(e) => return Err(PipelineError::checkpoint(&unit.id, &unit.state_dir, e)),
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PipelineError::checkpoint(&unit.id, &unit.state_dir, e))?
        {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if let Some(rank) = parse_log_file_name(&unit.id, &name) {
                found.push((rank, entry.path()));
            }
        }

        found.sort_by_key(|(rank, _)| *rank);
        Ok(found)
    }

    /// Union the item names completed by earlier runs from every log of `unit`
    ///
    /// Records stamped with this store's run id are kept apart in
    /// [`Reconciliation::this_run`]. When no log exists at all, empty logs
    /// are created for ranks `0..peer_count` so later runs see a first-run
    /// bootstrap. Logs without records contribute nothing.
    pub async fn load_completed(
        &self,
        unit: &WorkUnit,
        peer_count: usize,
    ) -> PipelineResult<Reconciliation> {
        let mut reconciliation = self.scan(unit).await?;
        if reconciliation.logs.is_empty() {
            self.bootstrap(unit, peer_count).await?;
            reconciliation.bootstrapped = true;
        }
        Ok(reconciliation)
    }

    /// Read every log of `unit` without creating anything
    pub async fn scan(&self, unit: &WorkUnit) -> PipelineResult<Reconciliation> {
        let mut reconciliation = Reconciliation::default();

        for (rank, path) in self.discover(unit).await? {
            let scan = read_log(&unit.id, &path).await?;

            if !scan.malformed.is_empty() {
                warn!(
                    unit = %unit.id,
                    rank,
                    lines = ?scan.malformed,
                    "Ignoring malformed checkpoint lines in {}",
                    path.display()
                );
            }
            if scan.is_fresh() {
                debug!(unit = %unit.id, rank, "Checkpoint log has no records yet");
            }

            for record in &scan.records {
                let set = if record.run_id.as_deref() == Some(self.run.as_str()) {
                    &mut reconciliation.this_run
                } else {
                    &mut reconciliation.completed
                };
                set.insert(record.item.clone());
            }
            reconciliation.logs.push(DiscoveredLog {
                rank,
                path,
                records: scan.records.len(),
                sessions: scan.sessions.len(),
                malformed: scan.malformed.len(),
            });
        }

        Ok(reconciliation)
    }

    async fn bootstrap(&self, unit: &WorkUnit, peer_count: usize) -> PipelineResult<()> {
        fs::create_dir_all(&unit.state_dir)
            .await
            .map_err(|e| PipelineError::checkpoint(&unit.id, &unit.state_dir, e))?;

        for rank in 0..peer_count {
            let path = self.log_path(unit, rank);
            // Never truncate: another peer may already be appending
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await
                .map_err(|e| PipelineError::checkpoint(&unit.id, &path, e))?;
        }

        info!(
            unit = %unit.id,
            peer_count,
            "No checkpoint history found, created empty logs"
        );
        Ok(())
    }

    /// Open this peer's log for appending and record a session header
    pub async fn open_for_append(
        &self,
        unit: &WorkUnit,
        peer: Peer,
    ) -> PipelineResult<CheckpointWriter> {
        let path = self.log_path(unit, peer.rank());
        let fail = |e| PipelineError::checkpoint(&unit.id, &path, e);

        fs::create_dir_all(&unit.state_dir).await.map_err(fail)?;

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .await
            .map_err(fail)?;

        if ends_mid_line(&mut file).await.map_err(fail)? {
            warn!(
                unit = %unit.id,
                rank = peer.rank(),
                "Terminating torn final record in {}",
                path.display()
            );
            file.write_all(b"\n").await.map_err(fail)?;
        }

        let mut writer = CheckpointWriter {
            unit: unit.id.clone(),
            path: path.clone(),
            file,
            appended: 0,
        };
        writer
            .write_entry(&LogEntry::Session(SessionHeader {
                rank: peer.rank(),
                peer_count: peer.size(),
                run_id: Some(self.run.to_string()),
                host: self.host.clone(),
                started_at: Utc::now(),
            }))
            .await?;

        Ok(writer)
    }
}

/// Handle on one peer's checkpoint log; every append is synced to disk
#[derive(Debug)]
pub struct CheckpointWriter {
    unit: String,
    path: PathBuf,
    file: File,
    appended: usize,
}

impl CheckpointWriter {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records appended through this handle
    pub fn appended(&self) -> usize {
        self.appended
    }

    /// Append a record and wait until it is durable
    pub async fn append(&mut self, record: &CompletionRecord) -> PipelineResult<()> {
        self.write_entry(&LogEntry::Completed(record.clone())).await?;
        self.appended += 1;
        Ok(())
    }

    async fn write_entry(&mut self, entry: &LogEntry) -> PipelineResult<()> {
        let line = entry.to_line().map_err(|e| {
            PipelineError::checkpoint(
                &self.unit,
                &self.path,
                std::io::Error::new(std::io::ErrorKind::InvalidData, e),
            )
        })?;

        let fail = |e| PipelineError::checkpoint(&self.unit, &self.path, e);
        self.file.write_all(line.as_bytes()).await.map_err(fail)?;
        self.file.flush().await.map_err(fail)?;
        self.file.sync_data().await.map_err(fail)?;
        Ok(())
    }
}

async fn read_log(unit: &str, path: &Path) -> PipelineResult<LogScan> {
    let bytes = fs::read(path)
        .await
        .map_err(|e| PipelineError::checkpoint(unit, path, e))?;
    // Invalid UTF-8 only ever comes from a torn write; it fails to parse below
    Ok(parse_log(&String::from_utf8_lossy(&bytes)))
}

async fn ends_mid_line(file: &mut File) -> std::io::Result<bool> {
    let len = file.metadata().await?.len();
    if len == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::Start(len - 1)).await?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last).await?;
    Ok(last[0] != b'\n')
}
