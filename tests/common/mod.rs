//! Common test utilities and helpers

#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use beamshard::checkpoint::{parse_log, CheckpointStore, ItemMetadata};
use beamshard::model::{Layout, WorkUnit};
use beamshard::peer::{Peer, RunId};
use beamshard::processor::{ItemJob, ItemProcessor, Processors};
use beamshard::source::SourcePatterns;
use beamshard::worker::UnitWorker;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Test context builder for observation trees
pub struct TestContextBuilder {
    temp_dir: TempDir,
    units: Vec<(String, Vec<String>)>,
}

impl TestContextBuilder {
    pub fn new() -> Result<Self> {
        Ok(Self {
            temp_dir: TempDir::new()?,
            units: Vec::new(),
        })
    }

    /// Add a date directory holding the given file names
    pub fn with_unit(mut self, id: &str, files: &[&str]) -> Self {
        self.units.push((
            id.to_string(),
            files.iter().map(|f| f.to_string()).collect(),
        ));
        self
    }

    /// Add a date directory with `count` prepared files `BM00.fil`, `BM01.fil`, ...
    pub fn with_prepared_unit(self, id: &str, count: usize) -> Self {
        let names = beam_names(count, "fil");
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        self.with_unit(id, &refs)
    }

    pub fn build(self) -> Result<TestContext> {
        let root = self.temp_dir.path();
        let layout = Layout {
            store_path: root.join("obs"),
            rfi_path: root.join("rfi"),
            state_path: root.join("state"),
        };
        fs::create_dir_all(&layout.store_path)?;

        let mut units = Vec::new();
        for (id, files) in self.units {
            let dir = layout.store_path.join(&id);
            fs::create_dir_all(&dir)?;
            for file in files {
                fs::write(dir.join(file), b"beam")?;
            }
            units.push(WorkUnit::new(id, &layout));
        }

        Ok(TestContext {
            temp_dir: self.temp_dir,
            layout,
            units,
        })
    }
}

pub struct TestContext {
    pub temp_dir: TempDir,
    pub layout: Layout,
    pub units: Vec<WorkUnit>,
}

impl TestContext {
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn unit(&self, id: &str) -> WorkUnit {
        WorkUnit::new(id, &self.layout)
    }

    /// Completion records across every checkpoint log of `unit`, as `(rank, item)`
    pub fn records(&self, unit: &WorkUnit) -> Vec<(usize, String)> {
        let mut records = Vec::new();
        for entry in fs::read_dir(&unit.state_dir).into_iter().flatten().flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.contains(".history_") {
                continue;
            }
            let contents = fs::read_to_string(entry.path()).unwrap_or_default();
            for record in parse_log(&contents).records {
                records.push((record.rank, record.item));
            }
        }
        records.sort();
        records
    }

    pub fn record_names(&self, unit: &WorkUnit) -> Vec<String> {
        let mut names: Vec<String> = self.records(unit).into_iter().map(|(_, n)| n).collect();
        names.sort();
        names
    }

    pub fn unit_log(&self, unit: &WorkUnit) -> String {
        fs::read_to_string(unit.log_path()).unwrap_or_default()
    }
}

pub fn beam_names(count: usize, ext: &str) -> Vec<String> {
    (0..count).map(|i| format!("BM{:02}.{}", i, ext)).collect()
}

/// Worker for `peer` using `processor` for every source kind
pub fn worker(peer: Peer, processor: Arc<dyn ItemProcessor>) -> UnitWorker {
    UnitWorker::new(
        peer,
        SourcePatterns::default(),
        CheckpointStore::new(),
        Processors::uniform(processor),
    )
}

/// Worker for one peer of a run shared with other peers
pub fn run_worker(peer: Peer, run: &RunId, processor: Arc<dyn ItemProcessor>) -> UnitWorker {
    UnitWorker::new(
        peer,
        SourcePatterns::default(),
        CheckpointStore::for_run(run.clone()),
        Processors::uniform(processor),
    )
}

pub fn run_id(id: &str) -> RunId {
    RunId::new(id).unwrap()
}

pub fn peer(rank: usize, size: usize) -> Peer {
    Peer::new(rank, size).unwrap()
}

/// Records every item it is handed, optionally failing at one name
#[derive(Default)]
pub struct RecordingProcessor {
    seen: Mutex<Vec<String>>,
    fail_at: Option<String>,
    panic_at: Option<String>,
    delay: Option<Duration>,
}

impl RecordingProcessor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_at(name: &str) -> Arc<Self> {
        Arc::new(Self {
            fail_at: Some(name.to_string()),
            ..Self::default()
        })
    }

    pub fn panicking_at(name: &str) -> Arc<Self> {
        Arc::new(Self {
            panic_at: Some(name.to_string()),
            ..Self::default()
        })
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            ..Self::default()
        })
    }

    pub fn slow_failing_at(name: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            fail_at: Some(name.to_string()),
            delay: Some(delay),
            ..Self::default()
        })
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl ItemProcessor for RecordingProcessor {
    async fn process(&self, job: ItemJob<'_>) -> Result<ItemMetadata> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.seen.lock().unwrap().push(job.item.name.clone());
        if self.panic_at.as_deref() == Some(job.item.name.as_str()) {
            panic!("mitigation tool crashed on {}", job.item.name);
        }
        if self.fail_at.as_deref() == Some(job.item.name.as_str()) {
            bail!("mitigation tool exited with status 2");
        }
        Ok(ItemMetadata::new(&job.item.name).with("kind", job.kind.to_string()))
    }
}

/// Write a pipeline configuration pointing at `ctx`'s tree
pub fn write_config(ctx: &TestContext, dates: &[&str], template: &str) -> PathBuf {
    let path = ctx.path().join("pipeline.yaml");
    let dates: Vec<String> = dates.iter().map(|d| format!("\"{}\"", d)).collect();
    let yaml = format!(
        "store_path: obs\nrfi_path: rfi\nstate_path: state\nanalysis_dates: [{}]\npool_width: 2\nprocessors:\n  raw: \"{}\"\n  prepared: \"{}\"\n",
        dates.join(", "),
        template,
        template
    );
    fs::write(&path, yaml).unwrap();
    path
}
