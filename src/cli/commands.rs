//! Command implementations for `run`, `status` and `plan`

use crate::checkpoint::{CheckpointStore, DiscoveredLog};
use crate::config::PipelineConfig;
use crate::model::{Item, SourceKind, WorkUnit};
use crate::partition;
use crate::peer::{Peer, RunId};
use crate::pool::{PoolManager, PoolReport};
use crate::source::SourcePatterns;
use crate::worker::{format_walltime, UnitStatus, UnitWorker};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};

/// Options for the `run` command
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub config: PathBuf,
    pub rank: Option<usize>,
    pub size: Option<usize>,
    pub all: bool,
    pub jobs: Option<usize>,
    pub run_id: Option<String>,
}

/// Load the configuration, applying `-a` before validation
fn load_config(path: &Path, all: bool) -> Result<PipelineConfig> {
    let mut config = PipelineConfig::read(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    if all {
        config.all_dates = true;
    }
    config.validate()?;
    debug!(
        config = %path.display(),
        dates = ?config.analysis_dates,
        all = config.all_dates,
        "Loaded configuration"
    );
    Ok(config)
}

/// Run this peer's share of every configured unit
pub async fn run_pool(opts: RunOptions) -> Result<()> {
    let started = Instant::now();
    let config = load_config(&opts.config, opts.all)?;
    let peer = Peer::resolve(opts.rank, opts.size)?;
    let run = RunId::resolve(opts.run_id, peer)?;
    info!(rank = peer.rank(), peers = peer.size(), run = %run, "Joining run");
    let width = opts.jobs.unwrap_or_else(|| config.pool_width());
    let units = config.units()?;

    let worker = UnitWorker::new(
        peer,
        config.patterns(),
        CheckpointStore::for_run(run),
        config.processors()?,
    );
    let report = PoolManager::new(worker, width).run(units).await?;

    for line in summary_lines(&report) {
        println!("{}", line);
    }
    info!(
        rank = peer.rank(),
        "Rank {} finished in {}",
        peer,
        format_walltime(started.elapsed())
    );
    Ok(())
}

fn summary_lines(report: &PoolReport) -> Vec<String> {
    let mut lines: Vec<String> = report
        .reports
        .iter()
        .map(|r| match r.status {
            UnitStatus::Done => format!(
                "{}: {} {} listed, {} already done, {} processed{}",
                r.unit,
                r.kind,
                r.listed,
                r.already_completed,
                r.processed,
                r.elapsed
                    .map(|e| format!(" in {}", format_walltime(e)))
                    .unwrap_or_default()
            ),
            UnitStatus::NoInput => format!("{}: no input, skipped", r.unit),
        })
        .collect();
    lines.sort();
    lines.push(format!(
        "✓ {} units, {} files processed",
        report.reports.len(),
        report.processed()
    ));
    lines
}

/// Checkpoint progress of one unit, read without creating any file
#[derive(Debug, Clone)]
pub struct UnitProgress {
    pub unit: String,
    pub kind: SourceKind,
    pub listed: usize,
    pub remaining: Vec<Item>,
    pub logs: Vec<DiscoveredLog>,
}

impl UnitProgress {
    pub fn completed(&self) -> usize {
        self.listed - self.remaining.len()
    }
}

/// Detect, list and reconcile `unit` without touching its state directory
pub async fn inspect_unit(
    unit: &WorkUnit,
    patterns: &SourcePatterns,
    store: &CheckpointStore,
) -> Result<UnitProgress> {
    let (kind, listing) = patterns.survey(unit).await?;
    let items = listing.items;
    let listed = items.len();
    let reconciliation = store.scan(unit).await?;
    Ok(UnitProgress {
        unit: unit.id.clone(),
        kind,
        listed,
        remaining: reconciliation.remaining(items),
        logs: reconciliation.logs,
    })
}

async fn inspect_all(config: &PipelineConfig) -> Result<Vec<UnitProgress>> {
    let patterns = config.patterns();
    let store = CheckpointStore::new();
    let mut progress = Vec::new();
    for unit in config.units()? {
        progress.push(inspect_unit(&unit, &patterns, &store).await?);
    }
    Ok(progress)
}

/// Print checkpoint progress for every configured unit
pub async fn run_status(config: &Path, all: bool) -> Result<()> {
    let config = load_config(config, all)?;
    let progress = inspect_all(&config).await?;
    if progress.is_empty() {
        println!("No dates configured.");
        return Ok(());
    }
    for unit in &progress {
        for line in status_lines(unit) {
            println!("{}", line);
        }
    }
    Ok(())
}

fn status_lines(progress: &UnitProgress) -> Vec<String> {
    let mut lines = vec![format!(
        "📋 {} [{}]: {} listed, {} completed, {} remaining",
        progress.unit,
        progress.kind,
        progress.listed,
        progress.completed(),
        progress.remaining.len()
    )];
    if progress.logs.is_empty() {
        lines.push("   no checkpoint logs".to_string());
    }
    for log in &progress.logs {
        let mut line = format!(
            "   rank {}: {} records, {} sessions",
            log.rank, log.records, log.sessions
        );
        if log.malformed > 0 {
            line.push_str(&format!(", {} malformed lines", log.malformed));
        }
        lines.push(line);
    }
    lines
}

/// Print how remaining items of every unit would split across `size` peers
pub async fn run_plan(config: &Path, size: usize, all: bool) -> Result<()> {
    if size == 0 {
        anyhow::bail!("--size must be at least 1");
    }
    let config = load_config(config, all)?;
    for unit in inspect_all(&config).await? {
        for line in plan_lines(&unit, size) {
            println!("{}", line);
        }
    }
    Ok(())
}

fn plan_lines(progress: &UnitProgress, size: usize) -> Vec<String> {
    let mut lines = vec![format!(
        "{}: {} remaining across {} peers",
        progress.unit,
        progress.remaining.len(),
        size
    )];
    for (rank, range) in partition::plan(progress.remaining.len(), size)
        .into_iter()
        .enumerate()
    {
        let slice = &progress.remaining[range.clone()];
        let span = match (slice.first(), slice.last()) {
            (Some(first), Some(last)) => format!(" ({} .. {})", first.name, last.name),
            _ => String::new(),
        };
        lines.push(format!(
            "   rank {}: {} files [{}..{}){}",
            rank,
            slice.len(),
            range.start,
            range.end,
            span
        ));
    }
    lines
}
