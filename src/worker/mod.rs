//! Unit worker: drives one work unit from setup to completion
//!
//! The lifecycle is a forward-only state machine:
//! `Init -> Detecting -> Reconciling -> Partitioning -> Processing -> Done`,
//! with `NoInput` as the terminal state when the input directory holds
//! nothing usable. Per-run state (log handle, timer, counters) lives in a
//! [`UnitContext`] created for each call, never on the worker itself, so one
//! worker can drive many units concurrently.

pub mod journal;

pub use journal::{format_walltime, ProgressLedger, UnitLog};

use crate::checkpoint::{CheckpointStore, CompletionRecord};
use crate::error::{PipelineError, PipelineResult};
use crate::model::{Item, SourceKind, WorkUnit};
use crate::partition;
use crate::peer::Peer;
use crate::processor::{ItemJob, ItemProcessor, Processors};
use crate::source::SourcePatterns;
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::fs;
use tracing::{debug, error, warn};

/// Lifecycle states of a unit run, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum UnitPhase {
    Init,
    Detecting,
    Reconciling,
    Partitioning,
    Processing,
    Done,
    NoInput,
}

/// How a unit run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitStatus {
    Done,
    NoInput,
}

/// Summary of one unit run on this peer
#[derive(Debug, Clone, PartialEq)]
pub struct UnitReport {
    pub unit: String,
    pub status: UnitStatus,
    pub kind: SourceKind,
    /// Items found in the input directory
    pub listed: usize,
    /// Items skipped because some earlier run recorded them
    pub already_completed: usize,
    /// Items in this peer's slice of the remaining list
    pub owned: usize,
    /// Owned items skipped because a restart of this run recorded them
    pub resumed: usize,
    pub processed: usize,
    /// Time spent processing; `None` when processing never began
    pub elapsed: Option<Duration>,
}

/// Mutable state of a single unit run
struct UnitContext {
    unit: WorkUnit,
    log: UnitLog,
    phase: UnitPhase,
    processing_started: Option<Instant>,
}

impl UnitContext {
    fn enter(&mut self, next: UnitPhase) {
        debug_assert!(next > self.phase, "{:?} -> {:?}", self.phase, next);
        debug!(unit = %self.unit.id, from = ?self.phase, to = ?next, "Unit phase change");
        if next == UnitPhase::Processing {
            self.processing_started = Some(Instant::now());
        }
        self.phase = next;
    }

    fn elapsed(&self) -> Option<Duration> {
        self.processing_started.map(|started| started.elapsed())
    }
}

/// Runs units for one peer
#[derive(Debug, Clone)]
pub struct UnitWorker {
    peer: Peer,
    patterns: SourcePatterns,
    store: CheckpointStore,
    processors: Processors,
}

impl UnitWorker {
    pub fn new(
        peer: Peer,
        patterns: SourcePatterns,
        store: CheckpointStore,
        processors: Processors,
    ) -> Self {
        Self {
            peer,
            patterns,
            store,
            processors,
        }
    }

    pub fn peer(&self) -> Peer {
        self.peer
    }

    /// Process this peer's share of `unit`
    ///
    /// Item failures are not caught: the error is logged with its context and
    /// returned, leaving every record appended so far in place.
    pub async fn run(&self, unit: WorkUnit) -> PipelineResult<UnitReport> {
        // Init
        for dir in [&unit.rfi_dir, &unit.state_dir] {
            fs::create_dir_all(dir)
                .await
                .map_err(|e| PipelineError::io("Failed to create output directory", dir, e))?;
        }
        let log = UnitLog::open(&unit.id, &unit.log_path()).await?;
        let mut ctx = UnitContext {
            unit,
            log,
            phase: UnitPhase::Init,
            processing_started: None,
        };

        ctx.enter(UnitPhase::Detecting);
        let (kind, listing) = self.patterns.survey(&ctx.unit).await?;
        for path in &listing.unusable {
            warn!(
                unit = %ctx.unit.id,
                path = %path.display(),
                "Skipping input file whose name is not valid UTF-8"
            );
            ctx.log
                .write_line(&format!("SKIPPED {}: name is not valid UTF-8", path.display()))
                .await?;
        }
        if kind == SourceKind::None {
            ctx.enter(UnitPhase::NoInput);
            warn!(
                unit = %ctx.unit.id,
                rank = self.peer.rank(),
                "No usable input, skipping unit"
            );
            ctx.log
                .info(format!(
                    "No raw or prepared files in {}, nothing to process for date {}.",
                    ctx.unit.input_dir.display(),
                    ctx.unit.id
                ))
                .await?;
            return Ok(UnitReport {
                unit: ctx.unit.id,
                status: UnitStatus::NoInput,
                kind,
                listed: 0,
                already_completed: 0,
                owned: 0,
                resumed: 0,
                processed: 0,
                elapsed: None,
            });
        }

        let processor = self.processors.for_kind(kind).ok_or_else(|| {
            PipelineError::config(format!("no processor configured for {} sources", kind))
        })?;
        ctx.log
            .info(format!(
                "Start processing {} data for date {} on rank {}.",
                kind, ctx.unit.id, self.peer
            ))
            .await?;

        ctx.enter(UnitPhase::Reconciling);
        let items = listing.items;
        let listed = items.len();
        let reconciliation = self.store.load_completed(&ctx.unit, self.peer.size()).await?;
        let remaining = reconciliation.remaining(items);
        let already_completed = listed - remaining.len();

        ctx.enter(UnitPhase::Partitioning);
        let owned = own_slice(remaining, self.peer);
        let owned_count = owned.len();
        let pending: Vec<Item> = owned
            .into_iter()
            .filter(|item| !reconciliation.is_done_this_run(&item.name))
            .collect();
        let resumed = owned_count - pending.len();
        ctx.log
            .info(format!(
                "{} files listed, {} already processed, {} assigned to rank {}.",
                listed,
                already_completed,
                owned_count,
                self.peer.rank()
            ))
            .await?;
        if resumed > 0 {
            debug!(unit = %ctx.unit.id, run = %self.store.run_id(), resumed, "Resuming run");
            ctx.log
                .info(format!(
                    "{} assigned files already processed in run {}.",
                    resumed,
                    self.store.run_id()
                ))
                .await?;
        }

        ctx.enter(UnitPhase::Processing);
        let processed = self.process_owned(&mut ctx, &pending, kind, processor).await?;

        ctx.enter(UnitPhase::Done);
        let elapsed = ctx.elapsed();
        ctx.log
            .info(format!("Done processing date {}.", ctx.unit.id))
            .await?;
        if let Some(elapsed) = elapsed {
            ctx.log
                .info(format!("Total processing time: {}", format_walltime(elapsed)))
                .await?;
        }

        Ok(UnitReport {
            unit: ctx.unit.id,
            status: UnitStatus::Done,
            kind,
            listed,
            already_completed,
            owned: owned_count,
            resumed,
            processed,
            elapsed,
        })
    }

    async fn process_owned(
        &self,
        ctx: &mut UnitContext,
        owned: &[Item],
        kind: SourceKind,
        processor: Arc<dyn ItemProcessor>,
    ) -> PipelineResult<usize> {
        if owned.is_empty() {
            return Ok(0);
        }

        let mut checkpoint = self.store.open_for_append(&ctx.unit, self.peer).await?;
        let mut ledger = ProgressLedger::open(&ctx.unit.ledger_path()).await?;
        let mut processed = 0;

        for item in owned {
            let started = Instant::now();
            let job = ItemJob {
                item,
                unit: &ctx.unit,
                kind,
            };

            let metadata = match processor.process(job).await {
                Ok(metadata) => metadata,
                Err(source) => {
                    let err = PipelineError::item_failed(
                        self.peer.rank(),
                        &ctx.unit.id,
                        &item.name,
                        started.elapsed(),
                        source,
                    );
                    error!(
                        rank = self.peer.rank(),
                        unit = %ctx.unit.id,
                        item = %item.name,
                        "{}",
                        err
                    );
                    ctx.log
                        .write_line(&format!("FAILED {}: {}", item.name, err))
                        .await?;
                    return Err(err);
                }
            };

            if metadata.name != item.name {
                warn!(
                    unit = %ctx.unit.id,
                    item = %item.name,
                    reported = %metadata.name,
                    "Processor reported a different item name, recording the listed one"
                );
            }

            checkpoint
                .append(&CompletionRecord {
                    item: item.name.clone(),
                    unit: ctx.unit.id.clone(),
                    rank: self.peer.rank(),
                    run_id: Some(self.store.run_id().to_string()),
                    completed_at: Utc::now(),
                    metadata,
                })
                .await?;
            ledger.append(&item.name).await?;
            processed += 1;

            ctx.log
                .info(format!(
                    "Processed {} ({}/{} files on rank {}).",
                    item.name,
                    processed,
                    owned.len(),
                    self.peer.rank()
                ))
                .await?;
        }

        Ok(processed)
    }
}

/// Take this peer's contiguous slice out of the reconciled list
fn own_slice(mut remaining: Vec<Item>, peer: Peer) -> Vec<Item> {
    let range = partition::assign(remaining.len(), peer.rank(), peer.size());
    remaining.truncate(range.end);
    remaining.split_off(range.start)
}
