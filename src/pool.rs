//! Local pool manager: fans every unit across a bounded set of tasks
//!
//! Every peer sees every unit; splitting by peer happens inside each unit at
//! the item level. Within one peer, at most `width` units run at once.
//!
//! Failure policy: once a unit failure has been observed, no further units
//! are started. Units already running are allowed to finish, so their
//! completion records land on disk, and then the first failure observed is
//! returned as a pool failure.

use crate::error::{PipelineError, PipelineResult, PoolFailureError};
use crate::model::WorkUnit;
use crate::worker::{UnitReport, UnitStatus, UnitWorker};
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use tokio::task::JoinError;
use tracing::{error, info, info_span, warn, Instrument};

/// Reports of every unit that ran on this peer
#[derive(Debug, Clone, Default)]
pub struct PoolReport {
    pub reports: Vec<UnitReport>,
}

impl PoolReport {
    pub fn processed(&self) -> usize {
        self.reports.iter().map(|r| r.processed).sum()
    }

    pub fn skipped_units(&self) -> impl Iterator<Item = &UnitReport> {
        self.reports
            .iter()
            .filter(|r| r.status == UnitStatus::NoInput)
    }
}

/// Default pool width: the host's available parallelism
pub fn default_width() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

pub struct PoolManager {
    worker: Arc<UnitWorker>,
    width: usize,
}

/// Accumulates unit outcomes as they complete
struct Outcome {
    rank: usize,
    reports: Vec<UnitReport>,
    failure: Option<(String, PipelineError)>,
}

impl Outcome {
    fn new(rank: usize) -> Self {
        Self {
            rank,
            reports: Vec::new(),
            failure: None,
        }
    }

    fn settle(&mut self, unit: String, joined: Result<PipelineResult<UnitReport>, JoinError>) {
        let err = match joined {
            Ok(Ok(report)) => {
                self.reports.push(report);
                return;
            }
            Ok(Err(e)) => e,
            Err(join_err) => PipelineError::WorkerPanicked {
                unit: unit.clone(),
                details: join_err.to_string(),
            },
        };

        if self.failure.is_none() {
            error!(
                rank = self.rank,
                unit = %unit,
                "Unit failed, no further units will be started: {}",
                err
            );
            self.failure = Some((unit, err));
        } else {
            warn!(rank = self.rank, unit = %unit, "Additional unit failure: {}", err);
        }
    }
}

impl PoolManager {
    pub fn new(worker: UnitWorker, width: usize) -> Self {
        Self {
            worker: Arc::new(worker),
            width: width.max(1),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Run every unit and block until all started units have finished
    pub async fn run(&self, units: Vec<WorkUnit>) -> PipelineResult<PoolReport> {
        let peer = self.worker.peer();
        info!(
            rank = peer.rank(),
            peers = peer.size(),
            units = units.len(),
            width = self.width,
            "Starting local pool"
        );

        let mut running = FuturesUnordered::new();
        let mut outcome = Outcome::new(peer.rank());
        let mut not_started = Vec::new();

        for unit in units {
            while outcome.failure.is_none() && running.len() >= self.width {
                if let Some((id, joined)) = running.next().await {
                    outcome.settle(id, joined);
                }
            }
            if outcome.failure.is_some() {
                not_started.push(unit.id);
                continue;
            }

            let worker = Arc::clone(&self.worker);
            let id = unit.id.clone();
            let span = info_span!("unit", rank = peer.rank(), unit = %id);
            let handle = tokio::spawn(async move { worker.run(unit).await }.instrument(span));
            running.push(async move { (id, handle.await) });
        }

        while let Some((id, joined)) = running.next().await {
            outcome.settle(id, joined);
        }

        let finished = outcome.reports.len();
        if let Some((unit, error)) = outcome.failure {
            return Err(PipelineError::PoolFailure(Box::new(PoolFailureError {
                rank: peer.rank(),
                unit,
                error,
                finished,
                not_started,
            })));
        }

        let report = PoolReport {
            reports: outcome.reports,
        };
        info!(
            rank = peer.rank(),
            units = finished,
            processed = report.processed(),
            "Local pool finished"
        );
        Ok(report)
    }
}
