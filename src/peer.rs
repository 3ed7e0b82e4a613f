//! Peer and run identity supplied by the launcher
//!
//! A peer learns its rank, the total peer count and the run it belongs to
//! once at start-up. After that, peers never talk to each other; all
//! coordination goes through the shared checkpoint logs. The run id is what
//! lets a peer tell records left by earlier runs apart from records its
//! siblings in the current run are appending.

use crate::error::{PipelineError, PipelineResult};
use chrono::Utc;
use std::fmt;

/// Environment variable pairs exported by common launchers, checked in order
const LAUNCHER_ENV: &[(&str, &str)] = &[
    ("OMPI_COMM_WORLD_RANK", "OMPI_COMM_WORLD_SIZE"),
    ("PMI_RANK", "PMI_SIZE"),
    ("PMIX_RANK", "PMIX_SIZE"),
    ("SLURM_PROCID", "SLURM_NTASKS"),
];

/// Job id variables exported by common launchers, with an optional step suffix
const LAUNCHER_JOB_ENV: &[(&str, Option<&str>)] = &[
    ("SLURM_JOB_ID", Some("SLURM_STEP_ID")),
    ("PMIX_NAMESPACE", None),
    ("OMPI_MCA_ess_base_jobid", None),
    ("PBS_JOBID", None),
    ("LSB_JOBID", None),
];

/// One cooperating process: its 0-indexed rank and the group size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Peer {
    rank: usize,
    size: usize,
}

impl Peer {
    /// Create a peer, rejecting a zero size or a rank outside `0..size`
    pub fn new(rank: usize, size: usize) -> PipelineResult<Self> {
        if size == 0 {
            return Err(PipelineError::config("peer count must be at least 1"));
        }
        if rank >= size {
            return Err(PipelineError::config(format!(
                "rank {} is out of range for {} peers",
                rank, size
            )));
        }
        Ok(Self { rank, size })
    }

    /// A lone peer owning every item
    pub fn single() -> Self {
        Self { rank: 0, size: 1 }
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_last(&self) -> bool {
        self.rank == self.size - 1
    }

    /// Resolve identity from explicit flags, then the launcher environment
    pub fn resolve(rank: Option<usize>, size: Option<usize>) -> PipelineResult<Self> {
        Self::resolve_with(rank, size, |key| std::env::var(key).ok())
    }

    /// Same as [`Peer::resolve`] with an injectable environment lookup
    pub fn resolve_with(
        rank: Option<usize>,
        size: Option<usize>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> PipelineResult<Self> {
        match (rank, size) {
            (Some(rank), Some(size)) => Self::new(rank, size),
            (None, None) => match from_launcher_env(&lookup)? {
                Some(peer) => Ok(peer),
                None => Ok(Self::single()),
            },
            _ => Err(PipelineError::config(
                "--rank and --size must be given together",
            )),
        }
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.rank, self.size)
    }
}

/// Identity shared by every peer of one run
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunId(String);

impl RunId {
    pub fn new(id: impl Into<String>) -> PipelineResult<Self> {
        let id = id.into().trim().to_string();
        if id.is_empty() || id.contains(char::is_control) {
            return Err(PipelineError::config(format!("invalid run id {:?}", id)));
        }
        Ok(Self(id))
    }

    /// Fresh id for a run nobody else takes part in
    pub fn unique() -> Self {
        let host = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "localhost".to_string());
        Self(format!(
            "{}-{}-{}",
            host,
            std::process::id(),
            Utc::now().format("%Y%m%dT%H%M%S%.6f")
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Resolve from `--run-id`, then the launcher's job id
    ///
    /// A lone peer without either gets a unique id. Several peers must share
    /// one, otherwise none of them could ignore its siblings' records.
    pub fn resolve(explicit: Option<String>, peer: Peer) -> PipelineResult<Self> {
        Self::resolve_with(explicit, peer, |key| std::env::var(key).ok())
    }

    pub fn resolve_with(
        explicit: Option<String>,
        peer: Peer,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> PipelineResult<Self> {
        if let Some(id) = explicit {
            return Self::new(id);
        }
        for (job_key, step_key) in LAUNCHER_JOB_ENV {
            let Some(job) = lookup(job_key).filter(|v| !v.trim().is_empty()) else {
                continue;
            };
            let id = match step_key.and_then(|key| lookup(key)) {
                Some(step) => format!("{}.{}", job.trim(), step.trim()),
                None => job,
            };
            return Self::new(id);
        }
        if peer.size() == 1 {
            return Ok(Self::unique());
        }
        Err(PipelineError::config(format!(
            "{} peers need a shared run id: pass --run-id or launch under a scheduler that exports a job id",
            peer.size()
        )))
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn from_launcher_env(lookup: &impl Fn(&str) -> Option<String>) -> PipelineResult<Option<Peer>> {
    for (rank_key, size_key) in LAUNCHER_ENV {
        if let (Some(rank), Some(size)) = (lookup(rank_key), lookup(size_key)) {
            let rank = parse_env(rank_key, &rank)?;
            let size = parse_env(size_key, &size)?;
            return Peer::new(rank, size).map(Some);
        }
    }
    Ok(None)
}

fn parse_env(key: &str, value: &str) -> PipelineResult<usize> {
    value.trim().parse().map_err(|_| {
        PipelineError::config(format!("{} is not a valid integer: {:?}", key, value))
    })
}
