//! # beamshard
//!
//! Checkpointed, rank-partitioned batch processing of per-date beam data.
//!
//! Several peers, each knowing only its rank and the peer count, split every
//! date's files into contiguous slices. Progress is kept in append-only
//! checkpoint logs, one per rank, so a restarted run (with the same or a
//! different peer count) skips everything any earlier run finished.
//!
//! ## Usage
//!
//! ```bash
//! beamshard run -c pipeline.yaml --rank 0 --size 4 --run-id night-1
//! beamshard status -c pipeline.yaml
//! beamshard plan -c pipeline.yaml --size 8
//! ```
//!
//! ## Modules
//!
//! - `partition` - Pure contiguous split of an ordered list across peers
//! - `checkpoint` - Per-rank completion logs and cross-rank reconciliation
//! - `source` - Input kind detection and item listing
//! - `processor` - The per-item processing seam and the command processor
//! - `worker` - One unit from detection to completion
//! - `pool` - Bounded concurrent execution of units on one peer
//! - `config` - YAML pipeline configuration
//! - `cli` - Command-line interface
pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod error;
pub mod model;
pub mod partition;
pub mod peer;
pub mod pool;
pub mod processor;
pub mod source;
pub mod worker;

pub use checkpoint::{CheckpointStore, CompletionRecord, ItemMetadata};
pub use config::PipelineConfig;
pub use error::{PipelineError, PipelineResult};
pub use model::{Item, Layout, SourceKind, WorkUnit};
pub use peer::{Peer, RunId};
pub use pool::{PoolManager, PoolReport};
pub use processor::{ItemJob, ItemProcessor, Processors};
pub use worker::{UnitReport, UnitStatus, UnitWorker};
