//! CLI argument structures

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Distribute per-date beam processing across cooperating peers
#[derive(Parser)]
#[command(name = "beamshard")]
#[command(about = "beamshard - checkpointed, rank-partitioned batch processing", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Process this peer's share of every configured date
    Run {
        /// Path to the pipeline configuration file
        #[arg(short = 'c', long, default_value = "./configurations/pipeline.yaml")]
        config: PathBuf,

        /// Rank of this peer (defaults to the launcher environment)
        #[arg(long, requires = "size")]
        rank: Option<usize>,

        /// Total number of peers (defaults to the launcher environment)
        #[arg(long, requires = "rank")]
        size: Option<usize>,

        /// Process every date directory under store_path
        #[arg(short = 'a', long)]
        all: bool,

        /// Number of dates processed concurrently on this peer
        #[arg(short = 'j', long)]
        jobs: Option<usize>,

        /// Identifier shared by every peer of this run (defaults to the launcher job id)
        #[arg(long)]
        run_id: Option<String>,
    },

    /// Show checkpoint progress for every configured date
    Status {
        /// Path to the pipeline configuration file
        #[arg(short = 'c', long, default_value = "./configurations/pipeline.yaml")]
        config: PathBuf,

        /// Inspect every date directory under store_path
        #[arg(short = 'a', long)]
        all: bool,
    },

    /// Preview how remaining files would be split across peers
    Plan {
        /// Path to the pipeline configuration file
        #[arg(short = 'c', long, default_value = "./configurations/pipeline.yaml")]
        config: PathBuf,

        /// Peer count to plan for
        #[arg(long)]
        size: usize,

        /// Plan for every date directory under store_path
        #[arg(short = 'a', long)]
        all: bool,
    },
}
