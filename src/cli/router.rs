//! Command routing and execution

use crate::cli::args::Commands;
use crate::cli::commands::{run_plan, run_pool, run_status, RunOptions};
use anyhow::Result;

/// Execute a CLI command based on the parsed arguments
pub async fn execute_command(command: Commands) -> Result<()> {
    match command {
        Commands::Run {
            config,
            rank,
            size,
            all,
            jobs,
            run_id,
        } => {
            run_pool(RunOptions {
                config,
                rank,
                size,
                all,
                jobs,
                run_id,
            })
            .await
        }
        Commands::Status { config, all } => run_status(&config, all).await,
        Commands::Plan { config, size, all } => run_plan(&config, size, all).await,
    }
}
