//! Command-line interface
//!
//! - `args` - clap argument structures
//! - `commands` - run, status and plan implementations
//! - `router` - dispatch from parsed arguments to a command

pub mod args;
pub mod commands;
pub mod router;

pub use args::{Cli, Commands};
pub use router::execute_command;

/// Log filter for a `-v` count
pub fn get_log_level(verbose: u8) -> &'static str {
    match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}
