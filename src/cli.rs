//! CLI argument parsing with clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Multiplexes one camera across viewfinder, snapshot, and analysis consumers
#[derive(Parser, Debug)]
#[command(name = "capture-mux")]
#[command(version, about = "Shared capture session multiplexer", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Config file path
    #[arg(long, short)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a scripted session against the simulated provider and print
    /// diagnostics until Ctrl+C
    Demo {
        /// Interval between simulated frames, in milliseconds
        #[arg(long, default_value = "500")]
        frame_interval_ms: u64,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigAction {
    /// Show current configuration
    Show,
}
