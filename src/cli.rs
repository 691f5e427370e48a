//! Command line interface built on clap.
//!
//! Global flags (`--config`, `--verbose`) apply to every subcommand.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Job assignment and lifecycle coordinator.
#[derive(Debug, Parser)]
#[command(name = "jobdispatch", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file (defaults to ./dispatch.toml when present).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log at debug level unless DISPATCH_LOG or RUST_LOG say otherwise.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Walk one job through its whole lifecycle against in-memory stores.
    Demo,

    /// Let several workers accept the same job at once and report the winner.
    Race {
        /// Number of competing workers.
        #[arg(long, short, default_value_t = 8, value_parser = clap::value_parser!(u64).range(1..=1000))]
        workers: u64,
    },

    /// Print the effective configuration as JSON.
    Config,
}
