//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - run: execute a task plan
//! - check: validate a task plan without running it
//! - config: print the effective configuration

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Paraflow - run dependent shell tasks in parallel with rate limiting
#[derive(Parser, Debug)]
#[command(name = "paraflow")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Execute every task in a plan file
    Run {
        /// Plan file (YAML)
        plan: PathBuf,

        /// Override the number of tasks running at once
        #[arg(short = 'j', long)]
        concurrency: Option<usize>,

        /// Print results as JSON instead of a summary
        #[arg(long)]
        json: bool,
    },

    /// Validate ids, dependencies and cycles in a plan file
    Check {
        /// Plan file (YAML)
        plan: PathBuf,
    },

    /// Print the effective configuration as JSON
    Config,
}
