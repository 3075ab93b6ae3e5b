//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Parallel test runner with watch mode
#[derive(Parser, Debug)]
#[command(name = "testfarm")]
#[command(version)]
#[command(about = "Run test files in band or across a pool of worker processes")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file (default: search testfarm.yaml and friends)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run test files
    Run(RunArgs),

    /// List discovered test files
    List(ListArgs),

    /// Rebuild packages/*/src into packages/*/build on change
    WatchBuild(WatchBuildArgs),

    /// Serve work items on stdin/stdout (used by the worker pool)
    #[command(hide = true)]
    Worker,
}

/// Arguments for run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Only run test files whose path contains one of these
    pub patterns: Vec<String>,

    /// Rerun on file changes
    #[arg(long)]
    pub watch: bool,

    /// Number of worker processes
    #[arg(short = 'w', long)]
    pub max_workers: Option<usize>,

    /// Run every test file in this process, one after the other
    #[arg(short = 'i', long)]
    pub run_in_band: bool,

    /// Stop after the first failing test file
    #[arg(long)]
    pub bail: bool,

    /// Reporters to use (default, summary, json)
    #[arg(short, long, value_delimiter = ',')]
    pub reporter: Vec<String>,

    /// Output file for the json reporter
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Per test file timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,
}

/// Arguments for list command
#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Only list test files whose path contains one of these
    pub patterns: Vec<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for watch-build command
#[derive(Parser, Debug)]
pub struct WatchBuildArgs {
    /// Directory holding the packages
    #[arg(long)]
    pub packages: Option<PathBuf>,

    /// Build command; changed paths are appended
    #[arg(long, num_args = 1.., allow_hyphen_values = true)]
    pub build_cmd: Vec<String>,

    /// Debounce interval in milliseconds
    #[arg(long)]
    pub interval: Option<u64>,
}

impl RunArgs {
    /// Worker count requested on the command line; in-band means one
    pub fn requested_workers(&self) -> Option<usize> {
        if self.run_in_band {
            Some(1)
        } else {
            self.max_workers
        }
    }
}
