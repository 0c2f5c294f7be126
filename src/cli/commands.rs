//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - replay: stream a scripted fixture through the controller
//! - show-config: print the effective configuration

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// unillm - universal LLM streaming core
#[derive(Parser, Debug)]
#[command(name = "unillm")]
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
    /// Stream a scripted provider fixture through retries, pipeline and tools
    Replay {
        /// Fixture file (YAML)
        fixture: PathBuf,

        /// Override the configured retry budget
        #[arg(long)]
        max_retries: Option<u32>,
    },

    /// Print the effective configuration as YAML
    ShowConfig,
}
