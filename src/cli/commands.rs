//! CLI commands and argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// costpipe - incremental cloud billing pipeline
#[derive(Parser, Debug)]
#[command(name = "costpipe")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true, default_value = "costpipe.toml")]
    pub config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List new billing manifests in object storage
    Discover {
        /// Earliest billing period to include (YYYY-MM)
        #[arg(long)]
        start: Option<String>,

        /// Latest billing period to include (YYYY-MM)
        #[arg(long)]
        end: Option<String>,
    },

    /// Download manifest data files to the staging directory
    Extract {
        #[arg(long)]
        start: Option<String>,

        #[arg(long)]
        end: Option<String>,
    },

    /// Load staged billing files into the local store
    Load {
        #[arg(long)]
        start: Option<String>,

        #[arg(long)]
        end: Option<String>,
    },

    /// Export loaded billing periods to Parquet files
    Export {
        #[arg(long)]
        start: Option<String>,

        #[arg(long)]
        end: Option<String>,

        /// Overwrite existing Parquet files
        #[arg(long)]
        overwrite: bool,
    },

    /// Load exported Parquet files into the warehouse
    Sync {
        #[arg(long)]
        start: Option<String>,

        #[arg(long)]
        end: Option<String>,
    },

    /// Run the complete pipeline: discover, extract, load, export, sync
    Run {
        #[arg(long)]
        start: Option<String>,

        #[arg(long)]
        end: Option<String>,

        /// Show what would be processed without executing
        #[arg(long)]
        dry_run: bool,

        /// Process one billing month at a time, truncating the local
        /// table between months to bound memory
        #[arg(long)]
        monthly: bool,
    },
}
