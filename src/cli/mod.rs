//! Command-line interface
//!
//! # Commands
//!
//! - `discover` - List new billing manifests in object storage
//! - `extract` - Download manifest data files to the staging directory
//! - `load` - Load staged files into the local store
//! - `export` - Export loaded billing periods to Parquet
//! - `sync` - Load exported Parquet files into the warehouse
//! - `run` - Run the whole pipeline end to end

mod commands;
mod runner;

pub use commands::{Cli, Commands};
pub use runner::Runner;
