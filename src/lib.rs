// Allow common clippy pedantic lints that aren't critical for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::unnecessary_wraps)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::unused_async)]

//! # costpipe
//!
//! Incremental pipeline for cloud billing exports. Billing vendors
//! publish monthly export executions into object storage; costpipe
//! discovers them, derives a stable table schema from their drifting
//! column sets, loads them into a local DuckDB store with a
//! replace-not-duplicate partition discipline, exports sorted Parquet
//! files and ships those to an analytical warehouse.
//!
//! ## Pipeline
//!
//! ```text
//! ┌──────────┐   ┌─────────┐   ┌────────┐   ┌─────────┐   ┌───────────┐
//! │ Discover │ → │ Extract │ → │  Load  │ → │ Export  │ → │   Sync    │
//! ├──────────┤   ├─────────┤   ├────────┤   ├─────────┤   ├───────────┤
//! │ manifests│   │ staging │   │ DuckDB │   │ Parquet │   │ warehouse │
//! │ in S3/az │   │   dir   │   │ schema │   │ sorted, │   │ delete +  │
//! │ filtered │   │ per exec│   │ evolve │   │ immut.  │   │ append    │
//! └──────────┘   └─────────┘   └────────┘   └─────────┘   └───────────┘
//! ```
//!
//! Every billing period holds at most one execution's data at a time:
//! loading always deletes the period's rows before inserting, so
//! re-running any stage is idempotent and a republished execution
//! replaces its predecessor instead of appending to it.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(missing_docs)]

// ============================================================================
// Module declarations
// ============================================================================

/// Error types for the pipeline
pub mod error;

/// Common types and the canonical billing-period representation
pub mod types;

/// TOML configuration
pub mod config;

/// Object storage access
pub mod storage;

/// Manifest catalog: records, parsing, discovery
pub mod manifest;

/// Schema normalization and evolution
pub mod schema;

/// Staging download of data files
pub mod extract;

/// Incremental load engine
pub mod load;

/// Parquet export stage
pub mod export;

/// Warehouse trait and sync stage
pub mod warehouse;

/// Pipeline orchestration
pub mod pipeline;

/// Command-line interface
pub mod cli;

// ============================================================================
// Re-exports
// ============================================================================

pub use error::{Error, Result};
pub use types::*;

pub use config::Config;
pub use pipeline::{Pipeline, PipelineSummary};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
