//! Remote warehouse loading
//!
//! The warehouse itself sits behind the [`Warehouse`] trait: existence
//! check, live loaded-execution query, schema-inferring table creation,
//! delete-by-period and parquet append. The sync stage implements the
//! replace discipline on top of that seam, so swapping the backing
//! warehouse never touches the sync logic.

mod duck;
mod sync;

use crate::error::Result;
use crate::types::BillingPeriod;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;

pub use duck::DuckWarehouse;
pub use sync::SyncStage;

/// Physical layout applied when the destination table is auto-created
#[derive(Debug, Clone)]
pub struct TableLayout {
    /// Monthly partitioning column
    pub partition_field: String,
    /// Clustering column for range scans
    pub cluster_field: String,
}

impl Default for TableLayout {
    fn default() -> Self {
        Self {
            partition_field: "bill_billing_period_start_date".to_string(),
            cluster_field: "line_item_usage_start_date".to_string(),
        }
    }
}

/// Operations the sync stage needs from a warehouse backend
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Whether the destination table already exists
    async fn table_exists(&self) -> Result<bool>;

    /// Execution id currently loaded per billing period, queried live.
    /// The remote is the source of truth for what is already loaded.
    async fn loaded_execution_ids(&self) -> Result<HashMap<String, String>>;

    /// Create the destination table with its schema inferred from a
    /// parquet file, applying the given layout. Must not load any rows.
    async fn create_table_from_parquet(&self, file: &Path, layout: &TableLayout) -> Result<()>;

    /// Delete all rows of a billing period. Returns rows removed.
    async fn delete_period(&self, period: &BillingPeriod) -> Result<usize>;

    /// Append a parquet file's rows, tolerating added columns. Returns
    /// rows loaded.
    async fn load_parquet(&self, file: &Path) -> Result<usize>;
}
