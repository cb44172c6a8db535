//! Sync stage: ship exported parquet files into the warehouse
//!
//! Mirrors the local engine's replace discipline remotely: skip when the
//! exact execution id is already there (queried live, never from local
//! state), otherwise delete the period and append the file.

use super::{TableLayout, Warehouse};
use crate::error::{Error, Result};
use crate::manifest::ManifestRecord;
use crate::types::{
    execution_export_filename, period_export_filename, BillingPeriod, SyncStatus, Vendor,
};
use parquet::file::reader::{FileReader, SerializedFileReader};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Loads exported parquet files into a [`Warehouse`]
pub struct SyncStage<'a> {
    warehouse: &'a dyn Warehouse,
    parquet_dir: PathBuf,
    vendor: Vendor,
    layout: TableLayout,
}

impl<'a> SyncStage<'a> {
    pub fn new(
        warehouse: &'a dyn Warehouse,
        parquet_dir: impl Into<PathBuf>,
        vendor: Vendor,
        layout: TableLayout,
    ) -> Self {
        Self {
            warehouse,
            parquet_dir: parquet_dir.into(),
            vendor,
            layout,
        }
    }

    /// Sync per-execution export files for the given manifests.
    ///
    /// An execution whose id the warehouse already holds for its period
    /// is skipped unless `overwrite` is set.
    pub async fn sync_executions(
        &self,
        manifests: &[ManifestRecord],
        overwrite: bool,
    ) -> Result<BTreeMap<String, SyncStatus>> {
        let loaded = self.warehouse.loaded_execution_ids().await?;

        let mut results = BTreeMap::new();
        for manifest in manifests {
            let key = manifest.execution_key();
            let period_key = manifest.billing_period.to_string();

            if !overwrite && loaded.get(&period_key) == Some(&manifest.id) {
                info!(period = %period_key, execution = %manifest.id, "already in warehouse, skipping");
                results.insert(key, SyncStatus::Skipped);
                continue;
            }

            let filename = execution_export_filename(
                &manifest.billing_period,
                &manifest.id,
                self.vendor,
            );
            let status = self
                .sync_one(&manifest.billing_period, &self.parquet_dir.join(filename))
                .await;
            results.insert(key, status);
        }
        Ok(results)
    }

    /// Sync per-period export files
    pub async fn sync_periods(
        &self,
        periods: &[BillingPeriod],
    ) -> Result<BTreeMap<String, SyncStatus>> {
        let mut results = BTreeMap::new();
        for period in periods {
            let filename = period_export_filename(period, self.vendor);
            let status = self
                .sync_one(period, &self.parquet_dir.join(filename))
                .await;
            results.insert(period.to_string(), status);
        }
        Ok(results)
    }

    async fn sync_one(&self, period: &BillingPeriod, file: &Path) -> SyncStatus {
        match self.delete_and_load(period, file).await {
            Ok(rows) => {
                info!(period = %period, rows, "loaded into warehouse");
                SyncStatus::Loaded
            }
            Err(e) => {
                warn!(period = %period, error = %e, "warehouse load failed");
                SyncStatus::Failed
            }
        }
    }

    async fn delete_and_load(&self, period: &BillingPeriod, file: &Path) -> Result<usize> {
        if !file.exists() {
            return Err(Error::FileNotFound {
                path: file.display().to_string(),
            });
        }

        let file_rows = parquet_row_count(file)?;
        self.ensure_table(file).await?;

        let deleted = self.warehouse.delete_period(period).await?;
        if deleted > 0 {
            info!(period = %period, deleted, "replaced existing warehouse rows");
        }

        let rows = self.warehouse.load_parquet(file).await?;
        if rows != file_rows {
            warn!(
                period = %period,
                loaded = rows,
                expected = file_rows,
                "row count differs from parquet footer"
            );
        }
        Ok(rows)
    }

    /// Create the destination table from the first available export file
    /// if it does not exist yet.
    async fn ensure_table(&self, file: &Path) -> Result<()> {
        if self.warehouse.table_exists().await? {
            return Ok(());
        }
        let seed = self.first_export_file().unwrap_or_else(|| file.to_path_buf());
        info!(seed = %seed.display(), "creating warehouse table from export schema");
        self.warehouse
            .create_table_from_parquet(&seed, &self.layout)
            .await
    }

    /// Oldest export file for this vendor in the export directory
    fn first_export_file(&self) -> Option<PathBuf> {
        let suffix = format!("_{}_billing.parquet", self.vendor.tag());
        let mut files: Vec<PathBuf> = std::fs::read_dir(&self.parquet_dir)
            .ok()?
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with(&suffix))
            })
            .collect();
        files.sort();
        files.into_iter().next()
    }
}

/// Number of rows recorded in a parquet file's footer
pub fn parquet_row_count(path: &Path) -> Result<usize> {
    let file = std::fs::File::open(path)?;
    let reader = SerializedFileReader::new(file)?;
    Ok(reader.metadata().file_metadata().num_rows() as usize)
}
