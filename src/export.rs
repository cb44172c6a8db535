//! Parquet export of loaded billing partitions
//!
//! Streams one billing partition out of the local table into an
//! immutable, sorted, compressed Parquet file. The file name is the
//! contract with the sync stage and must stay stable across runs.

use crate::config::ExportConfig;
use crate::error::{Error, Result};
use crate::load::LoadEngine;
use crate::manifest::ManifestRecord;
use crate::types::{
    execution_export_filename, period_export_filename, BillingPeriod, ExportStatus, Vendor,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Exports billing partitions from the local table to Parquet files
pub struct ParquetExporter<'a> {
    engine: &'a LoadEngine,
    parquet_dir: PathBuf,
    table: String,
    vendor: Vendor,
    compression: String,
    sort_columns: Vec<String>,
}

impl<'a> ParquetExporter<'a> {
    pub fn new(
        engine: &'a LoadEngine,
        parquet_dir: impl Into<PathBuf>,
        table: impl Into<String>,
        vendor: Vendor,
        config: &ExportConfig,
    ) -> Self {
        Self {
            engine,
            parquet_dir: parquet_dir.into(),
            table: table.into(),
            vendor,
            compression: config.compression.clone(),
            sort_columns: config.sort_columns.clone(),
        }
    }

    /// Export one file per manifest execution:
    /// `{period}_{execution_id}_{vendor}_billing.parquet`
    pub fn export_executions(
        &self,
        manifests: &[ManifestRecord],
        overwrite: bool,
    ) -> Result<BTreeMap<String, ExportStatus>> {
        std::fs::create_dir_all(&self.parquet_dir)?;

        let mut results = BTreeMap::new();
        for manifest in manifests {
            let filename = execution_export_filename(
                &manifest.billing_period,
                &manifest.id,
                self.vendor,
            );
            let status = self.export_one(
                &manifest.billing_period,
                Some(&manifest.id),
                &filename,
                overwrite,
            );
            results.insert(manifest.execution_key(), status);
        }
        Ok(results)
    }

    /// Export one file per billing period (no execution id in the name)
    pub fn export_periods(
        &self,
        periods: &[BillingPeriod],
        overwrite: bool,
    ) -> Result<BTreeMap<String, ExportStatus>> {
        std::fs::create_dir_all(&self.parquet_dir)?;

        let mut results = BTreeMap::new();
        for period in periods {
            let filename = period_export_filename(period, self.vendor);
            let status = self.export_one(period, None, &filename, overwrite);
            results.insert(period.to_string(), status);
        }
        Ok(results)
    }

    fn export_one(
        &self,
        period: &BillingPeriod,
        execution_id: Option<&str>,
        filename: &str,
        overwrite: bool,
    ) -> ExportStatus {
        let path = self.parquet_dir.join(filename);
        if path.exists() && !overwrite {
            info!(file = %filename, "export exists, skipping");
            return ExportStatus::Skipped;
        }

        match self.copy_partition(period, execution_id, &path) {
            Ok(()) => {
                info!(file = %filename, "exported");
                ExportStatus::Exported
            }
            Err(e) => {
                warn!(file = %filename, error = %e, "export failed");
                ExportStatus::Failed
            }
        }
    }

    fn copy_partition(
        &self,
        period: &BillingPeriod,
        execution_id: Option<&str>,
        path: &Path,
    ) -> Result<()> {
        if !self.has_rows(period, execution_id)? {
            return Err(Error::export(format!(
                "no rows in {} for period {period}",
                self.table
            )));
        }

        let mut predicate = period.predicate_literal(self.engine.period_column());
        if let Some(id) = execution_id {
            predicate = format!("{predicate} AND execution_id = '{}'", id.replace('\'', "''"));
        }

        // COPY cannot take bind parameters; the period values are plain
        // integers and the path is one we built ourselves.
        let sql = format!(
            "COPY (SELECT * FROM {table} WHERE {predicate} ORDER BY {order}) \
             TO '{path}' (FORMAT PARQUET, COMPRESSION '{compression}')",
            table = self.table,
            order = self.order_clause()?,
            path = path.display().to_string().replace('\'', "''"),
            compression = self.compression,
        );
        self.engine.connection().execute_batch(&sql)?;
        Ok(())
    }

    fn has_rows(&self, period: &BillingPeriod, execution_id: Option<&str>) -> Result<bool> {
        if self.engine.existing_columns(&self.table)?.is_empty() {
            return Ok(false);
        }
        let predicate = BillingPeriod::predicate(self.engine.period_column());
        let (year, month) = period.predicate_params();

        let count: i64 = match execution_id {
            Some(id) => self.engine.connection().query_row(
                &format!(
                    "SELECT COUNT(*) FROM {} WHERE {predicate} AND execution_id = ?",
                    self.table
                ),
                duckdb::params![year, month, id],
                |row| row.get(0),
            )?,
            None => self.engine.connection().query_row(
                &format!("SELECT COUNT(*) FROM {} WHERE {predicate}", self.table),
                duckdb::params![year, month],
                |row| row.get(0),
            )?,
        };
        Ok(count > 0)
    }

    /// Configured sort columns that actually exist in the table; falls
    /// back to ORDER BY ALL so output stays deterministic either way.
    fn order_clause(&self) -> Result<String> {
        let existing = self.engine.existing_columns(&self.table)?;
        let present: Vec<&str> = self
            .sort_columns
            .iter()
            .filter(|c| existing.contains(*c))
            .map(String::as_str)
            .collect();
        if present.is_empty() {
            Ok("ALL".to_string())
        } else {
            Ok(present.join(", "))
        }
    }
}
