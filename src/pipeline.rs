//! Pipeline orchestration
//!
//! Chains discover, extract, load, export and sync over one or many
//! billing periods. Per-item failures are aggregated into the summary;
//! only configuration and storage-access errors abort the run.

use crate::config::Config;
use crate::error::Result;
use crate::export::ParquetExporter;
use crate::extract::Extractor;
use crate::load::{LoadEngine, LoadStatus};
use crate::manifest::{ManifestDiscovery, ManifestRecord};
use crate::storage::BillingStore;
use crate::types::{BillingPeriod, DateRange, ExportStatus, SyncStatus};
use crate::warehouse::{DuckWarehouse, SyncStage, TableLayout, Warehouse};
use std::collections::{BTreeMap, HashMap};
use tracing::{info, warn};

/// Aggregate counts reported by a pipeline run
#[derive(Debug, Default, Clone)]
pub struct PipelineSummary {
    pub manifests_discovered: usize,
    pub executions_loaded: usize,
    pub executions_failed: usize,
    pub rows_loaded: usize,
    pub files_exported: usize,
    pub exports_skipped: usize,
    pub exports_failed: usize,
    pub synced: usize,
    pub sync_skipped: usize,
    pub sync_failed: usize,
    pub periods: Vec<String>,
    pub dry_run: bool,
}

impl PipelineSummary {
    /// Whether any stage recorded a per-item failure
    pub fn has_failures(&self) -> bool {
        self.executions_failed > 0 || self.exports_failed > 0 || self.sync_failed > 0
    }
}

/// Sequences the pipeline stages for one configuration
pub struct Pipeline {
    config: Config,
}

impl Pipeline {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Open the warehouse backend if one is configured
    pub fn open_warehouse(&self) -> Result<Option<DuckWarehouse>> {
        match &self.config.warehouse {
            Some(cfg) => Ok(Some(DuckWarehouse::open(
                &cfg.path,
                cfg.table.clone(),
                self.config.load.period_column.clone(),
            )?)),
            None => Ok(None),
        }
    }

    /// What is currently loaded, keyed by billing period. The warehouse
    /// is consulted first when configured; otherwise the local table.
    pub async fn loaded_state(&self, engine: &LoadEngine) -> HashMap<String, String> {
        if let Ok(Some(warehouse)) = self.open_warehouse() {
            match warehouse.loaded_execution_ids().await {
                Ok(map) => return map,
                Err(e) => warn!(error = %e, "warehouse state query failed, using local state"),
            }
        }
        engine
            .loaded_execution_ids(&self.config.table_name())
            .unwrap_or_default()
    }

    /// Discover manifests, excluding already-loaded executions and
    /// anything outside the range.
    pub async fn discover(
        &self,
        store: &BillingStore,
        engine: &LoadEngine,
        range: &DateRange,
    ) -> Result<Vec<ManifestRecord>> {
        let loaded = self.loaded_state(engine).await;
        let discovery = ManifestDiscovery::new(store, &self.config.source);
        let mut manifests = discovery.discover(&loaded).await?;
        manifests.retain(|m| range.contains(&m.billing_period));
        Ok(manifests)
    }

    /// Run the full pipeline: discover, extract, load, export, sync
    pub async fn run(&self, range: &DateRange, dry_run: bool) -> Result<PipelineSummary> {
        let store = BillingStore::parse(&self.config.source.url)?;
        let engine = LoadEngine::open(&self.config.database_path(), &self.config.load)?;
        let table = self.config.table_name();

        info!("Step 1/5: discovering manifests");
        let manifests = self.discover(&store, &engine, range).await?;

        let mut summary = PipelineSummary {
            manifests_discovered: manifests.len(),
            periods: unique_periods(&manifests),
            dry_run,
            ..PipelineSummary::default()
        };

        if manifests.is_empty() {
            info!("no new manifests to process");
            return Ok(summary);
        }
        info!(
            manifests = manifests.len(),
            periods = summary.periods.len(),
            "found work"
        );

        if dry_run {
            for manifest in &manifests {
                info!(
                    period = %manifest.billing_period,
                    execution = %manifest.id,
                    files = manifest.data_files.len(),
                    "would process"
                );
            }
            return Ok(summary);
        }

        info!("Step 2/5: extracting data files");
        let extractor = Extractor::new(&store, self.config.staging_dir());
        let stats = extractor.stage(&manifests).await?;
        info!(files = stats.files_downloaded, errors = stats.errors, "extraction done");

        info!("Step 3/5: loading into local store");
        let report = engine.load_batch(&manifests, &self.config.staging_dir(), &table);
        summary.executions_loaded = report.loaded_executions;
        summary.executions_failed = report.failed_executions;
        summary.rows_loaded = report.total_rows;

        let loaded_manifests: Vec<ManifestRecord> = manifests
            .iter()
            .filter(|m| {
                report
                    .outcomes
                    .iter()
                    .any(|o| o.execution_key == m.execution_key() && o.status == LoadStatus::Loaded)
            })
            .cloned()
            .collect();

        info!("Step 4/5: exporting to parquet");
        self.export_stage(&engine, &loaded_manifests, false, &mut summary)?;

        info!("Step 5/5: syncing to warehouse");
        self.sync_stage(&loaded_manifests, &mut summary).await?;

        Ok(summary)
    }

    /// Month-by-month mode: load one billing period, export it, truncate
    /// the local table, move on. Peak memory stays flat no matter how
    /// much history is processed; the price is re-checking the schema
    /// each month.
    pub async fn run_monthly(&self, range: &DateRange, dry_run: bool) -> Result<PipelineSummary> {
        let store = BillingStore::parse(&self.config.source.url)?;
        let engine = LoadEngine::open(&self.config.database_path(), &self.config.load)?;
        let table = self.config.table_name();

        let manifests = self.discover(&store, &engine, range).await?;

        let mut summary = PipelineSummary {
            manifests_discovered: manifests.len(),
            periods: unique_periods(&manifests),
            dry_run,
            ..PipelineSummary::default()
        };
        if manifests.is_empty() || dry_run {
            return Ok(summary);
        }

        let extractor = Extractor::new(&store, self.config.staging_dir());
        extractor.stage(&manifests).await?;

        let months = group_by_month(&manifests);
        info!(months = months.len(), "processing month by month");

        for (month, month_manifests) in &months {
            info!(month = %month, executions = month_manifests.len(), "processing month");

            let report = engine.load_batch(month_manifests, &self.config.staging_dir(), &table);
            summary.executions_loaded += report.loaded_executions;
            summary.executions_failed += report.failed_executions;
            summary.rows_loaded += report.total_rows;

            if report.failed_executions > 0 {
                warn!(month = %month, "load failures, skipping export for this month");
                continue;
            }

            self.export_stage(&engine, month_manifests, false, &mut summary)?;

            let cleared = engine.truncate(&table)?;
            info!(month = %month, cleared, "truncated local table");
        }

        self.sync_stage(&manifests, &mut summary).await?;

        Ok(summary)
    }

    fn export_stage(
        &self,
        engine: &LoadEngine,
        manifests: &[ManifestRecord],
        overwrite: bool,
        summary: &mut PipelineSummary,
    ) -> Result<()> {
        if manifests.is_empty() {
            return Ok(());
        }
        let exporter = ParquetExporter::new(
            engine,
            self.config.parquet_dir(),
            self.config.table_name(),
            self.config.source.vendor,
            &self.config.export,
        );
        let results = exporter.export_executions(manifests, overwrite)?;
        for status in results.values() {
            match status {
                ExportStatus::Exported => summary.files_exported += 1,
                ExportStatus::Skipped => summary.exports_skipped += 1,
                ExportStatus::Failed => summary.exports_failed += 1,
            }
        }
        Ok(())
    }

    async fn sync_stage(
        &self,
        manifests: &[ManifestRecord],
        summary: &mut PipelineSummary,
    ) -> Result<()> {
        let Some(warehouse) = self.open_warehouse()? else {
            info!("no warehouse configured, skipping sync");
            return Ok(());
        };
        if manifests.is_empty() {
            return Ok(());
        }

        let layout = TableLayout {
            partition_field: self.config.load.period_column.clone(),
            ..TableLayout::default()
        };
        let stage = SyncStage::new(
            &warehouse,
            self.config.parquet_dir(),
            self.config.source.vendor,
            layout,
        );
        let results = stage.sync_executions(manifests, false).await?;
        for status in results.values() {
            match status {
                SyncStatus::Loaded => summary.synced += 1,
                SyncStatus::Skipped => summary.sync_skipped += 1,
                SyncStatus::Failed => summary.sync_failed += 1,
            }
        }
        Ok(())
    }
}

/// Distinct billing periods, ascending
fn unique_periods(manifests: &[ManifestRecord]) -> Vec<String> {
    let mut periods: Vec<String> = manifests
        .iter()
        .map(|m| m.billing_period.to_string())
        .collect();
    periods.sort();
    periods.dedup();
    periods
}

/// Group manifests by billing month, ascending
fn group_by_month(manifests: &[ManifestRecord]) -> BTreeMap<BillingPeriod, Vec<ManifestRecord>> {
    let mut months: BTreeMap<BillingPeriod, Vec<ManifestRecord>> = BTreeMap::new();
    for manifest in manifests {
        months
            .entry(manifest.billing_period.clone())
            .or_default()
            .push(manifest.clone());
    }
    months
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ManifestFormat;

    fn manifest(id: &str, period: &str) -> ManifestRecord {
        ManifestRecord {
            id: id.to_string(),
            format: ManifestFormat::V2,
            billing_period: period.parse().unwrap(),
            period_start: format!("{period}-01"),
            period_end: String::new(),
            source_key: "m".to_string(),
            data_files: vec![],
            columns: vec![],
            compression: "GZIP".to_string(),
        }
    }

    #[test]
    fn test_unique_periods_sorted() {
        let manifests = vec![
            manifest("b", "2024-02"),
            manifest("a", "2024-01"),
            manifest("b2", "2024-02"),
        ];
        assert_eq!(unique_periods(&manifests), vec!["2024-01", "2024-02"]);
    }

    #[test]
    fn test_group_by_month_ascending() {
        let manifests = vec![
            manifest("c", "2024-03"),
            manifest("a", "2024-01"),
            manifest("a2", "2024-01"),
        ];
        let months = group_by_month(&manifests);
        let keys: Vec<String> = months.keys().map(ToString::to_string).collect();
        assert_eq!(keys, vec!["2024-01", "2024-03"]);
        assert_eq!(months.values().next().unwrap().len(), 2);
    }

    #[test]
    fn test_summary_failures() {
        let mut summary = PipelineSummary::default();
        assert!(!summary.has_failures());
        summary.sync_failed = 1;
        assert!(summary.has_failures());
    }
}
