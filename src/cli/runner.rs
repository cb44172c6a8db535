//! CLI runner - executes commands

use crate::cli::commands::{Cli, Commands};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::export::ParquetExporter;
use crate::extract::Extractor;
use crate::load::LoadEngine;
use crate::pipeline::Pipeline;
use crate::storage::BillingStore;
use crate::types::{BillingPeriod, DateRange, ExportStatus, SyncStatus};
use crate::warehouse::{SyncStage, TableLayout};
use std::path::Path;

/// CLI runner
pub struct Runner {
    cli: Cli,
}

impl Runner {
    /// Create a new runner
    pub fn new(cli: Cli) -> Self {
        Self { cli }
    }

    /// Run the CLI command
    pub async fn run(&self) -> Result<()> {
        match &self.cli.command {
            Commands::Discover { start, end } => self.discover(start, end).await,
            Commands::Extract { start, end } => self.extract(start, end).await,
            Commands::Load { start, end } => self.load(start, end).await,
            Commands::Export {
                start,
                end,
                overwrite,
            } => self.export(start, end, *overwrite).await,
            Commands::Sync { start, end } => self.sync(start, end).await,
            Commands::Run {
                start,
                end,
                dry_run,
                monthly,
            } => self.run_pipeline(start, end, *dry_run, *monthly).await,
        }
    }

    fn pipeline(&self) -> Result<Pipeline> {
        let config = Config::from_file(&self.cli.config)?;
        Pipeline::new(config)
    }

    async fn discover(&self, start: &Option<String>, end: &Option<String>) -> Result<()> {
        let range = parse_range(start, end)?;
        let pipeline = self.pipeline()?;
        let store = BillingStore::parse(&pipeline.config().source.url)?;
        let engine = LoadEngine::open(&pipeline.config().database_path(), &pipeline.config().load)?;

        let manifests = pipeline.discover(&store, &engine, &range).await?;

        if manifests.is_empty() {
            println!("No new manifests found");
            return Ok(());
        }
        println!("Found {} manifest(s):", manifests.len());
        for manifest in &manifests {
            println!(
                "  {} ({:?}) - {} files - {}",
                manifest.billing_period,
                manifest.format,
                manifest.data_files.len(),
                manifest.id
            );
        }
        println!("\nNext step: costpipe extract");
        Ok(())
    }

    async fn extract(&self, start: &Option<String>, end: &Option<String>) -> Result<()> {
        let range = parse_range(start, end)?;
        let pipeline = self.pipeline()?;
        let store = BillingStore::parse(&pipeline.config().source.url)?;
        let engine = LoadEngine::open(&pipeline.config().database_path(), &pipeline.config().load)?;

        let manifests = pipeline.discover(&store, &engine, &range).await?;
        if manifests.is_empty() {
            println!("No manifests to extract");
            return Ok(());
        }

        let extractor = Extractor::new(&store, pipeline.config().staging_dir());
        let stats = extractor.stage(&manifests).await?;

        println!("Extraction complete:");
        println!("  Manifests processed: {}", stats.manifests_processed);
        println!("  Files downloaded: {}", stats.files_downloaded);
        if stats.errors > 0 {
            println!("  Errors: {}", stats.errors);
        }
        println!("\nNext step: costpipe load");
        Ok(())
    }

    async fn load(&self, start: &Option<String>, end: &Option<String>) -> Result<()> {
        let range = parse_range(start, end)?;
        let pipeline = self.pipeline()?;
        let store = BillingStore::parse(&pipeline.config().source.url)?;
        let engine = LoadEngine::open(&pipeline.config().database_path(), &pipeline.config().load)?;
        let table = pipeline.config().table_name();

        let manifests = pipeline.discover(&store, &engine, &range).await?;
        if manifests.is_empty() {
            println!("No manifests to load");
            return Ok(());
        }

        let report = engine.load_batch(&manifests, &pipeline.config().staging_dir(), &table);

        println!("Loading complete:");
        println!("  Loaded: {} execution(s)", report.loaded_executions);
        println!("  Failed: {}", report.failed_executions);
        println!("  Total rows: {}", report.total_rows);
        for outcome in &report.outcomes {
            if let Some(error) = &outcome.error {
                println!("  - {} failed: {error}", outcome.execution_key);
            }
        }

        if let Some(info) = engine.table_info(&table)? {
            println!("\nTable {}: {} columns, {} rows", info.table, info.column_count, info.row_count);
            if let (Some(min), Some(max)) = (&info.min_period_date, &info.max_period_date) {
                println!("  Period range: {min} to {max}");
            }
        }
        Ok(())
    }

    async fn export(
        &self,
        start: &Option<String>,
        end: &Option<String>,
        overwrite: bool,
    ) -> Result<()> {
        let range = parse_range(start, end)?;
        let pipeline = self.pipeline()?;
        let config = pipeline.config();
        let engine = LoadEngine::open(&config.database_path(), &config.load)?;
        let table = config.table_name();

        let periods: Vec<BillingPeriod> = engine
            .available_periods(&table)?
            .into_iter()
            .filter(|p| range.contains(p))
            .collect();
        if periods.is_empty() {
            println!("No loaded billing periods to export (run 'costpipe load' first)");
            return Ok(());
        }

        let exporter = ParquetExporter::new(
            &engine,
            config.parquet_dir(),
            table,
            config.source.vendor,
            &config.export,
        );
        let results = exporter.export_periods(&periods, overwrite)?;

        let exported = count(&results, ExportStatus::Exported);
        let skipped = count(&results, ExportStatus::Skipped);
        let failed = count(&results, ExportStatus::Failed);
        println!("Export summary: {exported} exported, {skipped} skipped, {failed} failed");
        for (period, status) in &results {
            if *status == ExportStatus::Failed {
                println!("  - {period} failed");
            }
        }
        Ok(())
    }

    async fn sync(&self, start: &Option<String>, end: &Option<String>) -> Result<()> {
        let range = parse_range(start, end)?;
        let pipeline = self.pipeline()?;
        let config = pipeline.config();

        let Some(warehouse) = pipeline.open_warehouse()? else {
            return Err(Error::config("no [warehouse] section configured"));
        };

        let periods: Vec<BillingPeriod> =
            exported_periods(&config.parquet_dir(), config.source.vendor.tag())?
                .into_iter()
                .filter(|p| range.contains(p))
                .collect();
        if periods.is_empty() {
            println!("No exported Parquet files to sync (run 'costpipe export' first)");
            return Ok(());
        }

        let layout = TableLayout {
            partition_field: config.load.period_column.clone(),
            ..TableLayout::default()
        };
        let stage = SyncStage::new(&warehouse, config.parquet_dir(), config.source.vendor, layout);
        let results = stage.sync_periods(&periods).await?;

        let loaded = results.values().filter(|s| **s == SyncStatus::Loaded).count();
        let skipped = results.values().filter(|s| **s == SyncStatus::Skipped).count();
        let failed = results.values().filter(|s| **s == SyncStatus::Failed).count();
        println!("Sync summary: {loaded} loaded, {skipped} skipped, {failed} failed");

        if failed > 0 {
            return Err(Error::sync(format!("{failed} billing period(s) failed to sync")));
        }
        Ok(())
    }

    async fn run_pipeline(
        &self,
        start: &Option<String>,
        end: &Option<String>,
        dry_run: bool,
        monthly: bool,
    ) -> Result<()> {
        let range = parse_range(start, end)?;
        let pipeline = self.pipeline()?;

        let summary = if monthly {
            pipeline.run_monthly(&range, dry_run).await?
        } else {
            pipeline.run(&range, dry_run).await?
        };

        if summary.dry_run {
            println!("Dry run: {} manifest(s) would be processed", summary.manifests_discovered);
            println!("  Periods: {}", summary.periods.join(", "));
            return Ok(());
        }

        println!("Pipeline complete:");
        println!("  Manifests discovered: {}", summary.manifests_discovered);
        println!(
            "  Loaded: {} execution(s), {} rows",
            summary.executions_loaded, summary.rows_loaded
        );
        println!(
            "  Exported: {} file(s), {} skipped",
            summary.files_exported, summary.exports_skipped
        );
        println!(
            "  Synced: {} file(s), {} skipped",
            summary.synced, summary.sync_skipped
        );
        if summary.executions_failed > 0 || summary.exports_failed > 0 {
            println!(
                "  Failures: {} load, {} export",
                summary.executions_failed, summary.exports_failed
            );
        }

        if summary.sync_failed > 0 {
            return Err(Error::sync(format!(
                "{} billing period(s) failed to sync",
                summary.sync_failed
            )));
        }
        Ok(())
    }
}

fn parse_range(start: &Option<String>, end: &Option<String>) -> Result<DateRange> {
    let start: Option<BillingPeriod> = start.as_deref().map(str::parse).transpose()?;
    let end: Option<BillingPeriod> = end.as_deref().map(str::parse).transpose()?;
    Ok(DateRange::new(start, end))
}

fn count(results: &std::collections::BTreeMap<String, ExportStatus>, status: ExportStatus) -> usize {
    results.values().filter(|s| **s == status).count()
}

/// Billing periods with an exported per-period file on disk
fn exported_periods(parquet_dir: &Path, vendor_tag: &str) -> Result<Vec<BillingPeriod>> {
    let suffix = format!("_{vendor_tag}_billing.parquet");
    let Ok(entries) = std::fs::read_dir(parquet_dir) else {
        return Ok(Vec::new());
    };

    let mut periods: Vec<BillingPeriod> = entries
        .filter_map(std::result::Result::ok)
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().to_string();
            let stem = name.strip_suffix(&suffix)?;
            // Per-period files have a bare YYYY-MM stem; per-execution
            // files carry an id after it and are skipped here.
            stem.parse::<BillingPeriod>().ok()
        })
        .collect();
    periods.sort();
    periods.dedup();
    periods.reverse();
    Ok(periods)
}
