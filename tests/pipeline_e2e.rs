//! End-to-end pipeline tests
//!
//! Drive the whole pipeline against a local-filesystem "bucket": manifest
//! discovery, staging download, DuckDB load, Parquet export and sync into
//! a DuckDB-backed warehouse.

use costpipe::config::Config;
use costpipe::export::ParquetExporter;
use costpipe::load::LoadEngine;
use costpipe::manifest::{ManifestColumn, ManifestFormat, ManifestRecord};
use costpipe::pipeline::Pipeline;
use costpipe::types::{BillingPeriod, ExportStatus, Vendor};
use arrow::array::Array;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use std::path::Path;
use tempfile::TempDir;

/// Write a v2 manifest plus its data file into the fake bucket
fn publish_execution(
    bucket: &Path,
    period: &str,
    execution_id: &str,
    csv_rows: &[(&str, &str)],
) {
    let manifest_dir = bucket.join(format!(
        "cost-report/metadata/BILLING_PERIOD={period}"
    ));
    std::fs::create_dir_all(&manifest_dir).unwrap();

    let data_key = format!("cost-report/data/BILLING_PERIOD={period}/{execution_id}-part-0.csv");
    let data_path = bucket.join(&data_key);
    std::fs::create_dir_all(data_path.parent().unwrap()).unwrap();

    let mut csv = String::from(
        "identity/LineItemId,lineItem/UsageStartDate,bill/BillingPeriodStartDate\n",
    );
    for (id, usage_start) in csv_rows {
        csv.push_str(&format!("{id},{usage_start},{period}-01 00:00:00\n"));
    }
    std::fs::write(&data_path, csv).unwrap();

    let manifest = format!(
        r#"{{
            "executionId": "{execution_id}",
            "billingPeriod": {{"start": "{period}-01", "end": "{period}-28"}},
            "reportKeys": ["{data_key}"],
            "columns": [
                {{"category": "identity", "name": "LineItemId", "type": "String"}},
                {{"category": "lineItem", "name": "UsageStartDate", "type": "DateTime"}},
                {{"category": "bill", "name": "BillingPeriodStartDate", "type": "DateTime"}}
            ],
            "compression": "NONE"
        }}"#
    );
    std::fs::write(manifest_dir.join("cost-report-Manifest.json"), manifest).unwrap();
}

fn test_config(bucket: &Path, data_dir: &Path, warehouse_path: &Path) -> Config {
    Config::from_toml_str(&format!(
        r#"
        data_dir = "{data}"

        [source]
        url = "{bucket}"
        export_name = "cost-report"
        vendor = "aws"
        manifest_version = "v2"

        [warehouse]
        path = "{warehouse}"
        table = "billing"
        "#,
        data = data_dir.display(),
        bucket = bucket.display(),
        warehouse = warehouse_path.display(),
    ))
    .unwrap()
}

fn warehouse_count(path: &Path, where_clause: &str) -> i64 {
    let conn = duckdb::Connection::open(path).unwrap();
    conn.query_row(
        &format!("SELECT COUNT(*) FROM billing WHERE {where_clause}"),
        [],
        |row| row.get(0),
    )
    .unwrap()
}

/// Read one string column of a parquet file in row order
fn read_string_column(path: &Path, column: &str) -> Vec<String> {
    let file = std::fs::File::open(path).unwrap();
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)
        .unwrap()
        .build()
        .unwrap();

    let mut values = Vec::new();
    for batch in reader {
        let batch = batch.unwrap();
        let idx = batch.schema().index_of(column).unwrap();
        let array = batch
            .column(idx)
            .as_any()
            .downcast_ref::<arrow::array::StringArray>()
            .unwrap()
            .clone();
        for i in 0..array.len() {
            values.push(array.value(i).to_string());
        }
    }
    values
}

#[tokio::test]
async fn test_full_pipeline_run() {
    let bucket = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    let warehouse_path = data.path().join("warehouse.duckdb");

    // Rows arrive out of usage-date order; export must sort them
    publish_execution(
        bucket.path(),
        "2024-01",
        "exec-1",
        &[
            ("item-b", "2024-01-02 00:00:00"),
            ("item-a", "2024-01-01 00:00:00"),
        ],
    );

    let config = test_config(bucket.path(), data.path(), &warehouse_path);
    let pipeline = Pipeline::new(config).unwrap();
    let summary = pipeline.run(&Default::default(), false).await.unwrap();

    assert_eq!(summary.manifests_discovered, 1);
    assert_eq!(summary.executions_loaded, 1);
    assert_eq!(summary.executions_failed, 0);
    assert_eq!(summary.rows_loaded, 2);
    assert_eq!(summary.files_exported, 1);
    assert_eq!(summary.synced, 1);
    assert_eq!(summary.sync_failed, 0);
    assert_eq!(summary.periods, vec!["2024-01"]);

    // The export file follows the naming contract and is sorted by usage date
    let export_path = data
        .path()
        .join("exports/2024-01_exec-1_aws_billing.parquet");
    assert!(export_path.exists());
    assert_eq!(
        read_string_column(&export_path, "identity_line_item_id"),
        vec!["item-a", "item-b"]
    );

    // The warehouse table was auto-created and holds the partition
    assert_eq!(warehouse_count(&warehouse_path, "1=1"), 2);
    assert_eq!(
        warehouse_count(&warehouse_path, "execution_id = 'exec-1'"),
        2
    );

    // A second run discovers nothing new: the warehouse already holds
    // this execution, so discovery filters it out
    let summary = pipeline.run(&Default::default(), false).await.unwrap();
    assert_eq!(summary.manifests_discovered, 0);
    assert_eq!(summary.rows_loaded, 0);
}

#[tokio::test]
async fn test_republished_execution_replaces_partition() {
    let bucket = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    let warehouse_path = data.path().join("warehouse.duckdb");

    publish_execution(
        bucket.path(),
        "2024-01",
        "exec-old",
        &[
            ("old-1", "2024-01-01 00:00:00"),
            ("old-2", "2024-01-02 00:00:00"),
        ],
    );

    let config = test_config(bucket.path(), data.path(), &warehouse_path);
    let pipeline = Pipeline::new(config).unwrap();
    pipeline.run(&Default::default(), false).await.unwrap();
    assert_eq!(warehouse_count(&warehouse_path, "1=1"), 2);

    // The vendor republishes January under a new execution id
    publish_execution(
        bucket.path(),
        "2024-01",
        "exec-new",
        &[
            ("new-1", "2024-01-01 00:00:00"),
            ("new-2", "2024-01-02 00:00:00"),
            ("new-3", "2024-01-03 00:00:00"),
        ],
    );

    let summary = pipeline.run(&Default::default(), false).await.unwrap();
    assert_eq!(summary.manifests_discovered, 1);
    assert_eq!(summary.rows_loaded, 3);
    assert_eq!(summary.synced, 1);

    // The warehouse partition was replaced, not appended to
    assert_eq!(warehouse_count(&warehouse_path, "1=1"), 3);
    assert_eq!(
        warehouse_count(&warehouse_path, "execution_id = 'exec-old'"),
        0
    );
    assert_eq!(
        warehouse_count(&warehouse_path, "execution_id = 'exec-new'"),
        3
    );
}

#[tokio::test]
async fn test_dry_run_touches_nothing() {
    let bucket = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    let warehouse_path = data.path().join("warehouse.duckdb");

    publish_execution(
        bucket.path(),
        "2024-01",
        "exec-1",
        &[("item-a", "2024-01-01 00:00:00")],
    );

    let config = test_config(bucket.path(), data.path(), &warehouse_path);
    let pipeline = Pipeline::new(config).unwrap();
    let summary = pipeline.run(&Default::default(), true).await.unwrap();

    assert!(summary.dry_run);
    assert_eq!(summary.manifests_discovered, 1);
    assert_eq!(summary.rows_loaded, 0);
    assert!(!data.path().join("staging").exists());
    assert!(!data.path().join("exports").exists());
}

#[tokio::test]
async fn test_monthly_mode_truncates_between_months() {
    let bucket = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    let warehouse_path = data.path().join("warehouse.duckdb");

    publish_execution(
        bucket.path(),
        "2024-01",
        "exec-jan",
        &[("jan-1", "2024-01-01 00:00:00")],
    );
    publish_execution(
        bucket.path(),
        "2024-02",
        "exec-feb",
        &[
            ("feb-1", "2024-02-01 00:00:00"),
            ("feb-2", "2024-02-02 00:00:00"),
        ],
    );

    let mut config = test_config(bucket.path(), data.path(), &warehouse_path);
    // Persistent local store so we can inspect it after the run
    config.load.persistent = true;
    let database_path = config.database_path();

    let pipeline = Pipeline::new(config).unwrap();
    let summary = pipeline.run_monthly(&Default::default(), false).await.unwrap();

    assert_eq!(summary.manifests_discovered, 2);
    assert_eq!(summary.executions_loaded, 2);
    assert_eq!(summary.rows_loaded, 3);
    assert_eq!(summary.files_exported, 2);
    assert_eq!(summary.synced, 2);

    // Both months reached the warehouse
    assert_eq!(warehouse_count(&warehouse_path, "1=1"), 3);

    // The local table was truncated after the last month
    let conn = duckdb::Connection::open(&database_path).unwrap();
    let local_rows: i64 = conn
        .query_row("SELECT COUNT(*) FROM aws_billing_data", [], |row| {
            row.get(0)
        })
        .unwrap();
    assert_eq!(local_rows, 0);
}

#[test]
fn test_export_skip_overwrite_and_zero_rows() {
    let staging = TempDir::new().unwrap();
    let exports = TempDir::new().unwrap();

    let engine = LoadEngine::open(":memory:", &Default::default()).unwrap();
    let m = ManifestRecord {
        id: "exec-1".to_string(),
        format: ManifestFormat::V2,
        billing_period: "2024-01".parse().unwrap(),
        period_start: "2024-01-01".to_string(),
        period_end: String::new(),
        source_key: "m".to_string(),
        data_files: vec!["r/a.csv".to_string()],
        columns: vec![ManifestColumn {
            category: "identity".to_string(),
            name: "LineItemId".to_string(),
            vendor_type: "String".to_string(),
        }],
        compression: "NONE".to_string(),
    };
    let dir = staging.path().join("2024-01/exec-1");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("a.csv"), "identity/LineItemId\nx\n").unwrap();
    engine.load_manifest(&m, std::slice::from_ref(&m), staging.path(), "aws_billing_data");

    let exporter = ParquetExporter::new(
        &engine,
        exports.path(),
        "aws_billing_data",
        Vendor::Aws,
        &Default::default(),
    );

    let period: BillingPeriod = "2024-01".parse().unwrap();
    let results = exporter.export_periods(&[period.clone()], false).unwrap();
    assert_eq!(results["2024-01"], ExportStatus::Exported);

    // Existing file, no overwrite: skipped
    let results = exporter.export_periods(&[period.clone()], false).unwrap();
    assert_eq!(results["2024-01"], ExportStatus::Skipped);

    // Overwrite requested: exported again
    let results = exporter.export_periods(&[period], true).unwrap();
    assert_eq!(results["2024-01"], ExportStatus::Exported);

    // A period with no rows fails
    let empty: BillingPeriod = "2030-12".parse().unwrap();
    let results = exporter.export_periods(&[empty], false).unwrap();
    assert_eq!(results["2030-12"], ExportStatus::Failed);
}
