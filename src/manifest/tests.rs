//! Manifest parsing and discovery tests

use super::*;
use crate::config::{ManifestVersion, SourceConfig};
use crate::storage::BillingStore;
use crate::types::Vendor;
use std::collections::HashMap;

fn v2_manifest_json(execution_id: &str, period_start: &str) -> String {
    format!(
        r#"{{
            "executionId": "{execution_id}",
            "billingPeriod": {{"start": "{period_start}", "end": "2024-02-01"}},
            "reportKeys": ["exports/cur/data/part-0.csv.gz", "exports/cur/data/part-1.csv.gz"],
            "columns": [
                {{"category": "identity", "name": "LineItemId", "type": "String"}},
                {{"category": "lineItem", "name": "UnblendedCost", "type": "OptionalBigDecimal"}}
            ],
            "compression": "GZIP"
        }}"#
    )
}

#[test]
fn test_parse_v2_manifest() {
    let json = v2_manifest_json("exec-123", "2024-01-01");
    let manifest =
        ManifestRecord::parse(json.as_bytes(), "some/key/Manifest.json", ManifestFormat::V2)
            .unwrap();

    assert_eq!(manifest.id, "exec-123");
    assert_eq!(manifest.billing_period.to_string(), "2024-01");
    assert_eq!(manifest.data_files.len(), 2);
    assert_eq!(manifest.columns.len(), 2);
    assert!(manifest.is_gzip());
    assert_eq!(manifest.execution_key(), "2024-01:exec-123");
}

#[test]
fn test_parse_v1_manifest() {
    let json = r#"{
        "assemblyId": "assembly-9",
        "billingPeriod": {"start": "20240301T000000.000Z", "end": "20240401T000000.000Z"},
        "reportKeys": ["cur/20240301-20240401/file.csv.gz"],
        "columns": [{"category": "bill", "name": "BillingPeriodStartDate", "type": "DateTime"}]
    }"#;

    let manifest =
        ManifestRecord::parse(json.as_bytes(), "k/Manifest.json", ManifestFormat::V1).unwrap();

    assert_eq!(manifest.id, "assembly-9");
    assert_eq!(manifest.billing_period.to_string(), "2024-03");
    // Compression defaults to GZIP when absent
    assert!(manifest.is_gzip());
}

#[test]
fn test_parse_wrong_version_misses_id() {
    // A v2 manifest parsed as v1 has no assemblyId
    let json = v2_manifest_json("exec-123", "2024-01-01");
    let err = ManifestRecord::parse(json.as_bytes(), "k", ManifestFormat::V1).unwrap_err();
    assert!(err.to_string().contains("identifier"));
}

#[test]
fn test_parse_rejects_missing_period() {
    let json = r#"{"executionId": "e", "reportKeys": []}"#;
    let err = ManifestRecord::parse(json.as_bytes(), "k", ManifestFormat::V2).unwrap_err();
    assert!(err.to_string().contains("billingPeriod"));
}

#[test]
fn test_original_name_joins_category() {
    let col = ManifestColumn {
        category: "identity".to_string(),
        name: "LineItemId".to_string(),
        vendor_type: "String".to_string(),
    };
    assert_eq!(col.original_name(), "identity/LineItemId");
}

fn source_config(version: ManifestVersion) -> SourceConfig {
    SourceConfig {
        url: String::new(),
        export_name: "cost-report".to_string(),
        vendor: Vendor::Aws,
        manifest_version: version,
    }
}

fn write_manifest(root: &std::path::Path, rel: &str, contents: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

#[tokio::test]
async fn test_discover_v2_filters_loaded_executions() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();

    write_manifest(
        root,
        "cost-report/metadata/BILLING_PERIOD=2024-01/cost-report-Manifest.json",
        &v2_manifest_json("exec-jan", "2024-01-01"),
    );
    write_manifest(
        root,
        "cost-report/metadata/BILLING_PERIOD=2024-02/cost-report-Manifest.json",
        &v2_manifest_json("exec-feb", "2024-02-01"),
    );
    // A data file that must not match the manifest pattern
    write_manifest(root, "cost-report/data/part-0.csv.gz", "x");
    // An unparseable manifest that must be skipped, not fatal
    write_manifest(
        root,
        "cost-report/metadata/BILLING_PERIOD=2024-03/cost-report-Manifest.json",
        "not json at all",
    );

    let store = BillingStore::parse(root.to_str().unwrap()).unwrap();
    let source = source_config(ManifestVersion::V2);
    let discovery = ManifestDiscovery::new(&store, &source);

    // Nothing loaded yet: both parseable manifests, newest first
    let manifests = discovery.discover(&HashMap::new()).await.unwrap();
    assert_eq!(manifests.len(), 2);
    assert_eq!(manifests[0].billing_period.to_string(), "2024-02");
    assert_eq!(manifests[1].billing_period.to_string(), "2024-01");

    // January's exact execution already loaded: excluded
    let loaded = HashMap::from([("2024-01".to_string(), "exec-jan".to_string())]);
    let manifests = discovery.discover(&loaded).await.unwrap();
    assert_eq!(manifests.len(), 1);
    assert_eq!(manifests[0].id, "exec-feb");

    // January loaded under a different execution id: kept for replacement
    let loaded = HashMap::from([("2024-01".to_string(), "exec-old".to_string())]);
    let manifests = discovery.discover(&loaded).await.unwrap();
    assert_eq!(manifests.len(), 2);
}

#[tokio::test]
async fn test_discover_v1_pattern() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();

    write_manifest(
        root,
        "cost-report/20240101-20240201/cost-report-Manifest.json",
        r#"{
            "assemblyId": "asm-1",
            "billingPeriod": {"start": "2024-01-01", "end": "2024-02-01"},
            "reportKeys": [],
            "columns": []
        }"#,
    );
    // v2-style key must not match in v1 mode
    write_manifest(
        root,
        "cost-report/metadata/BILLING_PERIOD=2024-01/cost-report-Manifest.json",
        &v2_manifest_json("exec-jan", "2024-01-01"),
    );

    let store = BillingStore::parse(root.to_str().unwrap()).unwrap();
    let source = source_config(ManifestVersion::V1);
    let discovery = ManifestDiscovery::new(&store, &source);

    let manifests = discovery.discover(&HashMap::new()).await.unwrap();
    assert_eq!(manifests.len(), 1);
    assert_eq!(manifests[0].id, "asm-1");
    assert_eq!(manifests[0].format, ManifestFormat::V1);
}
