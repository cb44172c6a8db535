//! Pipeline configuration
//!
//! Loaded from a TOML file. Validation runs before any I/O and collects
//! every problem at once instead of failing field by field.

use crate::error::{Error, Result};
use crate::types::Vendor;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Manifest naming convention version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManifestVersion {
    V1,
    V2,
}

/// What to do when loaded rows fall outside the manifest-declared month
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodMismatch {
    /// Log a warning and keep the rows (manifest-declared period wins)
    #[default]
    Warn,
    /// Fail the manifest load so the operator can investigate
    Error,
}

/// Source object storage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Storage URL: `s3://bucket/prefix`, `az://container/prefix`,
    /// `gs://bucket/prefix`, or a local directory path
    #[serde(default)]
    pub url: String,

    /// Billing export name as configured at the vendor
    #[serde(default)]
    pub export_name: String,

    /// Vendor tag, drives naming conventions
    #[serde(default = "default_vendor")]
    pub vendor: Vendor,

    /// Manifest naming convention version
    #[serde(default = "default_manifest_version")]
    pub manifest_version: ManifestVersion,
}

fn default_vendor() -> Vendor {
    Vendor::Aws
}

fn default_manifest_version() -> ManifestVersion {
    ManifestVersion::V2
}

/// Local load settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadConfig {
    /// Destination table name; defaults to `{vendor}_billing_data`
    #[serde(default)]
    pub table: Option<String>,

    /// Timestamp column carrying the billing-period start date
    #[serde(default = "default_period_column")]
    pub period_column: String,

    /// Policy for rows dated outside the manifest-declared month
    #[serde(default)]
    pub period_mismatch: PeriodMismatch,

    /// Keep the local store on disk between runs (false = in-memory)
    #[serde(default)]
    pub persistent: bool,
}

fn default_period_column() -> String {
    "bill_billing_period_start_date".to_string()
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            table: None,
            period_column: default_period_column(),
            period_mismatch: PeriodMismatch::default(),
            persistent: false,
        }
    }
}

/// Parquet export settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Parquet compression codec
    #[serde(default = "default_compression")]
    pub compression: String,

    /// Sort order of exported files; required for efficient range scans
    /// downstream and for deterministic output
    #[serde(default = "default_sort_columns")]
    pub sort_columns: Vec<String>,
}

fn default_compression() -> String {
    "snappy".to_string()
}

fn default_sort_columns() -> Vec<String> {
    vec![
        "line_item_usage_start_date".to_string(),
        "line_item_usage_account_id".to_string(),
        "line_item_product_code".to_string(),
    ]
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            compression: default_compression(),
            sort_columns: default_sort_columns(),
        }
    }
}

/// Remote warehouse settings; sync is skipped entirely when absent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarehouseConfig {
    /// Database file backing the warehouse
    pub path: String,

    /// Destination table in the warehouse
    #[serde(default = "default_warehouse_table")]
    pub table: String,
}

fn default_warehouse_table() -> String {
    "billing".to_string()
}

/// Top-level pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root for staging downloads, the local database and exports
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    pub source: SourceConfig,

    #[serde(default)]
    pub load: LoadConfig,

    #[serde(default)]
    pub export: ExportConfig,

    #[serde(default)]
    pub warehouse: Option<WarehouseConfig>,
}

fn default_data_dir() -> String {
    "./data".to_string()
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|_| Error::FileNotFound {
            path: path.display().to_string(),
        })?;
        Self::from_toml_str(&contents)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        Ok(config)
    }

    /// Validate the configuration, collecting every problem at once.
    ///
    /// Must be called before any I/O; a bad config never reaches the
    /// network or the database.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.source.url.is_empty() {
            errors.push("source.url is required".to_string());
        }
        if self.source.export_name.is_empty() {
            errors.push("source.export_name is required".to_string());
        }
        if self.load.period_column.is_empty() {
            errors.push("load.period_column must not be empty".to_string());
        }
        if self.export.sort_columns.is_empty() {
            errors.push("export.sort_columns must not be empty".to_string());
        }
        match self.export.compression.as_str() {
            "snappy" | "gzip" | "zstd" | "lz4" | "uncompressed" => {}
            other => errors.push(format!(
                "export.compression '{other}' is not one of snappy, gzip, zstd, lz4, uncompressed"
            )),
        }
        if let Some(warehouse) = &self.warehouse {
            if warehouse.path.is_empty() {
                errors.push("warehouse.path is required when [warehouse] is present".to_string());
            }
            if warehouse.table.is_empty() {
                errors.push("warehouse.table must not be empty".to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::config(format!(
                "configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }

    /// Directory holding downloaded data files, one subdir per period
    pub fn staging_dir(&self) -> PathBuf {
        Path::new(&self.data_dir).join("staging")
    }

    /// Directory receiving exported Parquet files
    pub fn parquet_dir(&self) -> PathBuf {
        Path::new(&self.data_dir).join("exports")
    }

    /// Local database location; `:memory:` unless persistence is on
    pub fn database_path(&self) -> String {
        if self.load.persistent {
            Path::new(&self.data_dir)
                .join("costpipe.duckdb")
                .display()
                .to_string()
        } else {
            ":memory:".to_string()
        }
    }

    /// Destination table name, defaulting per vendor
    pub fn table_name(&self) -> String {
        self.load
            .table
            .clone()
            .unwrap_or_else(|| self.source.vendor.default_table())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [source]
        url = "s3://billing-bucket/exports"
        export_name = "cost-report"
    "#;

    #[test]
    fn test_minimal_config() {
        let config = Config::from_toml_str(MINIMAL).unwrap();
        config.validate().unwrap();

        assert_eq!(config.source.vendor, Vendor::Aws);
        assert_eq!(config.source.manifest_version, ManifestVersion::V2);
        assert_eq!(config.table_name(), "aws_billing_data");
        assert_eq!(config.database_path(), ":memory:");
        assert_eq!(config.staging_dir(), PathBuf::from("./data/staging"));
        assert_eq!(config.parquet_dir(), PathBuf::from("./data/exports"));
        assert!(config.warehouse.is_none());
    }

    #[test]
    fn test_full_config() {
        let config = Config::from_toml_str(
            r#"
            data_dir = "/var/lib/costpipe"

            [source]
            url = "az://billing/exports"
            export_name = "monthly"
            vendor = "azure"
            manifest_version = "v1"

            [load]
            table = "cloud_costs"
            period_mismatch = "error"
            persistent = true

            [export]
            compression = "zstd"
            sort_columns = ["usage_date"]

            [warehouse]
            path = "/var/lib/costpipe/warehouse.duckdb"
            table = "billing"
            "#,
        )
        .unwrap();
        config.validate().unwrap();

        assert_eq!(config.source.vendor, Vendor::Azure);
        assert_eq!(config.source.manifest_version, ManifestVersion::V1);
        assert_eq!(config.table_name(), "cloud_costs");
        assert_eq!(config.load.period_mismatch, PeriodMismatch::Error);
        assert!(config.database_path().ends_with("costpipe.duckdb"));
        assert_eq!(config.warehouse.unwrap().table, "billing");
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let config = Config::from_toml_str(
            r#"
            [source]
            url = ""
            export_name = ""

            [export]
            compression = "brotli"
            "#,
        )
        .unwrap();

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("source.url is required"));
        assert!(err.contains("source.export_name is required"));
        assert!(err.contains("brotli"));
    }

    #[test]
    fn test_missing_file() {
        let err = Config::from_file("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, Error::FileNotFound { .. }));
    }
}
