//! Canonical manifest record and version-specific parsing

use crate::error::{Error, Result};
use crate::types::BillingPeriod;
use serde::Deserialize;

/// Manifest JSON layout version.
///
/// The two versions differ in where the execution identifier lives and in
/// how keys are laid out in the bucket; both resolve into the same
/// [`ManifestRecord`] at parse time so nothing downstream cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestFormat {
    /// Legacy layout: `assemblyId`, date-range key paths
    V1,
    /// Current layout: `executionId`, `BILLING_PERIOD=` key paths
    V2,
}

/// One column as declared by a manifest
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ManifestColumn {
    pub category: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub vendor_type: String,
}

impl ManifestColumn {
    /// Vendor-native identifier as it appears in data file headers
    pub fn original_name(&self) -> String {
        format!("{}/{}", self.category, self.name)
    }
}

/// One discovered unit of billing data: a single execution of a single
/// billing period. Immutable once parsed; a vendor republishing the same
/// period produces a new record with a new id, never a mutation.
#[derive(Debug, Clone)]
pub struct ManifestRecord {
    /// Vendor-assigned execution/assembly identifier
    pub id: String,
    pub format: ManifestFormat,
    /// Canonical partition key
    pub billing_period: BillingPeriod,
    /// ISO boundaries as published by the vendor
    pub period_start: String,
    pub period_end: String,
    /// Object key of the manifest itself
    pub source_key: String,
    /// Object keys of the data files, in manifest order
    pub data_files: Vec<String>,
    pub columns: Vec<ManifestColumn>,
    /// Codec tag for the data files (GZIP etc.)
    pub compression: String,
}

/// Raw manifest JSON shape shared by both versions
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawManifest {
    assembly_id: Option<String>,
    execution_id: Option<String>,
    billing_period: Option<RawBillingPeriod>,
    #[serde(default)]
    report_keys: Vec<String>,
    #[serde(default)]
    data_files: Vec<String>,
    #[serde(default)]
    columns: Vec<ManifestColumn>,
    compression: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawBillingPeriod {
    start: Option<String>,
    end: Option<String>,
}

impl ManifestRecord {
    /// Parse a manifest object's JSON into a canonical record
    pub fn parse(bytes: &[u8], source_key: &str, format: ManifestFormat) -> Result<Self> {
        let raw: RawManifest = serde_json::from_slice(bytes)
            .map_err(|e| Error::manifest_parse(source_key, e.to_string()))?;

        let id = match format {
            ManifestFormat::V1 => raw.assembly_id,
            ManifestFormat::V2 => raw.execution_id,
        }
        .ok_or_else(|| {
            Error::manifest_parse(source_key, "missing execution/assembly identifier")
        })?;

        let period = raw
            .billing_period
            .ok_or_else(|| Error::manifest_parse(source_key, "missing billingPeriod"))?;
        let period_start = period
            .start
            .ok_or_else(|| Error::manifest_parse(source_key, "missing billingPeriod.start"))?;
        let period_end = period.end.unwrap_or_default();

        let billing_period = BillingPeriod::from_period_start(&period_start)
            .map_err(|e| Error::manifest_parse(source_key, e.to_string()))?;

        // v1 lists data files under reportKeys; some v2 exports use dataFiles
        let data_files = if raw.report_keys.is_empty() {
            raw.data_files
        } else {
            raw.report_keys
        };

        Ok(Self {
            id,
            format,
            billing_period,
            period_start,
            period_end,
            source_key: source_key.to_string(),
            data_files,
            columns: raw.columns,
            compression: raw.compression.unwrap_or_else(|| "GZIP".to_string()),
        })
    }

    /// Whether the data files are gzip-compressed
    pub fn is_gzip(&self) -> bool {
        self.compression.eq_ignore_ascii_case("gzip")
    }

    /// Key used in per-item result maps: `{period}:{id}`
    pub fn execution_key(&self) -> String {
        format!("{}:{}", self.billing_period, self.id)
    }
}
