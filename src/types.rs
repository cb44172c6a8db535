//! Common types shared across pipeline stages

use crate::error::{Error, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A calendar billing month in canonical `YYYY-MM` form.
///
/// This is the partitioning key of the whole pipeline. Every partition
/// predicate (local delete, export filter, warehouse delete) is derived
/// from this one type so the load, export and sync stages can never
/// disagree about what "one month of data" means.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BillingPeriod {
    year: i32,
    month: u32,
}

impl BillingPeriod {
    /// Create a period from year and month; month must be 1-12
    pub fn new(year: i32, month: u32) -> Result<Self> {
        if !(1..=12).contains(&month) {
            return Err(Error::InvalidPeriod {
                value: format!("{year}-{month}"),
            });
        }
        Ok(Self { year, month })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// First day of the billing month
    pub fn first_day(&self) -> NaiveDate {
        // Safe: month is validated on construction
        NaiveDate::from_ymd_opt(self.year, self.month, 1).expect("validated year-month")
    }

    /// Derive the period from a vendor period-start string.
    ///
    /// Accepts both the compact `YYYYMMDDTHHMMSS.sssZ` form used by v2
    /// manifests and ISO `YYYY-MM-DD...` dates.
    pub fn from_period_start(start: &str) -> Result<Self> {
        let digits: String = start.chars().take_while(char::is_ascii_digit).collect();
        if digits.len() >= 6 && !start.contains('-') {
            // Compact form: YYYYMMDD...
            let year = digits[0..4].parse().map_err(|_| Error::InvalidPeriod {
                value: start.to_string(),
            })?;
            let month = digits[4..6].parse().map_err(|_| Error::InvalidPeriod {
                value: start.to_string(),
            })?;
            return Self::new(year, month);
        }
        if start.len() >= 7 {
            return start[0..7].parse();
        }
        Err(Error::InvalidPeriod {
            value: start.to_string(),
        })
    }

    /// SQL predicate matching rows of this month by year/month extraction
    /// on a timestamp column. Takes its values as bind parameters, so
    /// callers always go through a prepared statement.
    pub fn predicate(column: &str) -> String {
        format!("EXTRACT(YEAR FROM {column}) = ? AND EXTRACT(MONTH FROM {column}) = ?")
    }

    /// Bind parameters matching [`BillingPeriod::predicate`]
    pub fn predicate_params(&self) -> (i64, i64) {
        (i64::from(self.year), i64::from(self.month))
    }

    /// Same predicate with the year/month inlined as integer literals,
    /// for statements that cannot take bind parameters (COPY).
    pub fn predicate_literal(&self, column: &str) -> String {
        format!(
            "EXTRACT(YEAR FROM {column}) = {} AND EXTRACT(MONTH FROM {column}) = {}",
            self.year, self.month
        )
    }
}

impl fmt::Display for BillingPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for BillingPeriod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidPeriod {
            value: s.to_string(),
        };
        let (year, month) = s.split_once('-').ok_or_else(invalid)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(invalid());
        }
        let year = year.parse().map_err(|_| invalid())?;
        let month = month.parse().map_err(|_| invalid())?;
        Self::new(year, month)
    }
}

impl TryFrom<String> for BillingPeriod {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<BillingPeriod> for String {
    fn from(p: BillingPeriod) -> Self {
        p.to_string()
    }
}

/// Inclusive billing-period range filter used by every CLI command
#[derive(Debug, Clone, Default)]
pub struct DateRange {
    pub start: Option<BillingPeriod>,
    pub end: Option<BillingPeriod>,
}

impl DateRange {
    pub fn new(start: Option<BillingPeriod>, end: Option<BillingPeriod>) -> Self {
        Self { start, end }
    }

    /// Check whether a period falls inside the range
    pub fn contains(&self, period: &BillingPeriod) -> bool {
        if let Some(start) = &self.start {
            if period < start {
                return false;
            }
        }
        if let Some(end) = &self.end {
            if period > end {
                return false;
            }
        }
        true
    }

    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let start = self
            .start
            .as_ref()
            .map_or_else(|| "earliest".to_string(), ToString::to_string);
        let end = self
            .end
            .as_ref()
            .map_or_else(|| "latest".to_string(), ToString::to_string);
        write!(f, "{start} to {end}")
    }
}

/// Billing data vendor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vendor {
    Aws,
    Azure,
}

impl Vendor {
    /// Lowercase tag used in file names and default table names
    pub fn tag(&self) -> &'static str {
        match self {
            Vendor::Aws => "aws",
            Vendor::Azure => "azure",
        }
    }

    /// Default destination table name for this vendor
    pub fn default_table(&self) -> String {
        format!("{}_billing_data", self.tag())
    }
}

impl fmt::Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Lifecycle state of a manifest as tracked across pipeline stages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestState {
    Discovered,
    Downloading,
    Staged,
    Loading,
    Loaded,
    Failed,
}

impl fmt::Display for ManifestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ManifestState::Discovered => "discovered",
            ManifestState::Downloading => "downloading",
            ManifestState::Staged => "staged",
            ManifestState::Loading => "loading",
            ManifestState::Loaded => "loaded",
            ManifestState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Outcome of exporting one billing partition to Parquet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportStatus {
    Exported,
    Skipped,
    Failed,
}

impl fmt::Display for ExportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExportStatus::Exported => "exported",
            ExportStatus::Skipped => "skipped",
            ExportStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Outcome of syncing one billing partition to the warehouse
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Loaded,
    Skipped,
    Failed,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncStatus::Loaded => "loaded",
            SyncStatus::Skipped => "skipped",
            SyncStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Export file name for one execution of one billing period.
///
/// `{period}_{execution_id}_{vendor}_billing.parquet` is the contract
/// between the export and sync stages; resumability across runs depends
/// on both sides producing the exact same name.
pub fn execution_export_filename(
    period: &BillingPeriod,
    execution_id: &str,
    vendor: Vendor,
) -> String {
    format!("{period}_{execution_id}_{}_billing.parquet", vendor.tag())
}

/// Export file name for the per-period variant (no execution id)
pub fn period_export_filename(period: &BillingPeriod, vendor: Vendor) -> String {
    format!("{period}_{}_billing.parquet", vendor.tag())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_parse_and_display() {
        let p: BillingPeriod = "2024-01".parse().unwrap();
        assert_eq!(p.year(), 2024);
        assert_eq!(p.month(), 1);
        assert_eq!(p.to_string(), "2024-01");
        assert_eq!(p.first_day(), NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
    }

    #[test]
    fn test_period_parse_rejects_garbage() {
        assert!("2024".parse::<BillingPeriod>().is_err());
        assert!("2024-13".parse::<BillingPeriod>().is_err());
        assert!("2024-00".parse::<BillingPeriod>().is_err());
        assert!("24-01".parse::<BillingPeriod>().is_err());
        assert!("abcd-ef".parse::<BillingPeriod>().is_err());
    }

    #[test]
    fn test_period_from_period_start() {
        // Compact v2 form
        let p = BillingPeriod::from_period_start("20250901T000000.000Z").unwrap();
        assert_eq!(p.to_string(), "2025-09");

        // ISO form
        let p = BillingPeriod::from_period_start("2024-01-01T00:00:00Z").unwrap();
        assert_eq!(p.to_string(), "2024-01");

        let p = BillingPeriod::from_period_start("2024-01-01").unwrap();
        assert_eq!(p.to_string(), "2024-01");

        assert!(BillingPeriod::from_period_start("").is_err());
    }

    #[test]
    fn test_period_ordering() {
        let a: BillingPeriod = "2023-12".parse().unwrap();
        let b: BillingPeriod = "2024-01".parse().unwrap();
        assert!(a < b);
    }

    #[test]
    fn test_predicate_shape() {
        let p: BillingPeriod = "2024-03".parse().unwrap();
        assert_eq!(
            BillingPeriod::predicate("bill_billing_period_start_date"),
            "EXTRACT(YEAR FROM bill_billing_period_start_date) = ? \
             AND EXTRACT(MONTH FROM bill_billing_period_start_date) = ?"
        );
        assert_eq!(p.predicate_params(), (2024, 3));
    }

    #[test]
    fn test_date_range() {
        let range = DateRange::new(Some("2024-01".parse().unwrap()), Some("2024-03".parse().unwrap()));
        assert!(range.contains(&"2024-01".parse().unwrap()));
        assert!(range.contains(&"2024-02".parse().unwrap()));
        assert!(range.contains(&"2024-03".parse().unwrap()));
        assert!(!range.contains(&"2023-12".parse().unwrap()));
        assert!(!range.contains(&"2024-04".parse().unwrap()));

        let open = DateRange::default();
        assert!(open.is_unbounded());
        assert!(open.contains(&"1999-07".parse().unwrap()));
    }

    #[test]
    fn test_export_filenames() {
        let period: BillingPeriod = "2024-01".parse().unwrap();
        assert_eq!(
            execution_export_filename(&period, "exec-abc", Vendor::Aws),
            "2024-01_exec-abc_aws_billing.parquet"
        );
        assert_eq!(
            period_export_filename(&period, Vendor::Azure),
            "2024-01_azure_billing.parquet"
        );
    }
}
