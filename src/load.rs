//! Incremental load engine
//!
//! Owns all mutations to the local table's schema and partitions. For
//! each manifest, strictly in order: make the table schema match (create
//! or append-only alter), delete the billing period's existing rows,
//! then bulk-load the staged data files with every row tagged by the
//! manifest's execution id.
//!
//! Deleting before inserting is what makes re-runs idempotent: loading
//! the same manifest twice leaves the partition byte-identical, and
//! loading a republished execution fully replaces the old one.

use crate::config::{LoadConfig, PeriodMismatch};
use crate::error::{Error, Result};
use crate::manifest::ManifestRecord;
use crate::schema::SchemaRegistry;
use crate::types::{BillingPeriod, ManifestState};
use duckdb::{params, Connection};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::{debug, info, warn};

/// Outcome of loading one manifest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    Loaded,
    Failed,
}

/// Per-manifest load result
#[derive(Debug, Clone)]
pub struct LoadOutcome {
    pub execution_key: String,
    pub billing_period: BillingPeriod,
    pub rows_loaded: usize,
    pub files_loaded: usize,
    pub total_files: usize,
    pub status: LoadStatus,
    pub error: Option<String>,
}

/// Aggregate result of a batch load
#[derive(Debug, Default, Clone)]
pub struct LoadReport {
    pub loaded_executions: usize,
    pub failed_executions: usize,
    pub total_rows: usize,
    pub outcomes: Vec<LoadOutcome>,
}

/// Summary information about the local table
#[derive(Debug, Clone)]
pub struct TableInfo {
    pub table: String,
    pub column_count: usize,
    pub row_count: usize,
    pub min_period_date: Option<String>,
    pub max_period_date: Option<String>,
}

/// DuckDB-backed load engine
pub struct LoadEngine {
    conn: Connection,
    registry: SchemaRegistry,
    period_column: String,
    period_mismatch: PeriodMismatch,
}

impl LoadEngine {
    /// Open the engine on a database path, `:memory:` for ephemeral use
    pub fn open(database_path: &str, config: &LoadConfig) -> Result<Self> {
        let conn = if database_path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            if let Some(parent) = Path::new(database_path).parent() {
                std::fs::create_dir_all(parent)?;
            }
            Connection::open(database_path)?
        };

        Ok(Self {
            conn,
            registry: SchemaRegistry::new(),
            period_column: config.period_column.clone(),
            period_mismatch: config.period_mismatch,
        })
    }

    /// Shared connection, used by the export stage to read what was loaded
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn period_column(&self) -> &str {
        &self.period_column
    }

    /// Column names of the live table; empty set when the table does not
    /// exist. Always queried fresh so schema decisions never act on a
    /// stale view.
    pub fn existing_columns(&self, table: &str) -> Result<HashSet<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT column_name FROM information_schema.columns WHERE table_name = ?",
        )?;
        let columns = stmt
            .query_map(params![table], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<HashSet<_>, _>>()?;
        Ok(columns)
    }

    /// Make the table's schema match the manifest, creating it from the
    /// unified schema of every known manifest if absent, then adding any
    /// columns this manifest introduces. Returns the header mapping for
    /// the manifest's data files.
    pub fn ensure_table_schema(
        &self,
        table: &str,
        manifest: &ManifestRecord,
        all_manifests: &[ManifestRecord],
    ) -> Result<HashMap<String, String>> {
        let existing = self.existing_columns(table)?;

        if existing.is_empty() {
            let refs: Vec<&ManifestRecord> = all_manifests.iter().collect();
            let schema = self.registry.unify(&refs);
            let create_sql = self.registry.create_table_sql(table, &schema);
            self.conn.execute_batch(&create_sql)?;
            info!(table, columns = schema.len() + 1, "created table");
        }

        // Re-read after the potential create, then append what is missing
        let existing = self.existing_columns(table)?;
        let new_columns = self.registry.diff(&existing, &manifest.columns);
        if !new_columns.is_empty() {
            info!(table, added = new_columns.len(), "adding new columns");
            for statement in self.registry.alter_table_sql(table, &new_columns) {
                debug!(sql = %statement, "alter");
                self.conn.execute_batch(&statement)?;
            }
        }

        // The partition column must always exist: it is what the delete
        // predicate keys on, even when the vendor's column set lacks it.
        let existing = self.existing_columns(table)?;
        if !existing.contains(&self.period_column) {
            self.conn.execute_batch(&format!(
                "ALTER TABLE {table} ADD COLUMN {} TIMESTAMP;",
                self.period_column
            ))?;
        }

        Ok(self.registry.column_mapping(&manifest.columns))
    }

    /// Delete every row of the given billing period, whatever execution
    /// wrote it. Returns the number of rows removed.
    pub fn delete_period(&self, table: &str, period: &BillingPeriod) -> Result<usize> {
        let predicate = BillingPeriod::predicate(&self.period_column);
        let (year, month) = period.predicate_params();
        let deleted = self.conn.execute(
            &format!("DELETE FROM {table} WHERE {predicate}"),
            params![year, month],
        )?;
        Ok(deleted)
    }

    /// Load one manifest: schema ensure, partition delete, bulk insert.
    ///
    /// A failure aborts this manifest only; the partition's prior rows
    /// stay deleted and the caller retries the whole manifest from a
    /// clean state. A declared data file missing from staging is a
    /// warning, not an error.
    pub fn load_manifest(
        &self,
        manifest: &ManifestRecord,
        all_manifests: &[ManifestRecord],
        staging_dir: &Path,
        table: &str,
    ) -> LoadOutcome {
        let period = manifest.billing_period.clone();
        info!(
            period = %period,
            execution = %manifest.id,
            state = %ManifestState::Loading,
            "loading manifest"
        );

        match self.load_manifest_inner(manifest, all_manifests, staging_dir, table) {
            Ok((rows_loaded, files_loaded)) => {
                info!(
                    period = %period,
                    rows = rows_loaded,
                    files = files_loaded,
                    state = %ManifestState::Loaded,
                    "manifest loaded"
                );
                LoadOutcome {
                    execution_key: manifest.execution_key(),
                    billing_period: period,
                    rows_loaded,
                    files_loaded,
                    total_files: manifest.data_files.len(),
                    status: LoadStatus::Loaded,
                    error: None,
                }
            }
            Err(e) => {
                warn!(
                    period = %period,
                    error = %e,
                    state = %ManifestState::Failed,
                    "manifest load failed"
                );
                LoadOutcome {
                    execution_key: manifest.execution_key(),
                    billing_period: period,
                    rows_loaded: 0,
                    files_loaded: 0,
                    total_files: manifest.data_files.len(),
                    status: LoadStatus::Failed,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    fn load_manifest_inner(
        &self,
        manifest: &ManifestRecord,
        all_manifests: &[ManifestRecord],
        staging_dir: &Path,
        table: &str,
    ) -> Result<(usize, usize)> {
        let mapping = self.ensure_table_schema(table, manifest, all_manifests)?;

        let deleted = self.delete_period(table, &manifest.billing_period)?;
        if deleted > 0 {
            info!(period = %manifest.billing_period, deleted, "replaced existing partition rows");
        }

        let execution_dir = staging_dir
            .join(manifest.billing_period.to_string())
            .join(&manifest.id);

        let mut rows_loaded = 0usize;
        let mut files_loaded = 0usize;

        for key in &manifest.data_files {
            let filename = key.rsplit('/').next().unwrap_or(key);
            let path = execution_dir.join(filename);
            if !path.exists() {
                warn!(file = %path.display(), "staged file missing, skipping");
                continue;
            }
            rows_loaded += self.load_data_file(&path, table, manifest, &mapping)?;
            files_loaded += 1;
        }

        self.check_period_alignment(table, manifest)?;

        Ok((rows_loaded, files_loaded))
    }

    /// Bulk-insert one staged data file via read_csv, translating the
    /// header through the manifest's column mapping and tagging every row
    /// with the execution id.
    fn load_data_file(
        &self,
        path: &Path,
        table: &str,
        manifest: &ManifestRecord,
        mapping: &HashMap<String, String>,
    ) -> Result<usize> {
        let gzip = path.extension().is_some_and(|ext| ext == "gz");
        let header = read_csv_header(path, gzip)?;

        let types_by_original: HashMap<String, &'static str> = manifest
            .columns
            .iter()
            .map(|col| {
                (
                    col.original_name(),
                    crate::schema::storage_type_for(&col.category, &col.vendor_type),
                )
            })
            .collect();

        let mut insert_columns = Vec::with_capacity(header.len());
        let mut column_specs = Vec::with_capacity(header.len());
        for original in &header {
            let normalized = mapping
                .get(original)
                .cloned()
                .unwrap_or_else(|| crate::schema::normalize_column_name(original));
            let storage_type = types_by_original
                .get(original)
                .copied()
                .unwrap_or("VARCHAR");
            column_specs.push(format!("'{normalized}': '{storage_type}'"));
            insert_columns.push(normalized);
        }

        // Materialize the partition column from the declared period when
        // the file itself does not carry it, so the delete predicate can
        // always find these rows on the next run.
        let inject_period = !insert_columns.iter().any(|c| *c == self.period_column);

        let mut target_columns = vec!["execution_id".to_string()];
        let mut select_exprs = vec!["CAST(? AS VARCHAR)".to_string()];
        if inject_period {
            target_columns.push(self.period_column.clone());
            select_exprs.push("CAST(? AS TIMESTAMP)".to_string());
        }
        target_columns.extend(insert_columns.iter().cloned());
        select_exprs.push("*".to_string());

        let compression = if gzip { "gzip" } else { "none" };
        let insert_sql = format!(
            "INSERT INTO {table} ({}) SELECT {} FROM read_csv('{}', \
             columns = {{{}}}, header = true, delim = ',', compression = '{compression}')",
            target_columns.join(", "),
            select_exprs.join(", "),
            sql_escape(&path.display().to_string()),
            column_specs.join(", "),
        );

        debug!(file = %path.display(), "bulk insert");
        let rows = if inject_period {
            let period_start = manifest.billing_period.first_day().format("%Y-%m-%d").to_string();
            self.conn
                .execute(&insert_sql, params![manifest.id, period_start])?
        } else {
            self.conn.execute(&insert_sql, params![manifest.id])?
        };

        debug!(file = %path.display(), rows, "file loaded");
        Ok(rows)
    }

    /// Count rows of this execution dated outside the manifest-declared
    /// month and apply the configured mismatch policy.
    fn check_period_alignment(&self, table: &str, manifest: &ManifestRecord) -> Result<()> {
        let predicate = BillingPeriod::predicate(&self.period_column);
        let (year, month) = manifest.billing_period.predicate_params();
        let sql = format!(
            "SELECT COUNT(*) FROM {table} WHERE execution_id = ? AND NOT ({predicate})"
        );
        let stray: i64 = self
            .conn
            .query_row(&sql, params![manifest.id, year, month], |row| row.get(0))?;

        if stray == 0 {
            return Ok(());
        }
        match self.period_mismatch {
            PeriodMismatch::Warn => {
                warn!(
                    period = %manifest.billing_period,
                    execution = %manifest.id,
                    rows = stray,
                    "rows dated outside the declared billing period"
                );
                Ok(())
            }
            PeriodMismatch::Error => Err(Error::load(format!(
                "{stray} rows dated outside declared period {}",
                manifest.billing_period
            ))),
        }
    }

    /// Load a batch of manifests, newest billing period first. One
    /// manifest's failure never stops the rest.
    pub fn load_batch(
        &self,
        manifests: &[ManifestRecord],
        staging_dir: &Path,
        table: &str,
    ) -> LoadReport {
        let mut ordered: Vec<&ManifestRecord> = manifests.iter().collect();
        ordered.sort_by(|a, b| b.billing_period.cmp(&a.billing_period));

        let mut report = LoadReport::default();
        for manifest in ordered {
            let outcome = self.load_manifest(manifest, manifests, staging_dir, table);
            match outcome.status {
                LoadStatus::Loaded => {
                    report.loaded_executions += 1;
                    report.total_rows += outcome.rows_loaded;
                }
                LoadStatus::Failed => report.failed_executions += 1,
            }
            report.outcomes.push(outcome);
        }
        report
    }

    /// Remove every row from the table, keeping its schema. Used by the
    /// month-by-month mode to keep peak memory flat.
    pub fn truncate(&self, table: &str) -> Result<usize> {
        if self.existing_columns(table)?.is_empty() {
            return Ok(0);
        }
        let deleted = self.conn.execute(&format!("DELETE FROM {table}"), [])?;
        Ok(deleted)
    }

    /// Execution id currently loaded for each billing period
    pub fn loaded_execution_ids(&self, table: &str) -> Result<HashMap<String, String>> {
        let existing = self.existing_columns(table)?;
        if !existing.contains("execution_id") || !existing.contains(&self.period_column) {
            return Ok(HashMap::new());
        }

        let sql = format!(
            "SELECT DISTINCT strftime({col}, '%Y-%m') AS billing_period, execution_id \
             FROM {table} WHERE execution_id IS NOT NULL AND {col} IS NOT NULL \
             ORDER BY billing_period DESC",
            col = self.period_column
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut map = HashMap::new();
        for row in rows {
            let (period, execution_id) = row?;
            map.entry(period).or_insert(execution_id);
        }
        Ok(map)
    }

    /// Summary of the loaded table, `None` when it does not exist
    pub fn table_info(&self, table: &str) -> Result<Option<TableInfo>> {
        let existing = self.existing_columns(table)?;
        if existing.is_empty() {
            return Ok(None);
        }

        let row_count: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get(0)
            })?;

        let (min_date, max_date) = if existing.contains(&self.period_column) {
            self.conn.query_row(
                &format!(
                    "SELECT strftime(MIN({col}), '%Y-%m-%d'), strftime(MAX({col}), '%Y-%m-%d') \
                     FROM {table}",
                    col = self.period_column
                ),
                [],
                |row| {
                    Ok((
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, Option<String>>(1)?,
                    ))
                },
            )?
        } else {
            (None, None)
        };

        Ok(Some(TableInfo {
            table: table.to_string(),
            column_count: existing.len(),
            row_count: row_count as usize,
            min_period_date: min_date,
            max_period_date: max_date,
        }))
    }

    /// Billing periods with data available for export, newest first
    pub fn available_periods(&self, table: &str) -> Result<Vec<BillingPeriod>> {
        let existing = self.existing_columns(table)?;
        if !existing.contains(&self.period_column) {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT DISTINCT strftime({col}, '%Y-%m') FROM {table} \
             WHERE {col} IS NOT NULL ORDER BY 1 DESC",
            col = self.period_column
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut periods = Vec::new();
        for row in rows {
            periods.push(row?.parse()?);
        }
        Ok(periods)
    }
}

/// Read the header row of a possibly gzip-compressed CSV file
fn read_csv_header(path: &Path, gzip: bool) -> Result<Vec<String>> {
    let file = std::fs::File::open(path)?;
    let reader: Box<dyn std::io::Read> = if gzip {
        Box::new(flate2::read::GzDecoder::new(file))
    } else {
        Box::new(file)
    };
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(reader);
    let headers = csv_reader
        .headers()
        .map_err(|e| Error::load(format!("cannot read header of {}: {e}", path.display())))?;
    Ok(headers.iter().map(str::to_string).collect())
}

/// Escape a string for embedding in a single-quoted SQL literal
fn sql_escape(s: &str) -> String {
    s.replace('\'', "''")
}
