//! DuckDB-file-backed warehouse implementation

use super::{TableLayout, Warehouse};
use crate::error::{Error, Result};
use crate::types::BillingPeriod;
use async_trait::async_trait;
use duckdb::{params, Connection};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// Warehouse backed by a standalone DuckDB database file.
///
/// Other analytical warehouses slot in behind the same [`Warehouse`]
/// trait; this one keeps the whole pipeline runnable end to end with no
/// remote service involved.
pub struct DuckWarehouse {
    conn: Mutex<Connection>,
    table: String,
    period_column: String,
}

impl DuckWarehouse {
    /// Open or create the warehouse database file
    pub fn open(path: &str, table: impl Into<String>, period_column: impl Into<String>) -> Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(path)?
        };
        Ok(Self {
            conn: Mutex::new(conn),
            table: table.into(),
            period_column: period_column.into(),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::sync("warehouse connection lock poisoned"))
    }

    fn columns(&self, conn: &Connection) -> Result<Vec<String>> {
        let mut stmt = conn
            .prepare("SELECT column_name FROM information_schema.columns WHERE table_name = ?")?;
        let columns = stmt
            .query_map(params![self.table], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(columns)
    }

    /// Add any columns present in the file but absent from the table, so
    /// later exports with a wider schema still load.
    fn align_schema(&self, conn: &Connection, file: &Path) -> Result<()> {
        let existing: HashSet<String> = self.columns(conn)?.into_iter().collect();

        let describe = format!(
            "DESCRIBE SELECT * FROM read_parquet('{}')",
            escape(&file.display().to_string())
        );
        let mut stmt = conn.prepare(&describe)?;
        let incoming = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        for (name, column_type) in incoming {
            if !existing.contains(&name) {
                debug!(column = %name, %column_type, "adding column to warehouse table");
                conn.execute_batch(&format!(
                    "ALTER TABLE {} ADD COLUMN {name} {column_type};",
                    self.table
                ))?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Warehouse for DuckWarehouse {
    async fn table_exists(&self) -> Result<bool> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM information_schema.tables WHERE table_name = ?",
            params![self.table],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    async fn loaded_execution_ids(&self) -> Result<HashMap<String, String>> {
        if !self.table_exists().await? {
            return Ok(HashMap::new());
        }
        let conn = self.lock()?;
        let sql = format!(
            "SELECT DISTINCT strftime({col}, '%Y-%m') AS billing_period, execution_id \
             FROM {table} WHERE execution_id IS NOT NULL AND {col} IS NOT NULL \
             ORDER BY billing_period DESC",
            col = self.period_column,
            table = self.table
        );
        let mut stmt = conn.prepare(&sql)?;
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

    async fn create_table_from_parquet(&self, file: &Path, layout: &TableLayout) -> Result<()> {
        let conn = self.lock()?;
        // Schema only; the rows come through load_parquet afterwards.
        conn.execute_batch(&format!(
            "CREATE TABLE {} AS SELECT * FROM read_parquet('{}') LIMIT 0;",
            self.table,
            escape(&file.display().to_string())
        ))?;
        // DuckDB has no table partitioning DDL; the layout matters for
        // backends that do.
        info!(
            table = %self.table,
            partition = %layout.partition_field,
            cluster = %layout.cluster_field,
            "created warehouse table from parquet schema"
        );
        Ok(())
    }

    async fn delete_period(&self, period: &BillingPeriod) -> Result<usize> {
        let conn = self.lock()?;
        let predicate = BillingPeriod::predicate(&self.period_column);
        let (year, month) = period.predicate_params();
        let deleted = conn.execute(
            &format!("DELETE FROM {} WHERE {predicate}", self.table),
            params![year, month],
        )?;
        Ok(deleted)
    }

    async fn load_parquet(&self, file: &Path) -> Result<usize> {
        let conn = self.lock()?;
        self.align_schema(&conn, file)?;
        let rows = conn.execute(
            &format!(
                "INSERT INTO {} BY NAME SELECT * FROM read_parquet('{}')",
                self.table,
                escape(&file.display().to_string())
            ),
            [],
        )?;
        Ok(rows)
    }
}

fn escape(s: &str) -> String {
    s.replace('\'', "''")
}
