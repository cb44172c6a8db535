//! Schema registry: unified schemas, live-table deltas, header mappings

use super::normalize::{normalize_column_name, storage_type_for};
use crate::manifest::{ManifestColumn, ManifestRecord};
use std::collections::{HashMap, HashSet};

/// One normalized column in the destination table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    /// Vendor-native identifier, e.g. `identity/LineItemId`
    pub original_name: String,
    /// SQL-safe, collision-free table column name
    pub normalized_name: String,
    pub category: String,
    pub vendor_type: String,
    /// DuckDB type the column is stored as
    pub storage_type: &'static str,
}

/// Derives table schemas from manifest column lists.
///
/// Collision resolution is scoped per call: within one manifest's column
/// list the same base name gets `_1`, `_2`, ... suffixes in encounter
/// order. Across manifests the stable dedup key is the original name,
/// never the normalized one.
#[derive(Debug, Default)]
pub struct SchemaRegistry;

impl SchemaRegistry {
    pub fn new() -> Self {
        Self
    }

    /// Merge the column lists of many manifests into one unified schema.
    ///
    /// Used when creating a brand-new table, so it is pre-populated with
    /// every column known across history and later manifests rarely need
    /// an ALTER. First occurrence of an original name wins; the result is
    /// sorted by (category, normalized name) for deterministic DDL.
    pub fn unify(&self, manifests: &[&ManifestRecord]) -> Vec<ColumnDef> {
        let mut by_original: HashMap<String, ColumnDef> = HashMap::new();
        let mut order: Vec<String> = Vec::new();
        let mut seen_names: HashMap<String, u32> = HashMap::new();

        for manifest in manifests {
            for col in &manifest.columns {
                let original_name = col.original_name();
                if by_original.contains_key(&original_name) {
                    continue;
                }
                let normalized = resolve_collision(
                    normalize_column_name(&original_name),
                    &mut seen_names,
                );
                order.push(original_name.clone());
                by_original.insert(original_name.clone(), column_def(col, normalized));
            }
        }

        let mut columns: Vec<ColumnDef> = order
            .into_iter()
            .filter_map(|name| by_original.remove(&name))
            .collect();
        columns.sort_by(|a, b| {
            (a.category.as_str(), a.normalized_name.as_str())
                .cmp(&(b.category.as_str(), b.normalized_name.as_str()))
        });
        columns
    }

    /// Columns from one manifest that are not yet present in the live
    /// table. Collision resolution runs over the manifest's full column
    /// list first so suffixes stay stable, then existing names are
    /// filtered out.
    pub fn diff(
        &self,
        existing_columns: &HashSet<String>,
        manifest_columns: &[ManifestColumn],
    ) -> Vec<ColumnDef> {
        self.process_columns(manifest_columns)
            .into_iter()
            .filter(|col| !existing_columns.contains(&col.normalized_name))
            .collect()
    }

    /// Map from original column names to normalized table column names,
    /// used to translate a data file's header at load time.
    pub fn column_mapping(&self, manifest_columns: &[ManifestColumn]) -> HashMap<String, String> {
        self.process_columns(manifest_columns)
            .into_iter()
            .map(|col| (col.original_name, col.normalized_name))
            .collect()
    }

    /// CREATE TABLE statement for a schema, with the execution tag column
    /// first. Normalized names are SQL-safe by construction, so no
    /// quoting is needed.
    pub fn create_table_sql(&self, table: &str, schema: &[ColumnDef]) -> String {
        let mut defs = vec!["    execution_id VARCHAR".to_string()];
        defs.extend(
            schema
                .iter()
                .map(|col| format!("    {} {}", col.normalized_name, col.storage_type)),
        );
        format!(
            "CREATE TABLE IF NOT EXISTS {table} (\n{}\n);",
            defs.join(",\n")
        )
    }

    /// One ALTER TABLE ADD COLUMN statement per new column; existing rows
    /// get NULL for the added columns.
    pub fn alter_table_sql(&self, table: &str, new_columns: &[ColumnDef]) -> Vec<String> {
        new_columns
            .iter()
            .map(|col| {
                format!(
                    "ALTER TABLE {table} ADD COLUMN {} {};",
                    col.normalized_name, col.storage_type
                )
            })
            .collect()
    }

    /// Resolve one manifest's column list into definitions with
    /// per-manifest collision suffixes.
    fn process_columns(&self, manifest_columns: &[ManifestColumn]) -> Vec<ColumnDef> {
        let mut seen_names: HashMap<String, u32> = HashMap::new();
        manifest_columns
            .iter()
            .map(|col| {
                let normalized = resolve_collision(
                    normalize_column_name(&col.original_name()),
                    &mut seen_names,
                );
                column_def(col, normalized)
            })
            .collect()
    }
}

fn column_def(col: &ManifestColumn, normalized_name: String) -> ColumnDef {
    ColumnDef {
        original_name: col.original_name(),
        normalized_name,
        category: col.category.clone(),
        vendor_type: col.vendor_type.clone(),
        storage_type: storage_type_for(&col.category, &col.vendor_type),
    }
}

/// Append `_N` suffixes to duplicate normalized names, N increasing in
/// encounter order.
fn resolve_collision(base: String, seen: &mut HashMap<String, u32>) -> String {
    match seen.get_mut(&base) {
        Some(count) => {
            *count += 1;
            format!("{base}_{count}")
        }
        None => {
            seen.insert(base.clone(), 0);
            base
        }
    }
}
