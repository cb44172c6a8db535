//! Column name normalization and storage type mapping

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

static CAMEL_BOUNDARY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([a-z0-9])([A-Z])").expect("valid regex"));

static NON_ALNUM: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").expect("valid regex"));

/// SQL keywords that cannot be used bare as column names
static RESERVED_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "group", "order", "select", "from", "where", "join", "inner", "outer", "left", "right",
        "on", "as", "and", "or", "not", "in", "exists", "between", "like", "is", "null", "true",
        "false", "case", "when", "then", "else", "end", "union", "intersect", "except", "all",
        "distinct", "limit", "offset", "having", "by", "asc", "desc", "create", "table", "insert",
        "update", "delete", "alter", "drop", "index", "view", "database", "schema", "column",
        "primary", "key", "foreign", "references", "constraint", "unique", "check", "default",
        "grant", "revoke", "user", "role", "commit", "rollback", "begin", "transaction", "start",
    ]
    .into_iter()
    .collect()
});

/// Normalize a vendor column identifier into a SQL-safe column name.
///
/// Total and deterministic: splits camelCase boundaries, lowercases,
/// collapses every non-alphanumeric run to a single underscore, trims,
/// and patches the remaining edge cases (empty result, leading digit,
/// reserved word).
///
/// ```
/// use costpipe::schema::normalize_column_name;
///
/// assert_eq!(
///     normalize_column_name("aws:autoscaling:groupName"),
///     "aws_autoscaling_group_name"
/// );
/// assert_eq!(normalize_column_name("group"), "group_col");
/// assert_eq!(normalize_column_name("1abc"), "col_1abc");
/// ```
pub fn normalize_column_name(original: &str) -> String {
    let name = CAMEL_BOUNDARY.replace_all(original, "${1}_${2}");
    let name = name.to_lowercase();
    let name = NON_ALNUM.replace_all(&name, "_");
    let name = name.trim_matches('_').to_string();

    let name = if name.is_empty() {
        "unknown_column".to_string()
    } else {
        name
    };

    let name = if name.starts_with(|c: char| c.is_ascii_digit()) {
        format!("col_{name}")
    } else {
        name
    };

    if RESERVED_WORDS.contains(name.as_str()) {
        format!("{name}_col")
    } else {
        name
    }
}

/// Map a vendor column type to the storage type used in the local table.
///
/// Resource tag values are inconsistent across rows (numbers, dates and
/// free text under the same key), so the tags category is forced to
/// VARCHAR regardless of the declared type.
pub fn storage_type_for(category: &str, vendor_type: &str) -> &'static str {
    if is_tags_category(category) {
        return "VARCHAR";
    }
    match vendor_type {
        "BigDecimal" | "OptionalBigDecimal" => "DECIMAL(18,2)",
        "DateTime" => "TIMESTAMP",
        // String, OptionalString, Interval and anything unknown
        _ => "VARCHAR",
    }
}

fn is_tags_category(category: &str) -> bool {
    matches!(category, "resourceTags" | "tags")
}
