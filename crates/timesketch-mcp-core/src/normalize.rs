//! Result table normalization.
//!
//! Turns the raw table returned by a search into records with a stable
//! shape:
//!
//! 1. Present optional columns (`yara_match`, `sha256_hash`) are filled with
//!    [`NOT_AVAILABLE`] where missing.
//! 2. Every `datetime` value is rendered as an ISO-8601 string.
//! 3. Every remaining missing value is filled with [`NOT_AVAILABLE`].
//! 4. With [`ColumnSet::Fixed`], columns are restricted and ordered as
//!    `[identifier?, datetime, data_type, tag, message] + optional columns`.
//!
//! A table's columns are the union of its records' keys; a record lacking a
//! column (or holding `null` for it) has a missing value there.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde_json::Value;

use crate::models::{
    Record, Table, DATA_TYPE, DATETIME, IDENTIFIER, MESSAGE, SHA256_HASH, TAG, YARA_MATCH,
};

/// Sentinel written into every missing cell.
pub const NOT_AVAILABLE: &str = "N/A";

/// Optional columns kept in the fixed column set when present.
pub const OPTIONAL_COLUMNS: &[&str] = &[YARA_MATCH, SHA256_HASH];

/// Columns always emitted by the fixed column set, in order.
pub const REQUIRED_COLUMNS: &[&str] = &[DATETIME, DATA_TYPE, TAG, MESSAGE];

/// Which columns survive normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnSet {
    /// `[identifier?, datetime, data_type, tag, message] + present optional columns`.
    Fixed,
    /// Every column of the table.
    All,
}

/// Normalize a result table. See the module docs for the steps.
pub fn normalize(table: Table, columns: ColumnSet) -> Table {
    if table.is_empty() {
        return table;
    }

    let present = table_columns(&table);
    let selected: Vec<String> = match columns {
        ColumnSet::All => present.clone(),
        ColumnSet::Fixed => fixed_columns(&present),
    };

    table
        .into_iter()
        .map(|record| normalize_record(record, &present, &selected))
        .collect()
}

/// The union of all record keys, in first-seen order.
pub fn table_columns(table: &[Record]) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for record in table {
        for key in record.keys() {
            if !columns.iter().any(|c| c == key) {
                columns.push(key.clone());
            }
        }
    }
    columns
}

fn fixed_columns(present: &[String]) -> Vec<String> {
    let has = |name: &str| present.iter().any(|c| c == name);

    let mut selected = Vec::new();
    if has(IDENTIFIER) {
        selected.push(IDENTIFIER.to_string());
    }
    selected.extend(REQUIRED_COLUMNS.iter().map(|c| c.to_string()));
    selected.extend(
        OPTIONAL_COLUMNS
            .iter()
            .filter(|c| has(c))
            .map(|c| c.to_string()),
    );
    selected
}

fn normalize_record(mut record: Record, present: &[String], selected: &[String]) -> Record {
    if let Some(value) = record.get_mut(DATETIME) {
        *value = format_datetime(value);
    }

    // Widen to the table's columns so absent cells become explicit misses.
    for column in present {
        if !record.contains_key(column) {
            record.insert(column.clone(), Value::Null);
        }
    }

    let mut out = Record::new();
    for column in selected {
        let value = match record.remove(column) {
            Some(Value::Null) | None => Value::String(NOT_AVAILABLE.to_string()),
            Some(v) => v,
        };
        out.insert(column.clone(), value);
    }
    out
}

/// Render a `datetime` cell as an ISO-8601 string.
///
/// Accepts RFC 3339 strings, naive `YYYY-MM-DD[T ]HH:MM:SS[.f]` strings
/// (taken as UTC), and integers as microseconds since the epoch. `null` stays
/// `null`; anything unparseable is returned unchanged.
pub fn format_datetime(value: &Value) -> Value {
    let parsed = match value {
        Value::String(s) => parse_datetime_str(s),
        Value::Number(n) => n.as_i64().and_then(DateTime::<Utc>::from_timestamp_micros),
        _ => None,
    };

    match parsed {
        Some(dt) => Value::String(dt.to_rfc3339_opts(SecondsFormat::AutoSi, false)),
        None => value.clone(),
    }
}

fn parse_datetime_str(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}
