//! Decoding of `ovs-vsctl` output
//!
//! Two shapes come back from the database client:
//!
//! - `get` on a map column prints `{key=value, key="quoted value"}`,
//!   decoded by [`parse_db_map`].
//! - `--format=json list|find` prints `{"headings": [...], "data": [[...]]}`,
//!   decoded by [`TabularResult::parse`].
//!
//! JSON cells use the OVSDB encoding: scalars stand for themselves, while
//! sets, maps and uuids are tagged two-element arrays (`["set", [...]]`,
//! `["map", [[k, v], ...]]`, `["uuid", "..."]`). An unset optional column
//! is an empty set, and a one-element set is usually sent bare. Every cell
//! is normalized into a [`DbValue`] here, so `["set", []]` and `[]` are both
//! [`DbValue::Absent`] and `["set", [5]]` and `5` are both `Integer(5)`.

use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

/// Errors decoding database output
#[derive(Debug, Error)]
pub enum DbParseError {
    /// Output was not valid JSON of the expected shape
    #[error("invalid JSON table: {0}")]
    Json(#[from] serde_json::Error),

    /// A requested column is not among the headings
    #[error("column '{0}' not present in result")]
    UnknownColumn(String),

    /// A row has fewer cells than headings
    #[error("row {row} has {width} cells, expected {expected}")]
    ShortRow {
        row: usize,
        width: usize,
        expected: usize,
    },

    /// A cell is not a recognized OVSDB encoding
    #[error("unrecognized cell encoding: {0}")]
    UnrecognizedCell(String),
}

/// Parses `{key=value, key="value"}` as printed by `ovs-vsctl get`.
///
/// One pair of surrounding braces is stripped, entries are split on `", "`
/// and then on the first `=`, and surrounding double quotes are removed from
/// values. Entries without `=` are skipped.
pub fn parse_db_map(output: &str) -> HashMap<String, String> {
    let trimmed = output.trim();
    let body = trimmed
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .unwrap_or(trimmed);

    body.split(", ")
        .filter_map(|entry| entry.split_once('='))
        .map(|(key, value)| (key.to_string(), value.trim_matches('"').to_string()))
        .collect()
}

/// A normalized database cell
#[derive(Debug, Clone, PartialEq)]
pub enum DbValue {
    /// Unset optional value (empty set, `[]` or null)
    Absent,
    /// Integer atom
    Integer(i64),
    /// Real atom
    Real(f64),
    /// Boolean atom
    Bool(bool),
    /// String atom
    String(String),
    /// Row reference
    Uuid(String),
    /// Set with two or more members
    Set(Vec<DbValue>),
    /// Map, with atoms rendered as strings
    Map(BTreeMap<String, String>),
}

impl DbValue {
    /// Normalizes an OVSDB JSON cell.
    pub fn from_json(value: &Value) -> Result<Self, DbParseError> {
        match value {
            Value::Null => Ok(DbValue::Absent),
            Value::Bool(b) => Ok(DbValue::Bool(*b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Ok(DbValue::Integer(i)),
                None => n
                    .as_f64()
                    .map(DbValue::Real)
                    .ok_or_else(|| DbParseError::UnrecognizedCell(n.to_string())),
            },
            Value::String(s) => Ok(DbValue::String(s.clone())),
            Value::Array(items) => Self::from_tagged(items, value),
            Value::Object(_) => Err(DbParseError::UnrecognizedCell(value.to_string())),
        }
    }

    fn from_tagged(items: &[Value], whole: &Value) -> Result<Self, DbParseError> {
        let (tag, inner) = match items {
            [] => return Ok(DbValue::Absent),
            [Value::String(tag), inner] => (tag.as_str(), inner),
            _ => return Err(DbParseError::UnrecognizedCell(whole.to_string())),
        };

        match (tag, inner) {
            ("set", Value::Array(members)) => match members.as_slice() {
                [] => Ok(DbValue::Absent),
                [single] => Self::from_json(single),
                _ => members
                    .iter()
                    .map(Self::from_json)
                    .collect::<Result<Vec<_>, _>>()
                    .map(DbValue::Set),
            },
            // Tolerate a bare member in place of a one-element list
            ("set", member) => Self::from_json(member),
            ("map", Value::Array(pairs)) => pairs
                .iter()
                .map(|pair| match pair.as_array().map(Vec::as_slice) {
                    Some([key, value]) => Ok((atom_string(key)?, atom_string(value)?)),
                    _ => Err(DbParseError::UnrecognizedCell(pair.to_string())),
                })
                .collect::<Result<BTreeMap<_, _>, _>>()
                .map(DbValue::Map),
            ("uuid" | "named-uuid", Value::String(uuid)) => Ok(DbValue::Uuid(uuid.clone())),
            _ => Err(DbParseError::UnrecognizedCell(whole.to_string())),
        }
    }

    /// True for an unset value
    pub fn is_absent(&self) -> bool {
        matches!(self, DbValue::Absent)
    }

    /// Integer value, if this is an integer
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            DbValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// String value, if this is a string or uuid
    pub fn as_str(&self) -> Option<&str> {
        match self {
            DbValue::String(s) | DbValue::Uuid(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Map value. An absent map is returned as `None`.
    pub fn as_map(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            DbValue::Map(map) => Some(map),
            _ => None,
        }
    }
}

fn atom_string(value: &Value) -> Result<String, DbParseError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Array(items) => match items.as_slice() {
            [Value::String(tag), Value::String(uuid)] if tag == "uuid" => Ok(uuid.clone()),
            _ => Err(DbParseError::UnrecognizedCell(value.to_string())),
        },
        _ => Err(DbParseError::UnrecognizedCell(value.to_string())),
    }
}

#[derive(Debug, Deserialize)]
struct RawTable {
    headings: Vec<String>,
    #[serde(default)]
    data: Vec<Vec<Value>>,
}

/// Decoded `--format=json` table
#[derive(Debug, Clone, PartialEq)]
pub struct TabularResult {
    headings: Vec<String>,
    rows: Vec<Vec<DbValue>>,
}

impl TabularResult {
    /// Parses and normalizes a JSON table.
    pub fn parse(output: &str) -> Result<Self, DbParseError> {
        let raw: RawTable = serde_json::from_str(output)?;
        let rows = raw
            .data
            .iter()
            .map(|row| row.iter().map(DbValue::from_json).collect())
            .collect::<Result<Vec<Vec<_>>, _>>()?;

        Ok(Self {
            headings: raw.headings,
            rows,
        })
    }

    /// Column names, in output order
    pub fn headings(&self) -> &[String] {
        &self.headings
    }

    /// All rows, in output order
    pub fn rows(&self) -> &[Vec<DbValue>] {
        &self.rows
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when no rows were returned
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of `column` among the headings
    pub fn column_index(&self, column: &str) -> Result<usize, DbParseError> {
        self.headings
            .iter()
            .position(|h| h == column)
            .ok_or_else(|| DbParseError::UnknownColumn(column.to_string()))
    }

    /// Extracts `columns`, by name, from every row.
    pub fn select(&self, columns: &[&str]) -> Result<Vec<Vec<&DbValue>>, DbParseError> {
        let positions = columns
            .iter()
            .map(|c| self.column_index(c))
            .collect::<Result<Vec<_>, _>>()?;

        self.rows
            .iter()
            .enumerate()
            .map(|(row_idx, row)| {
                positions
                    .iter()
                    .map(|&pos| {
                        row.get(pos).ok_or(DbParseError::ShortRow {
                            row: row_idx,
                            width: row.len(),
                            expected: self.headings.len(),
                        })
                    })
                    .collect()
            })
            .collect()
    }
}
