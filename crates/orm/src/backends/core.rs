//! Core Database Backend Traits
//!
//! This module defines the narrow contract the engine needs from a driver:
//! execute a statement, fetch rows, and open a transaction. Everything above
//! this seam is driver-agnostic.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value as JsonValue;

use crate::config::FullConfig;
use crate::error::{OrmError, OrmResult};

/// Column-keyed attribute map used for rows, partial updates and hook state
pub type Attributes = BTreeMap<String, DatabaseValue>;

/// Outcome of a statement that does not return rows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecResult {
    pub rows_affected: u64,
    pub last_insert_id: Option<i64>,
}

/// Minimal statement executor shared by pools and transactions
#[async_trait]
pub trait DatabaseExecutor: Send + Sync {
    /// Execute a statement and return the affected row count
    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> OrmResult<ExecResult>;

    /// Execute a query and return the result rows
    async fn fetch_all(&self, sql: &str, params: &[DatabaseValue]) -> OrmResult<Vec<Row>>;
}

/// Abstract database connection pool trait
#[async_trait]
pub trait DatabasePool: DatabaseExecutor {
    /// Begin a transaction from the pool
    async fn begin_transaction(&self) -> OrmResult<Box<dyn DatabaseTransaction>>;

    /// Close the pool
    async fn close(&self) -> OrmResult<()>;
}

/// Abstract database transaction trait
#[async_trait]
pub trait DatabaseTransaction: DatabaseExecutor {
    /// Commit the transaction
    async fn commit(self: Box<Self>) -> OrmResult<()>;

    /// Rollback the transaction
    async fn rollback(self: Box<Self>) -> OrmResult<()>;
}

/// Opens a pool for one resolved read or write configuration.
///
/// The registry calls this at most once per configuration entry.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, config: &FullConfig) -> OrmResult<Arc<dyn DatabasePool>>;
}

/// One fetched row, columns kept in result-set order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<DatabaseValue>,
}

impl Row {
    pub fn new(columns: Vec<String>, values: Vec<DatabaseValue>) -> Self {
        Self { columns, values }
    }

    /// Get a column value by index
    pub fn get_by_index(&self, index: usize) -> Option<&DatabaseValue> {
        self.values.get(index)
    }

    /// Get a column value by name
    pub fn get_by_name(&self, name: &str) -> Option<&DatabaseValue> {
        self.columns
            .iter()
            .position(|column| column == name)
            .and_then(|index| self.values.get(index))
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    /// Convert row to an attribute map
    pub fn to_map(&self) -> Attributes {
        self.columns
            .iter()
            .cloned()
            .zip(self.values.iter().cloned())
            .collect()
    }

    pub fn into_map(self) -> Attributes {
        self.columns.into_iter().zip(self.values).collect()
    }
}

impl From<Attributes> for Row {
    fn from(map: Attributes) -> Self {
        let (columns, values) = map.into_iter().unzip();
        Self { columns, values }
    }
}

/// Database value enumeration for type-safe parameter binding and attribute comparison
#[derive(Debug, Clone, PartialEq, Default)]
pub enum DatabaseValue {
    #[default]
    Null,
    Bool(bool),
    Int64(i64),
    Float64(f64),
    String(String),
    DateTime(DateTime<Utc>),
    Bytes(Vec<u8>),
}

impl DatabaseValue {
    /// Check if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, DatabaseValue::Null)
    }

    /// Zero values are treated as "not provided" by attribute lookups and struct updates
    pub fn is_zero(&self) -> bool {
        match self {
            DatabaseValue::Null => true,
            DatabaseValue::Bool(b) => !b,
            DatabaseValue::Int64(i) => *i == 0,
            DatabaseValue::Float64(f) => *f == 0.0,
            DatabaseValue::String(s) => s.is_empty(),
            DatabaseValue::DateTime(dt) => dt.timestamp() == 0 && dt.timestamp_subsec_nanos() == 0,
            DatabaseValue::Bytes(b) => b.is_empty(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            DatabaseValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            DatabaseValue::Int64(i) => Some(*i),
            DatabaseValue::Float64(f) if f.fract() == 0.0 => Some(*f as i64),
            DatabaseValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            DatabaseValue::Int64(i) => Some(*i as f64),
            DatabaseValue::Float64(f) => Some(*f),
            DatabaseValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Convert to JSON value
    pub fn to_json(&self) -> JsonValue {
        match self {
            DatabaseValue::Null => JsonValue::Null,
            DatabaseValue::Bool(b) => JsonValue::Bool(*b),
            DatabaseValue::Int64(i) => JsonValue::Number(serde_json::Number::from(*i)),
            DatabaseValue::Float64(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            DatabaseValue::String(s) => JsonValue::String(s.clone()),
            DatabaseValue::DateTime(dt) => JsonValue::String(format_timestamp(dt)),
            DatabaseValue::Bytes(b) => JsonValue::Array(
                b.iter()
                    .map(|&x| JsonValue::Number(serde_json::Number::from(x)))
                    .collect(),
            ),
        }
    }

    /// Create DatabaseValue from JSON value
    pub fn from_json(json: JsonValue) -> Self {
        match json {
            JsonValue::Null => DatabaseValue::Null,
            JsonValue::Bool(b) => DatabaseValue::Bool(b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    DatabaseValue::Int64(i)
                } else if let Some(f) = n.as_f64() {
                    DatabaseValue::Float64(f)
                } else {
                    DatabaseValue::Null
                }
            }
            JsonValue::String(s) => match DateTime::parse_from_rfc3339(&s) {
                Ok(dt) => DatabaseValue::DateTime(dt.with_timezone(&Utc)),
                Err(_) => DatabaseValue::String(s),
            },
            JsonValue::Array(items) => {
                let bytes: Option<Vec<u8>> = items
                    .iter()
                    .map(|item| item.as_u64().and_then(|b| u8::try_from(b).ok()))
                    .collect();
                match bytes {
                    Some(bytes) => DatabaseValue::Bytes(bytes),
                    None => DatabaseValue::String(JsonValue::Array(items).to_string()),
                }
            }
            JsonValue::Object(_) => DatabaseValue::String(json.to_string()),
        }
    }

    /// Render as an inline SQL literal. Only used by the debug rendering in `to_raw_sql`.
    pub fn to_sql_literal(&self) -> String {
        match self {
            DatabaseValue::Null => "NULL".to_string(),
            DatabaseValue::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            DatabaseValue::Int64(i) => i.to_string(),
            DatabaseValue::Float64(f) => f.to_string(),
            DatabaseValue::String(s) => format!("'{}'", s.replace('\'', "''")),
            DatabaseValue::DateTime(dt) => format!("'{}'", format_timestamp(dt)),
            DatabaseValue::Bytes(b) => {
                let hex: String = b.iter().map(|byte| format!("{:02x}", byte)).collect();
                format!("X'{}'", hex)
            }
        }
    }

    /// Stable string key used to match parents with eager-loaded children
    pub(crate) fn key_string(&self) -> String {
        match self {
            DatabaseValue::Null => String::new(),
            DatabaseValue::Bool(b) => b.to_string(),
            DatabaseValue::Int64(i) => i.to_string(),
            DatabaseValue::Float64(f) if f.fract() == 0.0 => (*f as i64).to_string(),
            DatabaseValue::Float64(f) => f.to_string(),
            DatabaseValue::String(s) => s.clone(),
            DatabaseValue::DateTime(dt) => format_timestamp(dt),
            DatabaseValue::Bytes(b) => format!("{:?}", b),
        }
    }
}

/// Timestamps are bound and compared in one canonical RFC 3339 form
pub(crate) fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

impl From<bool> for DatabaseValue {
    fn from(value: bool) -> Self {
        DatabaseValue::Bool(value)
    }
}

impl From<i32> for DatabaseValue {
    fn from(value: i32) -> Self {
        DatabaseValue::Int64(i64::from(value))
    }
}

impl From<i64> for DatabaseValue {
    fn from(value: i64) -> Self {
        DatabaseValue::Int64(value)
    }
}

impl From<u32> for DatabaseValue {
    fn from(value: u32) -> Self {
        DatabaseValue::Int64(i64::from(value))
    }
}

impl From<usize> for DatabaseValue {
    fn from(value: usize) -> Self {
        DatabaseValue::Int64(value as i64)
    }
}

impl From<f32> for DatabaseValue {
    fn from(value: f32) -> Self {
        DatabaseValue::Float64(f64::from(value))
    }
}

impl From<f64> for DatabaseValue {
    fn from(value: f64) -> Self {
        DatabaseValue::Float64(value)
    }
}

impl From<String> for DatabaseValue {
    fn from(value: String) -> Self {
        DatabaseValue::String(value)
    }
}

impl From<&str> for DatabaseValue {
    fn from(value: &str) -> Self {
        DatabaseValue::String(value.to_string())
    }
}

impl From<&String> for DatabaseValue {
    fn from(value: &String) -> Self {
        DatabaseValue::String(value.clone())
    }
}

impl From<Vec<u8>> for DatabaseValue {
    fn from(value: Vec<u8>) -> Self {
        DatabaseValue::Bytes(value)
    }
}

impl From<DateTime<Utc>> for DatabaseValue {
    fn from(value: DateTime<Utc>) -> Self {
        DatabaseValue::DateTime(value)
    }
}

impl<T> From<Option<T>> for DatabaseValue
where
    T: Into<DatabaseValue>,
{
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => DatabaseValue::Null,
        }
    }
}

/// Conversion into a positional argument list.
///
/// Implemented for `()`, vectors, arrays and slices of anything convertible into
/// [`DatabaseValue`], so `where_("name = ?", ["a"])` and `where_("age", vec![">".into(), 18.into()])`
/// both read naturally.
pub trait IntoArgs {
    fn into_args(self) -> Vec<DatabaseValue>;
}

impl IntoArgs for () {
    fn into_args(self) -> Vec<DatabaseValue> {
        Vec::new()
    }
}

impl<T: Into<DatabaseValue>> IntoArgs for Vec<T> {
    fn into_args(self) -> Vec<DatabaseValue> {
        self.into_iter().map(Into::into).collect()
    }
}

impl<T: Into<DatabaseValue>, const N: usize> IntoArgs for [T; N] {
    fn into_args(self) -> Vec<DatabaseValue> {
        self.into_iter().map(Into::into).collect()
    }
}

impl<T: Into<DatabaseValue> + Clone> IntoArgs for &[T] {
    fn into_args(self) -> Vec<DatabaseValue> {
        self.iter().cloned().map(Into::into).collect()
    }
}

/// Build an argument vector from heterogeneous values
#[macro_export]
macro_rules! args {
    () => { ::std::vec::Vec::<$crate::DatabaseValue>::new() };
    ($($value:expr),+ $(,)?) => {
        vec![$($crate::DatabaseValue::from($value)),+]
    };
}

/// Build an [`Attributes`] map: `attrs! { "name" => "x", "age" => 3 }`
#[macro_export]
macro_rules! attrs {
    () => { $crate::Attributes::new() };
    ($($column:expr => $value:expr),+ $(,)?) => {{
        let mut attributes = $crate::Attributes::new();
        $(attributes.insert(::std::string::String::from($column), $crate::DatabaseValue::from($value));)+
        attributes
    }};
}

/// Convenience for turning a plain error message into a driver error
pub(crate) fn driver_error(message: impl Into<String>) -> OrmError {
    OrmError::Database(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_zero_values() {
        assert!(DatabaseValue::Null.is_zero());
        assert!(DatabaseValue::from(0).is_zero());
        assert!(DatabaseValue::from("").is_zero());
        assert!(DatabaseValue::from(false).is_zero());
        assert!(!DatabaseValue::from("a").is_zero());
        assert!(!DatabaseValue::from(Utc::now()).is_zero());
    }

    #[test]
    fn test_timestamps_survive_json() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        let value = DatabaseValue::from(ts);
        assert_eq!(DatabaseValue::from_json(value.to_json()), value);
    }

    #[test]
    fn test_literal_escapes_quotes() {
        assert_eq!(DatabaseValue::from("O'Brien").to_sql_literal(), "'O''Brien'");
        assert_eq!(DatabaseValue::Null.to_sql_literal(), "NULL");
    }

    #[test]
    fn test_row_lookup_by_name() {
        let row = Row::new(
            vec!["id".to_string(), "name".to_string()],
            vec![DatabaseValue::from(7), DatabaseValue::from("a")],
        );
        assert_eq!(row.get_by_name("name"), Some(&DatabaseValue::from("a")));
        assert_eq!(row.get_by_index(0), Some(&DatabaseValue::from(7)));
        assert!(row.get_by_name("missing").is_none());
        assert_eq!(row.to_map().len(), 2);
    }

    #[test]
    fn test_args_macro_mixes_types() {
        let args = crate::args![">", 18, None::<i64>];
        assert_eq!(
            args,
            vec![
                DatabaseValue::from(">"),
                DatabaseValue::from(18),
                DatabaseValue::Null
            ]
        );
    }
}
