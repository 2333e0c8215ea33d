//! Core Database Backend Traits
//!
//! The relationship engine never talks to a driver directly. Everything it
//! needs from the database goes through [`DatabaseConnection`] and
//! [`DatabaseTransaction`], and every value crossing that boundary is a
//! [`DatabaseValue`].

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use super::grammar::Grammar;
use super::DatabaseBackendType;
use crate::error::OrmResult;

/// Abstract database connection
///
/// Implementations are expected to be pool-backed: `select` and `execute`
/// take `&self`, and a transaction pins one physical connection until it is
/// committed or rolled back.
#[async_trait]
pub trait DatabaseConnection: Send + Sync {
    /// Run a query and return every row
    async fn select(&self, sql: &str, bindings: &[DatabaseValue]) -> OrmResult<Vec<Row>>;

    /// Run a statement and return the affected row count
    async fn execute(&self, sql: &str, bindings: &[DatabaseValue]) -> OrmResult<u64>;

    /// Begin a transaction on a dedicated connection
    async fn begin_transaction(&self) -> OrmResult<Box<dyn DatabaseTransaction>>;

    /// SQL grammar for this connection's dialect
    fn grammar(&self) -> &Grammar;

    /// Driver behind this connection
    fn driver(&self) -> DatabaseBackendType {
        self.grammar().backend()
    }
}

/// Abstract database transaction
#[async_trait]
pub trait DatabaseTransaction: Send {
    /// Run a query inside the transaction
    async fn select(&mut self, sql: &str, bindings: &[DatabaseValue]) -> OrmResult<Vec<Row>>;

    /// Run a statement inside the transaction
    async fn execute(&mut self, sql: &str, bindings: &[DatabaseValue]) -> OrmResult<u64>;

    /// Commit the transaction
    async fn commit(self: Box<Self>) -> OrmResult<()>;

    /// Roll the transaction back
    async fn rollback(self: Box<Self>) -> OrmResult<()>;
}

/// One result row, columns in select order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<(String, DatabaseValue)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a column value
    pub fn push(&mut self, column: impl Into<String>, value: DatabaseValue) {
        self.columns.push((column.into(), value));
    }

    /// Builder-style variant of [`Row::push`]
    pub fn with(mut self, column: impl Into<String>, value: impl Into<DatabaseValue>) -> Self {
        self.push(column, value.into());
        self
    }

    /// Get a column value by name
    pub fn get(&self, column: &str) -> Option<&DatabaseValue> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    /// Remove a column and return its value
    pub fn take(&mut self, column: &str) -> Option<DatabaseValue> {
        let index = self.columns.iter().position(|(name, _)| name == column)?;
        Some(self.columns.remove(index).1)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Convert row to a JSON object
    pub fn to_json(&self) -> JsonValue {
        let map = self
            .columns
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect();
        JsonValue::Object(map)
    }
}

impl IntoIterator for Row {
    type Item = (String, DatabaseValue);
    type IntoIter = std::vec::IntoIter<(String, DatabaseValue)>;

    fn into_iter(self) -> Self::IntoIter {
        self.columns.into_iter()
    }
}

impl FromIterator<(String, DatabaseValue)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, DatabaseValue)>>(iter: I) -> Self {
        Self {
            columns: iter.into_iter().collect(),
        }
    }
}

/// Database value enumeration for type-safe parameter binding
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseValue {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    String(String),
    Bytes(Vec<u8>),
    Uuid(uuid::Uuid),
    DateTime(chrono::DateTime<chrono::Utc>),
    Date(chrono::NaiveDate),
    Time(chrono::NaiveTime),
    Json(JsonValue),
    Array(Vec<DatabaseValue>),
}

impl DatabaseValue {
    /// Check if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, DatabaseValue::Null)
    }

    /// Scalars can be bound as a single parameter
    pub fn is_scalar(&self) -> bool {
        match self {
            DatabaseValue::Array(_) => false,
            DatabaseValue::Json(json) => !(json.is_object() || json.is_array()),
            _ => true,
        }
    }

    /// Integer view of the value, if it has one
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            DatabaseValue::Int32(i) => Some(i64::from(*i)),
            DatabaseValue::Int64(i) => Some(*i),
            DatabaseValue::String(s) => s.parse().ok(),
            DatabaseValue::Json(JsonValue::Number(n)) => n.as_i64(),
            _ => None,
        }
    }

    /// String view of the value, if it is textual
    pub fn as_str(&self) -> Option<&str> {
        match self {
            DatabaseValue::String(s) => Some(s),
            DatabaseValue::Json(JsonValue::String(s)) => Some(s),
            _ => None,
        }
    }

    /// Convert to JSON value
    pub fn to_json(&self) -> JsonValue {
        match self {
            DatabaseValue::Null => JsonValue::Null,
            DatabaseValue::Bool(b) => JsonValue::Bool(*b),
            DatabaseValue::Int32(i) => JsonValue::Number(serde_json::Number::from(*i)),
            DatabaseValue::Int64(i) => JsonValue::Number(serde_json::Number::from(*i)),
            DatabaseValue::Float64(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            DatabaseValue::String(s) => JsonValue::String(s.clone()),
            DatabaseValue::Bytes(b) => JsonValue::Array(
                b.iter()
                    .map(|&x| JsonValue::Number(serde_json::Number::from(x)))
                    .collect(),
            ),
            DatabaseValue::Uuid(u) => JsonValue::String(u.to_string()),
            DatabaseValue::DateTime(dt) => JsonValue::String(dt.to_rfc3339()),
            DatabaseValue::Date(d) => JsonValue::String(d.to_string()),
            DatabaseValue::Time(t) => JsonValue::String(t.to_string()),
            DatabaseValue::Json(j) => j.clone(),
            DatabaseValue::Array(arr) => JsonValue::Array(arr.iter().map(|v| v.to_json()).collect()),
        }
    }

    /// Create DatabaseValue from JSON value
    ///
    /// Objects and arrays stay JSON documents; strings are kept as plain
    /// strings so that round-tripping a record through serde does not change
    /// the type of text columns.
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
            JsonValue::String(s) => DatabaseValue::String(s),
            json @ (JsonValue::Array(_) | JsonValue::Object(_)) => DatabaseValue::Json(json),
        }
    }
}

impl From<bool> for DatabaseValue {
    fn from(value: bool) -> Self {
        DatabaseValue::Bool(value)
    }
}

impl From<i32> for DatabaseValue {
    fn from(value: i32) -> Self {
        DatabaseValue::Int32(value)
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

impl From<Vec<u8>> for DatabaseValue {
    fn from(value: Vec<u8>) -> Self {
        DatabaseValue::Bytes(value)
    }
}

impl From<uuid::Uuid> for DatabaseValue {
    fn from(value: uuid::Uuid) -> Self {
        DatabaseValue::Uuid(value)
    }
}

impl From<chrono::DateTime<chrono::Utc>> for DatabaseValue {
    fn from(value: chrono::DateTime<chrono::Utc>) -> Self {
        DatabaseValue::DateTime(value)
    }
}

impl From<chrono::NaiveDate> for DatabaseValue {
    fn from(value: chrono::NaiveDate) -> Self {
        DatabaseValue::Date(value)
    }
}

impl From<chrono::NaiveTime> for DatabaseValue {
    fn from(value: chrono::NaiveTime) -> Self {
        DatabaseValue::Time(value)
    }
}

impl From<JsonValue> for DatabaseValue {
    fn from(value: JsonValue) -> Self {
        DatabaseValue::Json(value)
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalar_detection() {
        assert!(DatabaseValue::from(1).is_scalar());
        assert!(DatabaseValue::from("admin").is_scalar());
        assert!(DatabaseValue::Json(json!(3)).is_scalar());
        assert!(!DatabaseValue::Json(json!({"a": 1})).is_scalar());
        assert!(!DatabaseValue::Array(vec![DatabaseValue::from(1)]).is_scalar());
    }

    #[test]
    fn test_json_round_trip_keeps_strings() {
        let value = DatabaseValue::from_json(json!("2024-01-01T00:00:00Z"));
        assert_eq!(value, DatabaseValue::String("2024-01-01T00:00:00Z".into()));

        let value = DatabaseValue::from_json(json!(7));
        assert_eq!(value.as_i64(), Some(7));
    }

    #[test]
    fn test_row_access() {
        let mut row = Row::new().with("id", 1).with("title", "Hello");
        assert_eq!(row.get("title"), Some(&DatabaseValue::from("Hello")));
        assert_eq!(row.take("id"), Some(DatabaseValue::Int32(1)));
        assert_eq!(row.column_names(), vec!["title"]);
    }
}
