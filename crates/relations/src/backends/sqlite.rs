//! SQLite Backend Implementation
//!
//! SQLite values carry their storage class at runtime, so decoding follows
//! the value's own type (INTEGER, REAL, TEXT, BLOB) rather than the declared
//! column type.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Sqlite};
use tracing::debug;

use super::core::*;
use super::grammar::Grammar;
use crate::error::{OrmResult, RelationError};

/// SQLite connection backed by a sqlx pool
#[derive(Clone)]
pub struct SqliteConnection {
    pool: Arc<Pool<Sqlite>>,
    grammar: Grammar,
}

impl SqliteConnection {
    pub fn new(pool: Arc<Pool<Sqlite>>) -> Self {
        Self {
            pool,
            grammar: Grammar::sqlite(),
        }
    }

    /// Connect to a SQLite database URL, creating the file if needed
    pub async fn connect(database_url: &str, max_connections: u32) -> OrmResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| RelationError::Configuration(format!("Invalid SQLite URL: {}", e)))?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| RelationError::Database(format!("Failed to create SQLite pool: {}", e)))?;

        debug!("SQLite pool created for {}", database_url);
        Ok(Self::new(Arc::new(pool)))
    }

    /// Single-connection in-memory database
    ///
    /// Every pooled connection to `:memory:` is its own database, so the pool
    /// is pinned to exactly one connection that is never recycled.
    pub async fn in_memory() -> OrmResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| RelationError::Configuration(format!("Invalid SQLite URL: {}", e)))?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| RelationError::Database(format!("Failed to open in-memory SQLite: {}", e)))?;

        Ok(Self::new(Arc::new(pool)))
    }

    /// Replace the grammar, e.g. to disable window functions
    pub fn with_grammar(mut self, grammar: Grammar) -> Self {
        self.grammar = grammar;
        self
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl DatabaseConnection for SqliteConnection {
    async fn select(&self, sql: &str, bindings: &[DatabaseValue]) -> OrmResult<Vec<Row>> {
        let query = bind_all(sqlx::query(sql), bindings)?;
        let rows = query
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| RelationError::Database(format!("Query fetch failed: {}", e)))?;
        rows.iter().map(convert_row).collect()
    }

    async fn execute(&self, sql: &str, bindings: &[DatabaseValue]) -> OrmResult<u64> {
        let query = bind_all(sqlx::query(sql), bindings)?;
        let result = query
            .execute(&*self.pool)
            .await
            .map_err(|e| RelationError::Database(format!("Query execution failed: {}", e)))?;
        Ok(result.rows_affected())
    }

    async fn begin_transaction(&self) -> OrmResult<Box<dyn DatabaseTransaction>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RelationError::Transaction(format!("Failed to begin transaction: {}", e)))?;
        Ok(Box::new(SqliteTransaction { tx: Some(tx) }))
    }

    fn grammar(&self) -> &Grammar {
        &self.grammar
    }
}

/// SQLite transaction implementation
pub struct SqliteTransaction {
    tx: Option<sqlx::Transaction<'static, Sqlite>>,
}

impl SqliteTransaction {
    fn active(&mut self) -> OrmResult<&mut sqlx::Transaction<'static, Sqlite>> {
        self.tx
            .as_mut()
            .ok_or_else(|| RelationError::Transaction("Transaction already completed".to_string()))
    }
}

#[async_trait]
impl DatabaseTransaction for SqliteTransaction {
    async fn select(&mut self, sql: &str, bindings: &[DatabaseValue]) -> OrmResult<Vec<Row>> {
        let tx = self.active()?;
        let query = bind_all(sqlx::query(sql), bindings)?;
        let rows = query
            .fetch_all(&mut **tx)
            .await
            .map_err(|e| RelationError::Database(format!("Query fetch failed: {}", e)))?;
        rows.iter().map(convert_row).collect()
    }

    async fn execute(&mut self, sql: &str, bindings: &[DatabaseValue]) -> OrmResult<u64> {
        let tx = self.active()?;
        let query = bind_all(sqlx::query(sql), bindings)?;
        let result = query
            .execute(&mut **tx)
            .await
            .map_err(|e| RelationError::Database(format!("Query execution failed: {}", e)))?;
        Ok(result.rows_affected())
    }

    async fn commit(mut self: Box<Self>) -> OrmResult<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| RelationError::Transaction("Transaction already completed".to_string()))?;
        tx.commit()
            .await
            .map_err(|e| RelationError::Transaction(format!("Transaction commit failed: {}", e)))
    }

    async fn rollback(mut self: Box<Self>) -> OrmResult<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| RelationError::Transaction("Transaction already completed".to_string()))?;
        tx.rollback()
            .await
            .map_err(|e| RelationError::Transaction(format!("Transaction rollback failed: {}", e)))
    }
}

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

fn bind_all<'q>(mut query: SqliteQuery<'q>, bindings: &[DatabaseValue]) -> OrmResult<SqliteQuery<'q>> {
    for value in bindings {
        query = bind_database_value(query, value)?;
    }
    Ok(query)
}

/// Bind a DatabaseValue to a sqlx query
///
/// Temporal values are bound as text, the way SQLite's date functions
/// expect them.
fn bind_database_value<'q>(query: SqliteQuery<'q>, value: &DatabaseValue) -> OrmResult<SqliteQuery<'q>> {
    match value {
        DatabaseValue::Null => Ok(query.bind(Option::<String>::None)),
        DatabaseValue::Bool(b) => Ok(query.bind(*b)),
        DatabaseValue::Int32(i) => Ok(query.bind(*i)),
        DatabaseValue::Int64(i) => Ok(query.bind(*i)),
        DatabaseValue::Float64(f) => Ok(query.bind(*f)),
        DatabaseValue::String(s) => Ok(query.bind(s.clone())),
        DatabaseValue::Bytes(b) => Ok(query.bind(b.clone())),
        DatabaseValue::Uuid(u) => Ok(query.bind(u.to_string())),
        DatabaseValue::DateTime(dt) => Ok(query.bind(dt.format("%Y-%m-%d %H:%M:%S").to_string())),
        DatabaseValue::Date(d) => Ok(query.bind(d.format("%Y-%m-%d").to_string())),
        DatabaseValue::Time(t) => Ok(query.bind(t.format("%H:%M:%S").to_string())),
        DatabaseValue::Json(j) => Ok(query.bind(j.to_string())),
        DatabaseValue::Array(_) => Err(RelationError::Database(
            "Array binding is not supported; expand the list into placeholders".to_string(),
        )),
    }
}

fn convert_row(row: &SqliteRow) -> OrmResult<Row> {
    use sqlx::{Column, Row as _};

    let mut converted = Row::new();
    for (index, column) in row.columns().iter().enumerate() {
        converted.push(column.name(), sqlite_value_to_database_value(row, index)?);
    }
    Ok(converted)
}

fn sqlite_value_to_database_value(row: &SqliteRow, index: usize) -> OrmResult<DatabaseValue> {
    use sqlx::{Row as _, TypeInfo, ValueRef};

    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(DatabaseValue::Null);
    }
    let type_name = raw.type_info().name().to_string();

    let value = match type_name.as_str() {
        "INTEGER" => DatabaseValue::Int64(row.try_get_unchecked::<i64, _>(index)?),
        "BOOLEAN" => DatabaseValue::Bool(row.try_get_unchecked::<bool, _>(index)?),
        "REAL" | "NUMERIC" => DatabaseValue::Float64(row.try_get_unchecked::<f64, _>(index)?),
        "BLOB" => DatabaseValue::Bytes(row.try_get_unchecked::<Vec<u8>, _>(index)?),
        _ => DatabaseValue::String(row.try_get_unchecked::<String, _>(index)?),
    };
    Ok(value)
}
