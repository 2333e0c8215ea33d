//! PostgreSQL Backend Implementation
//!
//! sqlx-backed implementation of the connection traits. Every statement goes
//! through the pool; transactions pin a pooled connection until they finish.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::{Pool, Postgres};
use tracing::debug;

use super::core::*;
use super::grammar::Grammar;
use crate::error::{OrmResult, RelationError};

/// Database pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_seconds: u64,
    pub idle_timeout_seconds: Option<u64>,
    pub max_lifetime_seconds: Option<u64>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            acquire_timeout_seconds: 30,
            idle_timeout_seconds: Some(600),  // 10 minutes
            max_lifetime_seconds: Some(1800), // 30 minutes
        }
    }
}

/// PostgreSQL connection backed by a sqlx pool
#[derive(Clone)]
pub struct PostgresConnection {
    pool: Arc<Pool<Postgres>>,
    grammar: Grammar,
}

impl PostgresConnection {
    pub fn new(pool: Arc<Pool<Postgres>>) -> Self {
        Self {
            pool,
            grammar: Grammar::postgres(),
        }
    }

    /// Connect with the given pool configuration
    pub async fn connect(database_url: &str, config: &PoolConfig) -> OrmResult<Self> {
        let mut options = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds));

        if let Some(idle_timeout) = config.idle_timeout_seconds {
            options = options.idle_timeout(Duration::from_secs(idle_timeout));
        }
        if let Some(max_lifetime) = config.max_lifetime_seconds {
            options = options.max_lifetime(Duration::from_secs(max_lifetime));
        }

        let pool = options
            .connect(database_url)
            .await
            .map_err(|e| RelationError::Database(format!("Failed to create PostgreSQL pool: {}", e)))?;

        debug!("PostgreSQL pool created with {} max connections", config.max_connections);
        Ok(Self::new(Arc::new(pool)))
    }

    /// Replace the grammar, e.g. to disable window functions
    pub fn with_grammar(mut self, grammar: Grammar) -> Self {
        self.grammar = grammar;
        self
    }

    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

#[async_trait]
impl DatabaseConnection for PostgresConnection {
    async fn select(&self, sql: &str, bindings: &[DatabaseValue]) -> OrmResult<Vec<Row>> {
        let sql = self.grammar.parameterize(sql);
        let query = bind_all(sqlx::query(&sql), bindings)?;
        let rows = query
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| RelationError::Database(format!("Query fetch failed: {}", e)))?;
        rows.iter().map(convert_row).collect()
    }

    async fn execute(&self, sql: &str, bindings: &[DatabaseValue]) -> OrmResult<u64> {
        let sql = self.grammar.parameterize(sql);
        let query = bind_all(sqlx::query(&sql), bindings)?;
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
        Ok(Box::new(PostgresTransaction {
            tx: Some(tx),
            grammar: self.grammar.clone(),
        }))
    }

    fn grammar(&self) -> &Grammar {
        &self.grammar
    }
}

/// PostgreSQL transaction implementation
pub struct PostgresTransaction {
    tx: Option<sqlx::Transaction<'static, Postgres>>,
    grammar: Grammar,
}

impl PostgresTransaction {
    fn active(&mut self) -> OrmResult<&mut sqlx::Transaction<'static, Postgres>> {
        self.tx
            .as_mut()
            .ok_or_else(|| RelationError::Transaction("Transaction already completed".to_string()))
    }
}

#[async_trait]
impl DatabaseTransaction for PostgresTransaction {
    async fn select(&mut self, sql: &str, bindings: &[DatabaseValue]) -> OrmResult<Vec<Row>> {
        let sql = self.grammar.parameterize(sql);
        let tx = self.active()?;
        let query = bind_all(sqlx::query(&sql), bindings)?;
        let rows = query
            .fetch_all(&mut **tx)
            .await
            .map_err(|e| RelationError::Database(format!("Query fetch failed: {}", e)))?;
        rows.iter().map(convert_row).collect()
    }

    async fn execute(&mut self, sql: &str, bindings: &[DatabaseValue]) -> OrmResult<u64> {
        let sql = self.grammar.parameterize(sql);
        let tx = self.active()?;
        let query = bind_all(sqlx::query(&sql), bindings)?;
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

type PgQuery<'q> = sqlx::query::Query<'q, Postgres, PgArguments>;

fn bind_all<'q>(mut query: PgQuery<'q>, bindings: &[DatabaseValue]) -> OrmResult<PgQuery<'q>> {
    for value in bindings {
        query = bind_database_value(query, value)?;
    }
    Ok(query)
}

/// Bind a DatabaseValue to a sqlx query
fn bind_database_value<'q>(query: PgQuery<'q>, value: &DatabaseValue) -> OrmResult<PgQuery<'q>> {
    match value {
        DatabaseValue::Null => Ok(query.bind(Option::<String>::None)),
        DatabaseValue::Bool(b) => Ok(query.bind(*b)),
        DatabaseValue::Int32(i) => Ok(query.bind(*i)),
        DatabaseValue::Int64(i) => Ok(query.bind(*i)),
        DatabaseValue::Float64(f) => Ok(query.bind(*f)),
        DatabaseValue::String(s) => Ok(query.bind(s.clone())),
        DatabaseValue::Bytes(b) => Ok(query.bind(b.clone())),
        DatabaseValue::Uuid(u) => Ok(query.bind(*u)),
        DatabaseValue::DateTime(dt) => Ok(query.bind(*dt)),
        DatabaseValue::Date(d) => Ok(query.bind(*d)),
        DatabaseValue::Time(t) => Ok(query.bind(*t)),
        DatabaseValue::Json(j) => Ok(query.bind(j.clone())),
        DatabaseValue::Array(_) => Err(RelationError::Database(
            "Array binding is not supported; expand the list into placeholders".to_string(),
        )),
    }
}

fn convert_row(row: &PgRow) -> OrmResult<Row> {
    use sqlx::{Column, Row as _};

    let mut converted = Row::new();
    for (index, column) in row.columns().iter().enumerate() {
        converted.push(column.name(), postgres_value_to_database_value(row, index)?);
    }
    Ok(converted)
}

/// Convert a PostgreSQL column value to DatabaseValue
fn postgres_value_to_database_value(row: &PgRow, index: usize) -> OrmResult<DatabaseValue> {
    use sqlx::{Column, Row as _, TypeInfo, ValueRef};

    if row.try_get_raw(index)?.is_null() {
        return Ok(DatabaseValue::Null);
    }

    let type_name = row.columns()[index].type_info().name().to_string();
    let value = match type_name.as_str() {
        "BOOL" => DatabaseValue::Bool(row.try_get(index)?),
        "INT2" => DatabaseValue::Int32(i32::from(row.try_get::<i16, _>(index)?)),
        "INT4" => DatabaseValue::Int32(row.try_get(index)?),
        "INT8" => DatabaseValue::Int64(row.try_get(index)?),
        "FLOAT4" => DatabaseValue::Float64(f64::from(row.try_get::<f32, _>(index)?)),
        "FLOAT8" => DatabaseValue::Float64(row.try_get(index)?),
        "BYTEA" => DatabaseValue::Bytes(row.try_get(index)?),
        "UUID" => DatabaseValue::Uuid(row.try_get(index)?),
        "TIMESTAMPTZ" => DatabaseValue::DateTime(row.try_get(index)?),
        "TIMESTAMP" => {
            let naive: chrono::NaiveDateTime = row.try_get(index)?;
            DatabaseValue::DateTime(naive.and_utc())
        }
        "DATE" => DatabaseValue::Date(row.try_get(index)?),
        "TIME" => DatabaseValue::Time(row.try_get(index)?),
        "JSON" | "JSONB" => DatabaseValue::Json(row.try_get::<JsonValue, _>(index)?),
        _ => {
            let value: String = row.try_get(index).map_err(|e| {
                RelationError::Database(format!(
                    "Failed to get value as string for unknown type '{}': {}",
                    type_name, e
                ))
            })?;
            DatabaseValue::String(value)
        }
    };
    Ok(value)
}
