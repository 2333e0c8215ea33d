//! Schema Cache - TTL-bounded table column lists
//!
//! Column discovery is needed for `with_pivot("*")`, pivot schema checks and
//! polymorphic UNION planning. Lookups are cached per table; an expired
//! entry is refreshed on the next lookup.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use once_cell::sync::Lazy;
use tracing::debug;

use crate::backends::{DatabaseBackendType, DatabaseConnection, DatabaseValue};
use crate::config::RelationsDefaults;
use crate::error::{OrmResult, RelationError};

static GLOBAL: Lazy<Arc<SchemaCache>> =
    Lazy::new(|| Arc::new(SchemaCache::new(Duration::from_secs(RelationsDefaults::SCHEMA_CACHE_TTL_SECS))));

#[derive(Debug, Clone)]
struct CacheEntry {
    columns: Arc<Vec<String>>,
    captured_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.captured_at.elapsed() >= ttl
    }
}

/// Concurrent table-to-columns cache
#[derive(Debug)]
pub struct SchemaCache {
    entries: DashMap<String, CacheEntry>,
    ttl_millis: AtomicU64,
}

impl Default for SchemaCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(RelationsDefaults::SCHEMA_CACHE_TTL_SECS))
    }
}

impl SchemaCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl_millis: AtomicU64::new(duration_millis(ttl)),
        }
    }

    /// Process-wide cache shared by contexts that do not bring their own
    pub fn global() -> Arc<SchemaCache> {
        Arc::clone(&GLOBAL)
    }

    /// Whether `cache` is the process-wide instance
    pub fn is_global(cache: &Arc<SchemaCache>) -> bool {
        Arc::ptr_eq(cache, &GLOBAL)
    }

    /// Change the TTL; existing entries are judged against the new value
    pub fn configure_ttl(&self, ttl: Duration) {
        self.ttl_millis.store(duration_millis(ttl), Ordering::Relaxed);
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_millis.load(Ordering::Relaxed))
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn forget(&self, table: &str) {
        self.entries.remove(table);
    }

    /// Cached columns for `table`, if present and fresh
    pub fn cached(&self, table: &str) -> Option<Arc<Vec<String>>> {
        let ttl = self.ttl();
        self.entries
            .get(table)
            .filter(|entry| !entry.is_expired(ttl))
            .map(|entry| Arc::clone(&entry.columns))
    }

    /// Column names of `table`, in table order
    ///
    /// A table that does not exist yields an empty list, which is not cached.
    pub async fn columns(&self, connection: &dyn DatabaseConnection, table: &str) -> OrmResult<Arc<Vec<String>>> {
        if let Some(columns) = self.cached(table) {
            debug!(table = %table, "schema cache hit");
            return Ok(columns);
        }
        if self.entries.contains_key(table) {
            debug!(table = %table, "schema cache entry expired");
        }

        let (sql, bindings) = introspection_query(connection.driver(), table);
        let rows = connection
            .select(&sql, &bindings)
            .await
            .map_err(|e| RelationError::Schema(format!("Failed to read columns of '{}': {}", table, e)))?;

        let columns: Vec<String> = rows
            .iter()
            .filter_map(|row| row.get("column_name").and_then(|value| value.as_str()).map(str::to_string))
            .collect();
        debug!(table = %table, columns = columns.len(), "introspected table columns");

        let columns = Arc::new(columns);
        if !columns.is_empty() {
            self.entries.insert(
                table.to_string(),
                CacheEntry {
                    columns: Arc::clone(&columns),
                    captured_at: Instant::now(),
                },
            );
        }
        Ok(columns)
    }

    pub async fn has_column(&self, connection: &dyn DatabaseConnection, table: &str, column: &str) -> OrmResult<bool> {
        Ok(self.columns(connection, table).await?.iter().any(|c| c == column))
    }

    /// Fail with a schema error naming every missing column
    pub async fn ensure_columns(&self, connection: &dyn DatabaseConnection, table: &str, required: &[&str]) -> OrmResult<()> {
        let columns = self.columns(connection, table).await?;
        let missing: Vec<&str> = required
            .iter()
            .copied()
            .filter(|name| !columns.iter().any(|column| column == name))
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(RelationError::Schema(format!(
                "Table '{}' is missing columns: {}",
                table,
                missing.join(", ")
            )))
        }
    }
}

fn duration_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX)
}

/// Dialect-specific query listing a table's columns as `column_name`
fn introspection_query(driver: DatabaseBackendType, table: &str) -> (String, Vec<DatabaseValue>) {
    let sql = match driver {
        DatabaseBackendType::SQLite => "select name as column_name from pragma_table_info(?) order by cid",
        DatabaseBackendType::PostgreSQL => {
            "select column_name::text as column_name from information_schema.columns \
             where table_schema = current_schema() and table_name = ? order by ordinal_position"
        }
        DatabaseBackendType::MySQL => {
            "select column_name as column_name from information_schema.columns \
             where table_schema = database() and table_name = ? order by ordinal_position"
        }
    };
    (sql.to_string(), vec![DatabaseValue::String(table.to_string())])
}
