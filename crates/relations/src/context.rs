//! Relation context - the services a relation needs to run queries
//!
//! A context is passed explicitly to every loading and mutation call; it
//! bundles the connection, the schema cache and the engine configuration.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::backends::{DatabaseConnection, DatabaseTransaction, Feature, Grammar, Row};
use crate::config::RelationsConfig;
use crate::error::OrmResult;
use crate::model::{ModelDescriptor, Record};
use crate::query::{QueryBuilder, QueryMethods};
use crate::schema::SchemaCache;

#[derive(Clone)]
pub struct RelationContext {
    connection: Arc<dyn DatabaseConnection>,
    schema: Arc<SchemaCache>,
    config: Arc<RelationsConfig>,
}

impl RelationContext {
    /// Context using the process-wide schema cache and default configuration
    pub fn new(connection: Arc<dyn DatabaseConnection>) -> Self {
        Self {
            connection,
            schema: SchemaCache::global(),
            config: Arc::new(RelationsConfig::default()),
        }
    }

    /// Use `config`, applying its schema TTL to an injected cache
    ///
    /// The process-wide cache keeps its own TTL; other contexts share it.
    /// Inject the cache with [`RelationContext::with_schema_cache`] first for
    /// the TTL to take effect.
    pub fn with_config(mut self, config: RelationsConfig) -> Self {
        if !SchemaCache::is_global(&self.schema) {
            self.schema.configure_ttl(config.schema_cache_ttl());
        }
        self.config = Arc::new(config);
        self
    }

    pub fn with_schema_cache(mut self, schema: Arc<SchemaCache>) -> Self {
        self.schema = schema;
        self
    }

    pub fn connection(&self) -> &dyn DatabaseConnection {
        self.connection.as_ref()
    }

    pub fn grammar(&self) -> &Grammar {
        self.connection.grammar()
    }

    pub fn schema(&self) -> &SchemaCache {
        &self.schema
    }

    pub fn config(&self) -> &RelationsConfig {
        &self.config
    }

    /// Window rewriting needs both the dialect and the configuration to allow it
    pub fn window_functions_enabled(&self) -> bool {
        self.config.window_functions && self.grammar().supports_feature(Feature::WindowFunctions)
    }

    pub async fn select(&self, query: &QueryBuilder) -> OrmResult<Vec<Row>> {
        query.get_rows(self.connection()).await
    }

    pub async fn columns(&self, table: &str) -> OrmResult<Arc<Vec<String>>> {
        self.schema.columns(self.connection(), table).await
    }

    pub async fn begin(&self) -> OrmResult<Box<dyn DatabaseTransaction>> {
        let tx = self.connection.begin_transaction().await?;
        debug!("transaction started");
        Ok(tx)
    }

    /// Fetch one page of records, bounded by the configured page size
    pub async fn paginate(
        &self,
        query: &QueryBuilder,
        model: &ModelDescriptor,
        page: u64,
        per_page: u64,
    ) -> OrmResult<Page> {
        let paged = query.clone().for_page_within(page, per_page, self.config.max_page_size)?;
        let total = query.count(self.connection()).await?;
        let records = paged.get(self.connection(), model).await?;
        Ok(Page {
            records,
            total,
            page: page.max(1),
            per_page,
        })
    }
}

/// One page of results
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub records: Vec<Record>,
    pub total: i64,
    pub page: u64,
    pub per_page: u64,
}

impl Page {
    pub fn last_page(&self) -> u64 {
        let total = u64::try_from(self.total).unwrap_or(0);
        total.div_ceil(self.per_page).max(1)
    }

    pub fn has_more(&self) -> bool {
        self.page < self.last_page()
    }
}

/// Commit on success, roll back and re-raise on failure
pub(crate) async fn finish<T>(tx: Box<dyn DatabaseTransaction>, result: OrmResult<T>) -> OrmResult<T> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            debug!("transaction committed");
            Ok(value)
        }
        Err(error) => {
            warn!(error = %error, "rolling back pivot transaction");
            if let Err(rollback_error) = tx.rollback().await {
                warn!(error = %rollback_error, "rollback failed");
            }
            Err(error)
        }
    }
}
