//! HasOne / HasMany - the related table holds a foreign key to the owner

use std::collections::BTreeMap;

use async_trait::async_trait;
use tracing::debug;

use super::contract::{Cardinality, Relation};
use super::dictionary::{self, key_from};
use super::window::{self, WindowPlan};
use crate::backends::{DatabaseBackendType, DatabaseValue};
use crate::context::RelationContext;
use crate::error::{OrmResult, RelationError};
use crate::model::{ModelDescriptor, Record};
use crate::query::{validate_identifier, InsertStatement, QueryBuilder, QueryMethods};

#[derive(Debug, Clone)]
pub struct HasOneOrMany {
    related: ModelDescriptor,
    query: QueryBuilder,
    /// Column on the related table referencing the owner
    foreign_key: String,
    /// Column on the owner the foreign key points at
    local_key: String,
    cardinality: Cardinality,
}

impl HasOneOrMany {
    /// `owner has one related` through `related.foreign_key = owner.local_key`
    pub fn has_one(related: ModelDescriptor, foreign_key: &str, local_key: &str) -> Self {
        Self::new(related, foreign_key, local_key, Cardinality::One)
    }

    /// `owner has many related` through `related.foreign_key = owner.local_key`
    pub fn has_many(related: ModelDescriptor, foreign_key: &str, local_key: &str) -> Self {
        Self::new(related, foreign_key, local_key, Cardinality::Many)
    }

    fn new(related: ModelDescriptor, foreign_key: &str, local_key: &str, cardinality: Cardinality) -> Self {
        Self {
            query: QueryBuilder::table(related.table()),
            related,
            foreign_key: foreign_key.to_string(),
            local_key: local_key.to_string(),
            cardinality,
        }
    }

    pub fn related(&self) -> &ModelDescriptor {
        &self.related
    }

    pub fn foreign_key(&self) -> &str {
        &self.foreign_key
    }

    pub fn local_key(&self) -> &str {
        &self.local_key
    }

    pub fn qualified_foreign_key(&self) -> String {
        self.related.qualify(&self.foreign_key)
    }

    pub(crate) fn window_plan(&self) -> WindowPlan {
        WindowPlan {
            partition_column: self.qualified_foreign_key(),
            discriminators: Vec::new(),
            outer_key: self.foreign_key.clone(),
            related_key: self.related.qualified_key(),
            related_table: self.related.table().to_string(),
        }
    }

    /// New related record pointing at `owner`, not yet saved
    pub fn make(&self, owner: &Record, attributes: BTreeMap<String, DatabaseValue>) -> OrmResult<Record> {
        let key = owner
            .get(&self.local_key)
            .filter(|value| !value.is_null())
            .cloned()
            .ok_or_else(|| RelationError::missing_key(owner.descriptor().table(), &self.local_key))?;

        let mut record = self.related.new_record();
        for (column, value) in attributes {
            validate_identifier(&column)?;
            record.set(column, value);
        }
        record.set(self.foreign_key.clone(), key);
        Ok(record)
    }

    /// Insert a related record pointing at `owner`
    ///
    /// PostgreSQL and SQLite return the stored row, generated key included.
    pub async fn create(
        &self,
        ctx: &RelationContext,
        owner: &Record,
        attributes: BTreeMap<String, DatabaseValue>,
    ) -> OrmResult<Record> {
        let record = self.make(owner, attributes)?;
        self.persist(ctx, record).await
    }

    pub(crate) async fn persist(&self, ctx: &RelationContext, record: Record) -> OrmResult<Record> {
        let columns: Vec<String> = record.attributes().keys().cloned().collect();
        let mut insert = InsertStatement::new(self.related.table(), columns);
        insert.push_row(record.attributes().values().cloned().collect());

        if ctx.connection().driver() == DatabaseBackendType::MySQL {
            let (sql, bindings) = insert.to_sql(ctx.grammar());
            ctx.connection().execute(&sql, &bindings).await?;
            return Ok(record);
        }

        let (sql, bindings) = insert.returning_all().to_sql(ctx.grammar());
        let rows = ctx.connection().select(&sql, &bindings).await?;
        Ok(self.related.hydrate(rows).into_iter().next().unwrap_or(record))
    }
}

impl QueryMethods for HasOneOrMany {
    fn query(&self) -> &QueryBuilder {
        &self.query
    }

    fn query_mut(&mut self) -> &mut QueryBuilder {
        &mut self.query
    }
}

#[async_trait]
impl Relation for HasOneOrMany {
    fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    fn owner_has_key(&self, owner: &Record) -> bool {
        owner.get(&self.local_key).is_some_and(|value| !value.is_null())
    }

    fn add_constraints(&mut self, owner: &Record) {
        let column = self.qualified_foreign_key();
        if self.query.has_in_on(&column) {
            return;
        }
        self.query.group_or_wheres();
        let key = owner.value(&self.local_key);
        self.query = std::mem::take(&mut self.query)
            .where_eq(&column, key)
            .where_not_null(&column);
    }

    fn add_eager_constraints(&mut self, owners: &[Record]) -> bool {
        let keys = dictionary::collect_keys(owners, &self.local_key);
        if keys.is_empty() {
            return false;
        }
        self.query.group_or_wheres();
        let column = self.qualified_foreign_key();
        self.query = std::mem::take(&mut self.query).where_in(&column, keys);
        true
    }

    async fn get_eager(&mut self, ctx: &RelationContext) -> OrmResult<Vec<Record>> {
        let rows = window::select_limited(ctx, &self.query, &self.window_plan()).await?;
        debug!(table = %self.related.table(), rows = rows.len(), "loaded has-one-or-many results");
        Ok(self.related.hydrate(rows))
    }

    fn match_eager(&self, owners: &mut [Record], results: Vec<Record>, relation: &str) {
        let dictionary = dictionary::build_dictionary(results, |record| key_from(record, &self.foreign_key));
        let owner_key = |owner: &Record| key_from(owner, &self.local_key);
        match self.cardinality {
            Cardinality::One => dictionary::match_one(owners, &dictionary, relation, owner_key),
            Cardinality::Many => dictionary::match_many(owners, &dictionary, relation, owner_key),
        }
    }

    fn clone_box(&self) -> Box<dyn Relation> {
        Box::new(self.clone())
    }
}
