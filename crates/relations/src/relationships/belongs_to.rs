//! BelongsTo - the owner holds a foreign key to the related record

use async_trait::async_trait;

use super::contract::{Cardinality, Relation};
use super::dictionary::{self, key_from};
use crate::backends::DatabaseValue;
use crate::context::RelationContext;
use crate::error::{OrmResult, RelationError};
use crate::model::{ModelDescriptor, Record, RelationValue};
use crate::query::{QueryBuilder, QueryMethods};

#[derive(Debug, Clone)]
pub struct BelongsTo {
    related: ModelDescriptor,
    query: QueryBuilder,
    /// Column on the owner
    foreign_key: String,
    /// Column on the related table the foreign key points at
    owner_key: String,
}

impl BelongsTo {
    pub fn new(related: ModelDescriptor, foreign_key: &str, owner_key: &str) -> Self {
        Self {
            query: QueryBuilder::table(related.table()),
            related,
            foreign_key: foreign_key.to_string(),
            owner_key: owner_key.to_string(),
        }
    }

    pub fn related(&self) -> &ModelDescriptor {
        &self.related
    }

    pub fn foreign_key(&self) -> &str {
        &self.foreign_key
    }

    /// Point `owner` at `related` and remember it as the loaded relation
    pub fn associate(&self, owner: &mut Record, related: &Record, relation: &str) -> OrmResult<()> {
        let key = related
            .get(&self.owner_key)
            .filter(|value| !value.is_null())
            .cloned()
            .ok_or_else(|| RelationError::missing_key(self.related.table(), &self.owner_key))?;
        owner.set(self.foreign_key.clone(), key);
        owner.set_relation(relation, RelationValue::One(Some(Box::new(related.clone()))));
        Ok(())
    }

    /// Clear the foreign key on `owner`
    pub fn dissociate(&self, owner: &mut Record, relation: &str) {
        owner.set(self.foreign_key.clone(), DatabaseValue::Null);
        owner.set_relation(relation, RelationValue::One(None));
    }
}

impl QueryMethods for BelongsTo {
    fn query(&self) -> &QueryBuilder {
        &self.query
    }

    fn query_mut(&mut self) -> &mut QueryBuilder {
        &mut self.query
    }
}

#[async_trait]
impl Relation for BelongsTo {
    fn cardinality(&self) -> Cardinality {
        Cardinality::One
    }

    fn owner_has_key(&self, owner: &Record) -> bool {
        owner.get(&self.foreign_key).is_some_and(|value| !value.is_null())
    }

    fn add_constraints(&mut self, owner: &Record) {
        let column = self.related.qualify(&self.owner_key);
        if self.query.has_in_on(&column) {
            return;
        }
        self.query.group_or_wheres();
        let key = owner.value(&self.foreign_key);
        self.query = std::mem::take(&mut self.query).where_eq(&column, key);
    }

    fn add_eager_constraints(&mut self, owners: &[Record]) -> bool {
        let keys = dictionary::collect_keys(owners, &self.foreign_key);
        if keys.is_empty() {
            return false;
        }
        self.query.group_or_wheres();
        let column = self.related.qualify(&self.owner_key);
        self.query = std::mem::take(&mut self.query).where_in(&column, keys);
        true
    }

    async fn get_eager(&mut self, ctx: &RelationContext) -> OrmResult<Vec<Record>> {
        let rows = ctx.select(&self.query).await?;
        Ok(self.related.hydrate(rows))
    }

    fn match_eager(&self, owners: &mut [Record], results: Vec<Record>, relation: &str) {
        let dictionary = dictionary::build_dictionary(results, |record| key_from(record, &self.owner_key));
        dictionary::match_one(owners, &dictionary, relation, |owner| key_from(owner, &self.foreign_key));
    }

    fn clone_box(&self) -> Box<dyn Relation> {
        Box::new(self.clone())
    }
}
