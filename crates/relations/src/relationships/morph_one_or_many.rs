//! MorphOne / MorphMany - a HasOne/HasMany whose related rows also record
//! the owner's type
//!
//! `comments.commentable_id` plus `comments.commentable_type` can point at
//! posts and videos alike, so matching uses `type:id` composite keys.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;

use super::contract::{Cardinality, Relation};
use super::dictionary::{self, MatchKey};
use super::has_one_or_many::HasOneOrMany;
use super::window;
use crate::backends::DatabaseValue;
use crate::context::RelationContext;
use crate::error::OrmResult;
use crate::model::{ModelDescriptor, Record};
use crate::query::{QueryBuilder, QueryMethods};

#[derive(Debug, Clone)]
pub struct MorphOneOrMany {
    inner: HasOneOrMany,
    /// Column on the related table holding the owner's morph class
    morph_type: String,
}

impl MorphOneOrMany {
    /// `morph_one(comments, "commentable", "id")` uses `commentable_id` and `commentable_type`
    pub fn morph_one(related: ModelDescriptor, name: &str, local_key: &str) -> Self {
        Self {
            inner: HasOneOrMany::has_one(related, &format!("{name}_id"), local_key),
            morph_type: format!("{name}_type"),
        }
    }

    pub fn morph_many(related: ModelDescriptor, name: &str, local_key: &str) -> Self {
        Self {
            inner: HasOneOrMany::has_many(related, &format!("{name}_id"), local_key),
            morph_type: format!("{name}_type"),
        }
    }

    pub fn related(&self) -> &ModelDescriptor {
        self.inner.related()
    }

    pub fn morph_type(&self) -> &str {
        &self.morph_type
    }

    fn qualified_morph_type(&self) -> String {
        self.inner.related().qualify(&self.morph_type)
    }

    /// New related record pointing at `owner`, type column included
    pub fn make(&self, owner: &Record, attributes: BTreeMap<String, DatabaseValue>) -> OrmResult<Record> {
        let mut record = self.inner.make(owner, attributes)?;
        record.set(self.morph_type.clone(), owner.morph_class());
        Ok(record)
    }

    pub async fn create(
        &self,
        ctx: &RelationContext,
        owner: &Record,
        attributes: BTreeMap<String, DatabaseValue>,
    ) -> OrmResult<Record> {
        let record = self.make(owner, attributes)?;
        self.inner.persist(ctx, record).await
    }
}

impl QueryMethods for MorphOneOrMany {
    fn query(&self) -> &QueryBuilder {
        self.inner.query()
    }

    fn query_mut(&mut self) -> &mut QueryBuilder {
        self.inner.query_mut()
    }
}

#[async_trait]
impl Relation for MorphOneOrMany {
    fn cardinality(&self) -> Cardinality {
        self.inner.cardinality()
    }

    fn owner_has_key(&self, owner: &Record) -> bool {
        self.inner.owner_has_key(owner)
    }

    fn add_constraints(&mut self, owner: &Record) {
        self.inner.add_constraints(owner);
        let column = self.qualified_morph_type();
        let query = std::mem::take(self.inner.query_mut());
        *self.inner.query_mut() = query.where_eq(&column, owner.morph_class());
    }

    fn add_eager_constraints(&mut self, owners: &[Record]) -> bool {
        if !self.inner.add_eager_constraints(owners) {
            return false;
        }
        let classes: BTreeSet<&str> = owners.iter().map(Record::morph_class).collect();
        let column = self.qualified_morph_type();
        let query = std::mem::take(self.inner.query_mut());
        *self.inner.query_mut() = if classes.len() == 1 {
            query.where_eq(&column, classes.into_iter().next().unwrap_or_default())
        } else {
            query.where_in(&column, classes)
        };
        true
    }

    async fn get_eager(&mut self, ctx: &RelationContext) -> OrmResult<Vec<Record>> {
        let plan = self.inner.window_plan().with_discriminator(self.qualified_morph_type());
        let rows = window::select_limited(ctx, self.inner.query(), &plan).await?;
        Ok(self.related().hydrate(rows))
    }

    fn match_eager(&self, owners: &mut [Record], results: Vec<Record>, relation: &str) {
        let foreign_key = self.inner.foreign_key();
        let dictionary = dictionary::build_dictionary(results, |record| {
            let morph_type = record.get(&self.morph_type).and_then(DatabaseValue::as_str)?;
            MatchKey::composite(morph_type, record.get(foreign_key)?)
        });

        let local_key = self.inner.local_key();
        let owner_key = |owner: &Record| MatchKey::composite(owner.morph_class(), owner.get(local_key)?);
        match self.inner.cardinality() {
            Cardinality::One => dictionary::match_one(owners, &dictionary, relation, owner_key),
            Cardinality::Many => dictionary::match_many(owners, &dictionary, relation, owner_key),
        }
    }

    fn clone_box(&self) -> Box<dyn Relation> {
        Box::new(self.clone())
    }
}
