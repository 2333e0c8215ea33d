//! Relation contract - the lifecycle every relation variant implements
//!
//! Lazy loading constrains a relation to one owner and fetches results.
//! Eager loading constrains it to a batch of owners, fetches once, and
//! distributes the results with dictionary matching.

use async_trait::async_trait;

use crate::context::RelationContext;
use crate::error::OrmResult;
use crate::model::{Record, RelationValue};
use crate::query::QueryMethods;

/// Whether a relation resolves to one record or a list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    One,
    Many,
}

impl Cardinality {
    pub fn empty_value(&self) -> RelationValue {
        match self {
            Cardinality::One => RelationValue::One(None),
            Cardinality::Many => RelationValue::Many(Vec::new()),
        }
    }

    /// Wrap fetched records in this cardinality's value
    pub fn value_from(&self, records: Vec<Record>) -> RelationValue {
        match self {
            Cardinality::One => RelationValue::One(records.into_iter().next().map(Box::new)),
            Cardinality::Many => RelationValue::Many(records),
        }
    }
}

#[async_trait]
pub trait Relation: QueryMethods + Send + Sync {
    fn cardinality(&self) -> Cardinality;

    /// Whether `owner` carries the key this relation constrains on
    fn owner_has_key(&self, owner: &Record) -> bool;

    /// Constrain the related query to a single owner
    fn add_constraints(&mut self, owner: &Record);

    /// Constrain the related query to a batch of owners
    ///
    /// Returns false when no owner has a usable key, in which case no query
    /// should run.
    fn add_eager_constraints(&mut self, owners: &[Record]) -> bool;

    /// Give every owner the empty value for this relation
    fn init_relation(&self, owners: &mut [Record], relation: &str) {
        for owner in owners.iter_mut() {
            owner.set_relation(relation, self.cardinality().empty_value());
        }
    }

    /// Run the batch query
    async fn get_eager(&mut self, ctx: &RelationContext) -> OrmResult<Vec<Record>>;

    /// Distribute batch results onto owners
    fn match_eager(&self, owners: &mut [Record], results: Vec<Record>, relation: &str);

    /// Run the single-owner query
    async fn get_results(&mut self, ctx: &RelationContext) -> OrmResult<RelationValue> {
        let records = self.get_eager(ctx).await?;
        Ok(self.cardinality().value_from(records))
    }

    fn clone_box(&self) -> Box<dyn Relation>;
}

impl Clone for Box<dyn Relation> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}
