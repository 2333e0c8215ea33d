//! HasOneThrough / HasManyThrough - reaching related records across an
//! intermediate table
//!
//! `countries -> users.country_id -> posts.user_id`: the related query joins
//! the intermediate table and selects its owner key as a helper column.

use async_trait::async_trait;

use super::contract::{Cardinality, Relation};
use super::dictionary::{self, key_from, MatchKey};
use super::window::{self, WindowPlan};
use crate::context::RelationContext;
use crate::error::OrmResult;
use crate::model::{ModelDescriptor, Record, RelationValue};
use crate::query::{JoinClause, JoinType, QueryBuilder, QueryMethods, SelectColumn};

/// Helper column carrying the owner key through the join
pub const THROUGH_KEY: &str = "elif_through_key";

#[derive(Debug, Clone)]
pub struct HasOneOrManyThrough {
    related: ModelDescriptor,
    through: ModelDescriptor,
    query: QueryBuilder,
    /// Column on the intermediate table referencing the owner
    first_key: String,
    /// Column on the related table referencing the intermediate table
    second_key: String,
    /// Owner column `first_key` points at
    local_key: String,
    /// Intermediate column `second_key` points at
    second_local_key: String,
    cardinality: Cardinality,
}

impl HasOneOrManyThrough {
    pub fn has_one_through(
        related: ModelDescriptor,
        through: ModelDescriptor,
        first_key: &str,
        second_key: &str,
        local_key: &str,
        second_local_key: &str,
    ) -> Self {
        Self::new(related, through, [first_key, second_key, local_key, second_local_key], Cardinality::One)
    }

    pub fn has_many_through(
        related: ModelDescriptor,
        through: ModelDescriptor,
        first_key: &str,
        second_key: &str,
        local_key: &str,
        second_local_key: &str,
    ) -> Self {
        Self::new(related, through, [first_key, second_key, local_key, second_local_key], Cardinality::Many)
    }

    fn new(related: ModelDescriptor, through: ModelDescriptor, keys: [&str; 4], cardinality: Cardinality) -> Self {
        let [first_key, second_key, local_key, second_local_key] = keys;
        Self {
            query: QueryBuilder::table(related.table()),
            related,
            through,
            first_key: first_key.to_string(),
            second_key: second_key.to_string(),
            local_key: local_key.to_string(),
            second_local_key: second_local_key.to_string(),
            cardinality,
        }
    }

    pub fn related(&self) -> &ModelDescriptor {
        &self.related
    }

    pub fn through(&self) -> &ModelDescriptor {
        &self.through
    }

    fn qualified_first_key(&self) -> String {
        self.through.qualify(&self.first_key)
    }

    /// Join the intermediate table and select the helper key, once
    fn perform_join(&mut self) {
        if self.query.has_join(self.through.table()) {
            return;
        }
        self.query.push_join(JoinClause {
            join_type: JoinType::Inner,
            table: self.through.table().to_string(),
            on_conditions: vec![(
                self.through.qualify(&self.second_local_key),
                self.related.qualify(&self.second_key),
            )],
        });
        if self.query.columns().is_empty() {
            self.query.push_column(SelectColumn::Column(format!("{}.*", self.related.table())));
        }
        self.query.push_column(SelectColumn::Column(format!(
            "{} as {}",
            self.qualified_first_key(),
            THROUGH_KEY
        )));
    }

    fn window_plan(&self) -> WindowPlan {
        WindowPlan {
            partition_column: self.qualified_first_key(),
            discriminators: Vec::new(),
            outer_key: THROUGH_KEY.to_string(),
            related_key: self.related.qualified_key(),
            related_table: self.related.table().to_string(),
        }
    }
}

impl QueryMethods for HasOneOrManyThrough {
    fn query(&self) -> &QueryBuilder {
        &self.query
    }

    fn query_mut(&mut self) -> &mut QueryBuilder {
        &mut self.query
    }
}

#[async_trait]
impl Relation for HasOneOrManyThrough {
    fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    fn owner_has_key(&self, owner: &Record) -> bool {
        owner.get(&self.local_key).is_some_and(|value| !value.is_null())
    }

    fn add_constraints(&mut self, owner: &Record) {
        let column = self.qualified_first_key();
        if self.query.has_in_on(&column) {
            return;
        }
        self.perform_join();
        self.query.group_or_wheres();
        let key = owner.value(&self.local_key);
        self.query = std::mem::take(&mut self.query).where_eq(&column, key);
    }

    fn add_eager_constraints(&mut self, owners: &[Record]) -> bool {
        let keys = dictionary::collect_keys(owners, &self.local_key);
        if keys.is_empty() {
            return false;
        }
        self.perform_join();
        self.query.group_or_wheres();
        let column = self.qualified_first_key();
        self.query = std::mem::take(&mut self.query).where_in(&column, keys);
        true
    }

    async fn get_eager(&mut self, ctx: &RelationContext) -> OrmResult<Vec<Record>> {
        let rows = window::select_limited(ctx, &self.query, &self.window_plan()).await?;
        Ok(self.related.hydrate(rows))
    }

    fn match_eager(&self, owners: &mut [Record], results: Vec<Record>, relation: &str) {
        let dictionary = dictionary::build_dictionary(results, |record| {
            record.remove(THROUGH_KEY).as_ref().and_then(MatchKey::from_value)
        });
        let owner_key = |owner: &Record| key_from(owner, &self.local_key);
        match self.cardinality {
            Cardinality::One => dictionary::match_one(owners, &dictionary, relation, owner_key),
            Cardinality::Many => dictionary::match_many(owners, &dictionary, relation, owner_key),
        }
    }

    async fn get_results(&mut self, ctx: &RelationContext) -> OrmResult<RelationValue> {
        let mut records = self.get_eager(ctx).await?;
        for record in records.iter_mut() {
            record.remove(THROUGH_KEY);
        }
        Ok(self.cardinality.value_from(records))
    }

    fn clone_box(&self) -> Box<dyn Relation> {
        Box::new(self.clone())
    }
}
