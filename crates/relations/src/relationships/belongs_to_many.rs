//! BelongsToMany / MorphToMany - related records reached through a pivot table
//!
//! The related query joins the pivot table and selects pivot columns under
//! `pivot_` aliases. Matching moves those columns into a [`Pivot`] on a
//! per-owner clone of each related record.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use tracing::debug;

use super::contract::{Cardinality, Relation};
use super::dictionary::{self, key_from, MatchKey};
use super::pivot::{PivotConstraintSet, PIVOT_PREFIX};
use super::window::{self, WindowPlan};
use crate::backends::{DatabaseValue, DatePart};
use crate::context::RelationContext;
use crate::error::OrmResult;
use crate::model::{ModelDescriptor, Pivot, Record, RelationValue};
use crate::query::{
    Connective, JoinClause, JoinType, OrderDirection, Predicate, QueryBuilder, QueryMethods, QueryOperator,
    SelectColumn, WhereClause,
};

/// Discriminator column of a polymorphic pivot table
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PivotMorph {
    pub(crate) type_column: String,
    /// Fixed class for the inverse side; `None` means the owner's class
    pub(crate) morph_class: Option<String>,
}

/// Many-to-many relation through a pivot table
///
/// Also serves polymorphic many-to-many (`morph_to_many`) and its inverse
/// (`morphed_by_many`). Polymorphic matching always goes through composite
/// `type:id` keys; a cheaper plain-key path for single-type owner sets is a
/// possible future optimisation.
#[derive(Debug, Clone)]
pub struct BelongsToMany {
    pub(crate) related: ModelDescriptor,
    pub(crate) query: QueryBuilder,
    pub(crate) pivot: PivotConstraintSet,
    /// Pivot column referencing the owner
    pub(crate) foreign_pivot_key: String,
    /// Pivot column referencing the related record
    pub(crate) related_pivot_key: String,
    /// Owner column the foreign pivot key points at
    pub(crate) parent_key: String,
    /// Related column the related pivot key points at
    pub(crate) related_key: String,
    pub(crate) morph: Option<PivotMorph>,
}

pub type MorphToMany = BelongsToMany;

impl BelongsToMany {
    pub fn new(
        related: ModelDescriptor,
        pivot_table: &str,
        foreign_pivot_key: &str,
        related_pivot_key: &str,
        parent_key: &str,
        related_key: &str,
    ) -> Self {
        Self {
            query: QueryBuilder::table(related.table()),
            related,
            pivot: PivotConstraintSet::new(pivot_table),
            foreign_pivot_key: foreign_pivot_key.to_string(),
            related_pivot_key: related_pivot_key.to_string(),
            parent_key: parent_key.to_string(),
            related_key: related_key.to_string(),
            morph: None,
        }
    }

    /// `post.tags()` through `taggables(tag_id, taggable_id, taggable_type)`:
    /// `morph_to_many(tags, "taggable", "taggables", "tag_id")`
    pub fn morph_to_many(related: ModelDescriptor, name: &str, pivot_table: &str, related_pivot_key: &str) -> Self {
        let related_key = related.primary_key().to_string();
        let mut relation = Self::new(
            related,
            pivot_table,
            &format!("{name}_id"),
            related_pivot_key,
            "id",
            &related_key,
        );
        relation.morph = Some(PivotMorph {
            type_column: format!("{name}_type"),
            morph_class: None,
        });
        relation
    }

    /// Inverse side, `tag.posts()`:
    /// `morphed_by_many(posts, "taggable", "taggables", "tag_id")`
    pub fn morphed_by_many(related: ModelDescriptor, name: &str, pivot_table: &str, foreign_pivot_key: &str) -> Self {
        let related_key = related.primary_key().to_string();
        let morph_class = related.morph_class().to_string();
        let type_column = format!("{name}_type");
        let mut relation = Self::new(
            related,
            pivot_table,
            foreign_pivot_key,
            &format!("{name}_id"),
            "id",
            &related_key,
        );
        // The related class never changes, so it is a regular pivot constraint
        let clause = WhereClause::and(Predicate::Comparison {
            column: format!("{}.{}", pivot_table, type_column),
            operator: QueryOperator::Equal,
            value: DatabaseValue::from(morph_class.as_str()),
        });
        relation.pivot.push_where(&mut relation.query, clause);
        relation.morph = Some(PivotMorph {
            type_column,
            morph_class: Some(morph_class),
        });
        relation
    }

    /// Override the owner column the foreign pivot key references
    pub fn with_parent_key(mut self, parent_key: &str) -> Self {
        self.parent_key = parent_key.to_string();
        self
    }

    pub fn related(&self) -> &ModelDescriptor {
        &self.related
    }

    pub fn pivot_table(&self) -> &str {
        self.pivot.table()
    }

    pub fn pivot_constraints(&self) -> &PivotConstraintSet {
        &self.pivot
    }

    /// Whether matching goes through `type:id` keys
    fn matches_by_owner_type(&self) -> bool {
        matches!(self.morph, Some(PivotMorph { morph_class: None, .. }))
    }

    fn qualified_foreign_pivot_key(&self) -> String {
        format!("{}.{}", self.pivot.table(), self.foreign_pivot_key)
    }

    pub fn with_pivot(mut self, columns: &[&str]) -> OrmResult<Self> {
        self.pivot.with_pivot(columns)?;
        Ok(self)
    }

    pub fn with_timestamps(mut self) -> Self {
        self.pivot.with_timestamps();
        self
    }

    /// Constrain on a pivot value that is also written by `attach`
    pub fn with_pivot_value<T: Into<DatabaseValue>>(mut self, column: &str, value: T) -> OrmResult<Self> {
        self.pivot.with_value(&mut self.query, column, value.into())?;
        Ok(self)
    }

    pub fn where_pivot<T: Into<DatabaseValue>>(mut self, column: &str, operator: &str, value: T) -> OrmResult<Self> {
        let clause = self.pivot.comparison(Connective::And, column, operator, value.into())?;
        self.pivot.push_where(&mut self.query, clause);
        Ok(self)
    }

    pub fn or_where_pivot<T: Into<DatabaseValue>>(mut self, column: &str, operator: &str, value: T) -> OrmResult<Self> {
        let clause = self.pivot.comparison(Connective::Or, column, operator, value.into())?;
        self.pivot.push_where(&mut self.query, clause);
        Ok(self)
    }

    pub fn where_pivot_in<I, T>(mut self, column: &str, values: I) -> OrmResult<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<DatabaseValue>,
    {
        let clause = self.pivot.membership(column, values.into_iter().map(Into::into).collect(), false)?;
        self.pivot.push_where(&mut self.query, clause);
        Ok(self)
    }

    pub fn where_pivot_not_in<I, T>(mut self, column: &str, values: I) -> OrmResult<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<DatabaseValue>,
    {
        let clause = self.pivot.membership(column, values.into_iter().map(Into::into).collect(), true)?;
        self.pivot.push_where(&mut self.query, clause);
        Ok(self)
    }

    pub fn where_pivot_null(mut self, column: &str) -> OrmResult<Self> {
        let clause = self.pivot.nullness(column, true)?;
        self.pivot.push_where(&mut self.query, clause);
        Ok(self)
    }

    pub fn where_pivot_not_null(mut self, column: &str) -> OrmResult<Self> {
        let clause = self.pivot.nullness(column, false)?;
        self.pivot.push_where(&mut self.query, clause);
        Ok(self)
    }

    pub fn where_pivot_between<T: Into<DatabaseValue>>(mut self, column: &str, low: T, high: T) -> OrmResult<Self> {
        let clause = self.pivot.between(column, low.into(), high.into())?;
        self.pivot.push_where(&mut self.query, clause);
        Ok(self)
    }

    pub fn where_pivot_date<T: Into<DatabaseValue>>(self, column: &str, operator: &str, value: T) -> OrmResult<Self> {
        self.where_pivot_date_part(DatePart::Date, column, operator, value.into())
    }

    pub fn where_pivot_time<T: Into<DatabaseValue>>(self, column: &str, operator: &str, value: T) -> OrmResult<Self> {
        self.where_pivot_date_part(DatePart::Time, column, operator, value.into())
    }

    pub fn where_pivot_day<T: Into<DatabaseValue>>(self, column: &str, operator: &str, value: T) -> OrmResult<Self> {
        self.where_pivot_date_part(DatePart::Day, column, operator, value.into())
    }

    pub fn where_pivot_month<T: Into<DatabaseValue>>(self, column: &str, operator: &str, value: T) -> OrmResult<Self> {
        self.where_pivot_date_part(DatePart::Month, column, operator, value.into())
    }

    pub fn where_pivot_year<T: Into<DatabaseValue>>(self, column: &str, operator: &str, value: T) -> OrmResult<Self> {
        self.where_pivot_date_part(DatePart::Year, column, operator, value.into())
    }

    fn where_pivot_date_part(mut self, part: DatePart, column: &str, operator: &str, value: DatabaseValue) -> OrmResult<Self> {
        let clause = self.pivot.date_part(part, column, operator, value)?;
        self.pivot.push_where(&mut self.query, clause);
        Ok(self)
    }

    pub fn where_pivot_json_contains<T: Into<DatabaseValue>>(mut self, column: &str, path: &str, value: T) -> OrmResult<Self> {
        let clause = self.pivot.json_contains(column, path, value.into())?;
        self.pivot.push_where(&mut self.query, clause);
        Ok(self)
    }

    pub fn where_pivot_json_length<T: Into<DatabaseValue>>(
        mut self,
        column: &str,
        path: &str,
        operator: &str,
        value: T,
    ) -> OrmResult<Self> {
        let clause = self.pivot.json_length(column, path, operator, value.into())?;
        self.pivot.push_where(&mut self.query, clause);
        Ok(self)
    }

    pub fn order_by_pivot(mut self, column: &str, direction: OrderDirection) -> OrmResult<Self> {
        let order = self.pivot.order(column, direction)?;
        self.pivot.push_order(&mut self.query, order);
        Ok(self)
    }

    /// Join the pivot table and replay staged pivot constraints, once
    fn perform_join(&mut self) {
        if self.pivot.is_joined() {
            return;
        }
        self.query.push_join(JoinClause {
            join_type: JoinType::Inner,
            table: self.pivot.table().to_string(),
            on_conditions: vec![(
                self.related.qualify(&self.related_key),
                format!("{}.{}", self.pivot.table(), self.related_pivot_key),
            )],
        });
        self.pivot.replay(&mut self.query);
    }

    /// Owner-type constraint for polymorphic owners
    fn constrain_owner_types<'a>(&mut self, classes: impl IntoIterator<Item = &'a str>) {
        let Some(PivotMorph { type_column, morph_class: None }) = &self.morph else {
            return;
        };
        let column = format!("{}.{}", self.pivot.table(), type_column);
        let classes: BTreeSet<&str> = classes.into_iter().collect();
        let query = std::mem::take(&mut self.query);
        self.query = if classes.len() == 1 {
            query.where_eq(&column, classes.into_iter().next().unwrap_or_default())
        } else {
            query.where_in(&column, classes)
        };
    }

    fn pivot_keys(&self) -> Vec<&str> {
        let mut keys = vec![self.foreign_pivot_key.as_str(), self.related_pivot_key.as_str()];
        if let Some(morph) = &self.morph {
            keys.push(morph.type_column.as_str());
        }
        keys
    }

    /// The relation query with related and pivot columns selected
    ///
    /// Pivot columns are only discovered here, and only for `with_pivot("*")`.
    async fn prepared_query(&self, ctx: &RelationContext) -> OrmResult<QueryBuilder> {
        let discovered = if self.pivot.needs_discovery() {
            Some(ctx.columns(self.pivot.table()).await?)
        } else {
            None
        };

        let mut query = self.query.clone();
        if query.columns().is_empty() {
            query.push_column(SelectColumn::Column(format!("{}.*", self.related.table())));
        }
        for column in self.pivot.select_columns(&self.pivot_keys(), discovered.as_ref().map(|c| c.as_slice())) {
            query.push_column(SelectColumn::Column(column));
        }
        Ok(query)
    }

    fn window_plan(&self) -> WindowPlan {
        let plan = WindowPlan {
            partition_column: self.qualified_foreign_pivot_key(),
            discriminators: Vec::new(),
            outer_key: format!("{}{}", PIVOT_PREFIX, self.foreign_pivot_key),
            related_key: self.related.qualify(&self.related_key),
            related_table: self.related.table().to_string(),
        };
        match &self.morph {
            Some(PivotMorph { type_column, morph_class: None }) => {
                plan.with_discriminator(format!("{}.{}", self.pivot.table(), type_column))
            }
            _ => plan,
        }
    }

    /// Move `pivot_*` attributes into a [`Pivot`], returning the owner match key
    fn extract_pivot(&self, record: &mut Record) -> Option<MatchKey> {
        let attributes = record.take_prefixed(PIVOT_PREFIX);
        let owner_value = attributes.get(&self.foreign_pivot_key).cloned();
        let owner_type = self
            .morph
            .as_ref()
            .and_then(|morph| attributes.get(&morph.type_column))
            .and_then(|value| value.as_str().map(str::to_string));
        record.set_pivot(Pivot::new(self.pivot.table(), attributes));

        let owner_value = owner_value?;
        if self.matches_by_owner_type() {
            MatchKey::composite(&owner_type?, &owner_value)
        } else {
            MatchKey::from_value(&owner_value)
        }
    }
}

impl QueryMethods for BelongsToMany {
    fn query(&self) -> &QueryBuilder {
        &self.query
    }

    fn query_mut(&mut self) -> &mut QueryBuilder {
        &mut self.query
    }
}

#[async_trait]
impl Relation for BelongsToMany {
    fn cardinality(&self) -> Cardinality {
        Cardinality::Many
    }

    fn owner_has_key(&self, owner: &Record) -> bool {
        owner.get(&self.parent_key).is_some_and(|value| !value.is_null())
    }

    fn add_constraints(&mut self, owner: &Record) {
        let column = self.qualified_foreign_pivot_key();
        if self.query.has_in_on(&column) {
            return;
        }
        self.perform_join();
        self.query.group_or_wheres();
        let key = owner.value(&self.parent_key);
        self.query = std::mem::take(&mut self.query).where_eq(&column, key);
        self.constrain_owner_types([owner.morph_class()]);
    }

    fn add_eager_constraints(&mut self, owners: &[Record]) -> bool {
        let keys = dictionary::collect_keys(owners, &self.parent_key);
        if keys.is_empty() {
            return false;
        }
        self.perform_join();
        self.query.group_or_wheres();
        let column = self.qualified_foreign_pivot_key();
        self.query = std::mem::take(&mut self.query).where_in(&column, keys);
        let classes: Vec<String> = owners.iter().map(|owner| owner.morph_class().to_string()).collect();
        self.constrain_owner_types(classes.iter().map(String::as_str));
        true
    }

    async fn get_eager(&mut self, ctx: &RelationContext) -> OrmResult<Vec<Record>> {
        let query = self.prepared_query(ctx).await?;
        let rows = window::select_limited(ctx, &query, &self.window_plan()).await?;
        debug!(pivot = %self.pivot.table(), rows = rows.len(), "loaded pivot relation rows");
        Ok(self.related.hydrate(rows))
    }

    fn match_eager(&self, owners: &mut [Record], results: Vec<Record>, relation: &str) {
        // First hydrated instance per related key, cloned for every owner
        let mut identity: HashMap<MatchKey, Record> = HashMap::new();
        let mut dictionary: HashMap<MatchKey, Vec<Record>> = HashMap::new();

        for mut record in results {
            let Some(owner_key) = self.extract_pivot(&mut record) else {
                continue;
            };
            let instance = match key_from(&record, &self.related_key) {
                Some(related_key) => {
                    let pivot = record.pivot().cloned();
                    let mut shared = identity.entry(related_key).or_insert(record).clone();
                    if let Some(pivot) = pivot {
                        shared.set_pivot(pivot);
                    }
                    shared
                }
                None => record,
            };
            dictionary.entry(owner_key).or_default().push(instance);
        }

        if self.matches_by_owner_type() {
            dictionary::match_many(owners, &dictionary, relation, |owner| {
                MatchKey::composite(owner.morph_class(), owner.get(&self.parent_key)?)
            });
        } else {
            dictionary::match_many(owners, &dictionary, relation, |owner| key_from(owner, &self.parent_key));
        }
    }

    async fn get_results(&mut self, ctx: &RelationContext) -> OrmResult<RelationValue> {
        let mut records = self.get_eager(ctx).await?;
        for record in records.iter_mut() {
            self.extract_pivot(record);
        }
        Ok(RelationValue::Many(records))
    }

    fn clone_box(&self) -> Box<dyn Relation> {
        Box::new(self.clone())
    }
}
