//! MorphTo - the owner stores the related record's type and id
//!
//! Owners are grouped by their discriminator value. Each group is loaded with
//! its own query against the resolved table, or all groups are loaded with a
//! single UNION ALL when they can share one column list.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::contract::{Cardinality, Relation};
use super::dictionary::{self, MatchKey};
use crate::backends::DatabaseValue;
use crate::context::RelationContext;
use crate::error::{OrmResult, RelationError};
use crate::loading::EagerLoader;
use crate::model::{ModelDescriptor, MorphMap, Record, RelationValue};
use crate::query::{QueryBuilder, QueryMethods, SelectColumn};

/// Synthetic discriminator selected by every UNION ALL branch
pub const MORPH_TYPE_COLUMN: &str = "elif_morph_type";

/// Query customisation applied to a single morph type
pub type TypeConstraint = Arc<dyn Fn(QueryBuilder) -> QueryBuilder + Send + Sync>;

#[derive(Clone)]
pub struct MorphTo {
    morph_map: Arc<MorphMap>,
    /// Owner column holding the related morph class
    type_column: String,
    /// Owner column holding the related key
    id_column: String,
    /// Related column the id points at; each type's primary key when unset
    owner_key: Option<String>,
    /// Constraints applied to every type's query
    query: QueryBuilder,
    type_constraints: HashMap<String, TypeConstraint>,
    type_loads: HashMap<String, EagerLoader>,
    /// Distinct ids per morph type, in first-seen order
    groups: BTreeMap<String, Vec<DatabaseValue>>,
}

impl fmt::Debug for MorphTo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MorphTo")
            .field("type_column", &self.type_column)
            .field("id_column", &self.id_column)
            .field("owner_key", &self.owner_key)
            .field("constrained_types", &self.type_constraints.keys().collect::<Vec<_>>())
            .field("groups", &self.groups)
            .finish()
    }
}

impl MorphTo {
    /// `morph_to(map, "commentable")` reads `commentable_type` and `commentable_id`
    pub fn new(morph_map: Arc<MorphMap>, name: &str) -> Self {
        Self::with_columns(morph_map, &format!("{name}_type"), &format!("{name}_id"))
    }

    pub fn with_columns(morph_map: Arc<MorphMap>, type_column: &str, id_column: &str) -> Self {
        Self {
            morph_map,
            type_column: type_column.to_string(),
            id_column: id_column.to_string(),
            owner_key: None,
            query: QueryBuilder::new(),
            type_constraints: HashMap::new(),
            type_loads: HashMap::new(),
            groups: BTreeMap::new(),
        }
    }

    /// Match the owner's id against this related column instead of the primary key
    pub fn with_owner_key(mut self, owner_key: &str) -> Self {
        self.owner_key = Some(owner_key.to_string());
        self
    }

    /// Customise the query for one morph type
    pub fn constrain<F>(mut self, morph_type: &str, constraint: F) -> Self
    where
        F: Fn(QueryBuilder) -> QueryBuilder + Send + Sync + 'static,
    {
        self.type_constraints.insert(morph_type.to_string(), Arc::new(constraint));
        self
    }

    /// Eager load relations onto records of one morph type
    pub fn morph_with(mut self, morph_type: &str, loader: EagerLoader) -> Self {
        self.type_loads.insert(morph_type.to_string(), loader);
        self
    }

    pub fn type_column(&self) -> &str {
        &self.type_column
    }

    pub fn id_column(&self) -> &str {
        &self.id_column
    }

    /// Point `owner` at `related`, caching it as the loaded relation
    pub fn associate(&self, owner: &mut Record, related: &Record, relation: &str) -> OrmResult<()> {
        let key_column = self.related_key_column(related.descriptor());
        let key = related
            .get(key_column)
            .filter(|value| !value.is_null())
            .cloned()
            .ok_or_else(|| RelationError::missing_key(related.descriptor().table(), key_column))?;

        owner.set(self.type_column.clone(), related.morph_class());
        owner.set(self.id_column.clone(), key);
        owner.set_relation(relation, RelationValue::One(Some(Box::new(related.clone()))));
        Ok(())
    }

    pub fn dissociate(&self, owner: &mut Record, relation: &str) {
        owner.set(self.type_column.clone(), DatabaseValue::Null);
        owner.set(self.id_column.clone(), DatabaseValue::Null);
        owner.set_relation(relation, RelationValue::One(None));
    }

    fn related_key_column<'a>(&'a self, descriptor: &'a ModelDescriptor) -> &'a str {
        self.owner_key.as_deref().unwrap_or(descriptor.primary_key())
    }

    fn owner_type<'a>(&self, owner: &'a Record) -> Option<&'a str> {
        owner
            .get(&self.type_column)
            .and_then(DatabaseValue::as_str)
            .filter(|morph_type| !morph_type.is_empty())
    }

    fn push_owner(&mut self, owner: &Record, seen: &mut HashSet<MatchKey>) {
        let Some(morph_type) = self.owner_type(owner) else {
            return;
        };
        let Some(id) = owner.get(&self.id_column) else {
            return;
        };
        if let Some(key) = MatchKey::composite(morph_type, id) {
            if seen.insert(key) {
                self.groups.entry(morph_type.to_string()).or_default().push(id.clone());
            }
        }
    }

    /// Whether all groups can be fetched with one UNION ALL
    fn batchable(&self, ctx: &RelationContext) -> bool {
        let constraints = self.query.constraints();
        ctx.config().polymorphic_union
            && self.groups.len() >= 2
            && self.type_constraints.is_empty()
            && self.type_loads.is_empty()
            && self.owner_key.is_none()
            && constraints.orders.is_empty()
            && constraints.limit.is_none()
            && constraints.offset.is_none()
    }

    /// One query per morph type
    async fn get_per_type(&self, ctx: &RelationContext) -> OrmResult<Vec<Record>> {
        let constraints = self.query.constraints();
        let mut results = Vec::new();

        for (morph_type, ids) in &self.groups {
            let descriptor = self.morph_map.resolve(morph_type)?;
            let mut query = QueryBuilder::table(descriptor.table());
            query.apply_constraints(&constraints);
            if let Some(constraint) = self.type_constraints.get(morph_type) {
                query = constraint(query);
            }
            query.group_or_wheres();
            let key_column = descriptor.qualify(self.related_key_column(descriptor));
            let query = query.where_in(&key_column, ids.clone());

            let mut records = descriptor.hydrate(ctx.select(&query).await?);
            if let Some(loader) = self.type_loads.get(morph_type) {
                loader.load(ctx, &mut records).await?;
            }
            debug!(morph_type = %morph_type, records = records.len(), "loaded morph type");
            results.extend(records);
        }
        Ok(results)
    }

    /// Single UNION ALL over the columns every participating table shares
    ///
    /// `Ok(None)` means the batch path does not apply and the per-type path
    /// should run.
    async fn get_union(&self, ctx: &RelationContext) -> OrmResult<Option<Vec<Record>>> {
        let mut descriptors = Vec::with_capacity(self.groups.len());
        for morph_type in self.groups.keys() {
            descriptors.push(self.morph_map.resolve(morph_type)?);
        }

        let primary_key = descriptors[0].primary_key();
        if descriptors.iter().any(|descriptor| descriptor.primary_key() != primary_key) {
            debug!("morph types use different primary keys, loading per type");
            return Ok(None);
        }

        let mut shared: Option<Vec<String>> = None;
        for descriptor in &descriptors {
            let columns = ctx.columns(descriptor.table()).await?;
            shared = Some(match shared {
                None => columns.as_ref().clone(),
                Some(current) => current.into_iter().filter(|column| columns.contains(column)).collect(),
            });
        }
        let shared = shared.unwrap_or_default();
        if !shared.iter().any(|column| column == primary_key) {
            debug!("morph tables share no usable column list, loading per type");
            return Ok(None);
        }

        let wheres = self.query.constraints().wheres;
        let grammar = ctx.grammar();
        let mut branches = self.groups.iter().zip(&descriptors).map(|((morph_type, ids), descriptor)| {
            let mut branch = QueryBuilder::table(descriptor.table());
            for column in &shared {
                branch.push_column(SelectColumn::Column(descriptor.qualify(column)));
            }
            branch.push_column(SelectColumn::Raw(format!(
                "{} as {}",
                grammar.quote_string(morph_type),
                grammar.wrap(MORPH_TYPE_COLUMN)
            )));
            branch.set_wheres(wheres.clone());
            branch.group_or_wheres();
            branch.where_in(&descriptor.qualify(primary_key), ids.clone())
        });

        let Some(mut query) = branches.next() else {
            return Ok(Some(Vec::new()));
        };
        for branch in branches {
            query.push_union(branch);
        }

        let rows = ctx.select(&query).await?;
        debug!(types = descriptors.len(), rows = rows.len(), "loaded morph types with union all");

        let mut records = Vec::with_capacity(rows.len());
        for mut row in rows {
            let Some(morph_type) = row.take(MORPH_TYPE_COLUMN) else {
                continue;
            };
            let Some(morph_type) = morph_type.as_str() else {
                continue;
            };
            let descriptor = self.morph_map.resolve(morph_type)?;
            records.push(Record::from_row(descriptor.clone(), row));
        }
        Ok(Some(records))
    }
}

impl QueryMethods for MorphTo {
    fn query(&self) -> &QueryBuilder {
        &self.query
    }

    fn query_mut(&mut self) -> &mut QueryBuilder {
        &mut self.query
    }
}

#[async_trait]
impl Relation for MorphTo {
    fn cardinality(&self) -> Cardinality {
        Cardinality::One
    }

    fn owner_has_key(&self, owner: &Record) -> bool {
        self.owner_type(owner).is_some() && owner.get(&self.id_column).is_some_and(|value| !value.is_null())
    }

    fn add_constraints(&mut self, owner: &Record) {
        self.groups.clear();
        self.push_owner(owner, &mut HashSet::new());
    }

    fn add_eager_constraints(&mut self, owners: &[Record]) -> bool {
        self.groups.clear();
        let mut seen = HashSet::new();
        for owner in owners {
            self.push_owner(owner, &mut seen);
        }
        !self.groups.is_empty()
    }

    async fn get_eager(&mut self, ctx: &RelationContext) -> OrmResult<Vec<Record>> {
        if self.batchable(ctx) {
            match self.get_union(ctx).await {
                Ok(Some(records)) => return Ok(records),
                Ok(None) => {}
                Err(error) => {
                    warn!(error = %error, "union morph load failed, loading per type");
                }
            }
        }
        self.get_per_type(ctx).await
    }

    fn match_eager(&self, owners: &mut [Record], results: Vec<Record>, relation: &str) {
        let dictionary = dictionary::build_dictionary(results, |record| {
            let key_column = self.related_key_column(record.descriptor());
            MatchKey::composite(record.morph_class(), record.get(key_column)?)
        });
        dictionary::match_one(owners, &dictionary, relation, |owner| {
            MatchKey::composite(self.owner_type(owner)?, owner.get(&self.id_column)?)
        });
    }

    fn clone_box(&self) -> Box<dyn Relation> {
        Box::new(self.clone())
    }
}
