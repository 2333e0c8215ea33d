//! Eager loader - resolves named relations onto a set of owners
//!
//! One owner is resolved lazily with an equality constraint. Several owners
//! are resolved in batch: the relation is constrained with one IN predicate,
//! fetched once and distributed by dictionary matching.

use std::future::Future;
use std::pin::Pin;

use tracing::debug;

use crate::context::RelationContext;
use crate::error::OrmResult;
use crate::model::{Record, RelationValue};
use crate::relationships::{Cardinality, Relation};

type LoadFuture<'a> = Pin<Box<dyn Future<Output = OrmResult<()>> + Send + 'a>>;

/// Resolve `relation` onto `owners` under `name`
///
/// Every owner ends up with a value for `name`: the matched record(s), or an
/// empty value when nothing matched or the owner has no key.
pub async fn load_relation(
    ctx: &RelationContext,
    owners: &mut [Record],
    name: &str,
    relation: &mut dyn Relation,
) -> OrmResult<()> {
    match owners.len() {
        0 => Ok(()),
        1 => {
            let owner = &mut owners[0];
            if !relation.owner_has_key(owner) {
                owner.set_relation(name, relation.cardinality().empty_value());
                return Ok(());
            }
            relation.add_constraints(owner);
            let value = relation.get_results(ctx).await?;
            owner.set_relation(name, value);
            Ok(())
        }
        count => {
            relation.init_relation(owners, name);
            if !relation.add_eager_constraints(owners) {
                debug!(relation = %name, owners = count, "no owner keys, skipping eager load");
                return Ok(());
            }
            let results = relation.get_eager(ctx).await?;
            debug!(relation = %name, owners = count, results = results.len(), "eager loaded relation");
            relation.match_eager(owners, results, name);
            Ok(())
        }
    }
}

struct PendingLoad {
    name: String,
    relation: Box<dyn Relation>,
    nested: Option<EagerLoader>,
}

impl Clone for PendingLoad {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            relation: self.relation.clone(),
            nested: self.nested.clone(),
        }
    }
}

/// A set of named relations to resolve together
#[derive(Clone, Default)]
pub struct EagerLoader {
    loads: Vec<PendingLoad>,
}

impl std::fmt::Debug for EagerLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EagerLoader").field("relations", &self.names()).finish()
    }
}

impl EagerLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<R>(self, name: &str, relation: R) -> Self
    where
        R: Relation + 'static,
    {
        self.push(name, Box::new(relation), None)
    }

    /// Load `relation`, then load `nested` onto the records it returned
    pub fn with_nested<R>(self, name: &str, relation: R, nested: EagerLoader) -> Self
    where
        R: Relation + 'static,
    {
        self.push(name, Box::new(relation), Some(nested))
    }

    fn push(mut self, name: &str, relation: Box<dyn Relation>, nested: Option<EagerLoader>) -> Self {
        self.loads.push(PendingLoad {
            name: name.to_string(),
            relation,
            nested,
        });
        self
    }

    pub fn names(&self) -> Vec<&str> {
        self.loads.iter().map(|load| load.name.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.loads.is_empty()
    }

    /// Resolve every registered relation onto `owners`
    ///
    /// The loader itself is not consumed; each run works on fresh copies of
    /// the relation definitions.
    pub fn load<'a>(&'a self, ctx: &'a RelationContext, owners: &'a mut [Record]) -> LoadFuture<'a> {
        Box::pin(async move {
            for load in &self.loads {
                let mut relation = load.relation.clone();
                load_relation(ctx, owners, &load.name, relation.as_mut()).await?;
                if let Some(nested) = &load.nested {
                    load_nested(ctx, owners, &load.name, relation.cardinality(), nested).await?;
                }
            }
            Ok(())
        })
    }
}

/// Load `nested` onto every record loaded under `name`, then put them back
async fn load_nested(
    ctx: &RelationContext,
    owners: &mut [Record],
    name: &str,
    cardinality: Cardinality,
    nested: &EagerLoader,
) -> OrmResult<()> {
    let mut counts = Vec::with_capacity(owners.len());
    let mut children = Vec::new();
    for owner in owners.iter_mut() {
        let records = owner.take_relation(name).map(RelationValue::into_records).unwrap_or_default();
        counts.push(records.len());
        children.extend(records);
    }

    nested.load(ctx, &mut children).await?;

    let mut children = children.into_iter();
    for (owner, count) in owners.iter_mut().zip(counts) {
        let records: Vec<Record> = children.by_ref().take(count).collect();
        owner.set_relation(name, cardinality.value_from(records));
    }
    Ok(())
}
