//! Pivot writes - attach, detach, sync, toggle and pivot updates
//!
//! Every multi-statement operation runs inside one transaction: current pivot
//! rows are read once, diffed in memory, and the inserts, updates and deletes
//! are issued in batches before committing. Any failure rolls back.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::Utc;
use tracing::debug;

use super::{ensure_scalar, CREATED_AT, UPDATED_AT};
use crate::backends::{DatabaseTransaction, DatabaseValue};
use crate::context::{finish, RelationContext};
use crate::error::{OrmResult, RelationError};
use crate::model::Record;
use crate::query::predicate::{group, has_or};
use crate::query::{
    validate_identifier, DeleteStatement, InsertStatement, Predicate, QueryBuilder, QueryMethods,
    QueryOperator, SelectColumn, UpdateStatement, WhereClause,
};
use crate::relationships::belongs_to_many::{BelongsToMany, PivotMorph};
use crate::relationships::dictionary::MatchKey;

/// Alias of the related id column in current-row lookups
const RELATED_ID: &str = "elif_related_id";

/// A related id plus the pivot attributes to write with it
#[derive(Debug, Clone, PartialEq)]
pub struct PivotRow {
    pub id: DatabaseValue,
    pub attributes: BTreeMap<String, DatabaseValue>,
}

impl PivotRow {
    pub fn new(id: impl Into<DatabaseValue>) -> Self {
        Self {
            id: id.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with(mut self, column: &str, value: impl Into<DatabaseValue>) -> Self {
        self.attributes.insert(column.to_string(), value.into());
        self
    }

    /// Rows without extra attributes
    pub fn from_ids<I, T>(ids: I) -> Vec<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<DatabaseValue>,
    {
        ids.into_iter().map(Self::new).collect()
    }
}

/// Ids touched by `sync` and `toggle`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncChanges {
    pub attached: Vec<DatabaseValue>,
    pub detached: Vec<DatabaseValue>,
    pub updated: Vec<DatabaseValue>,
}

impl SyncChanges {
    pub fn is_empty(&self) -> bool {
        self.attached.is_empty() && self.detached.is_empty() && self.updated.is_empty()
    }
}

impl BelongsToMany {
    /// Insert pivot rows linking `owner` to each related id
    pub async fn attach(&self, ctx: &RelationContext, owner: &Record, rows: Vec<PivotRow>) -> OrmResult<u64> {
        let owner_key = self.owner_key(owner)?;
        let rows = self.validate_rows(rows)?;
        if rows.is_empty() {
            return Ok(0);
        }

        let mut tx = ctx.begin().await?;
        debug!(pivot = %self.pivot.table(), rows = rows.len(), "attach started");
        let result = self.insert_rows(ctx, &mut *tx, owner, &owner_key, &rows).await;
        finish(tx, result).await
    }

    /// Delete pivot rows for `ids`, or every row of the owner when `ids` is `None`
    ///
    /// An empty id list deletes nothing.
    pub async fn detach(&self, ctx: &RelationContext, owner: &Record, ids: Option<Vec<DatabaseValue>>) -> OrmResult<u64> {
        let owner_key = self.owner_key(owner)?;
        if let Some(ids) = &ids {
            if ids.is_empty() {
                return Ok(0);
            }
            for id in ids {
                self.validate_id(id)?;
            }
        }

        let mut tx = ctx.begin().await?;
        debug!(pivot = %self.pivot.table(), "detach started");
        let result = match ids {
            Some(ids) => self.delete_ids(ctx, &mut *tx, owner, &owner_key, &ids).await,
            None => {
                let statement = DeleteStatement::new(self.pivot.table(), self.owner_clauses(owner, &owner_key));
                let (sql, bindings) = statement.to_sql(ctx.grammar());
                tx.execute(&sql, &bindings).await
            }
        };
        finish(tx, result).await
    }

    /// Make the owner's pivot rows match `rows` exactly
    pub async fn sync(&self, ctx: &RelationContext, owner: &Record, rows: Vec<PivotRow>) -> OrmResult<SyncChanges> {
        self.sync_rows(ctx, owner, rows, true).await
    }

    /// Attach missing rows and update existing ones, leaving the rest alone
    pub async fn sync_without_detaching(
        &self,
        ctx: &RelationContext,
        owner: &Record,
        rows: Vec<PivotRow>,
    ) -> OrmResult<SyncChanges> {
        self.sync_rows(ctx, owner, rows, false).await
    }

    /// Detach the given ids that are attached, attach the ones that are not
    pub async fn toggle(&self, ctx: &RelationContext, owner: &Record, rows: Vec<PivotRow>) -> OrmResult<SyncChanges> {
        let owner_key = self.owner_key(owner)?;
        let rows = self.validate_rows(rows)?;
        if rows.is_empty() {
            return Ok(SyncChanges::default());
        }

        let mut tx = ctx.begin().await?;
        debug!(pivot = %self.pivot.table(), rows = rows.len(), "toggle started");
        let result = self.toggle_in(ctx, &mut *tx, owner, &owner_key, rows).await;
        finish(tx, result).await
    }

    /// Update attributes of an existing pivot row, returning rows actually changed
    pub async fn update_existing_pivot(
        &self,
        ctx: &RelationContext,
        owner: &Record,
        id: impl Into<DatabaseValue>,
        attributes: BTreeMap<String, DatabaseValue>,
    ) -> OrmResult<u64> {
        let owner_key = self.owner_key(owner)?;
        let id = id.into();
        self.validate_id(&id)?;
        self.validate_attributes(&attributes)?;
        if attributes.is_empty() && !self.pivot.uses_timestamps() {
            return Ok(0);
        }

        let mut tx = ctx.begin().await?;
        let result = self.update_row(ctx, &mut *tx, owner, &owner_key, &id, &attributes).await;
        finish(tx, result).await
    }

    /// Whether a pivot row links `owner` to `id`
    pub async fn pivot_exists(&self, ctx: &RelationContext, owner: &Record, id: impl Into<DatabaseValue>) -> OrmResult<bool> {
        let owner_key = self.owner_key(owner)?;
        let id = id.into();
        self.validate_id(&id)?;

        let mut query = QueryBuilder::table(self.pivot.table());
        query.set_wheres(self.owner_clauses(owner, &owner_key));
        let query = query.where_eq(&self.qualified_related_pivot_key(), id);
        query.exists(ctx.connection()).await
    }

    /// Check that the pivot table has the key columns this relation writes
    pub async fn verify_pivot_schema(&self, ctx: &RelationContext) -> OrmResult<()> {
        let mut required = vec![self.foreign_pivot_key.as_str(), self.related_pivot_key.as_str()];
        if let Some(morph) = &self.morph {
            required.push(morph.type_column.as_str());
        }
        ctx.schema()
            .ensure_columns(ctx.connection(), self.pivot.table(), &required)
            .await
    }

    async fn sync_rows(
        &self,
        ctx: &RelationContext,
        owner: &Record,
        rows: Vec<PivotRow>,
        detaching: bool,
    ) -> OrmResult<SyncChanges> {
        let owner_key = self.owner_key(owner)?;
        let rows = self.validate_rows(rows)?;
        let chunked = rows.len() > ctx.config().sync_chunk_threshold;

        let mut tx = ctx.begin().await?;
        debug!(pivot = %self.pivot.table(), rows = rows.len(), chunked, "sync started");
        let result = if chunked {
            self.sync_chunked(ctx, &mut *tx, owner, &owner_key, rows, detaching).await
        } else {
            self.sync_in(ctx, &mut *tx, owner, &owner_key, rows, detaching).await
        };
        finish(tx, result).await
    }

    async fn sync_in(
        &self,
        ctx: &RelationContext,
        tx: &mut dyn DatabaseTransaction,
        owner: &Record,
        owner_key: &DatabaseValue,
        rows: Vec<PivotRow>,
        detaching: bool,
    ) -> OrmResult<SyncChanges> {
        let current = self.current_ids(ctx, tx, owner, owner_key, None).await?;
        let desired: HashSet<MatchKey> = rows.iter().filter_map(|row| MatchKey::from_value(&row.id)).collect();

        let mut changes = SyncChanges::default();
        if detaching {
            let stale: Vec<DatabaseValue> = current
                .iter()
                .filter(|(key, _)| !desired.contains(*key))
                .map(|(_, id)| id.clone())
                .collect();
            if !stale.is_empty() {
                self.delete_ids(ctx, tx, owner, owner_key, &stale).await?;
                changes.detached = stale;
            }
        }

        self.apply_rows(ctx, tx, owner, owner_key, rows, &current, &mut changes).await?;
        Ok(changes)
    }

    /// Sync for large id sets: current rows are only looked up per chunk
    async fn sync_chunked(
        &self,
        ctx: &RelationContext,
        tx: &mut dyn DatabaseTransaction,
        owner: &Record,
        owner_key: &DatabaseValue,
        rows: Vec<PivotRow>,
        detaching: bool,
    ) -> OrmResult<SyncChanges> {
        let chunk_size = ctx.config().sync_chunk_size.max(1);
        let desired: HashSet<MatchKey> = rows.iter().filter_map(|row| MatchKey::from_value(&row.id)).collect();
        let mut changes = SyncChanges::default();

        if detaching {
            // Collect first; deleting while paging would shift the offsets
            let mut stale = Vec::new();
            let mut offset = 0u64;
            loop {
                let page = self
                    .current_page(ctx, tx, owner, owner_key, chunk_size as u64, offset)
                    .await?;
                let fetched = page.len();
                stale.extend(
                    page.into_iter()
                        .filter(|(key, _)| !desired.contains(key))
                        .map(|(_, id)| id),
                );
                if fetched < chunk_size {
                    break;
                }
                offset += chunk_size as u64;
            }
            if !stale.is_empty() {
                self.delete_ids(ctx, tx, owner, owner_key, &stale).await?;
                changes.detached = stale;
            }
        }

        let mut remaining = rows.into_iter().peekable();
        while remaining.peek().is_some() {
            let chunk: Vec<PivotRow> = remaining.by_ref().take(chunk_size).collect();
            let ids: Vec<DatabaseValue> = chunk.iter().map(|row| row.id.clone()).collect();
            let current = self.current_ids(ctx, tx, owner, owner_key, Some(ids)).await?;
            self.apply_rows(ctx, tx, owner, owner_key, chunk, &current, &mut changes)
                .await?;
        }

        Ok(changes)
    }

    /// Attach rows missing from `current` and update present rows whose attributes differ
    #[allow(clippy::too_many_arguments)]
    async fn apply_rows(
        &self,
        ctx: &RelationContext,
        tx: &mut dyn DatabaseTransaction,
        owner: &Record,
        owner_key: &DatabaseValue,
        rows: Vec<PivotRow>,
        current: &HashMap<MatchKey, DatabaseValue>,
        changes: &mut SyncChanges,
    ) -> OrmResult<()> {
        let mut missing = Vec::new();
        for row in rows {
            let present = MatchKey::from_value(&row.id).is_some_and(|key| current.contains_key(&key));
            if !present {
                missing.push(row);
                continue;
            }
            if row.attributes.is_empty() {
                continue;
            }
            let affected = self
                .update_row(ctx, tx, owner, owner_key, &row.id, &row.attributes)
                .await?;
            if affected > 0 {
                changes.updated.push(row.id);
            }
        }

        if !missing.is_empty() {
            self.insert_rows(ctx, tx, owner, owner_key, &missing).await?;
            changes.attached.extend(missing.into_iter().map(|row| row.id));
        }
        Ok(())
    }

    async fn toggle_in(
        &self,
        ctx: &RelationContext,
        tx: &mut dyn DatabaseTransaction,
        owner: &Record,
        owner_key: &DatabaseValue,
        rows: Vec<PivotRow>,
    ) -> OrmResult<SyncChanges> {
        let ids: Vec<DatabaseValue> = rows.iter().map(|row| row.id.clone()).collect();
        let current = self.current_ids(ctx, tx, owner, owner_key, Some(ids)).await?;

        let (present, missing): (Vec<PivotRow>, Vec<PivotRow>) = rows
            .into_iter()
            .partition(|row| MatchKey::from_value(&row.id).is_some_and(|key| current.contains_key(&key)));

        let mut changes = SyncChanges::default();
        if !present.is_empty() {
            let ids: Vec<DatabaseValue> = present.into_iter().map(|row| row.id).collect();
            self.delete_ids(ctx, tx, owner, owner_key, &ids).await?;
            changes.detached = ids;
        }
        if !missing.is_empty() {
            self.insert_rows(ctx, tx, owner, owner_key, &missing).await?;
            changes.attached = missing.into_iter().map(|row| row.id).collect();
        }
        Ok(changes)
    }

    /// Related ids currently attached, optionally restricted to `only`
    async fn current_ids(
        &self,
        ctx: &RelationContext,
        tx: &mut dyn DatabaseTransaction,
        owner: &Record,
        owner_key: &DatabaseValue,
        only: Option<Vec<DatabaseValue>>,
    ) -> OrmResult<HashMap<MatchKey, DatabaseValue>> {
        let mut query = self.current_query(owner, owner_key);
        if let Some(ids) = only {
            query = query.where_in(&self.qualified_related_pivot_key(), ids);
        }
        let (sql, bindings) = query.to_sql(ctx.grammar());
        let rows = tx.select(&sql, &bindings).await?;

        Ok(rows
            .into_iter()
            .filter_map(|mut row| row.take(RELATED_ID))
            .filter_map(|id| MatchKey::from_value(&id).map(|key| (key, id)))
            .collect())
    }

    async fn current_page(
        &self,
        ctx: &RelationContext,
        tx: &mut dyn DatabaseTransaction,
        owner: &Record,
        owner_key: &DatabaseValue,
        limit: u64,
        offset: u64,
    ) -> OrmResult<Vec<(MatchKey, DatabaseValue)>> {
        let query = self
            .current_query(owner, owner_key)
            .order_by(&self.qualified_related_pivot_key())
            .limit(limit)
            .offset(offset);
        let (sql, bindings) = query.to_sql(ctx.grammar());
        let rows = tx.select(&sql, &bindings).await?;

        Ok(rows
            .into_iter()
            .filter_map(|mut row| row.take(RELATED_ID))
            .filter_map(|id| MatchKey::from_value(&id).map(|key| (key, id)))
            .collect())
    }

    fn current_query(&self, owner: &Record, owner_key: &DatabaseValue) -> QueryBuilder {
        let mut query = QueryBuilder::table(self.pivot.table());
        query.push_column(SelectColumn::Column(format!(
            "{} as {}",
            self.qualified_related_pivot_key(),
            RELATED_ID
        )));
        query.set_wheres(self.owner_clauses(owner, owner_key));
        query
    }

    async fn insert_rows(
        &self,
        ctx: &RelationContext,
        tx: &mut dyn DatabaseTransaction,
        owner: &Record,
        owner_key: &DatabaseValue,
        rows: &[PivotRow],
    ) -> OrmResult<u64> {
        let now = DatabaseValue::DateTime(Utc::now());

        // Rows with the same column set share one multi-row insert
        let mut batches: BTreeMap<Vec<String>, Vec<Vec<DatabaseValue>>> = BTreeMap::new();
        for row in rows {
            let mut values = BTreeMap::new();
            for (column, value) in self.pivot.values() {
                values.insert(column.clone(), value.clone());
            }
            for (column, value) in &row.attributes {
                values.insert(column.clone(), value.clone());
            }
            if self.pivot.uses_timestamps() {
                values.entry(CREATED_AT.to_string()).or_insert_with(|| now.clone());
                values.entry(UPDATED_AT.to_string()).or_insert_with(|| now.clone());
            }
            values.insert(self.foreign_pivot_key.clone(), owner_key.clone());
            values.insert(self.related_pivot_key.clone(), row.id.clone());
            if let Some((column, class)) = self.morph_value(owner) {
                values.insert(column, DatabaseValue::String(class));
            }

            let columns: Vec<String> = values.keys().cloned().collect();
            batches.entry(columns).or_default().push(values.into_values().collect());
        }

        let chunk_size = ctx.config().sync_chunk_size.max(1);
        let mut inserted = 0;
        for (columns, rows) in batches {
            for chunk in rows.chunks(chunk_size) {
                let mut statement = InsertStatement::new(self.pivot.table(), columns.clone());
                for values in chunk {
                    statement.push_row(values.clone());
                }
                let (sql, bindings) = statement.to_sql(ctx.grammar());
                inserted += tx.execute(&sql, &bindings).await?;
            }
        }
        debug!(pivot = %self.pivot.table(), inserted, "pivot rows inserted");
        Ok(inserted)
    }

    async fn delete_ids(
        &self,
        ctx: &RelationContext,
        tx: &mut dyn DatabaseTransaction,
        owner: &Record,
        owner_key: &DatabaseValue,
        ids: &[DatabaseValue],
    ) -> OrmResult<u64> {
        let chunk_size = ctx.config().sync_chunk_size.max(1);
        let mut deleted = 0;
        for chunk in ids.chunks(chunk_size) {
            let mut wheres = self.owner_clauses(owner, owner_key);
            wheres.push(WhereClause::and(Predicate::In {
                column: self.qualified_related_pivot_key(),
                values: chunk.to_vec(),
            }));
            let (sql, bindings) = DeleteStatement::new(self.pivot.table(), wheres).to_sql(ctx.grammar());
            deleted += tx.execute(&sql, &bindings).await?;
        }
        debug!(pivot = %self.pivot.table(), deleted, "pivot rows deleted");
        Ok(deleted)
    }

    async fn update_row(
        &self,
        ctx: &RelationContext,
        tx: &mut dyn DatabaseTransaction,
        owner: &Record,
        owner_key: &DatabaseValue,
        id: &DatabaseValue,
        attributes: &BTreeMap<String, DatabaseValue>,
    ) -> OrmResult<u64> {
        let mut sets: Vec<(String, DatabaseValue)> = attributes
            .iter()
            .map(|(column, value)| (column.clone(), value.clone()))
            .collect();
        if self.pivot.uses_timestamps() && !attributes.contains_key(UPDATED_AT) {
            sets.push((UPDATED_AT.to_string(), DatabaseValue::DateTime(Utc::now())));
        }

        let mut wheres = self.owner_clauses(owner, owner_key);
        wheres.push(WhereClause::and(Predicate::Comparison {
            column: self.qualified_related_pivot_key(),
            operator: QueryOperator::Equal,
            value: id.clone(),
        }));
        // Rows already holding these values are left alone and not counted
        let grammar = ctx.grammar();
        if !attributes.is_empty() {
            let differs: Vec<String> = attributes
                .keys()
                .map(|column| grammar.compile_distinct(&grammar.wrap(&format!("{}.{}", self.pivot.table(), column))))
                .collect();
            wheres.push(WhereClause::and(Predicate::Raw {
                sql: format!("({})", differs.join(" or ")),
                bindings: attributes.values().cloned().collect(),
            }));
        }
        let (sql, bindings) = UpdateStatement::new(self.pivot.table(), sets, wheres).to_sql(grammar);
        tx.execute(&sql, &bindings).await
    }

    /// Predicates selecting the owner's pivot rows
    ///
    /// Pivot constraints from the relation definition are included, grouped
    /// when they contain OR.
    fn owner_clauses(&self, owner: &Record, owner_key: &DatabaseValue) -> Vec<WhereClause> {
        let mut clauses = self.pivot.wheres().to_vec();
        if has_or(&clauses) {
            clauses = vec![group(clauses)];
        }
        clauses.push(WhereClause::and(Predicate::Comparison {
            column: format!("{}.{}", self.pivot.table(), self.foreign_pivot_key),
            operator: QueryOperator::Equal,
            value: owner_key.clone(),
        }));
        if let Some(PivotMorph { type_column, morph_class: None }) = &self.morph {
            clauses.push(WhereClause::and(Predicate::Comparison {
                column: format!("{}.{}", self.pivot.table(), type_column),
                operator: QueryOperator::Equal,
                value: DatabaseValue::from(owner.morph_class()),
            }));
        }
        clauses
    }

    /// Discriminator written on insert: the owner's class, or the fixed related class
    fn morph_value(&self, owner: &Record) -> Option<(String, String)> {
        let morph = self.morph.as_ref()?;
        let class = morph
            .morph_class
            .clone()
            .unwrap_or_else(|| owner.morph_class().to_string());
        Some((morph.type_column.clone(), class))
    }

    fn qualified_related_pivot_key(&self) -> String {
        format!("{}.{}", self.pivot.table(), self.related_pivot_key)
    }

    fn owner_key(&self, owner: &Record) -> OrmResult<DatabaseValue> {
        owner
            .get(&self.parent_key)
            .filter(|value| !value.is_null())
            .cloned()
            .ok_or_else(|| RelationError::missing_key(owner.descriptor().table(), &self.parent_key))
    }

    fn validate_id(&self, id: &DatabaseValue) -> OrmResult<()> {
        ensure_scalar(&self.related_pivot_key, id)?;
        if id.is_null() {
            return Err(RelationError::InvalidPivotValue {
                column: self.related_pivot_key.clone(),
                reason: "related id must not be null".to_string(),
            });
        }
        Ok(())
    }

    fn validate_attributes(&self, attributes: &BTreeMap<String, DatabaseValue>) -> OrmResult<()> {
        for (column, value) in attributes {
            validate_identifier(column)?;
            ensure_scalar(column, value)?;
        }
        Ok(())
    }

    /// Validate ids and attributes, keeping the first row per id
    fn validate_rows(&self, rows: Vec<PivotRow>) -> OrmResult<Vec<PivotRow>> {
        let mut seen = HashSet::new();
        let mut unique = Vec::with_capacity(rows.len());
        for row in rows {
            self.validate_id(&row.id)?;
            self.validate_attributes(&row.attributes)?;
            if let Some(key) = MatchKey::from_value(&row.id) {
                if seen.insert(key) {
                    unique.push(row);
                }
            }
        }
        Ok(unique)
    }
}
