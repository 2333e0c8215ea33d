//! Query Builder - Core builder implementation

use super::predicate::{self, Predicate, WhereClause};
use super::types::*;
use crate::backends::DatabaseValue;

/// Source of a SELECT
#[derive(Debug, Clone, PartialEq)]
pub enum FromClause {
    Table(String),
    Subquery { query: Box<QueryBuilder>, alias: String },
}

/// Filter, ordering and paging state that can be moved between queries
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConstraintSet {
    pub wheres: Vec<WhereClause>,
    pub orders: Vec<OrderClause>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl ConstraintSet {
    pub fn is_empty(&self) -> bool {
        self.wheres.is_empty() && self.orders.is_empty() && self.limit.is_none() && self.offset.is_none()
    }
}

/// Query builder for SELECT statements
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryBuilder {
    pub(crate) from: Option<FromClause>,
    pub(crate) columns: Vec<SelectColumn>,
    pub(crate) joins: Vec<JoinClause>,
    pub(crate) wheres: Vec<WhereClause>,
    pub(crate) orders: Vec<OrderClause>,
    pub(crate) limit: Option<u64>,
    pub(crate) offset: Option<u64>,
    pub(crate) distinct: bool,
    pub(crate) unions: Vec<QueryBuilder>,
}

impl QueryBuilder {
    /// Create a new query builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Query selecting from a table
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            from: Some(FromClause::Table(table.into())),
            ..Self::default()
        }
    }

    /// Query selecting from a derived table
    pub fn from_subquery(query: QueryBuilder, alias: impl Into<String>) -> Self {
        Self {
            from: Some(FromClause::Subquery {
                query: Box::new(query),
                alias: alias.into(),
            }),
            ..Self::default()
        }
    }

    pub fn from_clause(&self) -> Option<&FromClause> {
        self.from.as_ref()
    }

    /// Table name when selecting from a plain table
    pub fn from_table(&self) -> Option<&str> {
        match &self.from {
            Some(FromClause::Table(table)) => Some(table),
            _ => None,
        }
    }

    pub fn columns(&self) -> &[SelectColumn] {
        &self.columns
    }

    pub fn joins(&self) -> &[JoinClause] {
        &self.joins
    }

    pub fn wheres(&self) -> &[WhereClause] {
        &self.wheres
    }

    pub fn orders(&self) -> &[OrderClause] {
        &self.orders
    }

    pub fn limit_value(&self) -> Option<u64> {
        self.limit
    }

    pub fn offset_value(&self) -> Option<u64> {
        self.offset
    }

    pub fn unions(&self) -> &[QueryBuilder] {
        &self.unions
    }

    pub fn is_distinct(&self) -> bool {
        self.distinct
    }

    pub fn push_where(&mut self, clause: WhereClause) {
        self.wheres.push(clause);
    }

    pub fn set_wheres(&mut self, wheres: Vec<WhereClause>) {
        self.wheres = wheres;
    }

    pub fn take_wheres(&mut self) -> Vec<WhereClause> {
        std::mem::take(&mut self.wheres)
    }

    pub fn push_order(&mut self, order: OrderClause) {
        self.orders.push(order);
    }

    pub fn set_orders(&mut self, orders: Vec<OrderClause>) {
        self.orders = orders;
    }

    pub fn take_orders(&mut self) -> Vec<OrderClause> {
        std::mem::take(&mut self.orders)
    }

    pub fn set_limit(&mut self, limit: Option<u64>) {
        self.limit = limit;
    }

    pub fn set_offset(&mut self, offset: Option<u64>) {
        self.offset = offset;
    }

    pub fn push_column(&mut self, column: SelectColumn) {
        self.columns.push(column);
    }

    pub fn set_columns(&mut self, columns: Vec<SelectColumn>) {
        self.columns = columns;
    }

    pub fn push_join(&mut self, join: JoinClause) {
        self.joins.push(join);
    }

    /// Whether a join against `table` has already been added
    pub fn has_join(&self, table: &str) -> bool {
        self.joins.iter().any(|join| join.table == table)
    }

    /// Append a query joined with UNION ALL
    pub fn push_union(&mut self, query: QueryBuilder) {
        self.unions.push(query);
    }

    /// Whether a top-level IN predicate on `column` is present
    pub fn has_in_on(&self, column: &str) -> bool {
        self.wheres.iter().any(|clause| clause.predicate.is_in_on(column))
    }

    /// Remove the top-level IN predicate on `column`, returning its values
    pub fn remove_in_on(&mut self, column: &str) -> Option<Vec<DatabaseValue>> {
        let index = self.wheres.iter().position(|clause| clause.predicate.is_in_on(column))?;
        match self.wheres.remove(index).predicate {
            Predicate::In { values, .. } => {
                // Keep the next clause from inheriting a dangling connective
                if index == 0 {
                    if let Some(first) = self.wheres.first_mut() {
                        first.connective = Connective::And;
                    }
                }
                Some(values)
            }
            _ => None,
        }
    }

    /// Wrap the current predicates in a group if they contain an OR
    ///
    /// Must run before a relation appends its key constraint.
    pub fn group_or_wheres(&mut self) {
        if predicate::has_or(&self.wheres) {
            let wheres = self.take_wheres();
            self.wheres.push(predicate::group(wheres));
        }
    }

    /// Copy of the filtering, ordering and paging state
    pub fn constraints(&self) -> ConstraintSet {
        ConstraintSet {
            wheres: self.wheres.clone(),
            orders: self.orders.clone(),
            limit: self.limit,
            offset: self.offset,
        }
    }

    /// Apply another query's constraints on top of this one
    ///
    /// Incoming predicates are grouped so their ORs cannot leak into the
    /// predicates already present.
    pub fn apply_constraints(&mut self, constraints: &ConstraintSet) {
        if !constraints.wheres.is_empty() {
            if predicate::has_or(&constraints.wheres) {
                self.wheres.push(predicate::group(constraints.wheres.clone()));
            } else {
                let mut wheres = constraints.wheres.clone();
                if let Some(first) = wheres.first_mut() {
                    first.connective = Connective::And;
                }
                self.wheres.extend(wheres);
            }
        }
        self.orders.extend(constraints.orders.iter().cloned());
        if constraints.limit.is_some() {
            self.limit = constraints.limit;
        }
        if constraints.offset.is_some() {
            self.offset = constraints.offset;
        }
    }
}
