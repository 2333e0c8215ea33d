//! Pivot constraint and column engine
//!
//! [`PivotConstraintSet`] is owned by every pivot-backed relation. It
//! qualifies pivot column references, tracks the extra columns to select,
//! and holds pivot constraints until the relation's query has joined the
//! pivot table.

pub mod json_path;
pub mod mutations;

pub use json_path::validate_json_path;
pub use mutations::{PivotRow, SyncChanges};

use crate::backends::{DatabaseValue, DatePart};
use crate::error::{OrmResult, RelationError};
use crate::query::{
    validate_identifier, Connective, FunctionPredicate, OrderClause, OrderDirection, Predicate, QueryBuilder,
    QueryOperator, SqlFunction, WhereClause,
};

/// Prefix of pivot columns in related rows
pub const PIVOT_PREFIX: &str = "pivot_";

pub const CREATED_AT: &str = "created_at";
pub const UPDATED_AT: &str = "updated_at";

#[derive(Debug, Clone, PartialEq)]
pub struct PivotConstraintSet {
    table: String,
    columns: Vec<String>,
    all_columns: bool,
    timestamps: bool,
    wheres: Vec<WhereClause>,
    orders: Vec<OrderClause>,
    values: Vec<(String, DatabaseValue)>,
    joined: bool,
}

impl PivotConstraintSet {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            all_columns: false,
            timestamps: false,
            wheres: Vec::new(),
            orders: Vec::new(),
            values: Vec::new(),
            joined: false,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Normalize `column` or `any_table.column` to `pivot_table.column`
    pub fn qualify(&self, column: &str) -> OrmResult<String> {
        validate_identifier(column)?;
        let name = column.rsplit('.').next().unwrap_or(column);
        Ok(format!("{}.{}", self.table, name))
    }

    /// Request extra pivot columns; `"*"` selects every column of the pivot
    /// table, discovered when the relation is materialized
    pub fn with_pivot(&mut self, names: &[&str]) -> OrmResult<()> {
        for name in names {
            if *name == "*" {
                self.all_columns = true;
                continue;
            }
            validate_identifier(name)?;
            let name = name.rsplit('.').next().unwrap_or(name).to_string();
            if !self.columns.contains(&name) {
                self.columns.push(name);
            }
        }
        Ok(())
    }

    pub fn with_timestamps(&mut self) {
        self.timestamps = true;
    }

    pub fn uses_timestamps(&self) -> bool {
        self.timestamps
    }

    /// Whether materializing needs the pivot table's column list
    pub fn needs_discovery(&self) -> bool {
        self.all_columns
    }

    pub fn wheres(&self) -> &[WhereClause] {
        &self.wheres
    }

    pub fn orders(&self) -> &[OrderClause] {
        &self.orders
    }

    /// Values written on insert by `with_pivot_value`
    pub fn values(&self) -> &[(String, DatabaseValue)] {
        &self.values
    }

    pub fn is_joined(&self) -> bool {
        self.joined
    }

    /// Register a constraint: applied now if the join exists, else staged
    pub fn push_where(&mut self, query: &mut QueryBuilder, clause: WhereClause) {
        if self.joined {
            query.push_where(clause.clone());
        }
        self.wheres.push(clause);
    }

    pub fn push_order(&mut self, query: &mut QueryBuilder, order: OrderClause) {
        if self.joined {
            query.push_order(order.clone());
        }
        self.orders.push(order);
    }

    /// Replay staged constraints once the join has been added
    pub fn replay(&mut self, query: &mut QueryBuilder) {
        if self.joined {
            return;
        }
        for clause in &self.wheres {
            query.push_where(clause.clone());
        }
        for order in &self.orders {
            query.push_order(order.clone());
        }
        self.joined = true;
    }

    /// Constrain to `column = value` and write `value` on insert
    pub fn with_value(&mut self, query: &mut QueryBuilder, column: &str, value: DatabaseValue) -> OrmResult<()> {
        ensure_scalar(column, &value)?;
        let clause = self.comparison(Connective::And, column, "=", value.clone())?;
        self.push_where(query, clause);
        let name = column.rsplit('.').next().unwrap_or(column).to_string();
        self.values.push((name, value));
        Ok(())
    }

    pub fn comparison(
        &self,
        connective: Connective,
        column: &str,
        operator: &str,
        value: DatabaseValue,
    ) -> OrmResult<WhereClause> {
        let operator = operator.parse::<QueryOperator>()?;
        Ok(WhereClause {
            connective,
            predicate: Predicate::Comparison {
                column: self.qualify(column)?,
                operator,
                value,
            },
        })
    }

    pub fn membership(&self, column: &str, values: Vec<DatabaseValue>, negated: bool) -> OrmResult<WhereClause> {
        let column = self.qualify(column)?;
        Ok(WhereClause::and(if negated {
            Predicate::NotIn { column, values }
        } else {
            Predicate::In { column, values }
        }))
    }

    pub fn nullness(&self, column: &str, null: bool) -> OrmResult<WhereClause> {
        let column = self.qualify(column)?;
        Ok(WhereClause::and(if null {
            Predicate::Null { column }
        } else {
            Predicate::NotNull { column }
        }))
    }

    pub fn between(&self, column: &str, low: DatabaseValue, high: DatabaseValue) -> OrmResult<WhereClause> {
        Ok(WhereClause::and(Predicate::Between {
            column: self.qualify(column)?,
            low,
            high,
        }))
    }

    pub fn date_part(&self, part: DatePart, column: &str, operator: &str, value: DatabaseValue) -> OrmResult<WhereClause> {
        Ok(WhereClause::and(Predicate::Function(FunctionPredicate {
            function: SqlFunction::DatePart(part),
            column: self.qualify(column)?,
            path: None,
            operator: operator.parse()?,
            value,
        })))
    }

    pub fn json_contains(&self, column: &str, path: &str, value: DatabaseValue) -> OrmResult<WhereClause> {
        validate_json_path(path)?;
        Ok(WhereClause::and(Predicate::Function(FunctionPredicate {
            function: SqlFunction::JsonContains,
            column: self.qualify(column)?,
            path: Some(path.to_string()),
            operator: QueryOperator::Equal,
            value,
        })))
    }

    pub fn json_length(&self, column: &str, path: &str, operator: &str, value: DatabaseValue) -> OrmResult<WhereClause> {
        validate_json_path(path)?;
        Ok(WhereClause::and(Predicate::Function(FunctionPredicate {
            function: SqlFunction::JsonLength,
            column: self.qualify(column)?,
            path: Some(path.to_string()),
            operator: operator.parse()?,
            value,
        })))
    }

    pub fn order(&self, column: &str, direction: OrderDirection) -> OrmResult<OrderClause> {
        Ok(OrderClause::Column {
            column: self.qualify(column)?,
            direction,
        })
    }

    /// `pivot_table.column as pivot_column` select items
    ///
    /// `keys` are always selected; `discovered` is the pivot table's column
    /// list when every column was requested.
    pub fn select_columns(&self, keys: &[&str], discovered: Option<&[String]>) -> Vec<String> {
        let mut names: Vec<String> = keys.iter().map(|key| key.to_string()).collect();
        let mut add = |name: &str| {
            if !names.iter().any(|existing| existing == name) {
                names.push(name.to_string());
            }
        };

        for column in &self.columns {
            add(column);
        }
        if let Some(discovered) = discovered {
            for column in discovered {
                add(column);
            }
        }
        if self.timestamps {
            add(CREATED_AT);
            add(UPDATED_AT);
        }

        names
            .into_iter()
            .map(|name| format!("{}.{} as {}{}", self.table, name, PIVOT_PREFIX, name))
            .collect()
    }
}

/// Pivot values must bind as a single parameter
pub(crate) fn ensure_scalar(column: &str, value: &DatabaseValue) -> OrmResult<()> {
    if value.is_scalar() {
        Ok(())
    } else {
        Err(RelationError::InvalidPivotValue {
            column: column.to_string(),
            reason: "expected a scalar value".to_string(),
        })
    }
}
