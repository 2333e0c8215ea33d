//! INSERT, UPDATE and DELETE statements

use super::predicate::{self, placeholders, WhereClause};
use crate::backends::{DatabaseValue, Grammar};

/// Multi-row INSERT; every row supplies a value for every column
#[derive(Debug, Clone, PartialEq)]
pub struct InsertStatement {
    table: String,
    columns: Vec<String>,
    rows: Vec<Vec<DatabaseValue>>,
    returning: bool,
}

impl InsertStatement {
    pub fn new(table: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            table: table.into(),
            columns,
            rows: Vec::new(),
            returning: false,
        }
    }

    pub fn push_row(&mut self, values: Vec<DatabaseValue>) {
        self.rows.push(values);
    }

    /// Append `returning *` (PostgreSQL and SQLite)
    pub fn returning_all(mut self) -> Self {
        self.returning = true;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn to_sql(&self, grammar: &Grammar) -> (String, Vec<DatabaseValue>) {
        let columns: Vec<String> = self.columns.iter().map(|column| grammar.wrap(column)).collect();
        let row_sql = format!("({})", placeholders(self.columns.len()));
        let values = vec![row_sql; self.rows.len()].join(", ");

        let mut sql = format!(
            "insert into {} ({}) values {}",
            grammar.wrap_table(&self.table),
            columns.join(", "),
            values
        );
        if self.returning {
            sql.push_str(" returning *");
        }
        (sql, self.rows.iter().flatten().cloned().collect())
    }
}

/// UPDATE with a predicate tree
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateStatement {
    table: String,
    sets: Vec<(String, DatabaseValue)>,
    wheres: Vec<WhereClause>,
}

impl UpdateStatement {
    pub fn new(table: impl Into<String>, sets: Vec<(String, DatabaseValue)>, wheres: Vec<WhereClause>) -> Self {
        Self {
            table: table.into(),
            sets,
            wheres,
        }
    }

    pub fn to_sql(&self, grammar: &Grammar) -> (String, Vec<DatabaseValue>) {
        let assignments: Vec<String> = self
            .sets
            .iter()
            .map(|(column, _)| format!("{} = ?", grammar.wrap(column)))
            .collect();
        let mut sql = format!("update {} set {}", grammar.wrap_table(&self.table), assignments.join(", "));
        let mut bindings: Vec<DatabaseValue> = self.sets.iter().map(|(_, value)| value.clone()).collect();

        if !self.wheres.is_empty() {
            sql.push_str(" where ");
            predicate::render(&self.wheres, grammar, &mut sql, &mut bindings);
        }
        (sql, bindings)
    }
}

/// DELETE with a predicate tree
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteStatement {
    table: String,
    wheres: Vec<WhereClause>,
}

impl DeleteStatement {
    pub fn new(table: impl Into<String>, wheres: Vec<WhereClause>) -> Self {
        Self {
            table: table.into(),
            wheres,
        }
    }

    pub fn to_sql(&self, grammar: &Grammar) -> (String, Vec<DatabaseValue>) {
        let mut sql = format!("delete from {}", grammar.wrap_table(&self.table));
        let mut bindings = Vec::new();
        if !self.wheres.is_empty() {
            sql.push_str(" where ");
            predicate::render(&self.wheres, grammar, &mut sql, &mut bindings);
        }
        (sql, bindings)
    }
}
