//! Query Builder SQL generation
//!
//! SQL is produced with `?` placeholders; connections rewrite them for
//! dialects that number their parameters.

use super::builder::{FromClause, QueryBuilder};
use super::predicate;
use super::types::*;
use crate::backends::{DatabaseBackendType, DatabaseValue, Grammar};

impl QueryBuilder {
    /// Generate SQL and its bindings, in placeholder order
    pub fn to_sql(&self, grammar: &Grammar) -> (String, Vec<DatabaseValue>) {
        let mut sql = String::new();
        let mut bindings = Vec::new();
        self.compile_select(grammar, &mut sql, &mut bindings);

        for union in &self.unions {
            sql.push_str(" union all ");
            union.compile_select(grammar, &mut sql, &mut bindings);
        }

        (sql, bindings)
    }

    fn compile_select(&self, grammar: &Grammar, sql: &mut String, bindings: &mut Vec<DatabaseValue>) {
        sql.push_str(if self.distinct { "select distinct " } else { "select " });
        sql.push_str(&self.compile_columns(grammar));

        match &self.from {
            Some(FromClause::Table(table)) => {
                sql.push_str(" from ");
                sql.push_str(&grammar.wrap_table(table));
            }
            Some(FromClause::Subquery { query, alias }) => {
                let (inner, inner_bindings) = query.to_sql(grammar);
                sql.push_str(&format!(" from ({}) as {}", inner, grammar.wrap(alias)));
                bindings.extend(inner_bindings);
            }
            None => {}
        }

        for join in &self.joins {
            sql.push(' ');
            sql.push_str(&join.join_type.to_string());
            sql.push(' ');
            sql.push_str(&grammar.wrap_table(&join.table));
            sql.push_str(" on ");
            let conditions: Vec<String> = join
                .on_conditions
                .iter()
                .map(|(left, right)| format!("{} = {}", grammar.wrap(left), grammar.wrap(right)))
                .collect();
            sql.push_str(&conditions.join(" and "));
        }

        if !self.wheres.is_empty() {
            sql.push_str(" where ");
            predicate::render(&self.wheres, grammar, sql, bindings);
        }

        if !self.orders.is_empty() {
            sql.push_str(" order by ");
            sql.push_str(&compile_orders(&self.orders, grammar));
        }

        self.compile_limit_offset(grammar, sql);
    }

    fn compile_columns(&self, grammar: &Grammar) -> String {
        if self.columns.is_empty() {
            return "*".to_string();
        }
        self.columns
            .iter()
            .map(|column| match column {
                SelectColumn::Column(name) => grammar.wrap(name),
                SelectColumn::Raw(expression) => expression.clone(),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn compile_limit_offset(&self, grammar: &Grammar, sql: &mut String) {
        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) => sql.push_str(&format!(" limit {} offset {}", limit, offset)),
            (Some(limit), None) => sql.push_str(&format!(" limit {}", limit)),
            // OFFSET without LIMIT is not valid SQL everywhere
            (None, Some(offset)) => match grammar.backend() {
                DatabaseBackendType::PostgreSQL => sql.push_str(&format!(" offset {}", offset)),
                DatabaseBackendType::SQLite => sql.push_str(&format!(" limit -1 offset {}", offset)),
                DatabaseBackendType::MySQL => {
                    sql.push_str(&format!(" limit 18446744073709551615 offset {}", offset))
                }
            },
            (None, None) => {}
        }
    }
}

/// Render ORDER BY items without the keyword
pub(crate) fn compile_orders(orders: &[OrderClause], grammar: &Grammar) -> String {
    orders
        .iter()
        .map(|order| match order {
            OrderClause::Column { column, direction } => format!("{} {}", grammar.wrap(column), direction),
            OrderClause::Raw(expression) => expression.clone(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}
