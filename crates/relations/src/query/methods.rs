//! Fluent query methods shared by the builder and every relation
//!
//! Implementors only provide access to their underlying [`QueryBuilder`];
//! a relation forwards constraints to its related-model query.

use super::builder::QueryBuilder;
use super::predicate::{self, Predicate, WhereClause};
use super::types::*;
use crate::backends::DatabaseValue;
use crate::config::RelationsDefaults;
use crate::error::{OrmResult, RelationError};

pub trait QueryMethods {
    /// Query the fluent methods write to
    fn query(&self) -> &QueryBuilder;

    fn query_mut(&mut self) -> &mut QueryBuilder;

    /// Select specific columns
    fn select(mut self, columns: &[&str]) -> Self
    where
        Self: Sized,
    {
        let query = self.query_mut();
        for column in columns {
            query.push_column(SelectColumn::Column(column.to_string()));
        }
        self
    }

    /// Append columns to an existing selection
    fn add_select(self, columns: &[&str]) -> Self
    where
        Self: Sized,
    {
        self.select(columns)
    }

    /// Add a raw select expression
    fn select_raw(mut self, expression: &str) -> Self
    where
        Self: Sized,
    {
        self.query_mut().push_column(SelectColumn::Raw(expression.to_string()));
        self
    }

    fn distinct(mut self) -> Self
    where
        Self: Sized,
    {
        self.query_mut().distinct = true;
        self
    }

    /// Add WHERE condition with equality
    fn where_eq<T>(self, column: &str, value: T) -> Self
    where
        Self: Sized,
        T: Into<DatabaseValue>,
    {
        self.push_comparison(Connective::And, column, QueryOperator::Equal, value.into())
    }

    fn or_where_eq<T>(self, column: &str, value: T) -> Self
    where
        Self: Sized,
        T: Into<DatabaseValue>,
    {
        self.push_comparison(Connective::Or, column, QueryOperator::Equal, value.into())
    }

    fn where_ne<T>(self, column: &str, value: T) -> Self
    where
        Self: Sized,
        T: Into<DatabaseValue>,
    {
        self.push_comparison(Connective::And, column, QueryOperator::NotEqual, value.into())
    }

    fn where_gt<T>(self, column: &str, value: T) -> Self
    where
        Self: Sized,
        T: Into<DatabaseValue>,
    {
        self.push_comparison(Connective::And, column, QueryOperator::GreaterThan, value.into())
    }

    fn where_gte<T>(self, column: &str, value: T) -> Self
    where
        Self: Sized,
        T: Into<DatabaseValue>,
    {
        self.push_comparison(Connective::And, column, QueryOperator::GreaterThanOrEqual, value.into())
    }

    fn where_lt<T>(self, column: &str, value: T) -> Self
    where
        Self: Sized,
        T: Into<DatabaseValue>,
    {
        self.push_comparison(Connective::And, column, QueryOperator::LessThan, value.into())
    }

    fn where_lte<T>(self, column: &str, value: T) -> Self
    where
        Self: Sized,
        T: Into<DatabaseValue>,
    {
        self.push_comparison(Connective::And, column, QueryOperator::LessThanOrEqual, value.into())
    }

    fn where_like(self, column: &str, pattern: &str) -> Self
    where
        Self: Sized,
    {
        self.push_comparison(Connective::And, column, QueryOperator::Like, pattern.into())
    }

    /// Add WHERE condition with an operator given as text
    ///
    /// The operator is validated against the allowed set.
    fn where_op<T>(self, column: &str, operator: &str, value: T) -> OrmResult<Self>
    where
        Self: Sized,
        T: Into<DatabaseValue>,
    {
        let operator = operator.parse::<QueryOperator>()?;
        Ok(self.push_comparison(Connective::And, column, operator, value.into()))
    }

    fn or_where_op<T>(self, column: &str, operator: &str, value: T) -> OrmResult<Self>
    where
        Self: Sized,
        T: Into<DatabaseValue>,
    {
        let operator = operator.parse::<QueryOperator>()?;
        Ok(self.push_comparison(Connective::Or, column, operator, value.into()))
    }

    /// Add WHERE condition with IN
    fn where_in<I, T>(mut self, column: &str, values: I) -> Self
    where
        Self: Sized,
        I: IntoIterator<Item = T>,
        T: Into<DatabaseValue>,
    {
        self.query_mut().push_where(WhereClause::and(Predicate::In {
            column: column.to_string(),
            values: values.into_iter().map(Into::into).collect(),
        }));
        self
    }

    fn or_where_in<I, T>(mut self, column: &str, values: I) -> Self
    where
        Self: Sized,
        I: IntoIterator<Item = T>,
        T: Into<DatabaseValue>,
    {
        self.query_mut().push_where(WhereClause::or(Predicate::In {
            column: column.to_string(),
            values: values.into_iter().map(Into::into).collect(),
        }));
        self
    }

    fn where_not_in<I, T>(mut self, column: &str, values: I) -> Self
    where
        Self: Sized,
        I: IntoIterator<Item = T>,
        T: Into<DatabaseValue>,
    {
        self.query_mut().push_where(WhereClause::and(Predicate::NotIn {
            column: column.to_string(),
            values: values.into_iter().map(Into::into).collect(),
        }));
        self
    }

    fn where_null(mut self, column: &str) -> Self
    where
        Self: Sized,
    {
        self.query_mut()
            .push_where(WhereClause::and(Predicate::Null { column: column.to_string() }));
        self
    }

    fn or_where_null(mut self, column: &str) -> Self
    where
        Self: Sized,
    {
        self.query_mut()
            .push_where(WhereClause::or(Predicate::Null { column: column.to_string() }));
        self
    }

    fn where_not_null(mut self, column: &str) -> Self
    where
        Self: Sized,
    {
        self.query_mut()
            .push_where(WhereClause::and(Predicate::NotNull { column: column.to_string() }));
        self
    }

    fn where_between<T>(mut self, column: &str, low: T, high: T) -> Self
    where
        Self: Sized,
        T: Into<DatabaseValue>,
    {
        self.query_mut().push_where(WhereClause::and(Predicate::Between {
            column: column.to_string(),
            low: low.into(),
            high: high.into(),
        }));
        self
    }

    /// Add raw WHERE condition with `?` placeholders
    fn where_raw(mut self, sql: &str, bindings: Vec<DatabaseValue>) -> Self
    where
        Self: Sized,
    {
        self.query_mut().push_where(WhereClause::and(Predicate::Raw {
            sql: sql.to_string(),
            bindings,
        }));
        self
    }

    fn or_where_raw(mut self, sql: &str, bindings: Vec<DatabaseValue>) -> Self
    where
        Self: Sized,
    {
        self.query_mut().push_where(WhereClause::or(Predicate::Raw {
            sql: sql.to_string(),
            bindings,
        }));
        self
    }

    /// Add a parenthesized group built by `build`
    fn where_group<F>(self, build: F) -> Self
    where
        Self: Sized,
        F: FnOnce(QueryBuilder) -> QueryBuilder,
    {
        self.push_group(Connective::And, build)
    }

    fn or_where_group<F>(self, build: F) -> Self
    where
        Self: Sized,
        F: FnOnce(QueryBuilder) -> QueryBuilder,
    {
        self.push_group(Connective::Or, build)
    }

    fn order_by(mut self, column: &str) -> Self
    where
        Self: Sized,
    {
        self.query_mut().push_order(OrderClause::Column {
            column: column.to_string(),
            direction: OrderDirection::Asc,
        });
        self
    }

    fn order_by_desc(mut self, column: &str) -> Self
    where
        Self: Sized,
    {
        self.query_mut().push_order(OrderClause::Column {
            column: column.to_string(),
            direction: OrderDirection::Desc,
        });
        self
    }

    fn order_by_raw(mut self, expression: &str) -> Self
    where
        Self: Sized,
    {
        self.query_mut().push_order(OrderClause::Raw(expression.to_string()));
        self
    }

    fn limit(mut self, count: u64) -> Self
    where
        Self: Sized,
    {
        self.query_mut().set_limit(Some(count));
        self
    }

    fn offset(mut self, count: u64) -> Self
    where
        Self: Sized,
    {
        self.query_mut().set_offset(Some(count));
        self
    }

    /// Page through results, 1-based
    fn for_page(self, page: u64, per_page: u64) -> OrmResult<Self>
    where
        Self: Sized,
    {
        self.for_page_within(page, per_page, RelationsDefaults::MAX_PAGE_SIZE)
    }

    /// Like [`QueryMethods::for_page`] with an explicit page size ceiling
    fn for_page_within(mut self, page: u64, per_page: u64, max_page_size: u64) -> OrmResult<Self>
    where
        Self: Sized,
    {
        if per_page == 0 || per_page > max_page_size {
            return Err(RelationError::InvalidPageSize {
                per_page,
                max: max_page_size,
            });
        }
        let query = self.query_mut();
        query.set_limit(Some(per_page));
        query.set_offset(Some(page.saturating_sub(1).saturating_mul(per_page)));
        Ok(self)
    }

    #[doc(hidden)]
    fn push_comparison(mut self, connective: Connective, column: &str, operator: QueryOperator, value: DatabaseValue) -> Self
    where
        Self: Sized,
    {
        self.query_mut().push_where(WhereClause {
            connective,
            predicate: Predicate::Comparison {
                column: column.to_string(),
                operator,
                value,
            },
        });
        self
    }

    #[doc(hidden)]
    fn push_group<F>(mut self, connective: Connective, build: F) -> Self
    where
        Self: Sized,
        F: FnOnce(QueryBuilder) -> QueryBuilder,
    {
        let mut built = build(QueryBuilder::new());
        let wheres = built.take_wheres();
        if !wheres.is_empty() {
            let mut grouped = predicate::group(wheres);
            grouped.connective = connective;
            self.query_mut().push_where(grouped);
        }
        self
    }
}

impl QueryMethods for QueryBuilder {
    fn query(&self) -> &QueryBuilder {
        self
    }

    fn query_mut(&mut self) -> &mut QueryBuilder {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::Grammar;

    #[test]
    fn test_fluent_building() {
        let query = QueryBuilder::table("posts")
            .where_eq("published", true)
            .where_in("id", vec![1, 2, 3])
            .order_by_desc("created_at")
            .limit(10);

        assert_eq!(query.wheres().len(), 2);
        assert_eq!(query.limit_value(), Some(10));
        assert_eq!(query.orders().len(), 1);
    }

    #[test]
    fn test_where_op_rejects_unknown_operator() {
        let result = QueryBuilder::table("posts").where_op("id", "== 1 or 1", 1);
        assert!(matches!(result, Err(RelationError::InvalidOperator(_))));
    }

    #[test]
    fn test_where_group_renders_parentheses() {
        let query = QueryBuilder::table("posts")
            .where_eq("author_id", 1)
            .where_group(|q| q.where_eq("status", "draft").or_where_eq("status", "review"));
        let (sql, bindings) = query.to_sql(&Grammar::sqlite());
        assert!(sql.ends_with("where \"author_id\" = ? and (\"status\" = ? or \"status\" = ?)"));
        assert_eq!(bindings.len(), 3);
    }

    #[test]
    fn test_for_page_validation() {
        let query = QueryBuilder::table("posts").for_page(3, 20).unwrap();
        assert_eq!(query.limit_value(), Some(20));
        assert_eq!(query.offset_value(), Some(40));

        assert!(matches!(
            QueryBuilder::table("posts").for_page(1, 0),
            Err(RelationError::InvalidPageSize { per_page: 0, .. })
        ));
        assert!(QueryBuilder::table("posts").for_page_within(1, 51, 50).is_err());
    }
}
