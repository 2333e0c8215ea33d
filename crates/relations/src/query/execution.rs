//! Query Builder execution against a database connection

use tracing::debug;

use super::builder::QueryBuilder;
use super::types::*;
use crate::backends::{DatabaseBackendType, DatabaseConnection, DatabaseValue, Row};
use crate::error::OrmResult;
use crate::model::{ModelDescriptor, Record};

impl QueryBuilder {
    /// Execute query and return raw rows
    pub async fn get_rows(&self, connection: &dyn DatabaseConnection) -> OrmResult<Vec<Row>> {
        let (sql, bindings) = self.to_sql(connection.grammar());
        debug!(sql = %sql, bindings = bindings.len(), "select");
        connection.select(&sql, &bindings).await
    }

    /// Execute query and hydrate records of the given model
    pub async fn get(&self, connection: &dyn DatabaseConnection, model: &ModelDescriptor) -> OrmResult<Vec<Record>> {
        let rows = self.get_rows(connection).await?;
        Ok(model.hydrate(rows))
    }

    /// Execute query and return the first record, if any
    pub async fn first(&self, connection: &dyn DatabaseConnection, model: &ModelDescriptor) -> OrmResult<Option<Record>> {
        let mut query = self.clone();
        query.set_limit(Some(1));
        Ok(query.get(connection, model).await?.into_iter().next())
    }

    /// Count matching rows
    pub async fn count(&self, connection: &dyn DatabaseConnection) -> OrmResult<i64> {
        let value = self.aggregate(connection, Aggregate::Count, "*").await?;
        Ok(value.as_i64().unwrap_or(0))
    }

    /// Whether any row matches
    pub async fn exists(&self, connection: &dyn DatabaseConnection) -> OrmResult<bool> {
        let mut probe = self.clone();
        probe.set_columns(vec![SelectColumn::Raw("1".to_string())]);
        probe.set_orders(Vec::new());
        probe.set_limit(Some(1));
        Ok(!probe.get_rows(connection).await?.is_empty())
    }

    pub async fn sum(&self, connection: &dyn DatabaseConnection, column: &str) -> OrmResult<DatabaseValue> {
        self.aggregate(connection, Aggregate::Sum, column).await
    }

    pub async fn avg(&self, connection: &dyn DatabaseConnection, column: &str) -> OrmResult<DatabaseValue> {
        self.aggregate(connection, Aggregate::Avg, column).await
    }

    pub async fn min(&self, connection: &dyn DatabaseConnection, column: &str) -> OrmResult<DatabaseValue> {
        self.aggregate(connection, Aggregate::Min, column).await
    }

    pub async fn max(&self, connection: &dyn DatabaseConnection, column: &str) -> OrmResult<DatabaseValue> {
        self.aggregate(connection, Aggregate::Max, column).await
    }

    /// Run an aggregate over the query
    ///
    /// Queries that page, deduplicate or union are wrapped in a derived
    /// table first so the aggregate sees exactly their rows.
    pub async fn aggregate(
        &self,
        connection: &dyn DatabaseConnection,
        function: Aggregate,
        column: &str,
    ) -> OrmResult<DatabaseValue> {
        let grammar = connection.grammar();
        let wraps = self.limit.is_some() || self.offset.is_some() || self.distinct || !self.unions.is_empty();

        let mut query = if wraps {
            let target = if column == "*" {
                "*".to_string()
            } else {
                column.rsplit('.').next().unwrap_or(column).to_string()
            };
            let mut outer = QueryBuilder::from_subquery(self.clone(), "elif_aggregate");
            outer.push_column(SelectColumn::Raw(compile_aggregate(grammar.backend(), function, &wrap_target(grammar, &target))));
            outer
        } else {
            let mut inner = self.clone();
            inner.set_orders(Vec::new());
            inner.set_columns(vec![SelectColumn::Raw(compile_aggregate(
                grammar.backend(),
                function,
                &wrap_target(grammar, column),
            ))]);
            inner
        };
        query.set_orders(Vec::new());

        let rows = query.get_rows(connection).await?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|mut row| row.take("aggregate"))
            .unwrap_or(DatabaseValue::Null))
    }
}

fn wrap_target(grammar: &crate::backends::Grammar, column: &str) -> String {
    if column == "*" {
        "*".to_string()
    } else {
        grammar.wrap(column)
    }
}

/// Aggregate expression aliased as `aggregate`
///
/// PostgreSQL returns NUMERIC for sums and averages, which is cast to a
/// float so it decodes like the other dialects.
fn compile_aggregate(backend: DatabaseBackendType, function: Aggregate, column: &str) -> String {
    match (backend, function) {
        (DatabaseBackendType::PostgreSQL, Aggregate::Sum | Aggregate::Avg) => {
            format!("cast({}({}) as double precision) as aggregate", function.function_name(), column)
        }
        _ => format!("{}({}) as aggregate", function.function_name(), column),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_aggregate() {
        assert_eq!(
            compile_aggregate(DatabaseBackendType::SQLite, Aggregate::Count, "*"),
            "count(*) as aggregate"
        );
        assert_eq!(
            compile_aggregate(DatabaseBackendType::PostgreSQL, Aggregate::Avg, "\"score\""),
            "cast(avg(\"score\") as double precision) as aggregate"
        );
    }
}
