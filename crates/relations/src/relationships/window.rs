//! Window-function planner for limited eager loads
//!
//! `limit(3)` on an eager load means three related records per owner, not
//! three in total. When the batch query carries the owner IN predicate and a
//! limit, it is rewritten to rank rows per owner with `ROW_NUMBER()` and keep
//! the ranks inside the requested window.

use tracing::{debug, warn};

use crate::backends::{DatabaseValue, Grammar, Row};
use crate::context::RelationContext;
use crate::error::OrmResult;
use crate::query::sql_generation::compile_orders;
use crate::query::{OrderClause, OrderDirection, Predicate, QueryBuilder, SelectColumn, WhereClause};

/// Rank column added by the rewrite and stripped from results
pub const ROW_COLUMN: &str = "elif_row";

const RANKED_ALIAS: &str = "elif_ranked";

/// Where the per-owner partition lives in a relation's batch query
#[derive(Debug, Clone, PartialEq)]
pub struct WindowPlan {
    /// Qualified column the owner IN predicate filters on
    pub partition_column: String,
    /// Further qualified partition columns, such as a polymorphic owner type
    pub discriminators: Vec<String>,
    /// Name of that column in the ranked subquery's output
    pub outer_key: String,
    /// Qualified primary key of the related table, the default order and tiebreak
    pub related_key: String,
    /// Related table, used for `table.*` when no columns were selected
    pub related_table: String,
}

impl WindowPlan {
    /// Also partition by `column`, so owners sharing an id rank separately
    pub fn with_discriminator(mut self, column: String) -> Self {
        self.discriminators.push(column);
        self
    }

    /// Whether the query needs per-owner limiting
    pub fn applies(&self, query: &QueryBuilder) -> bool {
        query.has_in_on(&self.partition_column) && query.limit_value().is_some_and(|limit| limit > 0)
    }

    /// Build the ranked query, or `None` when the plan does not apply
    pub fn rewrite(&self, query: &QueryBuilder, grammar: &Grammar) -> Option<QueryBuilder> {
        if !self.applies(query) {
            return None;
        }

        let mut base = query.clone();
        let keys = base.remove_in_on(&self.partition_column)?;
        let limit = base.limit_value()?;
        let offset = base.offset_value().unwrap_or(0);
        base.set_limit(None);
        base.set_offset(None);

        let mut orders = base.take_orders();
        if orders.is_empty() {
            orders.push(self.key_order());
        }
        // Equal sort values would otherwise rank nondeterministically
        if !orders.iter().any(|order| order.column() == Some(self.related_key.as_str())) {
            orders.push(self.key_order());
        }

        if base.columns().is_empty() {
            base.push_column(SelectColumn::Column(format!("{}.*", self.related_table)));
        }
        let partition = std::iter::once(&self.partition_column)
            .chain(&self.discriminators)
            .map(|column| grammar.wrap(column))
            .collect::<Vec<_>>()
            .join(", ");
        base.push_column(SelectColumn::Raw(format!(
            "row_number() over (partition by {} order by {}) as {}",
            partition,
            compile_orders(&orders, grammar),
            grammar.wrap(ROW_COLUMN)
        )));

        let row = grammar.wrap(ROW_COLUMN);
        let mut outer = QueryBuilder::from_subquery(base, RANKED_ALIAS);
        outer.push_where(WhereClause::and(Predicate::In {
            column: self.outer_key.clone(),
            values: keys,
        }));
        // Integers are inlined; the ranked subquery's bindings come first
        let window = if offset > 0 {
            format!("{row} > {offset} and {row} <= {}", offset.saturating_add(limit))
        } else {
            format!("{row} <= {limit}")
        };
        outer.push_where(WhereClause::and(Predicate::Raw {
            sql: window,
            bindings: Vec::<DatabaseValue>::new(),
        }));
        outer.push_order(OrderClause::Column {
            column: ROW_COLUMN.to_string(),
            direction: OrderDirection::Asc,
        });
        Some(outer)
    }

    fn key_order(&self) -> OrderClause {
        OrderClause::Column {
            column: self.related_key.clone(),
            direction: OrderDirection::Asc,
        }
    }
}

/// Run a batch query, limiting per owner when the query asks for it
///
/// Falls back to the unmodified query when window functions are unavailable
/// or the ranked query fails.
pub async fn select_limited(ctx: &RelationContext, query: &QueryBuilder, plan: &WindowPlan) -> OrmResult<Vec<Row>> {
    if !plan.applies(query) {
        return ctx.select(query).await;
    }

    if !ctx.window_functions_enabled() {
        debug!(table = %plan.related_table, "window functions unavailable, limit applies to the whole batch");
        return ctx.select(query).await;
    }

    let Some(ranked) = plan.rewrite(query, ctx.grammar()) else {
        return ctx.select(query).await;
    };

    match ctx.select(&ranked).await {
        Ok(mut rows) => {
            for row in rows.iter_mut() {
                row.take(ROW_COLUMN);
            }
            Ok(rows)
        }
        Err(error) => {
            warn!(error = %error, table = %plan.related_table, "ranked eager load failed, running unranked query");
            ctx.select(query).await
        }
    }
}
