//! Query Builder - SELECT construction, predicate trees and execution
//!
//! Relations own a [`QueryBuilder`] for their related model and expose the
//! same fluent API through [`QueryMethods`].

pub mod builder;
pub mod dml;
pub mod execution;
pub mod methods;
pub mod predicate;
pub mod sql_generation;
pub mod types;

pub use builder::{ConstraintSet, FromClause, QueryBuilder};
pub use dml::{DeleteStatement, InsertStatement, UpdateStatement};
pub use methods::QueryMethods;
pub use predicate::{FunctionPredicate, Predicate, SqlFunction, WhereClause};
pub use types::*;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{OrmResult, RelationError};

static IDENTIFIER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$").expect("identifier pattern is valid")
});

/// Validate a column or `table.column` reference destined for raw SQL
pub fn validate_identifier(identifier: &str) -> OrmResult<()> {
    if IDENTIFIER.is_match(identifier) {
        Ok(())
    } else {
        Err(RelationError::InvalidColumn(identifier.to_string()))
    }
}
