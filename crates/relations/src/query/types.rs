//! Query Builder Types - Core types and enums for query building

use std::fmt;
use std::str::FromStr;

use crate::error::RelationError;

/// Comparison operators accepted in predicates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryOperator {
    Equal,
    NotEqual,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Like,
    NotLike,
}

impl fmt::Display for QueryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryOperator::Equal => write!(f, "="),
            QueryOperator::NotEqual => write!(f, "!="),
            QueryOperator::GreaterThan => write!(f, ">"),
            QueryOperator::GreaterThanOrEqual => write!(f, ">="),
            QueryOperator::LessThan => write!(f, "<"),
            QueryOperator::LessThanOrEqual => write!(f, "<="),
            QueryOperator::Like => write!(f, "like"),
            QueryOperator::NotLike => write!(f, "not like"),
        }
    }
}

impl FromStr for QueryOperator {
    type Err = RelationError;

    /// Parse an operator; anything outside the allowed set is rejected
    fn from_str(operator: &str) -> Result<Self, Self::Err> {
        match operator.trim().to_ascii_lowercase().as_str() {
            "=" => Ok(QueryOperator::Equal),
            "!=" | "<>" => Ok(QueryOperator::NotEqual),
            ">" => Ok(QueryOperator::GreaterThan),
            ">=" => Ok(QueryOperator::GreaterThanOrEqual),
            "<" => Ok(QueryOperator::LessThan),
            "<=" => Ok(QueryOperator::LessThanOrEqual),
            "like" => Ok(QueryOperator::Like),
            "not like" => Ok(QueryOperator::NotLike),
            _ => Err(RelationError::InvalidOperator(operator.to_string())),
        }
    }
}

/// Boolean connective joining a predicate to the ones before it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Connective {
    And,
    Or,
}

impl fmt::Display for Connective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Connective::And => write!(f, "and"),
            Connective::Or => write!(f, "or"),
        }
    }
}

/// Join types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinType::Inner => write!(f, "inner join"),
            JoinType::Left => write!(f, "left join"),
        }
    }
}

/// Join clause
#[derive(Debug, Clone, PartialEq)]
pub struct JoinClause {
    pub join_type: JoinType,
    pub table: String,
    pub on_conditions: Vec<(String, String)>, // (left_column, right_column)
}

/// Order by direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    Asc,
    Desc,
}

impl fmt::Display for OrderDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderDirection::Asc => write!(f, "asc"),
            OrderDirection::Desc => write!(f, "desc"),
        }
    }
}

/// Order by clause
#[derive(Debug, Clone, PartialEq)]
pub enum OrderClause {
    Column { column: String, direction: OrderDirection },
    Raw(String),
}

impl OrderClause {
    /// Column this clause sorts by, if it is a plain column
    pub fn column(&self) -> Option<&str> {
        match self {
            OrderClause::Column { column, .. } => Some(column),
            OrderClause::Raw(_) => None,
        }
    }
}

/// Selected column
#[derive(Debug, Clone, PartialEq)]
pub enum SelectColumn {
    Column(String),
    Raw(String),
}

/// Aggregate functions supported by the builder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl Aggregate {
    pub fn function_name(&self) -> &'static str {
        match self {
            Aggregate::Count => "count",
            Aggregate::Sum => "sum",
            Aggregate::Avg => "avg",
            Aggregate::Min => "min",
            Aggregate::Max => "max",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_parsing() {
        assert_eq!("<>".parse::<QueryOperator>().unwrap(), QueryOperator::NotEqual);
        assert_eq!("NOT LIKE".parse::<QueryOperator>().unwrap(), QueryOperator::NotLike);
        assert!(matches!(
            "; drop table".parse::<QueryOperator>(),
            Err(RelationError::InvalidOperator(_))
        ));
    }
}
