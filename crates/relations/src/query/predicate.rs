//! Predicate tree for WHERE clauses
//!
//! Every clause remembers the connective that joins it to the clauses before
//! it. Nested groups render in parentheses, which is what lets a relation
//! wrap user predicates before appending its own key constraint.

use super::types::{Connective, QueryOperator};
use crate::backends::{DatabaseValue, DatePart, Grammar};

/// Dialect function applied to a column before comparing it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlFunction {
    DatePart(DatePart),
    JsonContains,
    JsonLength,
}

/// Function-based comparison, rendered by the grammar at SQL generation time
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionPredicate {
    pub function: SqlFunction,
    pub column: String,
    /// Validated JSON path, for the JSON functions
    pub path: Option<String>,
    pub operator: QueryOperator,
    pub value: DatabaseValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Comparison {
        column: String,
        operator: QueryOperator,
        value: DatabaseValue,
    },
    Null {
        column: String,
    },
    NotNull {
        column: String,
    },
    In {
        column: String,
        values: Vec<DatabaseValue>,
    },
    NotIn {
        column: String,
        values: Vec<DatabaseValue>,
    },
    Between {
        column: String,
        low: DatabaseValue,
        high: DatabaseValue,
    },
    Function(FunctionPredicate),
    Raw {
        sql: String,
        bindings: Vec<DatabaseValue>,
    },
    Nested(Vec<WhereClause>),
}

impl Predicate {
    /// Column the predicate tests, if it tests exactly one
    pub fn column(&self) -> Option<&str> {
        match self {
            Predicate::Comparison { column, .. }
            | Predicate::Null { column }
            | Predicate::NotNull { column }
            | Predicate::In { column, .. }
            | Predicate::NotIn { column, .. }
            | Predicate::Between { column, .. } => Some(column),
            Predicate::Function(function) => Some(&function.column),
            Predicate::Raw { .. } | Predicate::Nested(_) => None,
        }
    }

    pub fn is_in_on(&self, target: &str) -> bool {
        matches!(self, Predicate::In { column, .. } if column == target)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WhereClause {
    pub connective: Connective,
    pub predicate: Predicate,
}

impl WhereClause {
    pub fn and(predicate: Predicate) -> Self {
        Self {
            connective: Connective::And,
            predicate,
        }
    }

    pub fn or(predicate: Predicate) -> Self {
        Self {
            connective: Connective::Or,
            predicate,
        }
    }
}

/// Whether any top-level clause is joined with OR
pub fn has_or(clauses: &[WhereClause]) -> bool {
    clauses.iter().skip(1).any(|clause| clause.connective == Connective::Or)
}

/// Wrap clauses into a single AND-joined group
///
/// `a or b` becomes `(a or b)`, so a constraint appended afterwards applies
/// to the whole disjunction instead of its last arm.
pub fn group(mut clauses: Vec<WhereClause>) -> WhereClause {
    if let Some(first) = clauses.first_mut() {
        first.connective = Connective::And;
    }
    WhereClause::and(Predicate::Nested(clauses))
}

/// Render clauses with `?` placeholders, appending bindings in order
pub fn render(clauses: &[WhereClause], grammar: &Grammar, sql: &mut String, bindings: &mut Vec<DatabaseValue>) {
    for (index, clause) in clauses.iter().enumerate() {
        if index > 0 {
            sql.push(' ');
            sql.push_str(&clause.connective.to_string());
            sql.push(' ');
        }
        render_predicate(&clause.predicate, grammar, sql, bindings);
    }
}

fn render_predicate(predicate: &Predicate, grammar: &Grammar, sql: &mut String, bindings: &mut Vec<DatabaseValue>) {
    match predicate {
        Predicate::Comparison { column, operator, value } => {
            sql.push_str(&format!("{} {} ?", grammar.wrap(column), operator));
            bindings.push(value.clone());
        }
        Predicate::Null { column } => sql.push_str(&format!("{} is null", grammar.wrap(column))),
        Predicate::NotNull { column } => sql.push_str(&format!("{} is not null", grammar.wrap(column))),
        // An empty list can never match (IN) or always matches (NOT IN)
        Predicate::In { values, .. } if values.is_empty() => sql.push_str("0 = 1"),
        Predicate::NotIn { values, .. } if values.is_empty() => sql.push_str("1 = 1"),
        Predicate::In { column, values } => {
            sql.push_str(&format!("{} in ({})", grammar.wrap(column), placeholders(values.len())));
            bindings.extend(values.iter().cloned());
        }
        Predicate::NotIn { column, values } => {
            sql.push_str(&format!("{} not in ({})", grammar.wrap(column), placeholders(values.len())));
            bindings.extend(values.iter().cloned());
        }
        Predicate::Between { column, low, high } => {
            sql.push_str(&format!("{} between ? and ?", grammar.wrap(column)));
            bindings.push(low.clone());
            bindings.push(high.clone());
        }
        Predicate::Function(function) => render_function(function, grammar, sql, bindings),
        Predicate::Raw { sql: raw, bindings: raw_bindings } => {
            sql.push_str(raw);
            bindings.extend(raw_bindings.iter().cloned());
        }
        Predicate::Nested(clauses) if clauses.is_empty() => sql.push_str("1 = 1"),
        Predicate::Nested(clauses) => {
            sql.push('(');
            render(clauses, grammar, sql, bindings);
            sql.push(')');
        }
    }
}

fn render_function(function: &FunctionPredicate, grammar: &Grammar, sql: &mut String, bindings: &mut Vec<DatabaseValue>) {
    let column = grammar.wrap(&function.column);
    let path = function.path.as_deref().unwrap_or("$");
    match function.function {
        SqlFunction::DatePart(part) => {
            sql.push_str(&format!("{} {} ?", grammar.compile_date_part(part, &column), function.operator));
            bindings.push(function.value.clone());
        }
        SqlFunction::JsonContains => {
            let (expression, values) = grammar.compile_json_contains(&column, path, &function.value);
            sql.push_str(&expression);
            bindings.extend(values);
        }
        SqlFunction::JsonLength => {
            sql.push_str(&format!("{} {} ?", grammar.compile_json_length(&column, path), function.operator));
            bindings.push(function.value.clone());
        }
    }
}

pub(crate) fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}
