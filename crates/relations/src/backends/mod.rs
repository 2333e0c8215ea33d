//! Database Backend Abstractions
//!
//! Connections, transactions, values and the per-dialect grammar the
//! relationship engine is written against, plus sqlx-backed implementations
//! for PostgreSQL and SQLite.

pub mod core;
pub mod grammar;
pub mod postgres;
pub mod sqlite;

// Re-export core traits and types
pub use core::*;
pub use grammar::{DatePart, Feature, Grammar};
pub use postgres::PostgresConnection;
pub use sqlite::SqliteConnection;

/// Database backend type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseBackendType {
    PostgreSQL,
    MySQL,
    SQLite,
}

impl std::fmt::Display for DatabaseBackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabaseBackendType::PostgreSQL => write!(f, "postgresql"),
            DatabaseBackendType::MySQL => write!(f, "mysql"),
            DatabaseBackendType::SQLite => write!(f, "sqlite"),
        }
    }
}
