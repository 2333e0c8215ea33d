//! Error types for relationship resolution
//!
//! Errors fall into four groups: invalid input (rejected before any SQL is
//! built), missing preconditions, execution failures reported by the database,
//! and configuration problems. Absent data is never an error.

/// Result type alias for relationship operations
pub type OrmResult<T> = Result<T, RelationError>;

/// Error types for relationship resolution and pivot mutation
#[derive(Debug, Clone, thiserror::Error)]
pub enum RelationError {
    /// JSON path failed validation and cannot be interpolated
    #[error("Invalid JSON path '{0}'")]
    InvalidJsonPath(String),

    /// Comparison operator outside the allowed set
    #[error("Invalid comparison operator '{0}'")]
    InvalidOperator(String),

    /// Pivot attribute value is not a scalar
    #[error("Invalid pivot value for column '{column}': {reason}")]
    InvalidPivotValue { column: String, reason: String },

    /// Column name is not identifier-shaped
    #[error("Invalid column name '{0}'")]
    InvalidColumn(String),

    /// Page size is zero or above the configured maximum
    #[error("Invalid page size {per_page}: must be between 1 and {max}")]
    InvalidPageSize { per_page: u64, max: u64 },

    /// A write needs a key the owner record does not have
    #[error("Missing key '{key}' on {table} record")]
    MissingKey { table: String, key: String },

    /// Discriminator value with no registered model
    #[error("Unknown morph type '{0}'")]
    UnknownMorphType(String),

    /// Database connection or query error
    #[error("Database error: {0}")]
    Database(String),

    /// Transaction could not be started, committed or rolled back
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Schema introspection error
    #[error("Schema error: {0}")]
    Schema(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl RelationError {
    /// Errors raised by input validation, before any query is built
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            RelationError::InvalidJsonPath(_)
                | RelationError::InvalidOperator(_)
                | RelationError::InvalidPivotValue { .. }
                | RelationError::InvalidColumn(_)
                | RelationError::InvalidPageSize { .. }
        )
    }

    /// Errors reported by the database while executing a statement
    pub fn is_execution_failure(&self) -> bool {
        matches!(self, RelationError::Database(_) | RelationError::Transaction(_))
    }

    pub(crate) fn missing_key(table: &str, key: &str) -> Self {
        RelationError::MissingKey {
            table: table.to_string(),
            key: key.to_string(),
        }
    }
}

impl From<sqlx::Error> for RelationError {
    fn from(err: sqlx::Error) -> Self {
        RelationError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for RelationError {
    fn from(err: serde_json::Error) -> Self {
        RelationError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(RelationError::InvalidJsonPath("$..a".into()).is_invalid_input());
        assert!(RelationError::InvalidPageSize { per_page: 0, max: 100 }.is_invalid_input());
        assert!(!RelationError::missing_key("posts", "id").is_invalid_input());
        assert!(RelationError::Database("boom".into()).is_execution_failure());
        assert!(!RelationError::Schema("gone".into()).is_execution_failure());
    }

    #[test]
    fn test_error_display() {
        let err = RelationError::missing_key("posts", "id");
        assert_eq!(err.to_string(), "Missing key 'id' on posts record");

        let err = RelationError::InvalidOperator("~~".into());
        assert_eq!(err.to_string(), "Invalid comparison operator '~~'");
    }
}
