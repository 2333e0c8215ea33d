//! Relationship engine configuration
//!
//! Values can be built in code, deserialized, or read from the environment
//! with [`RelationsConfig::from_env`].

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::error::{OrmResult, RelationError};

/// Default values for the relationship engine
pub struct RelationsDefaults;

impl RelationsDefaults {
    pub const SCHEMA_CACHE_TTL_SECS: u64 = 300;
    pub const SYNC_CHUNK_THRESHOLD: usize = 5_000;
    pub const SYNC_CHUNK_SIZE: usize = 1_000;
    pub const WINDOW_FUNCTIONS: bool = true;
    pub const POLYMORPHIC_UNION: bool = true;
    pub const MAX_PAGE_SIZE: u64 = 1_000;
}

/// Tunables for eager loading and pivot mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelationsConfig {
    /// Lifetime of cached table column lists, in seconds
    pub schema_cache_ttl_secs: u64,
    /// `sync` switches to the chunked variant above this many ids
    pub sync_chunk_threshold: usize,
    /// Ids processed per chunk by the chunked `sync`
    pub sync_chunk_size: usize,
    /// Allow the window-function planner to rewrite limited eager loads
    pub window_functions: bool,
    /// Allow single UNION ALL queries for polymorphic eager loads
    pub polymorphic_union: bool,
    /// Upper bound accepted by `for_page`
    pub max_page_size: u64,
}

impl Default for RelationsConfig {
    fn default() -> Self {
        Self {
            schema_cache_ttl_secs: RelationsDefaults::SCHEMA_CACHE_TTL_SECS,
            sync_chunk_threshold: RelationsDefaults::SYNC_CHUNK_THRESHOLD,
            sync_chunk_size: RelationsDefaults::SYNC_CHUNK_SIZE,
            window_functions: RelationsDefaults::WINDOW_FUNCTIONS,
            polymorphic_union: RelationsDefaults::POLYMORPHIC_UNION,
            max_page_size: RelationsDefaults::MAX_PAGE_SIZE,
        }
    }
}

impl RelationsConfig {
    pub fn schema_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.schema_cache_ttl_secs)
    }

    pub fn validate(&self) -> OrmResult<()> {
        if self.sync_chunk_size == 0 {
            return Err(RelationError::Configuration(
                "Sync chunk size must be greater than 0".to_string(),
            ));
        }

        if self.sync_chunk_threshold < self.sync_chunk_size {
            return Err(RelationError::Configuration(
                "Sync chunk threshold must not be smaller than the chunk size".to_string(),
            ));
        }

        if self.max_page_size == 0 {
            return Err(RelationError::Configuration(
                "Maximum page size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn from_env() -> OrmResult<Self> {
        let config = Self {
            schema_cache_ttl_secs: parse_env(
                "RELATIONS_SCHEMA_CACHE_TTL",
                RelationsDefaults::SCHEMA_CACHE_TTL_SECS,
                "valid number of seconds",
            )?,
            sync_chunk_threshold: parse_env(
                "RELATIONS_SYNC_CHUNK_THRESHOLD",
                RelationsDefaults::SYNC_CHUNK_THRESHOLD,
                "valid row count",
            )?,
            sync_chunk_size: parse_env(
                "RELATIONS_SYNC_CHUNK_SIZE",
                RelationsDefaults::SYNC_CHUNK_SIZE,
                "valid row count",
            )?,
            window_functions: parse_env(
                "RELATIONS_WINDOW_FUNCTIONS",
                RelationsDefaults::WINDOW_FUNCTIONS,
                "true or false",
            )?,
            polymorphic_union: parse_env(
                "RELATIONS_POLYMORPHIC_UNION",
                RelationsDefaults::POLYMORPHIC_UNION,
                "true or false",
            )?,
            max_page_size: parse_env(
                "RELATIONS_MAX_PAGE_SIZE",
                RelationsDefaults::MAX_PAGE_SIZE,
                "valid page size",
            )?,
        };

        config.validate()?;
        Ok(config)
    }
}

fn parse_env<T>(key: &str, default: T, expected: &str) -> OrmResult<T>
where
    T: std::str::FromStr,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse::<T>().map_err(|_| {
            RelationError::Configuration(format!("{} = '{}': expected {}", key, raw, expected))
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RelationsConfig::default();
        assert_eq!(config.schema_cache_ttl(), Duration::from_secs(300));
        assert_eq!(config.sync_chunk_threshold, 5_000);
        assert!(config.window_functions);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_zero_chunk() {
        let config = RelationsConfig {
            sync_chunk_size: 0,
            ..RelationsConfig::default()
        };
        assert!(matches!(config.validate(), Err(RelationError::Configuration(_))));
    }

    #[test]
    fn test_deserialize_partial() {
        let config: RelationsConfig =
            serde_json::from_str(r#"{"schema_cache_ttl_secs": 60, "window_functions": false}"#).unwrap();
        assert_eq!(config.schema_cache_ttl_secs, 60);
        assert!(!config.window_functions);
        assert_eq!(config.max_page_size, RelationsDefaults::MAX_PAGE_SIZE);
    }

    #[test]
    fn test_parse_env_reports_bad_values() {
        std::env::set_var("RELATIONS_TEST_BAD_TTL", "soon");
        let result: OrmResult<u64> = parse_env("RELATIONS_TEST_BAD_TTL", 300, "valid number of seconds");
        assert!(matches!(result, Err(RelationError::Configuration(_))));
        std::env::remove_var("RELATIONS_TEST_BAD_TTL");

        let result: OrmResult<u64> = parse_env("RELATIONS_TEST_UNSET_TTL", 300, "valid number of seconds");
        assert_eq!(result.unwrap(), 300);
    }
}
