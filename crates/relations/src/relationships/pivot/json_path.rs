//! JSON path validation
//!
//! Paths end up interpolated into SQL because no dialect binds them as
//! parameters, so only `$`, `.identifier` and `[index]` segments pass.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{OrmResult, RelationError};

static JSON_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\$(\.[A-Za-z_][A-Za-z0-9_]*|\[[0-9]+\])*$").expect("JSON path pattern is valid")
});

pub fn validate_json_path(path: &str) -> OrmResult<()> {
    if JSON_PATH.is_match(path) {
        Ok(())
    } else {
        Err(RelationError::InvalidJsonPath(path.to_string()))
    }
}
