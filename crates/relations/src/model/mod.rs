//! Models, records and the polymorphic type registry

pub mod descriptor;
pub mod record;

pub use descriptor::{Model, ModelDescriptor};
pub use record::{Pivot, Record, RelationValue};

use std::collections::HashMap;

use crate::error::{OrmResult, RelationError};

/// Registry mapping morph type discriminators to models
#[derive(Debug, Clone, Default)]
pub struct MorphMap {
    models: HashMap<String, ModelDescriptor>,
}

impl MorphMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a model under its morph class
    pub fn register(mut self, descriptor: ModelDescriptor) -> Self {
        self.models.insert(descriptor.morph_class().to_string(), descriptor);
        self
    }

    pub fn register_model<M: Model>(self) -> Self {
        self.register(M::descriptor())
    }

    pub fn resolve(&self, morph_type: &str) -> OrmResult<&ModelDescriptor> {
        self.models
            .get(morph_type)
            .ok_or_else(|| RelationError::UnknownMorphType(morph_type.to_string()))
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}
