//! Model descriptors - table metadata the relation engine needs at runtime

use std::fmt::Debug;

use serde::{Deserialize, Serialize};

use crate::backends::Row;
use super::record::Record;

/// Table, primary key and morph class of a model
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelDescriptor {
    table: String,
    primary_key: String,
    morph_class: String,
}

impl ModelDescriptor {
    /// Describe a table with an `id` primary key whose morph class is the table name
    pub fn new(table: impl Into<String>) -> Self {
        let table = table.into();
        Self {
            morph_class: table.clone(),
            table,
            primary_key: "id".to_string(),
        }
    }

    pub fn with_primary_key(mut self, primary_key: impl Into<String>) -> Self {
        self.primary_key = primary_key.into();
        self
    }

    /// Override the discriminator stored in polymorphic type columns
    pub fn with_morph_class(mut self, morph_class: impl Into<String>) -> Self {
        self.morph_class = morph_class.into();
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    pub fn morph_class(&self) -> &str {
        &self.morph_class
    }

    /// `table.column`
    pub fn qualify(&self, column: &str) -> String {
        if column.contains('.') {
            column.to_string()
        } else {
            format!("{}.{}", self.table, column)
        }
    }

    pub fn qualified_key(&self) -> String {
        self.qualify(&self.primary_key)
    }

    /// Empty record of this model
    pub fn new_record(&self) -> Record {
        Record::new(self.clone())
    }

    /// Turn rows into records of this model
    pub fn hydrate(&self, rows: Vec<Row>) -> Vec<Record> {
        rows.into_iter().map(|row| Record::from_row(self.clone(), row)).collect()
    }
}

/// Statically typed model
///
/// Typed models convert to and from [`Record`]s through serde, so a struct
/// only needs its table metadata to take part in relation loading.
pub trait Model: Send + Sync + Debug + Serialize + for<'de> Deserialize<'de> {
    /// Table name for this model
    fn table_name() -> &'static str;

    /// Primary key field name
    fn primary_key_name() -> &'static str {
        "id"
    }

    /// Discriminator stored in polymorphic type columns
    fn morph_class() -> &'static str {
        Self::table_name()
    }

    fn descriptor() -> ModelDescriptor {
        ModelDescriptor::new(Self::table_name())
            .with_primary_key(Self::primary_key_name())
            .with_morph_class(Self::morph_class())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Serialize, Deserialize)]
    struct Video {
        id: i64,
    }

    impl Model for Video {
        fn table_name() -> &'static str {
            "videos"
        }

        fn morph_class() -> &'static str {
            "video"
        }
    }

    #[test]
    fn test_descriptor_from_model() {
        let descriptor = Video::descriptor();
        assert_eq!(descriptor.table(), "videos");
        assert_eq!(descriptor.morph_class(), "video");
        assert_eq!(descriptor.qualified_key(), "videos.id");
        assert_eq!(descriptor.qualify("post_tag.role"), "post_tag.role");
    }
}
