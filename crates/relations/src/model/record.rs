//! Dynamic records - hydrated rows plus their loaded relations

use std::collections::BTreeMap;

use serde_json::Value as JsonValue;

use super::descriptor::{Model, ModelDescriptor};
use crate::backends::{DatabaseValue, Row};
use crate::error::{OrmResult, RelationError};

/// Pivot row data attached to a record loaded through a pivot table
#[derive(Debug, Clone, PartialEq)]
pub struct Pivot {
    table: String,
    attributes: BTreeMap<String, DatabaseValue>,
}

impl Pivot {
    pub fn new(table: impl Into<String>, attributes: BTreeMap<String, DatabaseValue>) -> Self {
        Self {
            table: table.into(),
            attributes,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn get(&self, column: &str) -> Option<&DatabaseValue> {
        self.attributes.get(column)
    }

    /// Drop every attribute starting with `prefix`
    pub fn remove_prefixed(&mut self, prefix: &str) {
        self.attributes.retain(|name, _| !name.starts_with(prefix));
    }

    pub fn attributes(&self) -> &BTreeMap<String, DatabaseValue> {
        &self.attributes
    }
}

/// Loaded value of a named relation
#[derive(Debug, Clone, PartialEq)]
pub enum RelationValue {
    One(Option<Box<Record>>),
    Many(Vec<Record>),
}

impl RelationValue {
    pub fn as_one(&self) -> Option<&Record> {
        match self {
            RelationValue::One(record) => record.as_deref(),
            RelationValue::Many(_) => None,
        }
    }

    pub fn as_many(&self) -> &[Record] {
        match self {
            RelationValue::Many(records) => records,
            RelationValue::One(_) => &[],
        }
    }

    pub fn len(&self) -> usize {
        match self {
            RelationValue::One(record) => usize::from(record.is_some()),
            RelationValue::Many(records) => records.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records held by the value, in order
    pub fn into_records(self) -> Vec<Record> {
        match self {
            RelationValue::One(record) => record.map(|record| vec![*record]).unwrap_or_default(),
            RelationValue::Many(records) => records,
        }
    }
}

/// A model instance: attributes, loaded relations and optional pivot data
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    descriptor: ModelDescriptor,
    attributes: BTreeMap<String, DatabaseValue>,
    relations: BTreeMap<String, RelationValue>,
    pivot: Option<Pivot>,
}

impl Record {
    pub fn new(descriptor: ModelDescriptor) -> Self {
        Self {
            descriptor,
            attributes: BTreeMap::new(),
            relations: BTreeMap::new(),
            pivot: None,
        }
    }

    pub fn from_row(descriptor: ModelDescriptor, row: Row) -> Self {
        let mut record = Self::new(descriptor);
        record.attributes.extend(row);
        record
    }

    /// Build a record from a typed model
    pub fn from_model<M: Model>(model: &M) -> OrmResult<Self> {
        let mut record = Self::new(M::descriptor());
        match serde_json::to_value(model)? {
            JsonValue::Object(fields) => {
                for (name, value) in fields {
                    record.set(name, DatabaseValue::from_json(value));
                }
                Ok(record)
            }
            other => Err(RelationError::Serialization(format!(
                "{} did not serialize to an object: {}",
                M::table_name(),
                other
            ))),
        }
    }

    /// Deserialize the attributes into a typed model
    pub fn to_model<M: Model>(&self) -> OrmResult<M> {
        let fields = self
            .attributes
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect();
        Ok(serde_json::from_value(JsonValue::Object(fields))?)
    }

    pub fn descriptor(&self) -> &ModelDescriptor {
        &self.descriptor
    }

    pub fn morph_class(&self) -> &str {
        self.descriptor.morph_class()
    }

    pub fn get(&self, column: &str) -> Option<&DatabaseValue> {
        self.attributes.get(column)
    }

    /// Attribute value, `Null` when absent
    pub fn value(&self, column: &str) -> DatabaseValue {
        self.attributes.get(column).cloned().unwrap_or(DatabaseValue::Null)
    }

    pub fn set(&mut self, column: impl Into<String>, value: impl Into<DatabaseValue>) {
        self.attributes.insert(column.into(), value.into());
    }

    /// Builder-style variant of [`Record::set`]
    pub fn with(mut self, column: impl Into<String>, value: impl Into<DatabaseValue>) -> Self {
        self.set(column, value);
        self
    }

    pub fn remove(&mut self, column: &str) -> Option<DatabaseValue> {
        self.attributes.remove(column)
    }

    /// Remove every attribute starting with `prefix`, returning them unprefixed
    pub fn take_prefixed(&mut self, prefix: &str) -> BTreeMap<String, DatabaseValue> {
        let names: Vec<String> = self
            .attributes
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect();

        names
            .into_iter()
            .filter_map(|name| {
                let value = self.attributes.remove(&name)?;
                Some((name[prefix.len()..].to_string(), value))
            })
            .collect()
    }

    pub fn attributes(&self) -> &BTreeMap<String, DatabaseValue> {
        &self.attributes
    }

    /// Primary key value, if set and not null
    pub fn key(&self) -> Option<&DatabaseValue> {
        self.attributes
            .get(self.descriptor.primary_key())
            .filter(|value| !value.is_null())
    }

    pub fn relation(&self, name: &str) -> Option<&RelationValue> {
        self.relations.get(name)
    }

    pub fn relation_loaded(&self, name: &str) -> bool {
        self.relations.contains_key(name)
    }

    pub fn set_relation(&mut self, name: impl Into<String>, value: RelationValue) {
        self.relations.insert(name.into(), value);
    }

    pub fn take_relation(&mut self, name: &str) -> Option<RelationValue> {
        self.relations.remove(name)
    }

    pub fn relations(&self) -> &BTreeMap<String, RelationValue> {
        &self.relations
    }

    /// Loaded to-one relation
    pub fn related_one(&self, name: &str) -> Option<&Record> {
        self.relations.get(name).and_then(RelationValue::as_one)
    }

    /// Loaded to-many relation, empty when not loaded
    pub fn related_many(&self, name: &str) -> &[Record] {
        self.relations.get(name).map(RelationValue::as_many).unwrap_or(&[])
    }

    pub fn pivot(&self) -> Option<&Pivot> {
        self.pivot.as_ref()
    }

    pub fn set_pivot(&mut self, pivot: Pivot) {
        self.pivot = Some(pivot);
    }

    /// Attributes, loaded relations and pivot data as JSON
    pub fn to_json(&self) -> JsonValue {
        let mut object: serde_json::Map<String, JsonValue> = self
            .attributes
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect();

        for (name, relation) in &self.relations {
            let value = match relation {
                RelationValue::One(record) => record.as_ref().map(|r| r.to_json()).unwrap_or(JsonValue::Null),
                RelationValue::Many(records) => JsonValue::Array(records.iter().map(Record::to_json).collect()),
            };
            object.insert(name.clone(), value);
        }

        if let Some(pivot) = &self.pivot {
            let attributes = pivot
                .attributes
                .iter()
                .map(|(name, value)| (name.clone(), value.to_json()))
                .collect();
            object.insert("pivot".to_string(), JsonValue::Object(attributes));
        }

        JsonValue::Object(object)
    }
}
