//! Dictionary matching - distributing batch results back to owners
//!
//! Results are bucketed by a normalized key so an integer key and its
//! string form land in the same bucket. Every owner receives a value, empty
//! when nothing matched.

use std::collections::{HashMap, HashSet};

use crate::backends::DatabaseValue;
use crate::model::{Record, RelationValue};

/// Normalized key used to bucket and look up records
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MatchKey(String);

impl MatchKey {
    /// Normalize a key value; null and composite values yield no key
    pub fn from_value(value: &DatabaseValue) -> Option<Self> {
        let normalized = match value {
            DatabaseValue::Null | DatabaseValue::Array(_) => return None,
            DatabaseValue::Bool(b) => if *b { "1" } else { "0" }.to_string(),
            DatabaseValue::Int32(i) => i.to_string(),
            DatabaseValue::Int64(i) => i.to_string(),
            DatabaseValue::Float64(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => (*f as i64).to_string(),
            DatabaseValue::Float64(f) => f.to_string(),
            DatabaseValue::String(s) => normalize_text(s),
            DatabaseValue::Bytes(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            DatabaseValue::Uuid(u) => u.to_string(),
            DatabaseValue::DateTime(dt) => dt.to_rfc3339(),
            DatabaseValue::Date(d) => d.to_string(),
            DatabaseValue::Time(t) => t.to_string(),
            DatabaseValue::Json(json) => match json {
                serde_json::Value::Null | serde_json::Value::Array(_) | serde_json::Value::Object(_) => return None,
                serde_json::Value::String(s) => normalize_text(s),
                other => return Self::from_value(&DatabaseValue::from_json(other.clone())),
            },
        };
        Some(MatchKey(normalized))
    }

    /// `type:id` key for polymorphic matching
    pub fn composite(morph_type: &str, value: &DatabaseValue) -> Option<Self> {
        let key = Self::from_value(value)?;
        Some(MatchKey(format!("{}:{}", morph_type, key.0)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn normalize_text(text: &str) -> String {
    match text.parse::<i64>() {
        Ok(i) => i.to_string(),
        Err(_) => text.to_string(),
    }
}

/// Distinct non-null values of `column` across owners, in first-seen order
pub fn collect_keys(owners: &[Record], column: &str) -> Vec<DatabaseValue> {
    let mut seen = HashSet::new();
    owners
        .iter()
        .filter_map(|owner| owner.get(column))
        .filter(|value| MatchKey::from_value(value).is_some_and(|key| seen.insert(key)))
        .cloned()
        .collect()
}

/// Bucket results by key, preserving result order within each bucket
///
/// `key_of` may strip helper columns from the record while reading its key.
pub fn build_dictionary<F>(results: Vec<Record>, mut key_of: F) -> HashMap<MatchKey, Vec<Record>>
where
    F: FnMut(&mut Record) -> Option<MatchKey>,
{
    let mut dictionary: HashMap<MatchKey, Vec<Record>> = HashMap::new();
    for mut record in results {
        if let Some(key) = key_of(&mut record) {
            dictionary.entry(key).or_default().push(record);
        }
    }
    dictionary
}

/// Assign the first matching record (or none) to every owner
pub fn match_one<F>(owners: &mut [Record], dictionary: &HashMap<MatchKey, Vec<Record>>, relation: &str, owner_key: F)
where
    F: Fn(&Record) -> Option<MatchKey>,
{
    for owner in owners.iter_mut() {
        let matched = owner_key(owner)
            .and_then(|key| dictionary.get(&key))
            .and_then(|records| records.first())
            .cloned()
            .map(Box::new);
        owner.set_relation(relation, RelationValue::One(matched));
    }
}

/// Assign every matching record (or an empty list) to every owner
pub fn match_many<F>(owners: &mut [Record], dictionary: &HashMap<MatchKey, Vec<Record>>, relation: &str, owner_key: F)
where
    F: Fn(&Record) -> Option<MatchKey>,
{
    for owner in owners.iter_mut() {
        let matched = owner_key(owner)
            .and_then(|key| dictionary.get(&key))
            .cloned()
            .unwrap_or_default();
        owner.set_relation(relation, RelationValue::Many(matched));
    }
}

/// Key of `record` read from `column`
pub fn key_from(record: &Record, column: &str) -> Option<MatchKey> {
    record.get(column).and_then(MatchKey::from_value)
}
