//! Typed rows moved by the pipeline
//!
//! Every row kind implements [`Record`], which is all the generic parts of the
//! pipeline (extractors, staging, transformers, loader) need to know about it.

pub mod datetime;
mod feedback;
mod finite;
mod sales;

pub use feedback::{Comment, Review};
pub use sales::{Customer, Order, OrderDetail, Product};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::fmt::Debug;
use std::hash::Hash;

/// A row kind the pipeline can extract, stage and load.
///
/// Field names used in CSV headers, staged JSON and destination columns are the
/// serde names of the type, listed in [`Record::FIELDS`].
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Destination (and relational source) table name
    const TABLE: &'static str;

    /// Primary key column
    const PRIMARY_KEY: &'static str;

    /// Canonical field names, used for case-insensitive matching
    const FIELDS: &'static [&'static str];

    type Key: Eq + Hash + Clone + Debug + Send;

    /// Value of the primary key
    fn key(&self) -> Self::Key;

    /// Whether the record passes the transform-phase validity filter
    fn is_valid(&self) -> bool {
        true
    }
}

/// Rename object keys to the canonical spelling in `fields`, ignoring ASCII case.
///
/// Keys with no canonical match are kept as they are. Arrays are normalized
/// element by element; other values pass through.
pub fn normalize_keys(value: Value, fields: &[&str]) -> Value {
    match value {
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| normalize_keys(item, fields))
                .collect(),
        ),
        Value::Object(object) => Value::Object(normalize_object(object, fields)),
        other => other,
    }
}

fn normalize_object(object: Map<String, Value>, fields: &[&str]) -> Map<String, Value> {
    object
        .into_iter()
        .map(|(key, value)| {
            let canonical = canonical_name(&key, fields).map(str::to_string);
            (canonical.unwrap_or(key), value)
        })
        .collect()
}

/// Canonical spelling of `name`, if it matches one of `fields` ignoring ASCII case.
pub fn canonical_name<'a>(name: &str, fields: &[&'a str]) -> Option<&'a str> {
    fields
        .iter()
        .copied()
        .find(|field| field.eq_ignore_ascii_case(name))
}
