//! Mapping between entity structs and store hashes.
//!
//! Each top-level attribute becomes one hash field holding its JSON encoding. Attributes listed in
//! [`Document::DETACHED`] live under their own sub-keys and are filled in by the repository.
use std::collections::HashMap;

use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};

pub trait Document: Serialize + DeserializeOwned + Send + Sync {
    const COLLECTION: &'static str;
    const DETACHED: &'static [&'static str] = &[];

    fn id(&self) -> &str;
}

/// Documents reachable through the per-collection name index.
pub trait Named: Document {
    fn name(&self) -> &str;
}

pub fn doc_key(collection: &str, id: &str) -> String {
    format!("{collection}:{id}")
}

pub fn sub_key(collection: &str, id: &str, part: &str) -> String {
    format!("{collection}:{id}:{part}")
}

pub fn names_key(collection: &str) -> String {
    format!("{collection}:names")
}

/// Ids that cannot address a sub-key or a name index.
pub fn is_document_id(id: &str) -> bool {
    !id.is_empty() && id != "names" && !id.contains(':')
}

pub fn key_of<T: Document>(id: &str) -> String {
    doc_key(T::COLLECTION, id)
}

pub fn encode<T: Document>(document: &T) -> Result<Vec<(String, String)>, serde_json::Error> {
    let Value::Object(map) = serde_json::to_value(document)? else {
        return Err(serde::ser::Error::custom(format!(
            "{} documents must serialize to an object",
            T::COLLECTION
        )));
    };

    let mut fields = Vec::with_capacity(map.len());
    for (field, value) in map {
        if T::DETACHED.contains(&field.as_str()) {
            continue;
        }
        fields.push((field, serde_json::to_string(&value)?));
    }

    Ok(fields)
}

pub fn decode<T: Document>(fields: HashMap<String, String>) -> Result<T, serde_json::Error> {
    let map: Map<String, Value> = fields
        .into_iter()
        .map(|(field, raw)| {
            // Fields written by hand through redis-cli may not be JSON.
            let value = serde_json::from_str(&raw).unwrap_or(Value::String(raw));
            (field, value)
        })
        .collect();

    serde_json::from_value(Value::Object(map))
}
