//! Raw value to component tree.
//!
//! Objects carrying [`KEY_ARRAY_TAG`] become key arrays; other objects and
//! arrays become [`DbsObject`]s and [`DbsArray`]s; everything else stays a
//! primitive. Every entry created here is stamped with the given timestamp.

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::component::{DbsArray, DbsKeyArray, DbsObject, Node};
use crate::error::{Error, Result};
use crate::ids::Timestamp;

/// Marker field identifying a key-array payload.
pub const KEY_ARRAY_TAG: &str = "__keyArray";
pub const ITEMS_FIELD: &str = "items";
pub const KEY_FIELD: &str = "keyField";
pub const VALUE_FIELD: &str = "valueField";

pub fn parse(value: Value, timestamp: Timestamp) -> Result<Node> {
    match value {
        Value::Object(map) if map.contains_key(KEY_ARRAY_TAG) => {
            parse_key_array(map, timestamp).map(Node::KeyArray)
        }
        Value::Object(map) => {
            let children = map
                .into_iter()
                .map(|(key, child)| parse(child, timestamp).map(|node| (key, node)))
                .collect::<Result<IndexMap<_, _>>>()?;
            Ok(Node::Object(DbsObject::from_children(children, timestamp)))
        }
        Value::Array(items) => {
            let entries = items
                .into_iter()
                .map(|item| parse(item, timestamp))
                .collect::<Result<Vec<_>>>()?;
            Ok(Node::Array(DbsArray::from_entries(entries, timestamp)))
        }
        primitive => Ok(Node::Value(primitive)),
    }
}

pub fn is_key_array_payload(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|map| map.contains_key(KEY_ARRAY_TAG))
}

/// Build the tagged payload that [`parse`] turns into a key array.
pub fn key_array_payload(items: Vec<Value>, key_field: &str, value_field: Option<&str>) -> Value {
    let mut map = Map::new();
    map.insert(KEY_ARRAY_TAG.to_owned(), Value::Bool(true));
    map.insert(ITEMS_FIELD.to_owned(), Value::Array(items));
    map.insert(KEY_FIELD.to_owned(), Value::String(key_field.to_owned()));
    if let Some(value_field) = value_field {
        map.insert(VALUE_FIELD.to_owned(), Value::String(value_field.to_owned()));
    }
    Value::Object(map)
}

fn parse_key_array(mut map: Map<String, Value>, timestamp: Timestamp) -> Result<DbsKeyArray> {
    let items = match map.remove(ITEMS_FIELD) {
        Some(Value::Array(items)) => items,
        Some(other) => {
            return Err(Error::InvalidPayload(format!(
                "key array `{ITEMS_FIELD}` must be an array, got {other}"
            )))
        }
        None => Vec::new(),
    };
    let key_field = match map.remove(KEY_FIELD) {
        Some(Value::String(field)) => field,
        _ => {
            return Err(Error::InvalidPayload(format!(
                "key array requires a string `{KEY_FIELD}`"
            )))
        }
    };
    let value_field = match map.remove(VALUE_FIELD) {
        None | Some(Value::Null) => None,
        Some(Value::String(field)) => Some(field),
        Some(other) => {
            return Err(Error::InvalidPayload(format!(
                "key array `{VALUE_FIELD}` must be a string, got {other}"
            )))
        }
    };
    DbsKeyArray::from_items(items, key_field, value_field, timestamp)
}

/// Key of one key-array item: a string, or a number rendered as a string.
pub(crate) fn parse_key(item: &Value, key_field: &str) -> Result<String> {
    match item.get(key_field) {
        Some(Value::String(key)) => Ok(key.clone()),
        Some(Value::Number(key)) => Ok(key.to_string()),
        _ => Err(Error::InvalidPayload(format!(
            "key array item {item} has no string or number `{key_field}`"
        ))),
    }
}
