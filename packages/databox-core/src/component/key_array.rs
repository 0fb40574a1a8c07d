use std::collections::HashMap;

use serde_json::Value;
use tracing::{debug, warn};

use super::Node;
use crate::comparator::Comparator;
use crate::error::{Error, Result};
use crate::ids::Timestamp;
use crate::merge::{merge_entry, ValueMerger};
use crate::ops::{InsertOptions, UpdateOptions};
use crate::parser::{parse, parse_key};

/// Ordered, uniquely keyed sequence.
///
/// Entries live in storage order in `entries` and in the mirror array; `keys`
/// holds the key at each position and `key_map` is its inverse. Every splice
/// touches all four together.
#[derive(Clone, Debug)]
pub struct DbsKeyArray {
    entries: Vec<Node>,
    keys: Vec<String>,
    key_map: HashMap<String, usize>,
    timestamps: HashMap<String, Timestamp>,
    key_field: String,
    value_field: Option<String>,
    value_merger: Option<ValueMerger>,
    comparator: Option<Comparator>,
}

impl DbsKeyArray {
    pub fn new(key_field: impl Into<String>, value_field: Option<String>) -> Self {
        Self {
            entries: Vec::new(),
            keys: Vec::new(),
            key_map: HashMap::new(),
            timestamps: HashMap::new(),
            key_field: key_field.into(),
            value_field,
            value_merger: None,
            comparator: None,
        }
    }

    /// Build from payload items. With a value field, each entry holds only
    /// `item[value_field]`; otherwise the whole item.
    pub(crate) fn from_items(
        items: Vec<Value>,
        key_field: String,
        value_field: Option<String>,
        timestamp: Timestamp,
    ) -> Result<Self> {
        let mut list = Self::new(key_field, value_field);
        for item in items {
            let key = parse_key(&item, &list.key_field)?;
            let value = match &list.value_field {
                Some(field) => item.get(field.as_str()).cloned().unwrap_or(Value::Null),
                None => item,
            };
            let node = parse(value, timestamp)?;
            list.timestamps.insert(key.clone(), timestamp);
            if let Some(position) = list.position(&key) {
                warn!(key = %key, "duplicate key in key array payload, keeping the later item");
                list.entries[position] = node;
            } else {
                list.key_map.insert(key.clone(), list.entries.len());
                list.keys.push(key);
                list.entries.push(node);
            }
        }
        Ok(list)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Node> {
        self.position(key).and_then(|i| self.entries.get(i))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.key_map.contains_key(key)
    }

    pub fn position(&self, key: &str) -> Option<usize> {
        self.key_map.get(key).copied()
    }

    /// Keys in storage order.
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Node)> {
        self.keys.iter().map(String::as_str).zip(&self.entries)
    }

    pub fn key_field(&self) -> &str {
        &self.key_field
    }

    pub fn value_field(&self) -> Option<&str> {
        self.value_field.as_deref()
    }

    pub fn timestamp(&self, key: &str) -> Option<Timestamp> {
        self.timestamps.get(key).copied()
    }

    pub fn comparator(&self) -> Option<&Comparator> {
        self.comparator.as_ref()
    }

    pub fn value_merger(&self) -> Option<&ValueMerger> {
        self.value_merger.as_ref()
    }

    pub(crate) fn set_value_merger(&mut self, merger: Option<ValueMerger>) {
        self.value_merger = merger;
    }

    /// Install or remove the ordering. Installing re-sorts the current
    /// entries; removing keeps their order.
    pub(crate) fn set_comparator(
        &mut self,
        data: &mut Value,
        comparator: Option<Comparator>,
    ) -> Result<()> {
        match (&self.comparator, &comparator) {
            (Some(current), Some(next)) if current.same(next) => return Ok(()),
            (None, None) => return Ok(()),
            _ => {}
        }
        self.comparator = comparator;
        if self.comparator.is_some() {
            self.resort(data)?;
        }
        Ok(())
    }

    pub fn to_value(&self) -> Value {
        Value::Array(self.entries.iter().map(Node::to_value).collect())
    }

    pub(crate) fn child_mut<'a>(
        &'a mut self,
        data: &'a mut Value,
        key: &str,
    ) -> Option<(&'a mut Node, &'a mut Value)> {
        let position = self.position(key)?;
        let child = self.entries.get_mut(position)?;
        let slot = data.as_array_mut()?.get_mut(position)?;
        Some((child, slot))
    }

    pub(crate) fn insert_leaf(
        &mut self,
        data: &mut Value,
        key: &str,
        value: Value,
        timestamp: Timestamp,
        options: &InsertOptions,
    ) -> Result<bool> {
        if self.key_map.contains_key(key) {
            if options.potential_update {
                return self.replace(data, key, value, timestamp);
            }
            debug!(key, "insert skipped: key already present");
            return Ok(false);
        }
        let before = match options.if_contains.as_deref() {
            Some(target) => match self.position(target) {
                Some(position) => Some(position),
                None => {
                    debug!(key, target, "insert skipped: if_contains target absent");
                    return Ok(false);
                }
            },
            None => None,
        };
        let node = parse(value, timestamp)?;
        let raw = node.to_value();
        let mirror = self.mirror(data)?;
        let position = match &self.comparator {
            Some(comparator) => comparator.insert_position(&raw, mirror),
            None => before.unwrap_or(self.entries.len()),
        };
        self.splice_in(mirror, position, key.to_owned(), node, raw);
        self.timestamps.insert(key.to_owned(), timestamp);
        Ok(true)
    }

    pub(crate) fn update_leaf(
        &mut self,
        data: &mut Value,
        key: &str,
        value: Value,
        timestamp: Timestamp,
        options: &UpdateOptions,
    ) -> Result<bool> {
        if !self.key_map.contains_key(key) {
            if options.potential_insert {
                return self.insert_leaf(data, key, value, timestamp, &InsertOptions::default());
            }
            debug!(key, "update skipped: key absent");
            return Ok(false);
        }
        self.replace(data, key, value, timestamp)
    }

    pub(crate) fn delete_leaf(
        &mut self,
        data: &mut Value,
        key: &str,
        timestamp: Timestamp,
    ) -> Result<bool> {
        let Some(position) = self.position(key) else {
            debug!(key, "delete skipped: key absent");
            return Ok(false);
        };
        let stored = self.timestamps.get(key).copied().unwrap_or_default();
        if stored > timestamp {
            debug!(key, stored, timestamp, "delete skipped: stale timestamp");
            return Ok(false);
        }
        let mirror = self.mirror(data)?;
        self.splice_out(mirror, position);
        self.timestamps.remove(key);
        Ok(true)
    }

    fn replace(
        &mut self,
        data: &mut Value,
        key: &str,
        value: Value,
        timestamp: Timestamp,
    ) -> Result<bool> {
        let Some(position) = self.position(key) else {
            return Ok(false);
        };
        let stored = self.timestamps.get(key).copied().unwrap_or_default();
        if stored > timestamp {
            debug!(key, stored, timestamp, "update skipped: stale timestamp");
            return Ok(false);
        }
        let node = parse(value, timestamp)?;
        let raw = node.to_value();
        let mirror = self.mirror(data)?;
        match self.comparator.clone() {
            Some(comparator) => {
                let (key, _, _) = self.splice_out(mirror, position);
                let position = comparator.insert_position(&raw, mirror);
                self.splice_in(mirror, position, key, node, raw);
            }
            None => {
                mirror[position] = raw;
                self.entries[position] = node;
            }
        }
        self.timestamps.insert(key.to_owned(), timestamp);
        Ok(true)
    }

    /// Move the entry under `key` to its sorted position after its value
    /// changed in place. No-op without a comparator.
    pub(crate) fn reposition(&mut self, data: &mut Value, key: &str) -> Result<()> {
        let Some(comparator) = self.comparator.clone() else {
            return Ok(());
        };
        let Some(position) = self.position(key) else {
            return Ok(());
        };
        let mirror = self.mirror(data)?;
        let (key, node, raw) = self.splice_out(mirror, position);
        let position = comparator.insert_position(&raw, mirror);
        self.splice_in(mirror, position, key, node, raw);
        Ok(())
    }

    /// Merge a newly arrived key array into this one, key by key.
    pub fn merge_with_new(&mut self, data: &mut Value, new: DbsKeyArray) -> Result<bool> {
        let DbsKeyArray {
            entries,
            keys,
            timestamps,
            ..
        } = new;
        let mut changed = false;
        for (key, node) in keys.into_iter().zip(entries) {
            let incoming = timestamps.get(&key).copied().unwrap_or_default();
            let mirror = self.mirror(data)?;
            match self.position(&key) {
                Some(position) => {
                    let stored = self.timestamps.entry(key.clone()).or_default();
                    let applied = merge_entry(
                        &mut self.entries[position],
                        &mut mirror[position],
                        stored,
                        node,
                        incoming,
                        self.value_merger.as_ref(),
                    )?;
                    if applied {
                        self.reposition(data, &key)?;
                        changed = true;
                    }
                }
                None => {
                    let raw = node.to_value();
                    let position = match &self.comparator {
                        Some(comparator) => comparator.insert_position(&raw, mirror),
                        None => self.entries.len(),
                    };
                    self.timestamps.insert(key.clone(), incoming);
                    self.splice_in(mirror, position, key, node, raw);
                    changed = true;
                }
            }
        }
        Ok(changed)
    }

    fn mirror<'a>(&self, data: &'a mut Value) -> Result<&'a mut Vec<Value>> {
        let mirror = data
            .as_array_mut()
            .ok_or_else(|| Error::InconsistentState("key array mirror is not an array".into()))?;
        if mirror.len() != self.entries.len() {
            return Err(Error::InconsistentState(format!(
                "key array has {} entries but its mirror has {}",
                self.entries.len(),
                mirror.len()
            )));
        }
        Ok(mirror)
    }

    fn splice_in(
        &mut self,
        mirror: &mut Vec<Value>,
        position: usize,
        key: String,
        node: Node,
        raw: Value,
    ) {
        let position = position.min(self.entries.len());
        mirror.insert(position, raw);
        self.entries.insert(position, node);
        self.keys.insert(position, key);
        self.reindex_from(position);
    }

    fn splice_out(&mut self, mirror: &mut Vec<Value>, position: usize) -> (String, Node, Value) {
        let raw = mirror.remove(position);
        let node = self.entries.remove(position);
        let key = self.keys.remove(position);
        self.key_map.remove(&key);
        self.reindex_from(position);
        (key, node, raw)
    }

    fn reindex_from(&mut self, start: usize) {
        for (position, key) in self.keys.iter().enumerate().skip(start) {
            self.key_map.insert(key.clone(), position);
        }
    }

    fn resort(&mut self, data: &mut Value) -> Result<()> {
        let Some(comparator) = self.comparator.clone() else {
            return Ok(());
        };
        let mirror = self.mirror(data)?;
        let mut rows: Vec<(String, Node, Value)> = self
            .keys
            .drain(..)
            .zip(self.entries.drain(..))
            .zip(mirror.drain(..))
            .map(|((key, node), raw)| (key, node, raw))
            .collect();
        rows.sort_by(|a, b| comparator.compare(&a.2, &b.2));
        self.key_map.clear();
        for (key, node, raw) in rows {
            self.key_map.insert(key.clone(), self.keys.len());
            self.keys.push(key);
            self.entries.push(node);
            mirror.push(raw);
        }
        Ok(())
    }

    pub(crate) fn validate(&self, data: &Value) -> Result<()> {
        let mirror = data
            .as_array()
            .ok_or_else(|| Error::InconsistentState("key array mirror is not an array".into()))?;
        let len = self.entries.len();
        if mirror.len() != len
            || self.keys.len() != len
            || self.key_map.len() != len
            || self.timestamps.len() != len
        {
            return Err(Error::InconsistentState(format!(
                "key array sizes differ: {len} entries, {} mirror, {} keys, {} map, {} stamps",
                mirror.len(),
                self.keys.len(),
                self.key_map.len(),
                self.timestamps.len()
            )));
        }
        for (position, key) in self.keys.iter().enumerate() {
            if self.key_map.get(key) != Some(&position) {
                return Err(Error::InconsistentState(format!(
                    "key `{key}` is stored at {position} but indexed elsewhere"
                )));
            }
            if !self.timestamps.contains_key(key) {
                return Err(Error::InconsistentState(format!("no timestamp for `{key}`")));
            }
        }
        for (child, slot) in self.entries.iter().zip(mirror) {
            child.validate(slot)?;
        }
        if let Some(comparator) = &self.comparator {
            if let Some(i) = mirror
                .windows(2)
                .position(|pair| comparator.compare(&pair[0], &pair[1]).is_gt())
            {
                return Err(Error::InconsistentState(format!(
                    "key array out of order at position {i}"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::key_array_payload;
    use serde_json::json;

    fn list(items: Vec<Value>, timestamp: Timestamp) -> (DbsKeyArray, Value) {
        match parse(key_array_payload(items, "id", None), timestamp).unwrap() {
            Node::KeyArray(list) => {
                let data = list.to_value();
                (list, data)
            }
            other => panic!("expected key array, got {other:?}"),
        }
    }

    fn ids(data: &Value) -> Vec<String> {
        data.as_array()
            .unwrap()
            .iter()
            .map(|item| item["id"].as_str().unwrap().to_owned())
            .collect()
    }

    #[test]
    fn insert_appends_or_goes_before_if_contains_target() {
        let (mut list, mut data) = list(vec![json!({"id": "a"}), json!({"id": "b"})], 1);
        let options = InsertOptions::default();
        assert!(list.insert_leaf(&mut data, "c", json!({"id": "c"}), 2, &options).unwrap());
        let before_b = InsertOptions::default().with_if_contains("b");
        assert!(list.insert_leaf(&mut data, "x", json!({"id": "x"}), 2, &before_b).unwrap());
        assert_eq!(ids(&data), ["a", "x", "b", "c"]);
        assert_eq!(list.position("c"), Some(3));
        list.validate(&data).unwrap();
    }

    #[test]
    fn if_contains_absent_is_a_no_op() {
        let (mut list, mut data) = list(vec![json!({"id": "a"}), json!({"id": "b"})], 1);
        let options = InsertOptions::default().with_if_contains("z");
        assert!(!list.insert_leaf(&mut data, "c", json!({"id": "c"}), 2, &options).unwrap());
        assert_eq!(ids(&data), ["a", "b"]);
    }

    #[test]
    fn delete_shifts_trailing_positions() {
        let (mut list, mut data) = list(
            vec![json!({"id": "a"}), json!({"id": "b"}), json!({"id": "c"})],
            5,
        );
        assert!(!list.delete_leaf(&mut data, "a", 4).unwrap());
        assert!(list.delete_leaf(&mut data, "a", 5).unwrap());
        assert_eq!(list.position("b"), Some(0));
        assert_eq!(list.position("c"), Some(1));
        assert!(!list.delete_leaf(&mut data, "a", 9).unwrap());
        list.validate(&data).unwrap();
    }

    #[test]
    fn comparator_drives_insert_and_update_position() {
        let (mut list, mut data) = list(
            vec![json!({"id": "a", "rank": 1}), json!({"id": "b", "rank": 10})],
            1,
        );
        list.set_comparator(&mut data, Some(Comparator::by_field("rank")))
            .unwrap();
        let options = InsertOptions::default();
        assert!(list
            .insert_leaf(&mut data, "c", json!({"id": "c", "rank": 5}), 2, &options)
            .unwrap());
        assert_eq!(ids(&data), ["a", "c", "b"]);

        let update = UpdateOptions::default();
        assert!(list
            .update_leaf(&mut data, "a", json!({"id": "a", "rank": 20}), 3, &update)
            .unwrap());
        assert_eq!(ids(&data), ["c", "b", "a"]);
        list.validate(&data).unwrap();
    }

    #[test]
    fn installing_comparator_resorts_stably_and_removal_keeps_order() {
        let (mut list, mut data) = list(
            vec![
                json!({"id": "a", "rank": 3}),
                json!({"id": "b", "rank": 1}),
                json!({"id": "c", "rank": 3}),
                json!({"id": "d", "rank": 2}),
            ],
            1,
        );
        let by_rank = Comparator::by_field("rank");
        list.set_comparator(&mut data, Some(by_rank.clone())).unwrap();
        assert_eq!(ids(&data), ["b", "d", "a", "c"]);
        list.set_comparator(&mut data, Some(by_rank)).unwrap();
        assert_eq!(ids(&data), ["b", "d", "a", "c"]);

        list.set_comparator(&mut data, None).unwrap();
        let options = InsertOptions::default();
        assert!(list
            .insert_leaf(&mut data, "e", json!({"id": "e", "rank": 0}), 2, &options)
            .unwrap());
        assert_eq!(ids(&data), ["b", "d", "a", "c", "e"]);
        list.validate(&data).unwrap();
    }

    #[test]
    fn value_field_keeps_only_the_value() {
        let payload = key_array_payload(
            vec![json!({"id": 1, "v": "one"}), json!({"id": 2, "v": "two"})],
            "id",
            Some("v"),
        );
        let Node::KeyArray(list) = parse(payload, 1).unwrap() else {
            panic!("expected key array");
        };
        assert_eq!(list.to_value(), json!(["one", "two"]));
        assert_eq!(list.keys(), ["1", "2"]);
        assert_eq!(list.value_field(), Some("v"));
    }

    #[test]
    fn merge_adopts_new_keys_and_gates_existing_ones() {
        let (mut current, mut data) = list(vec![json!({"id": "a", "n": 1})], 10);
        let (incoming, _) = list(
            vec![json!({"id": "a", "n": 0}), json!({"id": "b", "n": 2})],
            5,
        );
        assert!(current.merge_with_new(&mut data, incoming).unwrap());
        assert_eq!(data, json!([{"id": "a", "n": 1}, {"id": "b", "n": 2}]));
        assert_eq!(current.timestamp("a"), Some(10));
        current.validate(&data).unwrap();
    }
}
