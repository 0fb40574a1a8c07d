use std::collections::HashMap;

use indexmap::IndexMap;
use serde_json::{Map, Value};
use tracing::{debug, trace};

use super::{missing_mirror, object_mirror, Node};
use crate::error::{Error, Result};
use crate::ids::Timestamp;
use crate::merge::{merge_entry, ValueMerger};
use crate::ops::{InsertOptions, UpdateOptions};
use crate::parser::parse;

/// String-keyed component. Keys keep their insertion order.
#[derive(Clone, Debug, Default)]
pub struct DbsObject {
    children: IndexMap<String, Node>,
    timestamps: HashMap<String, Timestamp>,
    value_merger: Option<ValueMerger>,
}

impl DbsObject {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_children(children: IndexMap<String, Node>, timestamp: Timestamp) -> Self {
        let timestamps = children.keys().map(|k| (k.clone(), timestamp)).collect();
        Self {
            children,
            timestamps,
            value_merger: None,
        }
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Node> {
        self.children.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.children.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.children.keys().map(String::as_str)
    }

    pub fn timestamp(&self, key: &str) -> Option<Timestamp> {
        self.timestamps.get(key).copied()
    }

    pub fn value_merger(&self) -> Option<&ValueMerger> {
        self.value_merger.as_ref()
    }

    pub(crate) fn set_value_merger(&mut self, merger: Option<ValueMerger>) {
        self.value_merger = merger;
    }

    pub fn to_value(&self) -> Value {
        Value::Object(
            self.children
                .iter()
                .map(|(k, v)| (k.clone(), v.to_value()))
                .collect::<Map<String, Value>>(),
        )
    }

    pub(crate) fn child_mut<'a>(
        &'a mut self,
        data: &'a mut Value,
        key: &str,
    ) -> Option<(&'a mut Node, &'a mut Value)> {
        let child = self.children.get_mut(key)?;
        let slot = data.as_object_mut()?.get_mut(key)?;
        Some((child, slot))
    }

    /// Add an empty object under `key` so an insert can continue below it.
    pub(crate) fn create_intermediate(
        &mut self,
        data: &mut Value,
        key: &str,
        timestamp: Timestamp,
    ) -> Result<()> {
        trace!(key, "creating intermediate object");
        self.put(data, key, Node::Object(DbsObject::new()), timestamp)
    }

    /// Undo [`DbsObject::create_intermediate`] after the insert below it failed.
    pub(crate) fn discard_intermediate(&mut self, data: &mut Value, key: &str) {
        trace!(key, "dropping intermediate object");
        if let Some(mirror) = data.as_object_mut() {
            mirror.shift_remove(key);
        }
        self.children.shift_remove(key);
        self.timestamps.remove(key);
    }

    pub(crate) fn insert_leaf(
        &mut self,
        data: &mut Value,
        key: &str,
        value: Value,
        timestamp: Timestamp,
        options: &InsertOptions,
    ) -> Result<bool> {
        if self.children.contains_key(key) {
            if options.potential_update {
                return self.replace(data, key, value, timestamp);
            }
            debug!(key, "insert skipped: key already present");
            return Ok(false);
        }
        if let Some(target) = options.if_contains.as_deref() {
            if !self.children.contains_key(target) {
                debug!(key, target, "insert skipped: if_contains target absent");
                return Ok(false);
            }
        }
        let node = parse(value, timestamp)?;
        self.put(data, key, node, timestamp)?;
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
        if !self.children.contains_key(key) {
            if options.potential_insert {
                let node = parse(value, timestamp)?;
                self.put(data, key, node, timestamp)?;
                return Ok(true);
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
        let Some(stored) = self.timestamps.get(key).copied() else {
            debug!(key, "delete skipped: key absent");
            return Ok(false);
        };
        if stored > timestamp {
            debug!(key, stored, timestamp, "delete skipped: stale timestamp");
            return Ok(false);
        }
        object_mirror(data)?.shift_remove(key);
        self.children.shift_remove(key);
        self.timestamps.remove(key);
        Ok(true)
    }

    /// Replace an existing entry if the incoming timestamp is not older.
    fn replace(
        &mut self,
        data: &mut Value,
        key: &str,
        value: Value,
        timestamp: Timestamp,
    ) -> Result<bool> {
        let stored = self.timestamps.get(key).copied().unwrap_or_default();
        if stored > timestamp {
            debug!(key, stored, timestamp, "update skipped: stale timestamp");
            return Ok(false);
        }
        let node = parse(value, timestamp)?;
        self.put(data, key, node, timestamp)?;
        Ok(true)
    }

    fn put(&mut self, data: &mut Value, key: &str, node: Node, timestamp: Timestamp) -> Result<()> {
        object_mirror(data)?.insert(key.to_owned(), node.to_value());
        self.children.insert(key.to_owned(), node);
        self.timestamps.insert(key.to_owned(), timestamp);
        Ok(())
    }

    /// Merge a newly arrived object into this one, key by key.
    pub fn merge_with_new(&mut self, data: &mut Value, new: DbsObject) -> Result<bool> {
        let DbsObject {
            children,
            timestamps,
            ..
        } = new;
        let mut changed = false;
        for (key, node) in children {
            let incoming = timestamps.get(&key).copied().unwrap_or_default();
            let mirror = object_mirror(data)?;
            match self.children.get_mut(&key) {
                Some(slot) => {
                    let slot_data = mirror.get_mut(&key).ok_or_else(|| missing_mirror(&key))?;
                    let stored = self.timestamps.entry(key.clone()).or_default();
                    changed |= merge_entry(
                        slot,
                        slot_data,
                        stored,
                        node,
                        incoming,
                        self.value_merger.as_ref(),
                    )?;
                }
                None => {
                    mirror.insert(key.clone(), node.to_value());
                    self.children.insert(key.clone(), node);
                    self.timestamps.insert(key, incoming);
                    changed = true;
                }
            }
        }
        Ok(changed)
    }

    pub(crate) fn validate(&self, data: &Value) -> Result<()> {
        let mirror = data
            .as_object()
            .ok_or_else(|| Error::InconsistentState("object mirror is not an object".into()))?;
        if mirror.len() != self.children.len() || self.timestamps.len() != self.children.len() {
            return Err(Error::InconsistentState(format!(
                "object has {} children, {} mirror entries, {} timestamps",
                self.children.len(),
                mirror.len(),
                self.timestamps.len()
            )));
        }
        for (key, child) in &self.children {
            if !self.timestamps.contains_key(key) {
                return Err(Error::InconsistentState(format!("no timestamp for `{key}`")));
            }
            let slot = mirror.get(key).ok_or_else(|| missing_mirror(key))?;
            child.validate(slot)?;
        }
        Ok(())
    }
}
