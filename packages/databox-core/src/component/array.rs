use serde_json::Value;
use tracing::debug;

use super::{array_mirror, missing_mirror, Node};
use crate::error::{Error, Result};
use crate::ids::Timestamp;
use crate::merge::{merge_entry, ValueMerger};
use crate::ops::{InsertOptions, UpdateOptions};
use crate::parser::parse;

/// Index-keyed component. Each element carries its own timestamp, which moves
/// with the element when earlier elements are inserted or removed.
#[derive(Clone, Debug, Default)]
pub struct DbsArray {
    entries: Vec<Node>,
    timestamps: Vec<Timestamp>,
    value_merger: Option<ValueMerger>,
}

/// Numeric path segment, or `None` for anything that is not a plain index.
pub(crate) fn parse_index(segment: &str) -> Option<usize> {
    segment.parse().ok()
}

impl DbsArray {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_entries(entries: Vec<Node>, timestamp: Timestamp) -> Self {
        let timestamps = vec![timestamp; entries.len()];
        Self {
            entries,
            timestamps,
            value_merger: None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Node> {
        self.entries.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.entries.iter()
    }

    pub fn timestamp(&self, index: usize) -> Option<Timestamp> {
        self.timestamps.get(index).copied()
    }

    pub fn value_merger(&self) -> Option<&ValueMerger> {
        self.value_merger.as_ref()
    }

    pub(crate) fn set_value_merger(&mut self, merger: Option<ValueMerger>) {
        self.value_merger = merger;
    }

    pub fn to_value(&self) -> Value {
        Value::Array(self.entries.iter().map(Node::to_value).collect())
    }

    pub(crate) fn child_mut<'a>(
        &'a mut self,
        data: &'a mut Value,
        key: &str,
    ) -> Option<(&'a mut Node, &'a mut Value)> {
        let index = parse_index(key)?;
        let child = self.entries.get_mut(index)?;
        let slot = data.as_array_mut()?.get_mut(index)?;
        Some((child, slot))
    }

    /// Splice at a numeric key (clamped to the length) or append for any other key.
    pub(crate) fn insert_leaf(
        &mut self,
        data: &mut Value,
        key: &str,
        value: Value,
        timestamp: Timestamp,
        options: &InsertOptions,
    ) -> Result<bool> {
        if let Some(target) = options.if_contains.as_deref() {
            if !parse_index(target).is_some_and(|i| i < self.entries.len()) {
                debug!(key, target, "insert skipped: if_contains index absent");
                return Ok(false);
            }
        }
        let node = parse(value, timestamp)?;
        let index = parse_index(key).map_or(self.entries.len(), |i| i.min(self.entries.len()));
        array_mirror(data)?.insert(index, node.to_value());
        self.entries.insert(index, node);
        self.timestamps.insert(index, timestamp);
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
        let Some(index) = parse_index(key).filter(|&i| i < self.entries.len()) else {
            if options.potential_insert {
                return self.insert_leaf(data, key, value, timestamp, &InsertOptions::default());
            }
            debug!(key, "update skipped: index absent");
            return Ok(false);
        };
        let stored = self.timestamps[index];
        if stored > timestamp {
            debug!(key, stored, timestamp, "update skipped: stale timestamp");
            return Ok(false);
        }
        let node = parse(value, timestamp)?;
        let slot = array_mirror(data)?
            .get_mut(index)
            .ok_or_else(|| missing_mirror(key))?;
        *slot = node.to_value();
        self.entries[index] = node;
        self.timestamps[index] = timestamp;
        Ok(true)
    }

    /// Remove at a numeric key, or the last element for any other key.
    pub(crate) fn delete_leaf(
        &mut self,
        data: &mut Value,
        key: &str,
        timestamp: Timestamp,
    ) -> Result<bool> {
        let index = match parse_index(key) {
            Some(index) => index,
            None => match self.entries.len().checked_sub(1) {
                Some(last) => last,
                None => return Ok(false),
            },
        };
        let Some(stored) = self.timestamps.get(index).copied() else {
            debug!(key, "delete skipped: index absent");
            return Ok(false);
        };
        if stored > timestamp {
            debug!(key, stored, timestamp, "delete skipped: stale timestamp");
            return Ok(false);
        }
        let mirror = array_mirror(data)?;
        if index >= mirror.len() {
            return Err(missing_mirror(key));
        }
        mirror.remove(index);
        self.entries.remove(index);
        self.timestamps.remove(index);
        Ok(true)
    }

    /// Merge a newly arrived array into this one, index by index.
    pub fn merge_with_new(&mut self, data: &mut Value, new: DbsArray) -> Result<bool> {
        let DbsArray {
            entries,
            timestamps,
            ..
        } = new;
        let mut changed = false;
        for (index, (node, incoming)) in entries.into_iter().zip(timestamps).enumerate() {
            let mirror = array_mirror(data)?;
            if index < self.entries.len() {
                let slot_data = mirror
                    .get_mut(index)
                    .ok_or_else(|| missing_mirror(&index.to_string()))?;
                changed |= merge_entry(
                    &mut self.entries[index],
                    slot_data,
                    &mut self.timestamps[index],
                    node,
                    incoming,
                    self.value_merger.as_ref(),
                )?;
            } else {
                mirror.push(node.to_value());
                self.entries.push(node);
                self.timestamps.push(incoming);
                changed = true;
            }
        }
        Ok(changed)
    }

    pub(crate) fn validate(&self, data: &Value) -> Result<()> {
        let mirror = data
            .as_array()
            .ok_or_else(|| Error::InconsistentState("array mirror is not an array".into()))?;
        if mirror.len() != self.entries.len() || self.timestamps.len() != self.entries.len() {
            return Err(Error::InconsistentState(format!(
                "array has {} entries, {} mirror slots, {} timestamps",
                self.entries.len(),
                mirror.len(),
                self.timestamps.len()
            )));
        }
        for (child, slot) in self.entries.iter().zip(mirror) {
            child.validate(slot)?;
        }
        Ok(())
    }
}
