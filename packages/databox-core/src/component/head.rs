use serde_json::Value;
use tracing::{debug, trace};

use super::{ComponentOptions, DbsObject, Node};
use crate::error::{Error, Result};
use crate::ids::Timestamp;
use crate::merge::{merge_entry, ValueMerger};
use crate::ops::{InsertOptions, UpdateOptions};
use crate::parser::parse;

/// Root slot of a DataBox.
///
/// Holds zero or one node plus the raw-value mirror of the whole tree. The
/// empty path addresses the slot itself; every other path is delegated to
/// the node in it.
#[derive(Clone, Debug, Default)]
pub struct DbsHead {
    node: Option<Node>,
    data: Value,
    timestamp: Timestamp,
    value_merger: Option<ValueMerger>,
}

impl DbsHead {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `value` into a filled head stamped with `timestamp`.
    pub fn parse(value: Value, timestamp: Timestamp) -> Result<Self> {
        let node = parse(value, timestamp)?;
        Ok(Self {
            data: node.to_value(),
            node: Some(node),
            timestamp,
            value_merger: None,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.node.is_none()
    }

    pub fn node(&self) -> Option<&Node> {
        self.node.as_ref()
    }

    /// Time of the last write to the slot itself.
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Live view of the raw data.
    pub fn data(&self) -> Option<&Value> {
        self.node.as_ref().map(|_| &self.data)
    }

    /// Owned deep copy of the raw data.
    pub fn data_copy(&self) -> Option<Value> {
        self.data().cloned()
    }

    pub fn get(&self, path: &[String]) -> Option<&Node> {
        self.node.as_ref()?.get(path)
    }

    pub fn value_merger(&self) -> Option<&ValueMerger> {
        self.value_merger.as_ref()
    }

    pub(crate) fn set_value_merger(&mut self, merger: Option<ValueMerger>) {
        self.value_merger = merger;
    }

    pub fn insert(
        &mut self,
        path: &[String],
        value: Value,
        timestamp: Timestamp,
        options: &InsertOptions,
    ) -> Result<bool> {
        if path.is_empty() {
            if self.node.is_some() && !options.potential_update {
                debug!("insert skipped: head already filled");
                return Ok(false);
            }
            return self.replace(value, timestamp);
        }
        let vivified = self.node.is_none();
        let previous = self.timestamp;
        if vivified {
            if options.if_contains.is_some() {
                debug!("insert skipped: head is empty");
                return Ok(false);
            }
            if previous > timestamp {
                debug!(stored = previous, timestamp, "insert skipped: slot cleared later");
                return Ok(false);
            }
            trace!("creating root object");
            self.node = Some(Node::Object(DbsObject::new()));
            self.data = Value::Object(Default::default());
            self.timestamp = timestamp;
        }
        let result = match self.node.as_mut() {
            Some(node) => node.insert(&mut self.data, path, value, timestamp, options),
            None => Ok(false),
        };
        if vivified && !matches!(result, Ok(true)) {
            self.reset(previous);
        }
        result
    }

    pub fn update(
        &mut self,
        path: &[String],
        value: Value,
        timestamp: Timestamp,
        options: &UpdateOptions,
    ) -> Result<bool> {
        if path.is_empty() {
            if self.node.is_none() && !options.potential_insert {
                debug!("update skipped: head is empty");
                return Ok(false);
            }
            return self.replace(value, timestamp);
        }
        match self.node.as_mut() {
            Some(node) => node.update(&mut self.data, path, value, timestamp, options),
            None if options.potential_insert => {
                self.insert(path, value, timestamp, &InsertOptions::default())
            }
            None => {
                debug!("update skipped: head is empty");
                Ok(false)
            }
        }
    }

    pub fn delete(&mut self, path: &[String], timestamp: Timestamp) -> Result<bool> {
        if path.is_empty() {
            if self.node.is_none() {
                return Ok(false);
            }
            if self.timestamp > timestamp {
                debug!(stored = self.timestamp, timestamp, "delete skipped: stale timestamp");
                return Ok(false);
            }
            self.reset(timestamp);
            return Ok(true);
        }
        match self.node.as_mut() {
            Some(node) => node.delete(&mut self.data, path, timestamp),
            None => Ok(false),
        }
    }

    /// Drop all data and forget every timestamp.
    pub fn clear(&mut self) {
        self.reset(0);
    }

    /// Merge another head into this one. An empty incoming head changes nothing.
    pub fn merge_with_new(&mut self, new: DbsHead) -> Result<bool> {
        let Some(incoming) = new.node else {
            return Ok(false);
        };
        match self.node.as_mut() {
            Some(node) => merge_entry(
                node,
                &mut self.data,
                &mut self.timestamp,
                incoming,
                new.timestamp,
                self.value_merger.as_ref(),
            ),
            None if new.timestamp < self.timestamp => {
                debug!(
                    stored = self.timestamp,
                    incoming = new.timestamp,
                    "merge skipped: slot cleared later"
                );
                Ok(false)
            }
            None => {
                self.data = new.data;
                self.node = Some(incoming);
                self.timestamp = new.timestamp;
                Ok(true)
            }
        }
    }

    /// Apply per-path component options to the subtree at `path`.
    pub(crate) fn configure(
        &mut self,
        path: &[String],
        resolve: &dyn Fn(&[String]) -> ComponentOptions,
    ) -> Result<()> {
        let Some(root) = self.node.as_mut() else {
            return Ok(());
        };
        let Some((node, data)) = root.get_mut(&mut self.data, path) else {
            return Ok(());
        };
        let mut prefix = path.to_vec();
        node.configure(data, &mut prefix, resolve)
    }

    /// Check that the mirror matches the tree and key-array indexes are consistent.
    pub fn validate_invariants(&self) -> Result<()> {
        match &self.node {
            Some(node) => node.validate(&self.data),
            None if self.data.is_null() => Ok(()),
            None => Err(Error::InconsistentState("empty head holds data".to_string())),
        }
    }

    fn replace(&mut self, value: Value, timestamp: Timestamp) -> Result<bool> {
        if self.timestamp > timestamp {
            debug!(stored = self.timestamp, timestamp, "head write skipped: stale timestamp");
            return Ok(false);
        }
        let node = parse(value, timestamp)?;
        self.data = node.to_value();
        self.node = Some(node);
        self.timestamp = timestamp;
        Ok(true)
    }

    fn reset(&mut self, timestamp: Timestamp) {
        self.node = None;
        self.data = Value::Null;
        self.timestamp = timestamp;
    }
}
