//! The component tree.
//!
//! Every location in a DataBox is a [`Node`]: either a raw primitive or one of
//! the three multi-level components ([`DbsObject`], [`DbsArray`],
//! [`DbsKeyArray`]). A [`DbsHead`] wraps the root slot.
//!
//! Components keep only their structural children. The raw-value mirror
//! (`data`) is owned once by the head; each component operation receives the
//! mirror slot it corresponds to and applies every structural change to both
//! sides in the same step, so the mirror never has to be rebuilt.

pub mod array;
pub mod head;
pub mod key_array;
pub mod object;

use serde_json::{Map, Value};
use tracing::debug;

use crate::comparator::Comparator;
use crate::error::{Error, Result};
use crate::ids::Timestamp;
use crate::merge::ValueMerger;
use crate::ops::{InsertOptions, UpdateOptions};

pub use array::DbsArray;
pub use head::DbsHead;
pub use key_array::DbsKeyArray;
pub use object::DbsObject;

/// A location in the synchronized tree.
#[derive(Clone, Debug)]
pub enum Node {
    Value(Value),
    Object(DbsObject),
    Array(DbsArray),
    KeyArray(DbsKeyArray),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Value,
    Object,
    Array,
    KeyArray,
}

/// Merger and comparator settings applied to components during propagation.
#[derive(Clone, Debug, Default)]
pub struct ComponentOptions {
    pub value_merger: Option<ValueMerger>,
    pub comparator: Option<Comparator>,
}

impl ComponentOptions {
    pub fn is_empty(&self) -> bool {
        self.value_merger.is_none() && self.comparator.is_none()
    }

    /// Settings of `self` with every field that `other` sets taken from `other`.
    pub fn overlay(&self, other: &ComponentOptions) -> ComponentOptions {
        ComponentOptions {
            value_merger: other.value_merger.clone().or_else(|| self.value_merger.clone()),
            comparator: other.comparator.clone().or_else(|| self.comparator.clone()),
        }
    }
}

impl Node {
    pub fn kind(&self) -> NodeKind {
        match self {
            Node::Value(_) => NodeKind::Value,
            Node::Object(_) => NodeKind::Object,
            Node::Array(_) => NodeKind::Array,
            Node::KeyArray(_) => NodeKind::KeyArray,
        }
    }

    pub fn is_component(&self) -> bool {
        !matches!(self, Node::Value(_))
    }

    /// Materialize the raw value of this node.
    pub fn to_value(&self) -> Value {
        match self {
            Node::Value(value) => value.clone(),
            Node::Object(object) => object.to_value(),
            Node::Array(array) => array.to_value(),
            Node::KeyArray(list) => list.to_value(),
        }
    }

    pub fn as_object(&self) -> Option<&DbsObject> {
        match self {
            Node::Object(object) => Some(object),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&DbsArray> {
        match self {
            Node::Array(array) => Some(array),
            _ => None,
        }
    }

    pub fn as_key_array(&self) -> Option<&DbsKeyArray> {
        match self {
            Node::KeyArray(list) => Some(list),
            _ => None,
        }
    }

    /// Child addressed by one path segment.
    pub fn child(&self, segment: &str) -> Option<&Node> {
        match self {
            Node::Value(_) => None,
            Node::Object(object) => object.get(segment),
            Node::Array(array) => array.get(array::parse_index(segment)?),
            Node::KeyArray(list) => list.get(segment),
        }
    }

    /// Descendant addressed by `path`; the empty path is the node itself.
    pub fn get(&self, path: &[String]) -> Option<&Node> {
        path.iter()
            .try_fold(self, |node, segment| node.child(segment))
    }

    /// Path segments of the direct children, in storage order.
    pub fn child_keys(&self) -> Vec<String> {
        match self {
            Node::Value(_) => Vec::new(),
            Node::Object(object) => object.keys().map(str::to_owned).collect(),
            Node::Array(array) => (0..array.len()).map(|i| i.to_string()).collect(),
            Node::KeyArray(list) => list.keys().to_vec(),
        }
    }

    /// Visit this node and every descendant, depth first, with its path
    /// relative to `self`.
    pub fn visit(&self, f: &mut dyn FnMut(&[String], &Node)) {
        let mut path = Vec::new();
        self.visit_inner(&mut path, f);
    }

    fn visit_inner(&self, path: &mut Vec<String>, f: &mut dyn FnMut(&[String], &Node)) {
        f(path.as_slice(), self);
        for key in self.child_keys() {
            if let Some(child) = self.child(&key) {
                path.push(key);
                child.visit_inner(path, f);
                path.pop();
            }
        }
    }

    pub(crate) fn child_mut<'a>(
        &'a mut self,
        data: &'a mut Value,
        segment: &str,
    ) -> Option<(&'a mut Node, &'a mut Value)> {
        match self {
            Node::Value(_) => None,
            Node::Object(object) => object.child_mut(data, segment),
            Node::Array(array) => array.child_mut(data, segment),
            Node::KeyArray(list) => list.child_mut(data, segment),
        }
    }

    pub(crate) fn get_mut<'a>(
        &'a mut self,
        data: &'a mut Value,
        path: &[String],
    ) -> Option<(&'a mut Node, &'a mut Value)> {
        match path.split_first() {
            None => Some((self, data)),
            Some((segment, rest)) => {
                let (child, child_data) = self.child_mut(data, segment)?;
                child.get_mut(child_data, rest)
            }
        }
    }

    pub(crate) fn insert(
        &mut self,
        data: &mut Value,
        path: &[String],
        value: Value,
        timestamp: Timestamp,
        options: &InsertOptions,
    ) -> Result<bool> {
        match path {
            [] => Ok(false),
            [key] => match self {
                Node::Value(_) => Ok(walked_into_primitive(key)),
                Node::Object(object) => object.insert_leaf(data, key, value, timestamp, options),
                Node::Array(array) => array.insert_leaf(data, key, value, timestamp, options),
                Node::KeyArray(list) => list.insert_leaf(data, key, value, timestamp, options),
            },
            [key, rest @ ..] => {
                let mut created = false;
                if let Node::Object(object) = self {
                    if object.get(key).is_none() {
                        if options.if_contains.is_some() {
                            // A freshly created object cannot contain the sibling.
                            return Ok(false);
                        }
                        object.create_intermediate(data, key, timestamp)?;
                        created = true;
                    }
                }
                let result = self
                    .with_child(data, key, |child, child_data| {
                        child.insert(child_data, rest, value, timestamp, options)
                    })
                    .unwrap_or(Ok(false));
                if created && !matches!(result, Ok(true)) {
                    if let Node::Object(object) = self {
                        object.discard_intermediate(data, key);
                    }
                }
                let applied = result?;
                if applied {
                    self.after_nested_change(data, key)?;
                }
                Ok(applied)
            }
        }
    }

    pub(crate) fn update(
        &mut self,
        data: &mut Value,
        path: &[String],
        value: Value,
        timestamp: Timestamp,
        options: &UpdateOptions,
    ) -> Result<bool> {
        match path {
            [] => Ok(false),
            [key] => match self {
                Node::Value(_) => Ok(walked_into_primitive(key)),
                Node::Object(object) => object.update_leaf(data, key, value, timestamp, options),
                Node::Array(array) => array.update_leaf(data, key, value, timestamp, options),
                Node::KeyArray(list) => list.update_leaf(data, key, value, timestamp, options),
            },
            [key, rest @ ..] => {
                let applied = self
                    .with_child(data, key, |child, child_data| {
                        child.update(child_data, rest, value, timestamp, options)
                    })
                    .unwrap_or(Ok(false))?;
                if applied {
                    self.after_nested_change(data, key)?;
                }
                Ok(applied)
            }
        }
    }

    pub(crate) fn delete(
        &mut self,
        data: &mut Value,
        path: &[String],
        timestamp: Timestamp,
    ) -> Result<bool> {
        match path {
            [] => Ok(false),
            [key] => match self {
                Node::Value(_) => Ok(walked_into_primitive(key)),
                Node::Object(object) => object.delete_leaf(data, key, timestamp),
                Node::Array(array) => array.delete_leaf(data, key, timestamp),
                Node::KeyArray(list) => list.delete_leaf(data, key, timestamp),
            },
            [key, rest @ ..] => {
                let applied = self
                    .with_child(data, key, |child, child_data| {
                        child.delete(child_data, rest, timestamp)
                    })
                    .unwrap_or(Ok(false))?;
                if applied {
                    self.after_nested_change(data, key)?;
                }
                Ok(applied)
            }
        }
    }

    fn with_child<R>(
        &mut self,
        data: &mut Value,
        key: &str,
        f: impl FnOnce(&mut Node, &mut Value) -> R,
    ) -> Option<R> {
        match self.child_mut(data, key) {
            Some((child, child_data)) => Some(f(child, child_data)),
            None => {
                debug!(key, "path segment does not resolve to a child");
                None
            }
        }
    }

    /// Keep sorted key arrays sorted when an entry changed below them.
    fn after_nested_change(&mut self, data: &mut Value, key: &str) -> Result<()> {
        match self {
            Node::KeyArray(list) => list.reposition(data, key),
            _ => Ok(()),
        }
    }

    pub(crate) fn apply_options(
        &mut self,
        data: &mut Value,
        options: &ComponentOptions,
    ) -> Result<()> {
        match self {
            Node::Value(_) => Ok(()),
            Node::Object(object) => {
                object.set_value_merger(options.value_merger.clone());
                Ok(())
            }
            Node::Array(array) => {
                array.set_value_merger(options.value_merger.clone());
                Ok(())
            }
            Node::KeyArray(list) => {
                list.set_value_merger(options.value_merger.clone());
                list.set_comparator(data, options.comparator.clone())
            }
        }
    }

    /// Apply the options resolved for each path to this node and every
    /// descendant. `path` is the location of `self` and is restored on return.
    pub(crate) fn configure(
        &mut self,
        data: &mut Value,
        path: &mut Vec<String>,
        resolve: &dyn Fn(&[String]) -> ComponentOptions,
    ) -> Result<()> {
        self.apply_options(data, &resolve(path))?;
        for key in self.child_keys() {
            if let Some((child, child_data)) = self.child_mut(data, &key) {
                path.push(key);
                let result = child.configure(child_data, path, resolve);
                path.pop();
                result?;
            }
        }
        Ok(())
    }

    /// Check that `data` mirrors this node and that key-array indexes are consistent.
    pub(crate) fn validate(&self, data: &Value) -> Result<()> {
        match self {
            Node::Value(value) => {
                if value != data {
                    return Err(Error::InconsistentState(format!(
                        "mirror {data} differs from value {value}"
                    )));
                }
                Ok(())
            }
            Node::Object(object) => object.validate(data),
            Node::Array(array) => array.validate(data),
            Node::KeyArray(list) => list.validate(data),
        }
    }
}

fn walked_into_primitive(key: &str) -> bool {
    debug!(key, "path walks into a primitive value");
    false
}

pub(crate) fn object_mirror(data: &mut Value) -> Result<&mut Map<String, Value>> {
    data.as_object_mut()
        .ok_or_else(|| Error::InconsistentState("object mirror is not an object".into()))
}

pub(crate) fn array_mirror(data: &mut Value) -> Result<&mut Vec<Value>> {
    data.as_array_mut()
        .ok_or_else(|| Error::InconsistentState("array mirror is not an array".into()))
}

pub(crate) fn missing_mirror(key: &str) -> Error {
    Error::InconsistentState(format!("mirror has no slot for `{key}`"))
}
