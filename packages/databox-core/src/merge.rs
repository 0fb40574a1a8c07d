//! Old-versus-new merging of nodes and raw values.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::component::Node;
use crate::error::Result;
use crate::ids::Timestamp;

type MergeFn = dyn Fn(&Value, &Value) -> Value + Send + Sync;

/// Resolves a collision between two primitive values. Called as
/// `merge(old, new)`; the result is stored.
#[derive(Clone)]
pub struct ValueMerger(Arc<MergeFn>);

impl ValueMerger {
    pub fn new(f: impl Fn(&Value, &Value) -> Value + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn merge(&self, old: &Value, new: &Value) -> Value {
        (self.0)(old, new)
    }

    /// Whether both handles share the same function instance.
    pub fn same(&self, other: &ValueMerger) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for ValueMerger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ValueMerger(..)")
    }
}

/// Merge two primitives; without a merger the new value wins.
pub fn merge_values(merger: Option<&ValueMerger>, old: &Value, new: &Value) -> Value {
    match merger {
        Some(merger) => merger.merge(old, new),
        None => new.clone(),
    }
}

/// Merge `new` into `slot` without a timestamp gate on the slot itself.
///
/// Same-kind components merge entry by entry, two primitives go through the
/// merger and anything else is replaced. `data` is the mirror of `slot`.
pub fn merge_nodes(
    slot: &mut Node,
    data: &mut Value,
    new: Node,
    merger: Option<&ValueMerger>,
) -> Result<bool> {
    match (slot, new) {
        (Node::Object(current), Node::Object(new)) => current.merge_with_new(data, new),
        (Node::Array(current), Node::Array(new)) => current.merge_with_new(data, new),
        (Node::KeyArray(current), Node::KeyArray(new)) => current.merge_with_new(data, new),
        (Node::Value(current), Node::Value(new)) => {
            let merged = merge_values(merger, current, &new);
            if merged == *current {
                return Ok(false);
            }
            *data = merged.clone();
            *current = merged;
            Ok(true)
        }
        (slot, new) => {
            *data = new.to_value();
            *slot = new;
            Ok(true)
        }
    }
}

/// Merge one stored entry with an incoming one.
///
/// Same-kind components always recurse, since their children carry their own
/// timestamps. Anything else applies only when `incoming >= stored`. The
/// stored timestamp ends up as the larger of the two.
pub(crate) fn merge_entry(
    slot: &mut Node,
    slot_data: &mut Value,
    stored: &mut Timestamp,
    new: Node,
    incoming: Timestamp,
    merger: Option<&ValueMerger>,
) -> Result<bool> {
    let recurse = slot.is_component() && slot.kind() == new.kind();
    if !recurse && incoming < *stored {
        debug!(stored = *stored, incoming, "merge skipped: stale entry");
        return Ok(false);
    }
    let changed = merge_nodes(slot, slot_data, new, merger)?;
    *stored = (*stored).max(incoming);
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use serde_json::json;

    #[test]
    fn merger_resolves_primitive_collisions() {
        let sum = ValueMerger::new(|old, new| {
            json!(old.as_i64().unwrap_or(0) + new.as_i64().unwrap_or(0))
        });
        assert_eq!(merge_values(Some(&sum), &json!(2), &json!(3)), json!(5));
        assert_eq!(merge_values(None, &json!(2), &json!(3)), json!(3));
        assert!(sum.same(&sum.clone()));
    }

    #[test]
    fn different_kinds_replace() {
        let mut slot = parse(json!({ "a": 1 }), 1).unwrap();
        let mut data = slot.to_value();
        assert!(merge_nodes(&mut slot, &mut data, parse(json!([1]), 2).unwrap(), None).unwrap());
        assert_eq!(data, json!([1]));
        slot.validate(&data).unwrap();
    }

    #[test]
    fn entry_gate_skips_older_primitives_but_recurses_into_components() {
        let mut slot = Node::Value(json!("new"));
        let mut data = json!("new");
        let mut stored = 10;
        let older = Node::Value(json!("old"));
        assert!(!merge_entry(&mut slot, &mut data, &mut stored, older, 5, None).unwrap());
        assert_eq!(data, json!("new"));

        let mut slot = parse(json!({ "x": 1 }), 10).unwrap();
        let mut data = slot.to_value();
        let mut stored = 10;
        let older = parse(json!({ "y": 2 }), 5).unwrap();
        assert!(merge_entry(&mut slot, &mut data, &mut stored, older, 5, None).unwrap());
        assert_eq!(data, json!({ "x": 1, "y": 2 }));
        assert_eq!(stored, 10);
    }

    #[test]
    fn equal_timestamps_apply() {
        let mut slot = Node::Value(json!(1));
        let mut data = json!(1);
        let mut stored = 7;
        let incoming = Node::Value(json!(2));
        assert!(merge_entry(&mut slot, &mut data, &mut stored, incoming, 7, None).unwrap());
        assert_eq!(data, json!(2));
    }
}
