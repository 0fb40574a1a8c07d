//! Change notification.

use std::collections::{BTreeMap, VecDeque};

use serde_json::Value;

use crate::ids::{ListenerId, Timestamp};
use crate::key_path::KeyPath;
use crate::ops::{DeleteOptions, InsertOptions, Mutation, UpdateOptions};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
    Clear,
    Reload,
    AddFetchData,
    CopyFrom,
}

/// Emitted after a change was applied.
#[derive(Clone, Copy, Debug)]
pub struct DataChangeEvent<'a> {
    pub kind: ChangeKind,
    /// Target of insert, update and delete.
    pub key_path: Option<&'a KeyPath>,
    pub timestamp: Option<Timestamp>,
    /// Caller metadata from the mutation options.
    pub info: Option<&'a Value>,
    /// Current raw data after the change, `None` when the storage is empty.
    pub data: Option<&'a Value>,
}

/// Mutations a listener wants applied once the current change has finished.
///
/// Listeners cannot touch the storage while it is notifying; they push here
/// instead and the storage drains the queue in order.
#[derive(Debug, Default)]
pub struct MutationQueue {
    pending: VecDeque<Mutation>,
}

impl MutationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, mutation: Mutation) {
        self.pending.push_back(mutation);
    }

    pub fn insert(&mut self, key_path: impl Into<KeyPath>, value: Value, options: InsertOptions) {
        self.push(Mutation::insert(key_path, value, options));
    }

    pub fn update(&mut self, key_path: impl Into<KeyPath>, value: Value, options: UpdateOptions) {
        self.push(Mutation::update(key_path, value, options));
    }

    pub fn delete(&mut self, key_path: impl Into<KeyPath>, options: DeleteOptions) {
        self.push(Mutation::delete(key_path, options));
    }

    pub fn clear(&mut self) {
        self.push(Mutation::Clear);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub(crate) fn pop(&mut self) -> Option<Mutation> {
        self.pending.pop_front()
    }

    pub(crate) fn discard(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }
}

pub type ListenerFn = dyn FnMut(&DataChangeEvent<'_>, &mut MutationQueue) + Send;

struct Listener {
    once: bool,
    callback: Box<ListenerFn>,
}

/// Registered change listeners, called in registration order.
#[derive(Default)]
pub(crate) struct Listeners {
    next_id: u64,
    entries: BTreeMap<u64, Listener>,
}

impl Listeners {
    pub(crate) fn add(&mut self, once: bool, callback: Box<ListenerFn>) -> ListenerId {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.insert(id, Listener { once, callback });
        ListenerId(id)
    }

    pub(crate) fn remove(&mut self, id: ListenerId) -> bool {
        self.entries.remove(&id.as_u64()).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn emit(&mut self, event: &DataChangeEvent<'_>, queue: &mut MutationQueue) {
        for listener in self.entries.values_mut() {
            (listener.callback)(event, queue);
        }
        self.entries.retain(|_, listener| !listener.once);
    }
}

impl std::fmt::Debug for Listeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners")
            .field("count", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn event() -> DataChangeEvent<'static> {
        DataChangeEvent {
            kind: ChangeKind::Clear,
            key_path: None,
            timestamp: None,
            info: None,
            data: None,
        }
    }

    #[test]
    fn once_listeners_fire_a_single_time() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut listeners = Listeners::default();
        let seen = calls.clone();
        listeners.add(false, Box::new(move |_, _| seen.lock().unwrap().push("always")));
        let seen = calls.clone();
        listeners.add(true, Box::new(move |_, _| seen.lock().unwrap().push("once")));

        let mut queue = MutationQueue::new();
        listeners.emit(&event(), &mut queue);
        listeners.emit(&event(), &mut queue);
        assert_eq!(*calls.lock().unwrap(), ["always", "once", "always"]);
        assert_eq!(listeners.len(), 1);
    }

    #[test]
    fn removal_by_id() {
        let mut listeners = Listeners::default();
        let id = listeners.add(false, Box::new(|_, _| {}));
        assert!(listeners.remove(id));
        assert!(!listeners.remove(id));
    }

    #[test]
    fn queue_is_fifo() {
        let mut queue = MutationQueue::new();
        queue.delete("a", DeleteOptions::default());
        queue.clear();
        assert_eq!(queue.len(), 2);
        assert!(matches!(queue.pop(), Some(Mutation::Delete { .. })));
        assert_eq!(queue.pop(), Some(Mutation::Clear));
        assert!(queue.pop().is_none());
    }
}
