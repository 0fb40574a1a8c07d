//! The storage facade collaborators talk to.

use std::collections::HashMap;

use serde_json::Value;
use tracing::{debug, info, trace, warn};

use crate::comparator::Comparator;
use crate::component::{ComponentOptions, DbsHead, Node};
use crate::error::Result;
use crate::events::{ChangeKind, DataChangeEvent, Listeners, MutationQueue};
use crate::ids::{ListenerId, Timestamp};
use crate::key_path::KeyPath;
use crate::merge::ValueMerger;
use crate::ops::{DeleteOptions, InsertOptions, Mutation, UpdateOptions};
use crate::policy::{PolicyArgs, StorageOptions};
use crate::traits::{Clock, SystemClock};

/// Upper bound on mutations queued by listeners during one public call.
pub const MAX_DEFERRED_MUTATIONS: usize = 1024;

/// Owns one [`DbsHead`] and mediates every change to it.
///
/// Each mutation defaults its timestamp from the clock, asks the matching
/// policy, applies the change, configures any new components with the
/// merger and comparator settings, and notifies listeners. Listeners get a
/// [`MutationQueue`]; whatever they push is applied after the current change
/// has fully committed.
#[derive(Debug)]
pub struct DbsStorage<C: Clock = SystemClock> {
    head: DbsHead,
    options: StorageOptions,
    global_options: ComponentOptions,
    path_options: HashMap<KeyPath, ComponentOptions>,
    clock: C,
    listeners: Listeners,
}

impl DbsStorage<SystemClock> {
    pub fn new() -> Self {
        Self::with_options(StorageOptions::default(), SystemClock)
    }
}

impl Default for DbsStorage<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> DbsStorage<C> {
    pub fn with_options(options: StorageOptions, clock: C) -> Self {
        Self {
            head: DbsHead::new(),
            options,
            global_options: ComponentOptions::default(),
            path_options: HashMap::new(),
            clock,
            listeners: Listeners::default(),
        }
    }

    pub fn options(&self) -> &StorageOptions {
        &self.options
    }

    pub fn set_options(&mut self, options: StorageOptions) {
        self.options = options;
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Live view of the current data, `None` when empty.
    pub fn data(&self) -> Option<&Value> {
        self.head.data()
    }

    /// Deep copy of the current data; later changes to either side are independent.
    pub fn data_copy(&self) -> Option<Value> {
        self.head.data_copy()
    }

    pub fn head(&self) -> &DbsHead {
        &self.head
    }

    pub fn get(&self, key_path: impl Into<KeyPath>) -> Option<&Node> {
        self.head.get(key_path.into().segments())
    }

    /// Raw value at `key_path`; key-array entries are addressed by key.
    pub fn value_at(&self, key_path: impl Into<KeyPath>) -> Option<Value> {
        self.get(key_path).map(Node::to_value)
    }

    pub fn insert(
        &mut self,
        key_path: impl Into<KeyPath>,
        value: Value,
        options: InsertOptions,
    ) -> Result<bool> {
        let mut queue = MutationQueue::new();
        let applied = self.insert_inner(key_path.into(), value, options, &mut queue)?;
        self.drain(queue);
        Ok(applied)
    }

    pub fn update(
        &mut self,
        key_path: impl Into<KeyPath>,
        value: Value,
        options: UpdateOptions,
    ) -> Result<bool> {
        let mut queue = MutationQueue::new();
        let applied = self.update_inner(key_path.into(), value, options, &mut queue)?;
        self.drain(queue);
        Ok(applied)
    }

    pub fn delete(&mut self, key_path: impl Into<KeyPath>, options: DeleteOptions) -> Result<bool> {
        let mut queue = MutationQueue::new();
        let applied = self.delete_inner(key_path.into(), options, &mut queue)?;
        self.drain(queue);
        Ok(applied)
    }

    /// Drop all data and timestamps. Component settings stay registered.
    pub fn clear(&mut self) -> Result<()> {
        let mut queue = MutationQueue::new();
        self.clear_inner(&mut queue);
        self.drain(queue);
        Ok(())
    }

    /// Apply a decoded mutation.
    pub fn apply(&mut self, mutation: Mutation) -> Result<bool> {
        let mut queue = MutationQueue::new();
        let applied = self.apply_inner(mutation, &mut queue)?;
        self.drain(queue);
        Ok(applied)
    }

    /// Merge freshly fetched data into the current tree.
    pub fn add_data(&mut self, value: Value, timestamp: Option<Timestamp>) -> Result<bool> {
        if !self.options.allows(&PolicyArgs::AddFetchData { data: Some(&value) }) {
            debug!("add data rejected by policy");
            return Ok(false);
        }
        let timestamp = timestamp.unwrap_or_else(|| self.clock.now());
        let incoming = DbsHead::parse(value, timestamp)?;
        self.merge_head(incoming, ChangeKind::AddFetchData)
    }

    /// Merge an already parsed head.
    pub fn add_head(&mut self, incoming: DbsHead) -> Result<bool> {
        if !self.options.allows(&PolicyArgs::AddFetchData {
            data: incoming.data(),
        }) {
            debug!("add data rejected by policy");
            return Ok(false);
        }
        self.merge_head(incoming, ChangeKind::AddFetchData)
    }

    /// Merge a full reload of the subscribed data.
    pub fn reload(&mut self, value: Value, timestamp: Option<Timestamp>) -> Result<bool> {
        if !self.options.allows(&PolicyArgs::Reload { data: Some(&value) }) {
            debug!("reload rejected by policy");
            return Ok(false);
        }
        let timestamp = timestamp.unwrap_or_else(|| self.clock.now());
        let incoming = DbsHead::parse(value, timestamp)?;
        self.merge_head(incoming, ChangeKind::Reload)
    }

    /// Replace the tree with a deep copy of `other`'s tree.
    ///
    /// Settings and listeners of `self` are kept and applied to the copy.
    pub fn copy_from<C2: Clock>(&mut self, other: &DbsStorage<C2>) -> Result<()> {
        self.head = other.head.clone();
        self.reconfigure()?;
        let mut queue = MutationQueue::new();
        self.notify(ChangeKind::CopyFrom, None, None, None, &mut queue);
        self.drain(queue);
        Ok(())
    }

    /// The connection to the server closed. Clears the data when allowed.
    pub fn connection_closed(&mut self, code: Option<u16>, reason: Option<&str>) -> Result<bool> {
        if !self.options.allows(&PolicyArgs::Close { code, reason }) {
            return Ok(false);
        }
        info!(?code, ?reason, "clearing storage after connection close");
        self.clear()?;
        Ok(true)
    }

    /// The server kicked this client out. Clears the data when allowed.
    pub fn kicked_out(&mut self, reason: Option<&str>) -> Result<bool> {
        if !self.options.allows(&PolicyArgs::KickOut { reason }) {
            return Ok(false);
        }
        info!(?reason, "clearing storage after kick-out");
        self.clear()?;
        Ok(true)
    }

    /// Set or remove the value merger globally (`None` path) or for the
    /// subtree at `key_path`. Deeper settings win.
    pub fn set_value_merger(
        &mut self,
        merger: Option<ValueMerger>,
        key_path: Option<KeyPath>,
    ) -> Result<()> {
        match key_path {
            None => self.global_options.value_merger = merger,
            Some(path) => {
                self.update_path_options(path, |options| options.value_merger = merger)
            }
        }
        self.reconfigure()
    }

    /// Set or remove the comparator globally (`None` path) or for the key
    /// array at exactly `key_path`. Paths that do not hold a key array are
    /// ignored.
    pub fn set_comparator(
        &mut self,
        comparator: Option<Comparator>,
        key_path: Option<KeyPath>,
    ) -> Result<()> {
        match key_path {
            None => self.global_options.comparator = comparator,
            Some(path) => {
                self.update_path_options(path, |options| options.comparator = comparator)
            }
        }
        self.reconfigure()
    }

    /// Settings that apply to the component at `key_path`.
    pub fn component_options(&self, key_path: &KeyPath) -> ComponentOptions {
        resolve_options(&self.global_options, &self.path_options, key_path.segments())
    }

    pub fn on_data_change<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&DataChangeEvent<'_>, &mut MutationQueue) + Send + 'static,
    {
        self.listeners.add(false, Box::new(listener))
    }

    /// Like [`DbsStorage::on_data_change`], removed after its first call.
    pub fn once_data_change<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&DataChangeEvent<'_>, &mut MutationQueue) + Send + 'static,
    {
        self.listeners.add(true, Box::new(listener))
    }

    pub fn off_data_change(&mut self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    fn apply_inner(&mut self, mutation: Mutation, queue: &mut MutationQueue) -> Result<bool> {
        match mutation {
            Mutation::Insert {
                key_path,
                value,
                options,
            } => self.insert_inner(key_path, value, options, queue),
            Mutation::Update {
                key_path,
                value,
                options,
            } => self.update_inner(key_path, value, options, queue),
            Mutation::Delete { key_path, options } => self.delete_inner(key_path, options, queue),
            Mutation::Clear => {
                self.clear_inner(queue);
                Ok(true)
            }
        }
    }

    fn insert_inner(
        &mut self,
        key_path: KeyPath,
        value: Value,
        mut options: InsertOptions,
        queue: &mut MutationQueue,
    ) -> Result<bool> {
        let timestamp = *options.timestamp.get_or_insert_with(|| self.clock.now());
        if !self.options.allows(&PolicyArgs::Insert {
            key_path: &key_path,
            value: &value,
            timestamp,
        }) {
            debug!(%key_path, "insert rejected by policy");
            return Ok(false);
        }
        let scope = self.scope(&key_path);
        if !self
            .head
            .insert(key_path.segments(), value, timestamp, &options)?
        {
            return Ok(false);
        }
        trace!(%key_path, timestamp, "insert applied");
        self.propagate(&key_path.segments()[..scope])?;
        self.notify(
            ChangeKind::Insert,
            Some(&key_path),
            Some(timestamp),
            options.info.as_ref(),
            queue,
        );
        Ok(true)
    }

    fn update_inner(
        &mut self,
        key_path: KeyPath,
        value: Value,
        mut options: UpdateOptions,
        queue: &mut MutationQueue,
    ) -> Result<bool> {
        let timestamp = *options.timestamp.get_or_insert_with(|| self.clock.now());
        if !self.options.allows(&PolicyArgs::Update {
            key_path: &key_path,
            value: &value,
            timestamp,
        }) {
            debug!(%key_path, "update rejected by policy");
            return Ok(false);
        }
        let scope = self.scope(&key_path);
        if !self
            .head
            .update(key_path.segments(), value, timestamp, &options)?
        {
            return Ok(false);
        }
        trace!(%key_path, timestamp, "update applied");
        self.propagate(&key_path.segments()[..scope])?;
        self.notify(
            ChangeKind::Update,
            Some(&key_path),
            Some(timestamp),
            options.info.as_ref(),
            queue,
        );
        Ok(true)
    }

    fn delete_inner(
        &mut self,
        key_path: KeyPath,
        mut options: DeleteOptions,
        queue: &mut MutationQueue,
    ) -> Result<bool> {
        let timestamp = *options.timestamp.get_or_insert_with(|| self.clock.now());
        if !self.options.allows(&PolicyArgs::Delete {
            key_path: &key_path,
            timestamp,
        }) {
            debug!(%key_path, "delete rejected by policy");
            return Ok(false);
        }
        if !self.head.delete(key_path.segments(), timestamp)? {
            return Ok(false);
        }
        trace!(%key_path, timestamp, "delete applied");
        self.notify(
            ChangeKind::Delete,
            Some(&key_path),
            Some(timestamp),
            options.info.as_ref(),
            queue,
        );
        Ok(true)
    }

    fn clear_inner(&mut self, queue: &mut MutationQueue) {
        self.head.clear();
        trace!("storage cleared");
        self.notify(ChangeKind::Clear, None, None, None, queue);
    }

    fn merge_head(&mut self, incoming: DbsHead, kind: ChangeKind) -> Result<bool> {
        let timestamp = incoming.timestamp();
        if !self.head.merge_with_new(incoming)? {
            debug!(?kind, timestamp, "merge changed nothing");
            return Ok(false);
        }
        trace!(?kind, timestamp, "merge applied");
        self.reconfigure()?;
        let mut queue = MutationQueue::new();
        self.notify(kind, None, Some(timestamp), None, &mut queue);
        self.drain(queue);
        Ok(true)
    }

    /// Depth of the deepest existing component on the way to the parent of
    /// `key_path`. Everything below it may be created by the mutation.
    fn anchor(&self, key_path: &KeyPath) -> usize {
        let parent_len = key_path.len().saturating_sub(1);
        let Some(mut node) = self.head.node() else {
            return 0;
        };
        let mut depth = 0;
        for segment in &key_path.segments()[..parent_len] {
            match node.child(segment) {
                Some(child) => node = child,
                None => break,
            }
            depth += 1;
        }
        depth
    }

    /// Length of the path prefix a mutation at `key_path` can create or
    /// replace: the first missing segment, or the written node itself. Array
    /// writes may land at another index, so they widen to the array. An empty
    /// head widens to the root.
    fn scope(&self, key_path: &KeyPath) -> usize {
        let Some(root) = self.head.node() else {
            return 0;
        };
        let segments = key_path.segments();
        let scope = (self.anchor(key_path) + 1).min(segments.len());
        if scope == 0 {
            return 0;
        }
        match root.get(&segments[..scope - 1]) {
            Some(Node::Array(_)) => scope - 1,
            _ => scope,
        }
    }

    /// Configure the subtree at `path` after a mutation created nodes in it.
    fn propagate(&mut self, path: &[String]) -> Result<()> {
        if self.global_options.is_empty() && self.path_options.is_empty() {
            return Ok(());
        }
        let global = &self.global_options;
        let paths = &self.path_options;
        let resolve = |path: &[String]| resolve_options(global, paths, path);
        if path.is_empty() {
            self.head.set_value_merger(resolve(path).value_merger);
        }
        self.head.configure(path, &resolve)
    }

    /// Configure the whole tree, including clearing settings that were removed.
    fn reconfigure(&mut self) -> Result<()> {
        let global = &self.global_options;
        let paths = &self.path_options;
        let resolve = |path: &[String]| resolve_options(global, paths, path);
        self.head.set_value_merger(resolve(&[]).value_merger);
        self.head.configure(&[], &resolve)
    }

    fn update_path_options(&mut self, path: KeyPath, edit: impl FnOnce(&mut ComponentOptions)) {
        let options = self.path_options.entry(path.clone()).or_default();
        edit(options);
        if options.is_empty() {
            self.path_options.remove(&path);
        }
    }

    fn notify(
        &mut self,
        kind: ChangeKind,
        key_path: Option<&KeyPath>,
        timestamp: Option<Timestamp>,
        info: Option<&Value>,
        queue: &mut MutationQueue,
    ) {
        if self.listeners.is_empty() {
            return;
        }
        let event = DataChangeEvent {
            kind,
            key_path,
            timestamp,
            info,
            data: self.head.data(),
        };
        self.listeners.emit(&event, queue);
    }

    /// Apply mutations queued by listeners, oldest first. Mutations they
    /// queue in turn go to the back of the same queue. A failing deferred
    /// mutation is logged and skipped; it never fails the call that queued it.
    fn drain(&mut self, mut queue: MutationQueue) {
        let mut applied = 0;
        while let Some(mutation) = queue.pop() {
            if applied == MAX_DEFERRED_MUTATIONS {
                let dropped = queue.discard() + 1;
                warn!(dropped, "deferred mutation limit reached");
                break;
            }
            applied += 1;
            let kind = mutation.kind();
            if let Err(err) = self.apply_inner(mutation, &mut queue) {
                warn!(?kind, %err, "deferred mutation failed");
            }
        }
    }
}

/// Value mergers are inherited from the nearest configured ancestor;
/// comparators only apply at the exact path. Global settings fill the gaps.
fn resolve_options(
    global: &ComponentOptions,
    paths: &HashMap<KeyPath, ComponentOptions>,
    path: &[String],
) -> ComponentOptions {
    let value_merger = (0..=path.len())
        .rev()
        .find_map(|len| paths.get(&path[..len]).and_then(|o| o.value_merger.clone()));
    let comparator = paths.get(path).and_then(|o| o.comparator.clone());
    global.overlay(&ComponentOptions {
        value_merger,
        comparator,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::ManualClock;
    use serde_json::json;

    fn storage() -> DbsStorage<ManualClock> {
        DbsStorage::with_options(StorageOptions::default(), ManualClock::new(1_000))
    }

    #[test]
    fn missing_timestamps_come_from_the_clock() {
        let mut storage = storage();
        assert!(storage
            .insert("a", json!(1), InsertOptions::default())
            .unwrap());
        let root = storage.head().node().and_then(Node::as_object).unwrap();
        assert_eq!(root.timestamp("a"), Some(1_000));
        assert!(!storage.update("a", json!(2), UpdateOptions::at(999)).unwrap());
        storage.clock().advance(1);
        assert!(storage.update("a", json!(2), UpdateOptions::default()).unwrap());
        assert_eq!(storage.data(), Some(&json!({ "a": 2 })));
    }

    #[test]
    fn anchor_stops_at_the_first_missing_segment() {
        let mut storage = storage();
        storage
            .insert("a.b", json!({ "c": 1 }), InsertOptions::default())
            .unwrap();
        assert_eq!(storage.anchor(&KeyPath::from("a.b.x.y")), 2);
        assert_eq!(storage.anchor(&KeyPath::from("a.x.y")), 1);
        assert_eq!(storage.anchor(&KeyPath::from("a")), 0);
    }

    #[test]
    fn propagation_is_limited_to_the_written_subtree() {
        let mut storage = storage();
        assert_eq!(storage.scope(&KeyPath::from("a.b")), 0);
        storage
            .insert("a.b", json!({ "c": 1, "list": [1] }), InsertOptions::default())
            .unwrap();
        assert_eq!(storage.scope(&KeyPath::from("a.b.x.y")), 3);
        assert_eq!(storage.scope(&KeyPath::from("a.b.c")), 3);
        assert_eq!(storage.scope(&KeyPath::from("z")), 1);
        assert_eq!(storage.scope(&KeyPath::from("a.b.list.5")), 3);
        assert_eq!(storage.scope(&KeyPath::root()), 0);
    }

    #[test]
    fn merger_inherits_but_comparator_does_not() {
        let mut storage = storage();
        storage
            .set_value_merger(Some(ValueMerger::new(|old, _| old.clone())), Some("a".into()))
            .unwrap();
        storage
            .set_comparator(Some(Comparator::by_field("rank")), Some("a".into()))
            .unwrap();
        let nested = storage.component_options(&KeyPath::from("a.b"));
        assert!(nested.value_merger.is_some());
        assert!(nested.comparator.is_none());
        let exact = storage.component_options(&KeyPath::from("a"));
        assert!(exact.comparator.is_some());
        assert!(storage.component_options(&KeyPath::from("z")).is_empty());
    }

    #[test]
    fn removing_both_settings_forgets_the_path() {
        let mut storage = storage();
        let path = KeyPath::from("feed");
        storage
            .set_comparator(Some(Comparator::by_field("rank")), Some(path.clone()))
            .unwrap();
        storage.set_comparator(None, Some(path)).unwrap();
        assert!(storage.path_options.is_empty());
    }
}
