use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::Timestamp;
use crate::key_path::KeyPath;

/// Options accepted by insert.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InsertOptions {
    /// Mutation time; the storage clock fills it in when absent.
    pub timestamp: Option<Timestamp>,
    /// Only insert when this sibling key exists. In key arrays the new entry
    /// goes directly before it.
    pub if_contains: Option<String>,
    /// Turn the insert into an update when the key already exists.
    pub potential_update: bool,
    /// Opaque caller metadata forwarded to change listeners.
    pub info: Option<Value>,
}

/// Options accepted by update.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UpdateOptions {
    pub timestamp: Option<Timestamp>,
    /// Turn the update into an insert when the key is missing.
    pub potential_insert: bool,
    pub info: Option<Value>,
}

/// Options accepted by delete.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DeleteOptions {
    pub timestamp: Option<Timestamp>,
    pub info: Option<Value>,
}

impl InsertOptions {
    pub fn at(timestamp: Timestamp) -> Self {
        Self {
            timestamp: Some(timestamp),
            ..Self::default()
        }
    }

    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_if_contains(mut self, key: impl Into<String>) -> Self {
        self.if_contains = Some(key.into());
        self
    }

    pub fn with_potential_update(mut self) -> Self {
        self.potential_update = true;
        self
    }

    pub fn with_info(mut self, info: Value) -> Self {
        self.info = Some(info);
        self
    }
}

impl UpdateOptions {
    pub fn at(timestamp: Timestamp) -> Self {
        Self {
            timestamp: Some(timestamp),
            ..Self::default()
        }
    }

    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_potential_insert(mut self) -> Self {
        self.potential_insert = true;
        self
    }

    pub fn with_info(mut self, info: Value) -> Self {
        self.info = Some(info);
        self
    }
}

impl DeleteOptions {
    pub fn at(timestamp: Timestamp) -> Self {
        Self {
            timestamp: Some(timestamp),
            ..Self::default()
        }
    }

    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_info(mut self, info: Value) -> Self {
        self.info = Some(info);
        self
    }
}

/// A decoded change operation, ready to hand to the storage.
///
/// Serialized with an `action` tag, e.g.
/// `{"action":"insert","keyPath":"feed.a","value":1,"options":{"timestamp":5}}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Mutation {
    Insert {
        key_path: KeyPath,
        value: Value,
        #[serde(default)]
        options: InsertOptions,
    },
    Update {
        key_path: KeyPath,
        value: Value,
        #[serde(default)]
        options: UpdateOptions,
    },
    Delete {
        key_path: KeyPath,
        #[serde(default)]
        options: DeleteOptions,
    },
    Clear,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MutationKind {
    Insert,
    Update,
    Delete,
    Clear,
}

impl Mutation {
    pub fn insert(key_path: impl Into<KeyPath>, value: Value, options: InsertOptions) -> Self {
        Mutation::Insert {
            key_path: key_path.into(),
            value,
            options,
        }
    }

    pub fn update(key_path: impl Into<KeyPath>, value: Value, options: UpdateOptions) -> Self {
        Mutation::Update {
            key_path: key_path.into(),
            value,
            options,
        }
    }

    pub fn delete(key_path: impl Into<KeyPath>, options: DeleteOptions) -> Self {
        Mutation::Delete {
            key_path: key_path.into(),
            options,
        }
    }

    pub fn kind(&self) -> MutationKind {
        match self {
            Mutation::Insert { .. } => MutationKind::Insert,
            Mutation::Update { .. } => MutationKind::Update,
            Mutation::Delete { .. } => MutationKind::Delete,
            Mutation::Clear => MutationKind::Clear,
        }
    }

    pub fn key_path(&self) -> Option<&KeyPath> {
        match self {
            Mutation::Insert { key_path, .. }
            | Mutation::Update { key_path, .. }
            | Mutation::Delete { key_path, .. } => Some(key_path),
            Mutation::Clear => None,
        }
    }

    /// Explicit timestamp carried by the mutation, if any.
    pub fn timestamp(&self) -> Option<Timestamp> {
        match self {
            Mutation::Insert { options, .. } => options.timestamp,
            Mutation::Update { options, .. } => options.timestamp,
            Mutation::Delete { options, .. } => options.timestamp,
            Mutation::Clear => None,
        }
    }
}
