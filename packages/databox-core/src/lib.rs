#![forbid(unsafe_code)]
//! Client-side synchronization core for DataBox trees.
//!
//! A [`DbsStorage`] holds a local copy of server data as a tree of components
//! (objects, arrays, keyed arrays) and keeps it current from a stream of
//! timestamped insert, update and delete operations plus occasional full
//! reloads. Operations may arrive late, twice or out of order; every entry
//! remembers when it was last written and older writes are ignored. The
//! crate performs no I/O.

pub mod comparator;
pub mod component;
pub mod error;
pub mod events;
pub mod ids;
pub mod key_path;
pub mod merge;
pub mod ops;
pub mod parser;
pub mod policy;
pub mod storage;
pub mod traits;

pub use comparator::Comparator;
pub use component::{
    ComponentOptions, DbsArray, DbsHead, DbsKeyArray, DbsObject, Node, NodeKind,
};
pub use error::{Error, Result};
pub use events::{ChangeKind, DataChangeEvent, MutationQueue};
pub use ids::{ListenerId, Timestamp};
pub use key_path::KeyPath;
pub use merge::{merge_nodes, merge_values, ValueMerger};
pub use ops::{DeleteOptions, InsertOptions, Mutation, MutationKind, UpdateOptions};
pub use parser::{is_key_array_payload, key_array_payload, parse, KEY_ARRAY_TAG};
pub use policy::{Policy, PolicyArgs, PolicyFlags, StorageOptions};
pub use storage::{DbsStorage, MAX_DEFERRED_MUTATIONS};
pub use traits::{Clock, ManualClock, SystemClock};
