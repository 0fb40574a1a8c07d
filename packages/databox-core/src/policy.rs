//! Permission hooks consulted before the storage accepts a change.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::Timestamp;
use crate::key_path::KeyPath;

/// What a policy is being asked to allow.
#[derive(Clone, Copy, Debug)]
pub enum PolicyArgs<'a> {
    Insert {
        key_path: &'a KeyPath,
        value: &'a Value,
        timestamp: Timestamp,
    },
    Update {
        key_path: &'a KeyPath,
        value: &'a Value,
        timestamp: Timestamp,
    },
    Delete {
        key_path: &'a KeyPath,
        timestamp: Timestamp,
    },
    Reload {
        data: Option<&'a Value>,
    },
    AddFetchData {
        data: Option<&'a Value>,
    },
    Close {
        code: Option<u16>,
        reason: Option<&'a str>,
    },
    KickOut {
        reason: Option<&'a str>,
    },
}

type PredicateFn = dyn Fn(&PolicyArgs<'_>) -> bool + Send + Sync;

/// Either a fixed answer or a predicate over the call arguments.
#[derive(Clone)]
pub enum Policy {
    Constant(bool),
    Predicate(Arc<PredicateFn>),
}

impl Policy {
    pub fn predicate(f: impl Fn(&PolicyArgs<'_>) -> bool + Send + Sync + 'static) -> Self {
        Policy::Predicate(Arc::new(f))
    }

    pub fn allows(&self, args: &PolicyArgs<'_>) -> bool {
        match self {
            Policy::Constant(allowed) => *allowed,
            Policy::Predicate(f) => f(args),
        }
    }
}

impl Default for Policy {
    fn default() -> Self {
        Policy::Constant(true)
    }
}

impl From<bool> for Policy {
    fn from(allowed: bool) -> Self {
        Policy::Constant(allowed)
    }
}

impl fmt::Debug for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Policy::Constant(allowed) => f.debug_tuple("Constant").field(allowed).finish(),
            Policy::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// The seven storage policies. Everything is allowed by default.
#[derive(Clone, Debug, Default)]
pub struct StorageOptions {
    pub do_insert: Policy,
    pub do_update: Policy,
    pub do_delete: Policy,
    pub do_reload: Policy,
    pub do_add_fetch_data: Policy,
    pub clear_on_close: Policy,
    pub clear_on_kick_out: Policy,
}

impl StorageOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_do_insert(mut self, policy: impl Into<Policy>) -> Self {
        self.do_insert = policy.into();
        self
    }

    pub fn with_do_update(mut self, policy: impl Into<Policy>) -> Self {
        self.do_update = policy.into();
        self
    }

    pub fn with_do_delete(mut self, policy: impl Into<Policy>) -> Self {
        self.do_delete = policy.into();
        self
    }

    pub fn with_do_reload(mut self, policy: impl Into<Policy>) -> Self {
        self.do_reload = policy.into();
        self
    }

    pub fn with_do_add_fetch_data(mut self, policy: impl Into<Policy>) -> Self {
        self.do_add_fetch_data = policy.into();
        self
    }

    pub fn with_clear_on_close(mut self, policy: impl Into<Policy>) -> Self {
        self.clear_on_close = policy.into();
        self
    }

    pub fn with_clear_on_kick_out(mut self, policy: impl Into<Policy>) -> Self {
        self.clear_on_kick_out = policy.into();
        self
    }

    /// The policy that governs `args`.
    pub fn policy_for(&self, args: &PolicyArgs<'_>) -> &Policy {
        match args {
            PolicyArgs::Insert { .. } => &self.do_insert,
            PolicyArgs::Update { .. } => &self.do_update,
            PolicyArgs::Delete { .. } => &self.do_delete,
            PolicyArgs::Reload { .. } => &self.do_reload,
            PolicyArgs::AddFetchData { .. } => &self.do_add_fetch_data,
            PolicyArgs::Close { .. } => &self.clear_on_close,
            PolicyArgs::KickOut { .. } => &self.clear_on_kick_out,
        }
    }

    pub fn allows(&self, args: &PolicyArgs<'_>) -> bool {
        self.policy_for(args).allows(args)
    }
}

/// Constant policies as they appear in configuration files.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PolicyFlags {
    pub do_insert: bool,
    pub do_update: bool,
    pub do_delete: bool,
    pub do_reload: bool,
    pub do_add_fetch_data: bool,
    pub clear_on_close: bool,
    pub clear_on_kick_out: bool,
}

impl Default for PolicyFlags {
    fn default() -> Self {
        Self {
            do_insert: true,
            do_update: true,
            do_delete: true,
            do_reload: true,
            do_add_fetch_data: true,
            clear_on_close: true,
            clear_on_kick_out: true,
        }
    }
}

impl From<PolicyFlags> for StorageOptions {
    fn from(flags: PolicyFlags) -> Self {
        StorageOptions {
            do_insert: flags.do_insert.into(),
            do_update: flags.do_update.into(),
            do_delete: flags.do_delete.into(),
            do_reload: flags.do_reload.into(),
            do_add_fetch_data: flags.do_add_fetch_data.into(),
            clear_on_close: flags.clear_on_close.into(),
            clear_on_kick_out: flags.clear_on_kick_out.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_allow_everything() {
        let options = StorageOptions::default();
        let path = KeyPath::from("a");
        assert!(options.allows(&PolicyArgs::Delete {
            key_path: &path,
            timestamp: 1
        }));
        assert!(options.allows(&PolicyArgs::KickOut { reason: None }));
    }

    #[test]
    fn predicates_see_the_arguments() {
        let options = StorageOptions::new().with_do_insert(Policy::predicate(|args| match args {
            PolicyArgs::Insert { key_path, .. } => !key_path.starts_with(&KeyPath::from("private")),
            _ => true,
        }));
        let public = KeyPath::from("public.a");
        let private = KeyPath::from("private.a");
        let value = json!(1);
        assert!(options.allows(&PolicyArgs::Insert {
            key_path: &public,
            value: &value,
            timestamp: 1
        }));
        assert!(!options.allows(&PolicyArgs::Insert {
            key_path: &private,
            value: &value,
            timestamp: 1
        }));
    }

    #[test]
    fn flags_load_with_missing_fields_defaulting_to_true() {
        let flags: PolicyFlags =
            serde_json::from_value(json!({ "doDelete": false, "clearOnKickOut": false })).unwrap();
        assert!(flags.do_insert);
        assert!(!flags.do_delete);
        let options = StorageOptions::from(flags);
        assert!(!options.allows(&PolicyArgs::KickOut { reason: Some("banned") }));
        assert!(options.allows(&PolicyArgs::Close {
            code: Some(1000),
            reason: None
        }));
    }
}
