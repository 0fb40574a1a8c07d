use serde::{Deserialize, Serialize};

/// Server-assigned mutation time in milliseconds since the Unix epoch.
pub type Timestamp = u64;

/// Handle returned when registering a change listener.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ListenerId(pub u64);

impl ListenerId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}
