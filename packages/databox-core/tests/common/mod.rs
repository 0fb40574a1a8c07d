#![allow(dead_code)]

use databox_core::{DbsStorage, ManualClock, StorageOptions};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

#[ctor::ctor]
fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("databox_core=info".parse().unwrap()),
        )
        .with_test_writer()
        .try_init();
}

/// Storage on a manual clock starting at 1.
pub fn storage() -> DbsStorage<ManualClock> {
    storage_with(StorageOptions::default())
}

pub fn storage_with(options: StorageOptions) -> DbsStorage<ManualClock> {
    DbsStorage::with_options(options, ManualClock::new(1))
}

/// `field` of every element of the array at `data`.
pub fn column<'a>(data: &'a Value, field: &str) -> Vec<&'a Value> {
    data.as_array()
        .map(|items| items.iter().map(|item| &item[field]).collect())
        .unwrap_or_default()
}
