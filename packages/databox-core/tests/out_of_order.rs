mod common;

use common::storage;
use databox_core::{DeleteOptions, InsertOptions, UpdateOptions};
use serde_json::json;

#[test]
fn updates_arriving_newest_first_keep_the_newest() {
    let mut storage = storage();
    storage.insert("k", json!(0), InsertOptions::at(1)).unwrap();
    assert!(storage.update("k", json!(30), UpdateOptions::at(30)).unwrap());
    assert!(!storage.update("k", json!(20), UpdateOptions::at(20)).unwrap());
    assert!(!storage.update("k", json!(10), UpdateOptions::at(10)).unwrap());
    assert_eq!(storage.value_at("k"), Some(json!(30)));
}

#[test]
fn equal_timestamps_let_the_later_call_win() {
    let mut storage = storage();
    storage.insert("k", json!("x"), InsertOptions::at(30)).unwrap();
    assert!(storage.update("k", json!("y"), UpdateOptions::at(30)).unwrap());
    assert_eq!(storage.value_at("k"), Some(json!("y")));
}

#[test]
fn late_delete_is_ignored() {
    let mut storage = storage();
    storage.insert("k", json!(1), InsertOptions::at(10)).unwrap();
    storage.update("k", json!(2), UpdateOptions::at(30)).unwrap();
    assert!(!storage.delete("k", DeleteOptions::at(20)).unwrap());
    assert_eq!(storage.value_at("k"), Some(json!(2)));
}

#[test]
fn deleted_keys_keep_no_tombstone() {
    let mut storage = storage();
    storage.insert("k", json!(1), InsertOptions::at(10)).unwrap();
    assert!(storage.delete("k", DeleteOptions::at(30)).unwrap());
    // The delete's timestamp leaves with the key, so an older insert lands.
    assert!(storage.insert("k", json!(0), InsertOptions::at(20)).unwrap());
    assert_eq!(storage.value_at("k"), Some(json!(0)));
}

#[test]
fn nested_entries_are_gated_independently() {
    let mut storage = storage();
    storage
        .insert("a", json!({ "x": 1, "y": 1 }), InsertOptions::at(10))
        .unwrap();
    assert!(storage.update("a.x", json!(2), UpdateOptions::at(20)).unwrap());
    assert!(!storage.update("a.x", json!(3), UpdateOptions::at(15)).unwrap());
    assert!(storage.update("a.y", json!(3), UpdateOptions::at(12)).unwrap());
    assert_eq!(storage.value_at("a"), Some(json!({ "x": 2, "y": 3 })));
}

#[test]
fn stale_reload_only_contributes_missing_entries() {
    let mut storage = storage();
    storage
        .reload(json!({ "a": "new", "b": { "c": "new" } }), Some(200))
        .unwrap();
    assert!(storage
        .add_data(json!({ "a": "old", "b": { "c": "old", "d": "old" }, "e": 1 }), Some(100))
        .unwrap());
    assert_eq!(
        storage.data(),
        Some(&json!({ "a": "new", "b": { "c": "new", "d": "old" }, "e": 1 }))
    );
    storage.head().validate_invariants().unwrap();
}

#[test]
fn late_key_array_operations() {
    let mut storage = storage();
    let feed = databox_core::key_array_payload(vec![json!({ "id": "a", "n": 1 })], "id", None);
    storage.insert("feed", feed, InsertOptions::at(10)).unwrap();
    assert!(storage
        .update("feed.a", json!({ "id": "a", "n": 2 }), UpdateOptions::at(30))
        .unwrap());
    assert!(!storage
        .update("feed.a", json!({ "id": "a", "n": 3 }), UpdateOptions::at(20))
        .unwrap());
    assert!(!storage.delete("feed.a", DeleteOptions::at(25)).unwrap());
    assert_eq!(storage.value_at("feed.a.n"), Some(json!(2)));
}
