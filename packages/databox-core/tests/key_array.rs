mod common;

use common::{column, storage};
use databox_core::{
    key_array_payload, Comparator, DeleteOptions, Error, InsertOptions, KeyPath, UpdateOptions,
};
use serde_json::{json, Value};

fn ranked(ids_and_ranks: &[(&str, i64)]) -> Value {
    key_array_payload(
        ids_and_ranks
            .iter()
            .map(|(id, rank)| json!({ "id": id, "rank": rank }))
            .collect(),
        "id",
        None,
    )
}

fn ids(storage_data: Option<&Value>, field: &str) -> Vec<String> {
    let data = storage_data.expect("storage has data");
    column(&data[field], "id")
        .into_iter()
        .map(|id| id.as_str().unwrap_or_default().to_owned())
        .collect()
}

#[test]
fn global_comparator_sorts_key_arrays_created_later() {
    let mut storage = storage();
    storage
        .set_comparator(Some(Comparator::by_field("rank")), None)
        .unwrap();
    storage
        .insert("feed", ranked(&[("a", 3), ("b", 1), ("c", 2)]), InsertOptions::at(1))
        .unwrap();
    assert_eq!(ids(storage.data(), "feed"), ["b", "c", "a"]);
    storage.head().validate_invariants().unwrap();
}

#[test]
fn path_comparator_only_applies_at_that_path() {
    let mut storage = storage();
    storage
        .set_comparator(Some(Comparator::by_field("rank")), Some(KeyPath::from("feed")))
        .unwrap();
    storage
        .insert("feed", ranked(&[("a", 3), ("b", 1)]), InsertOptions::at(1))
        .unwrap();
    storage
        .insert("other", ranked(&[("a", 3), ("b", 1)]), InsertOptions::at(1))
        .unwrap();
    assert_eq!(ids(storage.data(), "feed"), ["b", "a"]);
    assert_eq!(ids(storage.data(), "other"), ["a", "b"]);
    // A comparator on a path that is not a key array is ignored.
    storage
        .set_comparator(Some(Comparator::by_field("rank")), Some(KeyPath::from("missing.path")))
        .unwrap();
    storage.head().validate_invariants().unwrap();
}

#[test]
fn installing_a_comparator_resorts_existing_entries() {
    let mut storage = storage();
    storage
        .insert("feed", ranked(&[("a", 3), ("b", 1), ("c", 3), ("d", 2)]), InsertOptions::at(1))
        .unwrap();
    storage
        .set_comparator(Some(Comparator::by_field("rank")), Some(KeyPath::from("feed")))
        .unwrap();
    assert_eq!(ids(storage.data(), "feed"), ["b", "d", "a", "c"]);
    assert_eq!(storage.value_at("feed.d.rank"), Some(json!(2)));
}

#[test]
fn removing_the_comparator_keeps_order_and_appends() {
    let mut storage = storage();
    let path = KeyPath::from("feed");
    storage
        .set_comparator(Some(Comparator::by_field("rank")), Some(path.clone()))
        .unwrap();
    storage
        .insert("feed", ranked(&[("a", 3), ("b", 1)]), InsertOptions::at(1))
        .unwrap();
    storage.set_comparator(None, Some(path)).unwrap();
    storage
        .insert("feed.c", json!({ "id": "c", "rank": 0 }), InsertOptions::at(2))
        .unwrap();
    assert_eq!(ids(storage.data(), "feed"), ["b", "a", "c"]);
    assert!(storage.get("feed").unwrap().as_key_array().unwrap().comparator().is_none());
}

#[test]
fn nested_edits_move_entries_to_their_sorted_place() {
    let mut storage = storage();
    storage
        .set_comparator(Some(Comparator::by_field("rank")), Some(KeyPath::from("feed")))
        .unwrap();
    storage
        .insert("feed", ranked(&[("a", 1), ("b", 2), ("c", 3)]), InsertOptions::at(1))
        .unwrap();
    storage
        .update("feed.a.rank", json!(10), UpdateOptions::at(2))
        .unwrap();
    assert_eq!(ids(storage.data(), "feed"), ["b", "c", "a"]);
    storage.head().validate_invariants().unwrap();
}

#[test]
fn if_contains_inserts_before_the_target() {
    let mut storage = storage();
    storage
        .insert("feed", ranked(&[("a", 0), ("b", 0)]), InsertOptions::at(1))
        .unwrap();
    storage
        .insert(
            "feed.x",
            json!({ "id": "x", "rank": 0 }),
            InsertOptions::at(2).with_if_contains("b"),
        )
        .unwrap();
    assert_eq!(ids(storage.data(), "feed"), ["a", "x", "b"]);
}

#[test]
fn value_field_stores_only_values() {
    let mut storage = storage();
    let scores = key_array_payload(vec![json!({ "id": "a", "v": 1 })], "id", Some("v"));
    storage.insert("scores", scores, InsertOptions::at(1)).unwrap();
    storage.insert("scores.b", json!(2), InsertOptions::at(2)).unwrap();
    assert_eq!(storage.value_at("scores"), Some(json!([1, 2])));
    assert_eq!(storage.value_at("scores.b"), Some(json!(2)));
}

#[test]
fn delete_reindexes_trailing_entries() {
    let mut storage = storage();
    storage
        .insert("feed", ranked(&[("a", 1), ("b", 2), ("c", 3)]), InsertOptions::at(1))
        .unwrap();
    assert!(storage.delete("feed.a", DeleteOptions::at(2)).unwrap());
    assert_eq!(storage.value_at("feed.c.rank"), Some(json!(3)));
    let list = storage.get("feed").unwrap().as_key_array().unwrap();
    assert_eq!(list.position("c"), Some(1));
    storage.head().validate_invariants().unwrap();
}

#[test]
fn malformed_payload_is_an_error_and_changes_nothing() {
    let mut storage = storage();
    let bad = json!({ "__keyArray": true, "items": 5, "keyField": "id" });
    let result = storage.insert("feed", bad, InsertOptions::at(1));
    assert!(matches!(result, Err(Error::InvalidPayload(_))));
    assert_eq!(storage.data(), None);
    storage.head().validate_invariants().unwrap();
}

#[test]
fn malformed_payload_below_new_objects_leaves_no_intermediates() {
    let mut storage = storage();
    storage.insert("a", json!(1), InsertOptions::at(1)).unwrap();
    let bad = json!({ "__keyArray": true, "items": 5, "keyField": "id" });
    let result = storage.insert("x.y.z", bad, InsertOptions::at(2));
    assert!(matches!(result, Err(Error::InvalidPayload(_))));
    assert_eq!(storage.data(), Some(&json!({ "a": 1 })));
    assert!(storage.get("x").is_none());
    storage.head().validate_invariants().unwrap();
}
