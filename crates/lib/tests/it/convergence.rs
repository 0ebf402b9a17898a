//! Update exchange between replicas.

use serde_json::json;
use ymirror::Value;

use crate::helpers::{sync_both_ways, sync_one_way, test_pair};

#[test]
fn concurrent_map_inserts_on_different_keys_converge() {
    let (a, b) = test_pair();
    a.set("from_a", 1i64).unwrap();
    b.set("from_b", 2i64).unwrap();

    sync_both_ways(&a, &b);

    assert_eq!(a.get("from_a").unwrap(), Some(Value::Int(1)));
    assert_eq!(a.get("from_b").unwrap(), Some(Value::Int(2)));
    assert_eq!(a.snapshot(), b.snapshot());
}

#[test]
fn conflicting_writes_to_the_same_key_converge() {
    let (a, b) = test_pair();
    a.set("winner", "a").unwrap();
    b.set("winner", "b").unwrap();

    sync_both_ways(&a, &b);
    // One replica wins; both agree on which.
    assert_eq!(a.get("winner").unwrap(), b.get("winner").unwrap());
    assert_eq!(a.snapshot(), b.snapshot());
}

#[test]
fn remote_nested_containers_are_readable_through_paths() {
    let (a, b) = test_pair();
    a.set("board", json!({"lists": [{"title": "inbox", "cards": []}]}))
        .unwrap();

    sync_one_way(&a, &b);

    assert_eq!(b.get("board.lists.0.title").unwrap(), Some(Value::from("inbox")));
    b.push("board.lists.0.cards", json!({"text": "hi"})).unwrap();
    sync_one_way(&b, &a);
    assert_eq!(
        a.get("board.lists.0.cards.0.text").unwrap(),
        Some(Value::from("hi"))
    );
}

#[test]
fn reapplied_updates_do_not_double_apply() {
    let (a, b) = test_pair();
    a.set("items", json!([1, 2])).unwrap();

    let full = a.encode_update(None).unwrap();
    b.apply_update(&full).unwrap();
    b.apply_update(&full).unwrap();

    assert_eq!(b.len("items").unwrap(), Some(2));
    assert_eq!(a.snapshot(), b.snapshot());
}

#[test]
fn out_of_order_updates_converge() {
    let (a, b) = test_pair();
    let base = a.state_vector();
    a.set("first", 1i64).unwrap();
    let mid = a.state_vector();
    let delta1 = a.encode_update(Some(&base)).unwrap();
    a.set("second", 2i64).unwrap();
    let delta2 = a.encode_update(Some(&mid)).unwrap();

    // The engine holds the later delta pending until its dependency lands.
    b.apply_update(&delta2).unwrap();
    b.apply_update(&delta1).unwrap();

    assert_eq!(b.get("first").unwrap(), Some(Value::Int(1)));
    assert_eq!(b.get("second").unwrap(), Some(Value::Int(2)));
    assert_eq!(a.snapshot(), b.snapshot());
}

#[test]
fn concurrent_array_pushes_converge_without_loss() {
    let (a, b) = test_pair();
    a.set("log", json!([])).unwrap();
    sync_one_way(&a, &b);

    a.push("log", "from a").unwrap();
    b.push("log", "from b").unwrap();
    sync_both_ways(&a, &b);

    assert_eq!(a.len("log").unwrap(), Some(2));
    assert_eq!(a.snapshot(), b.snapshot());
}

#[test]
fn text_edits_from_both_sides_converge() {
    let (a, b) = test_pair();
    a.set("note", Value::Text("hello world".to_string())).unwrap();
    sync_one_way(&a, &b);

    a.set("note", Value::Text("hello brave world".to_string()))
        .unwrap();
    b.set("note", Value::Text("hello world!".to_string())).unwrap();
    sync_both_ways(&a, &b);

    assert_eq!(a.get("note").unwrap(), b.get("note").unwrap());
    assert_eq!(
        a.get("note").unwrap(),
        Some(Value::Text("hello brave world!".to_string()))
    );
}
