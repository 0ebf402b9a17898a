//! Array moves and element identity.

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::json;
use ymirror::{ChangeKind, OriginKind, Value};

use crate::helpers::{sync_both_ways, sync_one_way, test_bridge, test_pair};

fn todo_titles(b: &ymirror::Bridge) -> Vec<Value> {
    let Some(Value::Array(items)) = b.get("todos").unwrap() else {
        panic!("todos is an array");
    };
    items
        .into_iter()
        .map(|item| {
            let Value::Map(entry) = item else {
                panic!("todo is a map");
            };
            entry["title"].clone()
        })
        .collect()
}

#[test]
fn move_reorders_locally() {
    let b = test_bridge();
    b.set(
        "todos",
        json!([{"title": "one"}, {"title": "two"}, {"title": "three"}]),
    )
    .unwrap();

    b.move_entry("todos.2", 0).unwrap();
    assert_eq!(
        todo_titles(&b),
        vec![Value::from("three"), Value::from("one"), Value::from("two")]
    );
}

#[test]
fn move_to_the_end_works() {
    let b = test_bridge();
    b.set("todos", json!([{"title": "a"}, {"title": "b"}, {"title": "c"}]))
        .unwrap();
    b.move_entry("todos.0", 2).unwrap();
    assert_eq!(
        todo_titles(&b),
        vec![Value::from("b"), Value::from("c"), Value::from("a")]
    );
}

#[test]
fn move_out_of_bounds_is_rejected() {
    let b = test_bridge();
    b.set("todos", json!([1, 2])).unwrap();
    assert!(b.move_entry("todos.5", 0).unwrap_err().is_unsupported_operation());
    assert!(b.move_entry("todos.0", 5).unwrap_err().is_unsupported_operation());
}

#[test]
fn remote_move_is_one_delete_and_one_insert() {
    let (a, b) = test_pair();
    a.set(
        "todos",
        json!([{"title": "one"}, {"title": "two"}, {"title": "three"}]),
    )
    .unwrap();
    sync_one_way(&a, &b);

    let batches = Rc::new(RefCell::new(Vec::new()));
    let sink = batches.clone();
    let _guard = b.observe_changes(move |batch| sink.borrow_mut().push(batch.clone()));

    a.move_entry("todos.2", 0).unwrap();
    sync_one_way(&a, &b);

    assert_eq!(
        todo_titles(&b),
        vec![Value::from("three"), Value::from("one"), Value::from("two")]
    );

    let batches = batches.borrow();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].origin, OriginKind::Remote);
    let inserts = batches[0]
        .records
        .iter()
        .filter(|r| matches!(r.kind, ChangeKind::Insert { .. }))
        .count();
    let deletes = batches[0]
        .records
        .iter()
        .filter(|r| matches!(r.kind, ChangeKind::Delete))
        .count();
    assert_eq!((inserts, deletes), (1, 1));
}

#[test]
fn moved_elements_stay_editable_across_replicas() {
    let (a, b) = test_pair();
    a.set("todos", json!([{"title": "x", "done": false}, {"title": "y", "done": false}]))
        .unwrap();
    sync_one_way(&a, &b);

    a.move_entry("todos.1", 0).unwrap();
    sync_one_way(&a, &b);

    b.set("todos.0.done", true).unwrap();
    sync_one_way(&b, &a);

    assert_eq!(a.get("todos.0.title").unwrap(), Some(Value::from("y")));
    assert_eq!(a.get("todos.0.done").unwrap(), Some(Value::Bool(true)));
}

#[test]
fn remote_edits_to_moved_elements_land_on_the_moved_node() {
    let (a, b) = test_pair();
    a.set(
        "todos",
        json!([{"title": "x", "done": false}, {"title": "y", "done": false}]),
    )
    .unwrap();
    sync_one_way(&a, &b);

    a.move_entry("todos.1", 0).unwrap();
    sync_one_way(&a, &b);

    let batches = Rc::new(RefCell::new(Vec::new()));
    let sink = batches.clone();
    let _guard = a.observe_changes(move |batch| sink.borrow_mut().push(batch.clone()));

    // The peer marks the moved element done; the edit must not bleed into
    // the element now occupying its old index.
    b.set("todos.0.done", true).unwrap();
    sync_one_way(&b, &a);

    assert_eq!(a.get("todos.0.done").unwrap(), Some(Value::Bool(true)));
    assert_eq!(a.get("todos.0.title").unwrap(), Some(Value::from("y")));
    assert_eq!(a.get("todos.1.done").unwrap(), Some(Value::Bool(false)));
    assert_eq!(a.snapshot(), a.materialize());

    // The reported record addresses the element's current position.
    let batches = batches.borrow();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].records.len(), 1);
    assert_eq!(batches[0].records[0].path.to_string(), "todos.0.done");
}

#[test]
fn concurrent_moves_of_the_same_element_converge() {
    let (a, b) = test_pair();
    a.set("todos", json!([{"title": "a"}, {"title": "b"}, {"title": "c"}]))
        .unwrap();
    sync_both_ways(&a, &b);

    a.move_entry("todos.0", 2).unwrap();
    b.move_entry("todos.0", 1).unwrap();
    sync_both_ways(&a, &b);

    assert_eq!(a.snapshot(), b.snapshot());
    // The element moved once, never duplicated or lost.
    assert_eq!(a.len("todos").unwrap(), Some(3));
}
