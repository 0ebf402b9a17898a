//! Idempotent seeding of the root container.

use serde_json::json;
use ymirror::Value;

use crate::helpers::{sync_both_ways, sync_one_way, test_bridge, test_pair};

fn seed() -> serde_json::Value {
    json!({"todos": [], "title": "inbox"})
}

#[test]
fn bootstrap_seeds_an_empty_root() {
    let b = test_bridge();
    assert!(b.bootstrap(seed()).unwrap());
    assert_eq!(b.get("title").unwrap(), Some(Value::from("inbox")));
    assert_eq!(b.len("todos").unwrap(), Some(0));
}

#[test]
fn repeated_bootstrap_is_a_no_op() {
    let b = test_bridge();
    assert!(b.bootstrap(seed()).unwrap());
    b.push("todos", json!({"title": "keep me"})).unwrap();

    assert!(!b.bootstrap(seed()).unwrap());
    assert_eq!(b.len("todos").unwrap(), Some(1));
}

#[test]
fn bootstrap_against_synced_content_is_a_no_op() {
    let (a, b) = test_pair();
    assert!(a.bootstrap(seed()).unwrap());
    a.push("todos", json!({"title": "from a"})).unwrap();
    sync_one_way(&a, &b);

    // The replica arrives late; its seed must not clobber existing state.
    assert!(!b.bootstrap(seed()).unwrap());
    assert_eq!(b.len("todos").unwrap(), Some(1));
    assert_eq!(a.snapshot(), b.snapshot());
}

#[test]
fn racing_bootstraps_converge_to_one_seed() {
    let (a, b) = test_pair();
    assert!(a.bootstrap(seed()).unwrap());
    assert!(b.bootstrap(seed()).unwrap());

    sync_both_ways(&a, &b);

    assert_eq!(a.snapshot(), b.snapshot());
    // One seed wins per key; nothing is doubled.
    assert_eq!(a.len("").unwrap(), Some(2));
    assert_eq!(a.len("todos").unwrap(), Some(0));
}

#[test]
fn non_map_seed_is_rejected() {
    let b = test_bridge();
    assert!(b.bootstrap(json!([1, 2])).unwrap_err().is_type_mismatch());
}
