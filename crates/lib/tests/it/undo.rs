//! History capture, grouping, and filters.

use std::collections::HashSet;
use std::rc::Rc;

use serde_json::json;
use ymirror::{ChangeKind, OriginKind, UndoOptions, Value};

use crate::helpers::{sync_one_way, test_bridge, test_bridge_with_clock, test_pair};

#[test]
fn undo_and_redo_a_single_edit() {
    let b = test_bridge();
    b.enable_undo(UndoOptions::default());

    b.set("title", "draft").unwrap();
    assert!(b.can_undo());

    assert!(b.undo().unwrap());
    assert_eq!(b.get("title").unwrap(), None);
    assert!(!b.can_undo());
    assert!(b.can_redo());

    assert!(b.redo().unwrap());
    assert_eq!(b.get("title").unwrap(), Some(Value::from("draft")));
}

#[test]
fn undo_restores_overwritten_values() {
    let b = test_bridge();
    b.set("n", 1i64).unwrap();
    b.enable_undo(UndoOptions::default());

    b.set("n", 2i64).unwrap();
    assert!(b.undo().unwrap());
    assert_eq!(b.get("n").unwrap(), Some(Value::Int(1)));
}

#[test]
fn edits_within_the_capture_window_undo_together() {
    let (b, clock) = test_bridge_with_clock();
    b.enable_undo(UndoOptions {
        capture_timeout_ms: 500,
        ..Default::default()
    });

    b.set("a", 1i64).unwrap();
    clock.advance(100);
    b.set("b", 2i64).unwrap();

    assert!(b.undo().unwrap());
    assert_eq!(b.get("a").unwrap(), None);
    assert_eq!(b.get("b").unwrap(), None);
    assert!(!b.can_undo());
}

#[test]
fn edits_outside_the_capture_window_undo_separately() {
    let (b, clock) = test_bridge_with_clock();
    b.enable_undo(UndoOptions {
        capture_timeout_ms: 500,
        ..Default::default()
    });

    b.set("a", 1i64).unwrap();
    clock.advance(1000);
    b.set("b", 2i64).unwrap();

    assert!(b.undo().unwrap());
    assert_eq!(b.get("a").unwrap(), Some(Value::Int(1)));
    assert_eq!(b.get("b").unwrap(), None);

    assert!(b.undo().unwrap());
    assert_eq!(b.get("a").unwrap(), None);
}

#[test]
fn a_new_edit_clears_the_redo_stack() {
    let (b, clock) = test_bridge_with_clock();
    b.enable_undo(UndoOptions::default());

    b.set("n", 1i64).unwrap();
    b.undo().unwrap();
    assert!(b.can_redo());

    clock.advance(1000);
    b.set("m", 2i64).unwrap();
    assert!(!b.can_redo());
    assert!(!b.redo().unwrap());
}

#[test]
fn remote_edits_are_not_captured_by_default() {
    let (a, b) = test_pair();
    b.enable_undo(UndoOptions::default());

    a.set("remote", 1i64).unwrap();
    sync_one_way(&a, &b);

    assert!(!b.can_undo());
}

#[test]
fn tracked_origins_can_opt_into_remote_capture() {
    let (a, b) = test_pair();
    b.enable_undo(UndoOptions {
        tracked_origins: HashSet::from([OriginKind::Local, OriginKind::Remote]),
        ..Default::default()
    });

    a.set("remote", 1i64).unwrap();
    sync_one_way(&a, &b);

    assert!(b.can_undo());
    assert!(b.undo().unwrap());
    assert_eq!(b.get("remote").unwrap(), None);
}

#[test]
fn capture_filter_excludes_records() {
    let b = test_bridge();
    b.set("precious", 1i64).unwrap();
    b.enable_undo(UndoOptions {
        filter: Some(Rc::new(|rec| !matches!(rec.kind, ChangeKind::Delete))),
        ..Default::default()
    });

    b.delete("precious").unwrap();
    // The delete was filtered out of the history entirely.
    assert!(!b.can_undo());
    assert_eq!(b.get("precious").unwrap(), None);
}

#[test]
fn undo_spans_container_creation() {
    let (b, clock) = test_bridge_with_clock();
    b.enable_undo(UndoOptions::default());

    b.set("board", json!({"lists": [{"title": "inbox"}]})).unwrap();
    clock.advance(1000);
    b.push("board.lists", json!({"title": "later"})).unwrap();

    assert!(b.undo().unwrap());
    assert_eq!(b.len("board.lists").unwrap(), Some(1));

    assert!(b.undo().unwrap());
    assert_eq!(b.get("board").unwrap(), None);

    assert!(b.redo().unwrap());
    assert_eq!(
        b.get("board.lists.0.title").unwrap(),
        Some(Value::from("inbox"))
    );
}

#[test]
fn undone_state_syncs_to_other_replicas() {
    let (a, b) = test_pair();
    a.enable_undo(UndoOptions::default());

    a.set("n", 1i64).unwrap();
    sync_one_way(&a, &b);
    assert_eq!(b.get("n").unwrap(), Some(Value::Int(1)));

    a.undo().unwrap();
    sync_one_way(&a, &b);
    assert_eq!(b.get("n").unwrap(), None);
}

#[test]
fn undo_with_nothing_captured_reports_false() {
    let b = test_bridge();
    b.enable_undo(UndoOptions::default());
    assert!(!b.undo().unwrap());
    assert!(!b.redo().unwrap());
}

#[test]
fn disable_undo_discards_history() {
    let b = test_bridge();
    b.enable_undo(UndoOptions::default());
    b.set("n", 1i64).unwrap();
    b.disable_undo();
    assert!(!b.can_undo());
    assert!(!b.undo().unwrap());
}
