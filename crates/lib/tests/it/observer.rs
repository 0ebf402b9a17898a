//! Change batches, origins, and echo suppression.

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::json;
use ymirror::y_crdt::{Map, Transact};
use ymirror::{ChangeBatch, ChangeKind, OriginKind, Value};

use crate::helpers::{sync_one_way, test_bridge, test_pair};

fn collecting(b: &ymirror::Bridge) -> (Rc<RefCell<Vec<ChangeBatch>>>, ymirror::ChangeSubscription) {
    let batches = Rc::new(RefCell::new(Vec::new()));
    let sink = batches.clone();
    let guard = b.observe_changes(move |batch| sink.borrow_mut().push(batch.clone()));
    (batches, guard)
}

#[test]
fn local_commits_are_reported_once_with_local_origin() {
    let b = test_bridge();
    let (batches, _guard) = collecting(&b);

    b.set("n", 7i64).unwrap();

    let batches = batches.borrow();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].origin, OriginKind::Local);
    assert!(batches[0].own);
    assert_eq!(batches[0].records.len(), 1);
    assert!(matches!(
        &batches[0].records[0].kind,
        ChangeKind::Insert { value } if *value == Value::Int(7)
    ));
}

#[test]
fn batched_mutations_arrive_as_one_batch() {
    let b = test_bridge();
    let (batches, _guard) = collecting(&b);

    b.transact(|b| {
        b.set("a", 1i64)?;
        b.set("b", 2i64)?;
        Ok(())
    })
    .unwrap();

    let batches = batches.borrow();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].records.len(), 2);
}

#[test]
fn rolled_back_batches_are_never_reported() {
    let b = test_bridge();
    let (batches, _guard) = collecting(&b);

    b.begin();
    b.set("tmp", 1i64).unwrap();
    b.rollback();

    assert!(batches.borrow().is_empty());
}

#[test]
fn remote_updates_are_reported_with_remote_origin() {
    let (a, b) = test_pair();
    let (batches, _guard) = collecting(&b);

    a.set("greeting", "hi").unwrap();
    sync_one_way(&a, &b);

    let batches = batches.borrow();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].origin, OriginKind::Remote);
}

#[test]
fn untagged_document_writes_replay_as_remote() {
    let b = test_bridge();
    let (batches, _guard) = collecting(&b);

    // Another consumer writing to the same document, outside the bridge.
    let root = b.doc().get_or_insert_map("root");
    {
        let mut txn = b.doc().transact_mut();
        root.insert(&mut txn, "outside", 42i64);
    }

    // Raw engine writes coerce safe-range integers to doubles.
    assert_eq!(b.get("outside").unwrap(), Some(Value::Float(42.0)));
    let batches = batches.borrow();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].origin, OriginKind::Remote);
    assert!(!batches[0].own);
}

#[test]
fn remote_container_inserts_are_materialized_in_records() {
    let (a, b) = test_pair();
    let (batches, _guard) = collecting(&b);

    a.set("cfg", json!({"depth": 2})).unwrap();
    sync_one_way(&a, &b);

    let batches = batches.borrow();
    assert_eq!(batches.len(), 1);
    let ChangeKind::Insert { value } = &batches[0].records[0].kind else {
        panic!("expected an insert record");
    };
    assert_eq!(*value, Value::from(json!({"depth": 2})));
}

#[test]
fn bootstrap_batches_carry_the_bootstrap_origin() {
    let b = test_bridge();
    let (batches, _guard) = collecting(&b);

    b.bootstrap(json!({"todos": []})).unwrap();

    let batches = batches.borrow();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].origin, OriginKind::Bootstrap);
}

#[test]
fn undo_batches_carry_the_undo_origin() {
    let b = test_bridge();
    b.enable_undo(Default::default());
    b.set("n", 1i64).unwrap();

    let (batches, _guard) = collecting(&b);
    assert!(b.undo().unwrap());

    let batches = batches.borrow();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].origin, OriginKind::Undo);
}

#[test]
fn update_observers_receive_encoded_updates() {
    let b = test_bridge();
    let count = std::sync::Arc::new(std::sync::Mutex::new(0usize));
    let sink = count.clone();
    let _sub = b
        .observe_updates(move |update| {
            assert!(!update.is_empty());
            *sink.lock().unwrap() += 1;
        })
        .unwrap();

    b.set("a", 1i64).unwrap();
    b.set("b", 2i64).unwrap();
    assert_eq!(*count.lock().unwrap(), 2);
}
