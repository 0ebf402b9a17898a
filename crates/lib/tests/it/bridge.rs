//! Reads, writes, nested expansion, and explicit transactions.

use serde_json::json;
use ymirror::{Bridge, Value};
use ymirror::y_crdt::Doc;

use crate::helpers::test_bridge;

#[test]
fn primitives_round_trip() {
    let b = test_bridge();
    b.set("title", "hello").unwrap();
    b.set("count", 3i64).unwrap();
    b.set("ratio", 0.5f64).unwrap();
    b.set("done", true).unwrap();
    b.set("nothing", Value::Null).unwrap();

    assert_eq!(b.get("title").unwrap(), Some(Value::from("hello")));
    assert_eq!(b.get("count").unwrap(), Some(Value::Int(3)));
    assert_eq!(b.get("ratio").unwrap(), Some(Value::Float(0.5)));
    assert_eq!(b.get("done").unwrap(), Some(Value::Bool(true)));
    assert_eq!(b.get("nothing").unwrap(), Some(Value::Null));
    assert_eq!(b.get("absent").unwrap(), None);
}

#[test]
fn nested_structures_expand_into_containers() {
    let b = test_bridge();
    b.set(
        "user",
        json!({"name": "ada", "tags": ["admin", "dev"], "prefs": {"dark": true}}),
    )
    .unwrap();

    assert_eq!(b.get("user.name").unwrap(), Some(Value::from("ada")));
    assert_eq!(b.get("user.tags.1").unwrap(), Some(Value::from("dev")));
    assert_eq!(b.get("user.prefs.dark").unwrap(), Some(Value::Bool(true)));
    assert_eq!(b.len("user.tags").unwrap(), Some(2));
}

#[test]
fn snapshot_matches_written_tree() {
    let b = test_bridge();
    let tree = json!({"a": 1, "b": {"c": [true, "x"]}});
    b.set("a", 1i64).unwrap();
    b.set("b", json!({"c": [true, "x"]})).unwrap();
    assert_eq!(b.snapshot(), Value::from(tree));
}

#[test]
fn document_materialization_matches_the_mirror() {
    let b = test_bridge();
    b.set(
        "user",
        json!({"name": "ada", "tags": ["admin", "dev"], "prefs": {"dark": true}}),
    )
    .unwrap();
    b.set("note", Value::Text("héllo".to_string())).unwrap();
    b.set("count", 3i64).unwrap();

    // The document read back through the adapter agrees with the mirror.
    assert_eq!(b.materialize(), b.snapshot());
}

#[test]
fn text_values_are_editable_and_measured_in_chars() {
    let b = test_bridge();
    b.set("note", Value::Text("héllo".to_string())).unwrap();
    assert_eq!(b.len("note").unwrap(), Some(5));

    b.set("note", Value::Text("héllo there".to_string())).unwrap();
    assert_eq!(
        b.get("note").unwrap(),
        Some(Value::Text("héllo there".to_string()))
    );
}

#[test]
fn container_kind_is_binding() {
    let b = test_bridge();
    b.set("todos", json!([1, 2])).unwrap();
    let err = b.set("todos", json!({"not": "an array"})).unwrap_err();
    assert!(err.is_type_mismatch());
    // The failed write left nothing behind.
    assert_eq!(b.len("todos").unwrap(), Some(2));
}

#[test]
fn primitive_overwrite_of_container_is_allowed() {
    let b = test_bridge();
    b.set("slot", json!({"a": 1})).unwrap();
    b.set("slot", 7i64).unwrap();
    assert_eq!(b.get("slot").unwrap(), Some(Value::Int(7)));
}

#[test]
fn map_overwrite_merges_key_wise() {
    let b = test_bridge();
    b.set("cfg", json!({"keep": 1, "drop": 2})).unwrap();
    b.set("cfg", json!({"keep": 1, "new": 3})).unwrap();
    assert_eq!(b.get("cfg.keep").unwrap(), Some(Value::Int(1)));
    assert_eq!(b.get("cfg.drop").unwrap(), None);
    assert_eq!(b.get("cfg.new").unwrap(), Some(Value::Int(3)));
}

#[test]
fn array_insert_past_end_is_rejected() {
    let b = test_bridge();
    b.set("items", json!([1])).unwrap();
    let err = b.insert("items.5", 9i64).unwrap_err();
    assert!(err.is_unsupported_operation());
}

#[test]
fn writes_into_missing_parents_are_rejected() {
    let b = test_bridge();
    let err = b.set("missing.key", 1i64).unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn explicit_transaction_commits_atomically() {
    let doc = Doc::new();
    let writer = Bridge::attach(doc.clone(), "root");

    writer.begin();
    writer.set("a", 1i64).unwrap();
    writer.set("b", 2i64).unwrap();
    // Another consumer of the same document sees nothing until commit.
    {
        let reader = Bridge::attach(doc.clone(), "root");
        assert_eq!(reader.get("a").unwrap(), None);
    }
    writer.commit().unwrap();

    let reader = Bridge::attach(doc, "root");
    assert_eq!(reader.get("a").unwrap(), Some(Value::Int(1)));
    assert_eq!(reader.get("b").unwrap(), Some(Value::Int(2)));
}

#[test]
fn rollback_reverts_the_mirror_and_spares_the_document() {
    let b = test_bridge();
    b.set("keep", 1i64).unwrap();

    b.begin();
    b.set("keep", 99i64).unwrap();
    b.set("tmp", 2i64).unwrap();
    assert!(b.rollback());

    assert_eq!(b.get("keep").unwrap(), Some(Value::Int(1)));
    assert_eq!(b.get("tmp").unwrap(), None);
}

#[test]
fn transact_commits_on_success() {
    let b = test_bridge();
    let result = b
        .transact(|b| {
            b.set("x", 1i64)?;
            b.set("y", 2i64)?;
            Ok("done")
        })
        .unwrap();
    assert_eq!(result, "done");
    assert_eq!(b.get("y").unwrap(), Some(Value::Int(2)));
}

#[test]
fn failed_mutation_aborts_the_enclosing_batch_atomically() {
    let b = test_bridge();
    b.set("items", json!([1])).unwrap();
    let err = b
        .transact(|b| {
            b.set("items.0", 5i64)?;
            b.insert("items.9", 9i64)?;
            Ok(())
        })
        .unwrap_err();
    assert!(err.is_unsupported_operation());
    assert_eq!(b.get("items.0").unwrap(), Some(Value::Int(1)));
}
