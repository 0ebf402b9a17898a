//! The CRDT adapter: translation between change records and native
//! container operations.
//!
//! Forward translation applies a batch of [`ChangeRecord`]s to the document
//! inside one open transaction, recursively expanding nested plain values so
//! the first write is already CRDT-native. Replacements are minimal: array
//! replacement is an index-aligned prefix/suffix diff, text replacement a
//! contiguous byte-range edit, and an array move is a single `move_to` (one
//! delete + one insert of the same item at the engine level).
//!
//! Reverse translation turns deep-event payloads back into net change
//! records, and materializes container state into plain [`Value`]s.
//!
//! Offsets assume the document's default byte offset kind.

use std::collections::BTreeMap;

use tracing::warn;
use yrs::branch::{Branch, BranchID};
use yrs::types::{Change, EntryChange, Event};
use yrs::{Array, ArrayPrelim, ArrayRef, GetString, Map, MapPrelim, MapRef, Out, ReadTxn, Text,
    TextPrelim, TextRef, TransactionMut};

use crate::change::{ChangeKind, ChangeRecord};
use crate::errors::BridgeError;
use crate::path::{Path, PathSegment};
use crate::proxy::{NodeBody, NodeRef, ProxyNode, Slot};
use crate::value::{CrdtContainer, Value};

/// A container the forward translation created, reported back so the mirror
/// node at `path` can be bound to its backing container.
#[derive(Debug)]
pub(crate) struct CreatedContainer {
    pub(crate) path: Path,
    pub(crate) branch: BranchID,
}

fn branch_of<T: AsRef<Branch>>(shared: &T) -> BranchID {
    shared.as_ref().id()
}

fn resolve_failure(path: &Path, reason: impl Into<String>) -> BridgeError {
    BridgeError::Engine {
        operation: format!("resolve '{path}'"),
        reason: reason.into(),
    }
}

/// Walks the document to the container at `segments`.
pub(crate) fn resolve_container(
    txn: &TransactionMut<'_>,
    root: &MapRef,
    segments: &[PathSegment],
) -> Result<CrdtContainer, BridgeError> {
    let mut current = CrdtContainer::Map(root.clone());
    let mut walked = Path::root();
    for seg in segments {
        walked.push(seg.clone());
        let out = match (&current, seg) {
            (CrdtContainer::Map(map), PathSegment::Key(k)) => map.get(txn, k),
            (CrdtContainer::Array(arr), PathSegment::Index(i)) => arr.get(txn, *i as u32),
            _ => {
                return Err(resolve_failure(
                    &walked,
                    format!("cannot descend into {} with this segment", current.kind_name()),
                ));
            }
        };
        current = match out {
            Some(Out::YMap(m)) => CrdtContainer::Map(m),
            Some(Out::YArray(a)) => CrdtContainer::Array(a),
            Some(Out::YText(t)) => CrdtContainer::Text(t),
            Some(other) => {
                return Err(resolve_failure(
                    &walked,
                    format!("expected a container, found {other:?}"),
                ));
            }
            None => return Err(resolve_failure(&walked, "nothing at this path")),
        };
    }
    Ok(current)
}

/// Applies a batch of pre-validated records to the document.
///
/// Returns the containers created along the way. Errors here indicate the
/// mirror and document have diverged; the coordinator reports them as a
/// transaction abort.
pub(crate) fn apply_records(
    txn: &mut TransactionMut<'_>,
    root: &MapRef,
    records: &[ChangeRecord],
) -> Result<Vec<CreatedContainer>, BridgeError> {
    let mut created = Vec::new();
    for rec in records {
        apply_record(txn, root, rec, &mut created)?;
    }
    Ok(created)
}

fn apply_record(
    txn: &mut TransactionMut<'_>,
    root: &MapRef,
    rec: &ChangeRecord,
    created: &mut Vec<CreatedContainer>,
) -> Result<(), BridgeError> {
    let (parent_segs, last) = rec
        .path
        .split_last()
        .ok_or_else(|| resolve_failure(&rec.path, "records never address the root"))?;
    let parent = resolve_container(txn, root, parent_segs)?;

    match (&rec.kind, &parent, last) {
        (ChangeKind::Insert { value }, CrdtContainer::Map(map), PathSegment::Key(k)) => {
            write_map_entry(txn, map, k, value, &rec.path, created)
        }
        (ChangeKind::Insert { value }, CrdtContainer::Array(arr), PathSegment::Index(i)) => {
            let len = arr.len(txn) as usize;
            if *i > len {
                return Err(resolve_failure(&rec.path, "insert index out of bounds"));
            }
            write_array_entry(txn, arr, *i as u32, value, &rec.path, created)
        }
        (ChangeKind::Update { value }, CrdtContainer::Map(map), PathSegment::Key(k)) => {
            match (map.get(txn, k), value) {
                (Some(Out::YMap(nested)), Value::Map(entries)) => {
                    merge_map_container(txn, &nested, entries, &rec.path, created)
                }
                (Some(Out::YArray(nested)), Value::Array(items)) => {
                    replace_array(txn, &nested, items, &rec.path, created)
                }
                (Some(Out::YText(nested)), Value::Text(content)) => {
                    replace_text(txn, &nested, content);
                    Ok(())
                }
                _ => write_map_entry(txn, map, k, value, &rec.path, created),
            }
        }
        (ChangeKind::Update { value }, CrdtContainer::Array(arr), PathSegment::Index(i)) => {
            let len = arr.len(txn) as usize;
            if *i >= len {
                return Err(resolve_failure(&rec.path, "update index out of bounds"));
            }
            match (arr.get(txn, *i as u32), value) {
                (Some(Out::YMap(nested)), Value::Map(entries)) => {
                    merge_map_container(txn, &nested, entries, &rec.path, created)
                }
                (Some(Out::YArray(nested)), Value::Array(items)) => {
                    replace_array(txn, &nested, items, &rec.path, created)
                }
                (Some(Out::YText(nested)), Value::Text(content)) => {
                    replace_text(txn, &nested, content);
                    Ok(())
                }
                _ => {
                    arr.remove(txn, *i as u32);
                    write_array_entry(txn, arr, *i as u32, value, &rec.path, created)
                }
            }
        }
        (ChangeKind::Delete, CrdtContainer::Map(map), PathSegment::Key(k)) => {
            map.remove(txn, k);
            Ok(())
        }
        (ChangeKind::Delete, CrdtContainer::Array(arr), PathSegment::Index(i)) => {
            let len = arr.len(txn) as usize;
            if *i >= len {
                return Err(resolve_failure(&rec.path, "delete index out of bounds"));
            }
            arr.remove(txn, *i as u32);
            Ok(())
        }
        (ChangeKind::Move { to }, CrdtContainer::Array(arr), PathSegment::Index(from)) => {
            let len = arr.len(txn) as usize;
            if *from >= len || *to >= len {
                return Err(resolve_failure(&rec.path, "move index out of bounds"));
            }
            // yrs interprets the target relative to the array before the
            // removal; translate from remove-then-insert semantics.
            let target = if *to > *from { *to + 1 } else { *to };
            arr.move_to(txn, *from as u32, target as u32);
            Ok(())
        }
        _ => Err(resolve_failure(
            &rec.path,
            format!(
                "{} does not apply to a {} container here",
                rec.kind_name(),
                parent.kind_name()
            ),
        )),
    }
}

/// Writes one map entry, expanding nested plain values into new containers.
fn write_map_entry(
    txn: &mut TransactionMut<'_>,
    map: &MapRef,
    key: &str,
    value: &Value,
    path: &Path,
    created: &mut Vec<CreatedContainer>,
) -> Result<(), BridgeError> {
    match value {
        Value::Map(entries) => {
            let nested: MapRef = map.insert(txn, key, MapPrelim::default());
            created.push(CreatedContainer {
                path: path.clone(),
                branch: branch_of(&nested),
            });
            for (k, v) in entries {
                write_map_entry(txn, &nested, k, v, &path.child(k.as_str()), created)?;
            }
            Ok(())
        }
        Value::Array(items) => {
            let nested: ArrayRef = map.insert(txn, key, ArrayPrelim::default());
            created.push(CreatedContainer {
                path: path.clone(),
                branch: branch_of(&nested),
            });
            for (i, v) in items.iter().enumerate() {
                write_array_entry(txn, &nested, i as u32, v, &path.child(i), created)?;
            }
            Ok(())
        }
        Value::Text(content) => {
            let nested: TextRef = map.insert(txn, key, TextPrelim::new(content.clone()));
            created.push(CreatedContainer {
                path: path.clone(),
                branch: branch_of(&nested),
            });
            Ok(())
        }
        Value::Container(_) => Err(BridgeError::AlreadyLinked {
            path: path.to_string(),
        }),
        primitive => {
            let any = primitive
                .to_any()
                .ok_or_else(|| resolve_failure(path, "value has no leaf form"))?;
            map.insert(txn, key, any);
            Ok(())
        }
    }
}

/// Inserts one array element at `index`, expanding nested plain values.
fn write_array_entry(
    txn: &mut TransactionMut<'_>,
    arr: &ArrayRef,
    index: u32,
    value: &Value,
    path: &Path,
    created: &mut Vec<CreatedContainer>,
) -> Result<(), BridgeError> {
    match value {
        Value::Map(entries) => {
            let nested: MapRef = arr.insert(txn, index, MapPrelim::default());
            created.push(CreatedContainer {
                path: path.clone(),
                branch: branch_of(&nested),
            });
            for (k, v) in entries {
                write_map_entry(txn, &nested, k, v, &path.child(k.as_str()), created)?;
            }
            Ok(())
        }
        Value::Array(items) => {
            let nested: ArrayRef = arr.insert(txn, index, ArrayPrelim::default());
            created.push(CreatedContainer {
                path: path.clone(),
                branch: branch_of(&nested),
            });
            for (i, v) in items.iter().enumerate() {
                write_array_entry(txn, &nested, i as u32, v, &path.child(i), created)?;
            }
            Ok(())
        }
        Value::Text(content) => {
            let nested: TextRef = arr.insert(txn, index, TextPrelim::new(content.clone()));
            created.push(CreatedContainer {
                path: path.clone(),
                branch: branch_of(&nested),
            });
            Ok(())
        }
        Value::Container(_) => Err(BridgeError::AlreadyLinked {
            path: path.to_string(),
        }),
        primitive => {
            let any = primitive
                .to_any()
                .ok_or_else(|| resolve_failure(path, "value has no leaf form"))?;
            arr.insert(txn, index, any);
            Ok(())
        }
    }
}

/// Key-wise merge of a plain map into an existing Map container, matching
/// the proxy layer's merge rules so mirror and document stay aligned.
fn merge_map_container(
    txn: &mut TransactionMut<'_>,
    map: &MapRef,
    entries: &BTreeMap<String, Value>,
    path: &Path,
    created: &mut Vec<CreatedContainer>,
) -> Result<(), BridgeError> {
    let stale: Vec<String> = map
        .iter(txn)
        .map(|(k, _)| k.to_string())
        .filter(|k| !entries.contains_key(k))
        .collect();
    for k in stale {
        map.remove(txn, &k);
    }
    for (k, v) in entries {
        let child_path = path.child(k.as_str());
        match (map.get(txn, k), v) {
            (Some(Out::YMap(nested)), Value::Map(nested_entries)) => {
                merge_map_container(txn, &nested, nested_entries, &child_path, created)?;
            }
            (Some(Out::YArray(nested)), Value::Array(items)) => {
                replace_array(txn, &nested, items, &child_path, created)?;
            }
            (Some(Out::YText(nested)), Value::Text(content)) => {
                replace_text(txn, &nested, content);
            }
            (existing, _) => {
                let unchanged = matches!(
                    (&existing, v.to_any()),
                    (Some(Out::Any(old)), Some(new)) if *old == new
                );
                if !unchanged {
                    write_map_entry(txn, map, k, v, &child_path, created)?;
                }
            }
        }
    }
    Ok(())
}

/// Index-aligned minimal replacement of an Array container's content.
///
/// Elements in the common prefix and suffix are left untouched, preserving
/// concurrent peer edits to them; only the changed middle window is removed
/// and re-inserted.
fn replace_array(
    txn: &mut TransactionMut<'_>,
    arr: &ArrayRef,
    items: &[Value],
    path: &Path,
    created: &mut Vec<CreatedContainer>,
) -> Result<(), BridgeError> {
    let old: Vec<Value> = {
        let outs: Vec<Out> = arr.iter(txn).collect();
        outs.into_iter().map(|out| out_to_value(txn, out)).collect()
    };
    let (prefix, old_tail, new_tail) = array_diff(&old, items);
    if old_tail > prefix {
        arr.remove_range(txn, prefix as u32, (old_tail - prefix) as u32);
    }
    for (offset, v) in items[prefix..new_tail].iter().enumerate() {
        let index = prefix + offset;
        write_array_entry(txn, arr, index as u32, v, &path.child(index), created)?;
    }
    Ok(())
}

/// Minimal contiguous replacement of a Text container's content: at most one
/// range removal and one insertion.
fn replace_text(txn: &mut TransactionMut<'_>, text: &TextRef, new: &str) {
    let old = text.get_string(txn);
    if let Some((pos, del, ins)) = text_diff(&old, new) {
        if del > 0 {
            text.remove_range(txn, pos, del);
        }
        if !ins.is_empty() {
            text.insert(txn, pos, &ins);
        }
    }
}

/// Common prefix/suffix bounds of an index-aligned array replacement.
///
/// Returns `(prefix, old_tail, new_tail)`: `old[prefix..old_tail]` is
/// replaced by `new[prefix..new_tail]`.
pub(crate) fn array_diff(old: &[Value], new: &[Value]) -> (usize, usize, usize) {
    let mut prefix = 0;
    while prefix < old.len() && prefix < new.len() && old[prefix] == new[prefix] {
        prefix += 1;
    }
    let mut suffix = 0;
    while suffix < old.len() - prefix
        && suffix < new.len() - prefix
        && old[old.len() - 1 - suffix] == new[new.len() - 1 - suffix]
    {
        suffix += 1;
    }
    (prefix, old.len() - suffix, new.len() - suffix)
}

/// Contiguous byte-range diff between two strings, at char boundaries.
///
/// Returns `(position, deleted_len, inserted_text)` in byte offsets, or
/// `None` when the strings are equal. Non-contiguous edits collapse into one
/// replacement of the whole window between the common prefix and suffix.
pub(crate) fn text_diff(old: &str, new: &str) -> Option<(u32, u32, String)> {
    if old == new {
        return None;
    }
    let mut prefix = 0;
    for (a, b) in old.chars().zip(new.chars()) {
        if a != b {
            break;
        }
        prefix += a.len_utf8();
    }
    let max_suffix = usize::min(old.len(), new.len()) - prefix;
    let mut suffix = 0;
    for (a, b) in old[prefix..].chars().rev().zip(new[prefix..].chars().rev()) {
        if a != b || suffix + a.len_utf8() > max_suffix {
            break;
        }
        suffix += a.len_utf8();
    }
    let deleted = old.len() - prefix - suffix;
    let inserted = new[prefix..new.len() - suffix].to_string();
    Some((prefix as u32, deleted as u32, inserted))
}

/// Materializes one container into a plain value.
pub(crate) fn container_value<T: ReadTxn>(txn: &T, container: &CrdtContainer) -> Value {
    match container {
        CrdtContainer::Map(map) => {
            let entries: Vec<(String, Out)> = map
                .iter(txn)
                .map(|(k, out)| (k.to_string(), out))
                .collect();
            Value::Map(
                entries
                    .into_iter()
                    .map(|(k, out)| (k, out_to_value(txn, out)))
                    .collect::<BTreeMap<_, _>>(),
            )
        }
        CrdtContainer::Array(arr) => {
            let outs: Vec<Out> = arr.iter(txn).collect();
            Value::Array(outs.into_iter().map(|out| out_to_value(txn, out)).collect())
        }
        CrdtContainer::Text(text) => Value::Text(text.get_string(txn)),
    }
}

/// Converts one read-out into a plain value, materializing containers.
pub(crate) fn out_to_value<T: ReadTxn>(txn: &T, out: Out) -> Value {
    match out {
        Out::Any(any) => Value::from_any(&any),
        Out::YMap(map) => container_value(txn, &CrdtContainer::Map(map)),
        Out::YArray(arr) => container_value(txn, &CrdtContainer::Array(arr)),
        Out::YText(text) => container_value(txn, &CrdtContainer::Text(text)),
        other => {
            warn!(?other, "unsupported shared type read as null");
            Value::Null
        }
    }
}

/// Converts one read-out into a container reference, if it is one.
pub(crate) fn out_to_container(out: &Out) -> Option<CrdtContainer> {
    match out {
        Out::YMap(map) => Some(CrdtContainer::Map(map.clone())),
        Out::YArray(arr) => Some(CrdtContainer::Array(arr.clone())),
        Out::YText(text) => Some(CrdtContainer::Text(text.clone())),
        _ => None,
    }
}

/// Builds a bound mirror node for one container, recursively.
pub(crate) fn materialize_node<T: ReadTxn>(
    txn: &T,
    container: &CrdtContainer,
    parent: Option<&NodeRef>,
) -> NodeRef {
    let node = match container {
        CrdtContainer::Map(_) => ProxyNode::new(NodeBody::Map(Default::default()), parent),
        CrdtContainer::Array(_) => ProxyNode::new(NodeBody::Array(Vec::new()), parent),
        CrdtContainer::Text(text) => {
            ProxyNode::new(NodeBody::Text(text.get_string(txn)), parent)
        }
    };
    node.borrow_mut().branch = Some(container.branch_id());
    match container {
        CrdtContainer::Map(map) => {
            let entries: Vec<(String, Out)> = map
                .iter(txn)
                .map(|(k, out)| (k.to_string(), out))
                .collect();
            for (k, out) in entries {
                let slot = out_to_slot(txn, out, &node);
                let mut inner = node.borrow_mut();
                let NodeBody::Map(map_body) = &mut inner.body else {
                    unreachable!()
                };
                map_body.insert(k, slot);
            }
        }
        CrdtContainer::Array(arr) => {
            let outs: Vec<Out> = arr.iter(txn).collect();
            for out in outs {
                let slot = out_to_slot(txn, out, &node);
                let mut inner = node.borrow_mut();
                let NodeBody::Array(arr_body) = &mut inner.body else {
                    unreachable!()
                };
                arr_body.push(slot);
            }
        }
        CrdtContainer::Text(_) => {}
    }
    node
}

/// Converts one read-out into a mirror slot under `parent`.
pub(crate) fn out_to_slot<T: ReadTxn>(txn: &T, out: Out, parent: &NodeRef) -> Slot {
    match out_to_container(&out) {
        Some(container) => Slot::Child(materialize_node(txn, &container, Some(parent))),
        None => Slot::Leaf(out_to_value(txn, out)),
    }
}

/// Converts an engine event path into a bridge path.
pub(crate) fn convert_event_path(path: yrs::types::Path) -> Path {
    let mut converted = Path::root();
    for seg in path {
        match seg {
            yrs::types::PathSegment::Key(k) => converted.push(k.to_string().as_str()),
            yrs::types::PathSegment::Index(i) => converted.push(i as usize),
        }
    }
    converted
}

/// Reverse translation: one deep event into the net change records it
/// describes, in event order, with container values fully materialized.
///
/// `base` is the path of the event's target container, resolved by the
/// caller (by identity where possible; reported event paths carry stale
/// indices for relocated containers).
pub(crate) fn event_records(
    txn: &TransactionMut<'_>,
    event: &Event,
    base: &Path,
) -> Vec<ChangeRecord> {
    match event {
        Event::Map(map_event) => {
            let mut records = Vec::new();
            for (key, change) in map_event.keys(txn) {
                let path = base.child(key.to_string().as_str());
                match change {
                    EntryChange::Inserted(out) => {
                        records.push(ChangeRecord::insert(path, out_to_value(txn, out.clone())));
                    }
                    EntryChange::Updated(_, out) => {
                        records.push(ChangeRecord::update(path, out_to_value(txn, out.clone())));
                    }
                    EntryChange::Removed(_) => records.push(ChangeRecord::delete(path)),
                }
            }
            records
        }
        Event::Array(array_event) => {
            let mut records = Vec::new();
            let mut index = 0usize;
            for change in array_event.delta(txn) {
                match change {
                    Change::Retain(n) => index += *n as usize,
                    Change::Removed(n) => {
                        for _ in 0..*n {
                            records.push(ChangeRecord::delete(base.child(index)));
                        }
                    }
                    Change::Added(outs) => {
                        for out in outs {
                            records.push(ChangeRecord::insert(
                                base.child(index),
                                out_to_value(txn, out.clone()),
                            ));
                            index += 1;
                        }
                    }
                }
            }
            records
        }
        Event::Text(text_event) => {
            let content = text_event.target().get_string(txn);
            vec![ChangeRecord::update(base.clone(), Value::Text(content))]
        }
        _ => {
            warn!("ignoring event for unsupported shared type");
            Vec::new()
        }
    }
}
