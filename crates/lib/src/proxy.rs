//! The proxy layer: a mirror tree of [`ProxyNode`]s.
//!
//! The mirror is the user-facing materialization of the document. Each live
//! CRDT container is represented by exactly one `ProxyNode` for the bridge's
//! lifetime; nodes own their children exclusively (`Rc`) and hold a weak
//! back-reference to their parent for path resolution, never a strong cycle.
//!
//! The mirror is a derived cache: local mutations are validated and applied
//! here eagerly (yielding the inverse record that makes rollback and undo
//! possible), and remote deltas are replayed into it by the observer. It can
//! always be rebuilt from the document.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::{Rc, Weak};

use yrs::branch::BranchID;

use crate::change::{ChangeKind, ChangeRecord};
use crate::errors::BridgeError;
use crate::path::{Path, PathSegment};
use crate::value::Value;

pub(crate) type NodeRef = Rc<RefCell<ProxyNode>>;

/// The in-memory representation of one CRDT container.
pub(crate) struct ProxyNode {
    /// Weak back-reference for path resolution; `None` only for the root.
    pub(crate) parent: Option<Weak<RefCell<ProxyNode>>>,
    /// Identity of the backing CRDT container, once bound.
    pub(crate) branch: Option<BranchID>,
    pub(crate) body: NodeBody,
}

pub(crate) enum NodeBody {
    Map(HashMap<String, Slot>),
    Array(Vec<Slot>),
    Text(String),
}

impl NodeBody {
    pub(crate) fn kind_name(&self) -> &'static str {
        match self {
            NodeBody::Map(_) => "map",
            NodeBody::Array(_) => "array",
            NodeBody::Text(_) => "text",
        }
    }
}

/// One entry of a map or array: a primitive leaf or a nested container.
pub(crate) enum Slot {
    Leaf(Value),
    Child(NodeRef),
}

impl ProxyNode {
    pub(crate) fn new(body: NodeBody, parent: Option<&NodeRef>) -> NodeRef {
        Rc::new(RefCell::new(ProxyNode {
            parent: parent.map(Rc::downgrade),
            branch: None,
            body,
        }))
    }
}

/// Resolves a node's absolute path by climbing its parent chain.
///
/// Only used for diagnostics; a detached node resolves relative to wherever
/// its chain ends.
pub(crate) fn path_of(node: &NodeRef) -> Path {
    let mut segments = Vec::new();
    let mut current = node.clone();
    loop {
        let parent = current
            .borrow()
            .parent
            .as_ref()
            .and_then(Weak::upgrade);
        let Some(parent) = parent else { break };
        let seg = {
            let body = &parent.borrow().body;
            match body {
                NodeBody::Map(entries) => entries.iter().find_map(|(k, slot)| match slot {
                    Slot::Child(child) if Rc::ptr_eq(child, &current) => {
                        Some(PathSegment::Key(k.clone()))
                    }
                    _ => None,
                }),
                NodeBody::Array(items) => items.iter().enumerate().find_map(|(i, slot)| {
                    match slot {
                        Slot::Child(child) if Rc::ptr_eq(child, &current) => {
                            Some(PathSegment::Index(i))
                        }
                        _ => None,
                    }
                }),
                NodeBody::Text(_) => None,
            }
        };
        if let Some(seg) = seg {
            segments.push(seg);
        }
        current = parent;
    }
    segments.reverse();
    Path::from(segments)
}

/// Snapshots one slot into a plain value.
pub(crate) fn slot_value(slot: &Slot) -> Value {
    match slot {
        Slot::Leaf(v) => v.clone(),
        Slot::Child(node) => node_value(node),
    }
}

/// Snapshots one node into a plain value.
pub(crate) fn node_value(node: &NodeRef) -> Value {
    let node = node.borrow();
    match &node.body {
        NodeBody::Map(entries) => Value::Map(
            entries
                .iter()
                .map(|(k, slot)| (k.clone(), slot_value(slot)))
                .collect::<BTreeMap<_, _>>(),
        ),
        NodeBody::Array(items) => Value::Array(items.iter().map(slot_value).collect()),
        NodeBody::Text(content) => Value::Text(content.clone()),
    }
}

/// The mirror tree, rooted at the bridge's root map.
#[derive(Clone)]
pub(crate) struct Mirror {
    root: NodeRef,
}

impl Mirror {
    pub(crate) fn new(root_branch: BranchID) -> Self {
        let root = ProxyNode::new(NodeBody::Map(HashMap::new()), None);
        root.borrow_mut().branch = Some(root_branch);
        Mirror { root }
    }

    pub(crate) fn snapshot(&self) -> Value {
        node_value(&self.root)
    }

    /// Finds the node bound to the given container identity.
    ///
    /// Event paths report a relocated container at its pre-move index;
    /// identity does not, so replay resolves targets through here.
    pub(crate) fn node_by_branch(&self, id: &BranchID) -> Option<NodeRef> {
        find_by_branch(&self.root, id)
    }

    /// Replaces the root's content with a freshly materialized node, keeping
    /// the root's identity. Used for divergence recovery.
    pub(crate) fn reset_from(&self, fresh: NodeRef) {
        let mut fresh = match Rc::try_unwrap(fresh) {
            Ok(cell) => cell.into_inner(),
            Err(shared) => {
                // Shared elsewhere; fall back to draining through the borrow.
                let mut inner = shared.borrow_mut();
                std::mem::replace(
                    &mut *inner,
                    ProxyNode {
                        parent: None,
                        branch: None,
                        body: NodeBody::Map(HashMap::new()),
                    },
                )
            }
        };
        let mut root = self.root.borrow_mut();
        root.body = std::mem::replace(&mut fresh.body, NodeBody::Map(HashMap::new()));
        reparent_children(&self.root, &mut root.body);
    }

    /// Builds an unbound working copy of the current tree.
    ///
    /// Used to dry-run record sequences (e.g. computing inverses of a remote
    /// batch) without touching the live mirror.
    pub(crate) fn scratch_copy(&self) -> Mirror {
        let root = ProxyNode::new(NodeBody::Map(HashMap::new()), None);
        let scratch = Mirror { root };
        if let Value::Map(entries) = self.snapshot() {
            for (k, v) in entries {
                let slot = match make_slot(&scratch.root, &v, &Path::root()) {
                    Ok(slot) => slot,
                    Err(_) => continue,
                };
                let mut inner = scratch.root.borrow_mut();
                let NodeBody::Map(map) = &mut inner.body else {
                    unreachable!()
                };
                map.insert(k, slot);
            }
        }
        scratch
    }

    /// Walks to the container node at `segments`.
    pub(crate) fn node_at(&self, segments: &[PathSegment]) -> Result<NodeRef, BridgeError> {
        let mut current = self.root.clone();
        let mut walked = Path::root();
        for seg in segments {
            walked.push(seg.clone());
            let next = {
                let node = current.borrow();
                match (&node.body, seg) {
                    (NodeBody::Map(entries), PathSegment::Key(k)) => match entries.get(k) {
                        Some(Slot::Child(child)) => child.clone(),
                        Some(Slot::Leaf(v)) => {
                            return Err(BridgeError::TypeMismatch {
                                path: walked.to_string(),
                                expected: "container".to_string(),
                                actual: v.type_name().to_string(),
                            });
                        }
                        None => {
                            return Err(BridgeError::PathNotFound {
                                path: walked.to_string(),
                            });
                        }
                    },
                    (NodeBody::Map(_), PathSegment::Index(_)) => {
                        return Err(BridgeError::TypeMismatch {
                            path: walked.to_string(),
                            expected: "array".to_string(),
                            actual: "map".to_string(),
                        });
                    }
                    (NodeBody::Array(items), PathSegment::Index(i)) => match items.get(*i) {
                        Some(Slot::Child(child)) => child.clone(),
                        Some(Slot::Leaf(v)) => {
                            return Err(BridgeError::TypeMismatch {
                                path: walked.to_string(),
                                expected: "container".to_string(),
                                actual: v.type_name().to_string(),
                            });
                        }
                        None => {
                            return Err(BridgeError::PathNotFound {
                                path: walked.to_string(),
                            });
                        }
                    },
                    (NodeBody::Array(_), PathSegment::Key(_)) => {
                        return Err(BridgeError::TypeMismatch {
                            path: walked.to_string(),
                            expected: "map".to_string(),
                            actual: "array".to_string(),
                        });
                    }
                    (NodeBody::Text(_), _) => {
                        return Err(BridgeError::TypeMismatch {
                            path: walked.to_string(),
                            expected: "map or array".to_string(),
                            actual: "text".to_string(),
                        });
                    }
                }
            };
            current = next;
        }
        Ok(current)
    }

    /// Reads the value at `path`, or `None` when nothing is there.
    ///
    /// Reads are forgiving: structural mismatches along the way read as
    /// absent rather than erroring.
    pub(crate) fn value_at(&self, path: &Path) -> Option<Value> {
        if path.is_root() {
            return Some(self.snapshot());
        }
        let (parent_segs, last) = path.split_last()?;
        let parent = self.node_at(parent_segs).ok()?;
        let parent = parent.borrow();
        match (&parent.body, last) {
            (NodeBody::Map(entries), PathSegment::Key(k)) => entries.get(k).map(slot_value),
            (NodeBody::Array(items), PathSegment::Index(i)) => items.get(*i).map(slot_value),
            _ => None,
        }
    }

    /// Number of entries in the container at `path`, if it is one.
    pub(crate) fn len_at(&self, path: &Path) -> Option<usize> {
        let node = self.node_at(path.segments()).ok()?;
        let node = node.borrow();
        Some(match &node.body {
            NodeBody::Map(entries) => entries.len(),
            NodeBody::Array(items) => items.len(),
            NodeBody::Text(content) => content.chars().count(),
        })
    }

    /// Binds the node at `path` to its backing CRDT container.
    pub(crate) fn bind(&self, path: &Path, branch: BranchID) {
        if let Ok(node) = self.node_at(path.segments()) {
            node.borrow_mut().branch = Some(branch);
        } else {
            tracing::debug!(path = %path, "bind target vanished before binding");
        }
    }

    /// Validates and applies one local change record, returning its inverse.
    ///
    /// Application is atomic per record: every fallible check runs before the
    /// first mutation.
    pub(crate) fn apply(&self, rec: &ChangeRecord) -> Result<ChangeRecord, BridgeError> {
        let (parent_segs, last) = rec.path.split_last().ok_or_else(|| {
            BridgeError::UnsupportedOperation {
                path: rec.path.to_string(),
                reason: "the root container itself cannot be replaced".to_string(),
            }
        })?;
        if let ChangeKind::Insert { value } | ChangeKind::Update { value } = &rec.kind {
            ensure_linkable(value, &rec.path)?;
        }
        let parent = self.node_at(parent_segs)?;

        match &rec.kind {
            ChangeKind::Insert { value } => self.apply_insert(&parent, last, value, &rec.path),
            ChangeKind::Update { value } => self.apply_update(&parent, last, value, &rec.path),
            ChangeKind::Delete => self.apply_delete(&parent, last, &rec.path),
            ChangeKind::Move { to } => self.apply_move(&parent, last, *to, &rec.path),
        }
    }

    fn apply_insert(
        &self,
        parent: &NodeRef,
        last: &PathSegment,
        value: &Value,
        path: &Path,
    ) -> Result<ChangeRecord, BridgeError> {
        let mut node = parent.borrow_mut();
        match (&mut node.body, last) {
            (NodeBody::Map(entries), PathSegment::Key(k)) => {
                let slot = make_slot(parent, value, path)?;
                match entries.insert(k.clone(), slot) {
                    // Insert over an existing key degrades to an overwrite.
                    Some(old) => Ok(ChangeRecord::update(path.clone(), slot_value(&old))),
                    None => Ok(ChangeRecord::delete(path.clone())),
                }
            }
            (NodeBody::Array(items), PathSegment::Index(i)) => {
                if *i > items.len() {
                    return Err(BridgeError::IndexOutOfBounds {
                        path: path.to_string(),
                        index: *i,
                        len: items.len(),
                    });
                }
                let slot = make_slot(parent, value, path)?;
                items.insert(*i, slot);
                Ok(ChangeRecord::delete(path.clone()))
            }
            (body, seg) => Err(segment_mismatch(body, seg, path)),
        }
    }

    fn apply_update(
        &self,
        parent: &NodeRef,
        last: &PathSegment,
        value: &Value,
        path: &Path,
    ) -> Result<ChangeRecord, BridgeError> {
        let mut node = parent.borrow_mut();
        match (&mut node.body, last) {
            (NodeBody::Map(entries), PathSegment::Key(k)) => {
                let Some(slot) = entries.get_mut(k) else {
                    return Err(BridgeError::PathNotFound {
                        path: path.to_string(),
                    });
                };
                let old = slot_value(slot);
                assign_slot(parent, slot, value, path)?;
                Ok(ChangeRecord::update(path.clone(), old))
            }
            (NodeBody::Array(items), PathSegment::Index(i)) => {
                let len = items.len();
                let Some(slot) = items.get_mut(*i) else {
                    return Err(BridgeError::IndexOutOfBounds {
                        path: path.to_string(),
                        index: *i,
                        len,
                    });
                };
                let old = slot_value(slot);
                assign_slot(parent, slot, value, path)?;
                Ok(ChangeRecord::update(path.clone(), old))
            }
            (body, seg) => Err(segment_mismatch(body, seg, path)),
        }
    }

    fn apply_delete(
        &self,
        parent: &NodeRef,
        last: &PathSegment,
        path: &Path,
    ) -> Result<ChangeRecord, BridgeError> {
        let mut node = parent.borrow_mut();
        match (&mut node.body, last) {
            (NodeBody::Map(entries), PathSegment::Key(k)) => match entries.remove(k) {
                Some(old) => Ok(ChangeRecord::insert(path.clone(), slot_value(&old))),
                None => Err(BridgeError::PathNotFound {
                    path: path.to_string(),
                }),
            },
            (NodeBody::Array(items), PathSegment::Index(i)) => {
                if *i >= items.len() {
                    return Err(BridgeError::IndexOutOfBounds {
                        path: path.to_string(),
                        index: *i,
                        len: items.len(),
                    });
                }
                let old = items.remove(*i);
                Ok(ChangeRecord::insert(path.clone(), slot_value(&old)))
            }
            (body, seg) => Err(segment_mismatch(body, seg, path)),
        }
    }

    fn apply_move(
        &self,
        parent: &NodeRef,
        last: &PathSegment,
        to: usize,
        path: &Path,
    ) -> Result<ChangeRecord, BridgeError> {
        let mut node = parent.borrow_mut();
        let PathSegment::Index(from) = last else {
            return Err(BridgeError::UnsupportedOperation {
                path: path.to_string(),
                reason: "move requires an array index".to_string(),
            });
        };
        let NodeBody::Array(items) = &mut node.body else {
            return Err(BridgeError::UnsupportedOperation {
                path: path.to_string(),
                reason: format!("move requires an array, found {}", node.body.kind_name()),
            });
        };
        let len = items.len();
        if *from >= len || to >= len {
            let index = if *from >= len { *from } else { to };
            return Err(BridgeError::IndexOutOfBounds {
                path: path.to_string(),
                index,
                len,
            });
        }
        // Repositions the slot itself, so the element keeps its identity.
        let slot = items.remove(*from);
        items.insert(to, slot);

        let array_path = path.parent().unwrap_or_default();
        Ok(ChangeRecord::r#move(array_path.child(to), *from))
    }
}

fn find_by_branch(node: &NodeRef, id: &BranchID) -> Option<NodeRef> {
    let children: Vec<NodeRef> = {
        let inner = node.borrow();
        if inner.branch.as_ref() == Some(id) {
            return Some(node.clone());
        }
        let child_of = |slot: &Slot| match slot {
            Slot::Child(child) => Some(child.clone()),
            Slot::Leaf(_) => None,
        };
        match &inner.body {
            NodeBody::Map(entries) => entries.values().filter_map(child_of).collect(),
            NodeBody::Array(items) => items.iter().filter_map(child_of).collect(),
            NodeBody::Text(_) => Vec::new(),
        }
    };
    children.iter().find_map(|child| find_by_branch(child, id))
}

fn segment_mismatch(body: &NodeBody, seg: &PathSegment, path: &Path) -> BridgeError {
    let expected = match seg {
        PathSegment::Key(_) => "map",
        PathSegment::Index(_) => "array",
    };
    BridgeError::TypeMismatch {
        path: path.to_string(),
        expected: expected.to_string(),
        actual: body.kind_name().to_string(),
    }
}

/// Rejects values containing container re-link requests anywhere in them.
///
/// Any container reference obtainable through this crate is already linked
/// in the document; linking it at a second path is rejected rather than
/// guessing a dual-path semantics.
fn ensure_linkable(value: &Value, path: &Path) -> Result<(), BridgeError> {
    match value {
        Value::Container(_) => Err(BridgeError::AlreadyLinked {
            path: path.to_string(),
        }),
        Value::Map(entries) => {
            for v in entries.values() {
                ensure_linkable(v, path)?;
            }
            Ok(())
        }
        Value::Array(items) => {
            for v in items {
                ensure_linkable(v, path)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Builds a slot for `value` under `parent`, expanding nested structures
/// into fresh nodes.
fn make_slot(parent: &NodeRef, value: &Value, path: &Path) -> Result<Slot, BridgeError> {
    match value {
        Value::Map(entries) => {
            let node = ProxyNode::new(NodeBody::Map(HashMap::new()), Some(parent));
            for (k, v) in entries {
                let slot = make_slot(&node, v, path)?;
                let mut inner = node.borrow_mut();
                let NodeBody::Map(map) = &mut inner.body else {
                    unreachable!()
                };
                map.insert(k.clone(), slot);
            }
            Ok(Slot::Child(node))
        }
        Value::Array(items) => {
            let node = ProxyNode::new(NodeBody::Array(Vec::new()), Some(parent));
            for v in items {
                let slot = make_slot(&node, v, path)?;
                let mut inner = node.borrow_mut();
                let NodeBody::Array(arr) = &mut inner.body else {
                    unreachable!()
                };
                arr.push(slot);
            }
            Ok(Slot::Child(node))
        }
        Value::Text(content) => Ok(Slot::Child(ProxyNode::new(
            NodeBody::Text(content.clone()),
            Some(parent),
        ))),
        Value::Container(_) => Err(BridgeError::AlreadyLinked {
            path: path.to_string(),
        }),
        primitive => Ok(Slot::Leaf(primitive.clone())),
    }
}

/// Assigns `value` into an existing slot, preserving container identity
/// where the kinds line up.
///
/// Matching kinds merge in place (key-wise for maps, index-aligned diff for
/// arrays, content replacement for text). A container-kind conflict at the
/// addressed slot is a `TypeMismatch`; a change between primitive and
/// container shape replaces the slot.
fn assign_slot(
    parent: &NodeRef,
    slot: &mut Slot,
    value: &Value,
    path: &Path,
) -> Result<(), BridgeError> {
    match (&mut *slot, value) {
        (Slot::Child(node), Value::Map(entries)) => {
            let is_map = matches!(node.borrow().body, NodeBody::Map(_));
            if is_map {
                merge_map(node, entries, path)
            } else {
                Err(BridgeError::TypeMismatch {
                    path: path.to_string(),
                    expected: node.borrow().body.kind_name().to_string(),
                    actual: "map".to_string(),
                })
            }
        }
        (Slot::Child(node), Value::Array(items)) => {
            let is_array = matches!(node.borrow().body, NodeBody::Array(_));
            if is_array {
                merge_array(node, items, path)
            } else {
                Err(BridgeError::TypeMismatch {
                    path: path.to_string(),
                    expected: node.borrow().body.kind_name().to_string(),
                    actual: "array".to_string(),
                })
            }
        }
        (Slot::Child(node), Value::Text(content)) => {
            let mut inner = node.borrow_mut();
            match &mut inner.body {
                NodeBody::Text(existing) => {
                    *existing = content.clone();
                    Ok(())
                }
                body => Err(BridgeError::TypeMismatch {
                    path: path.to_string(),
                    expected: body.kind_name().to_string(),
                    actual: "text".to_string(),
                }),
            }
        }
        (_, _) => {
            *slot = make_slot(parent, value, path)?;
            Ok(())
        }
    }
}

/// Key-wise merge of a plain map into an existing map node: vanished keys
/// are removed, changed keys assigned recursively. Nested kind changes
/// replace the nested slot outright; only the addressed slot's own kind is
/// binding.
fn merge_map(
    node: &NodeRef,
    entries: &BTreeMap<String, Value>,
    path: &Path,
) -> Result<(), BridgeError> {
    let stale: Vec<String> = {
        let inner = node.borrow();
        let NodeBody::Map(existing) = &inner.body else {
            unreachable!()
        };
        existing
            .keys()
            .filter(|k| !entries.contains_key(*k))
            .cloned()
            .collect()
    };
    for k in stale {
        let mut inner = node.borrow_mut();
        let NodeBody::Map(existing) = &mut inner.body else {
            unreachable!()
        };
        existing.remove(&k);
    }
    for (k, v) in entries {
        let current = {
            let mut inner = node.borrow_mut();
            let NodeBody::Map(existing) = &mut inner.body else {
                unreachable!()
            };
            existing.remove(k)
        };
        let new_slot = match current {
            Some(mut slot) => {
                if nested_kinds_match(&slot, v) {
                    assign_slot(node, &mut slot, v, path)?;
                    slot
                } else {
                    make_slot(node, v, path)?
                }
            }
            None => make_slot(node, v, path)?,
        };
        let mut inner = node.borrow_mut();
        let NodeBody::Map(existing) = &mut inner.body else {
            unreachable!()
        };
        existing.insert(k.clone(), new_slot);
    }
    Ok(())
}

/// Index-aligned replacement of an array node's content: elements in the
/// common prefix and suffix keep their slots (and thus their identity); only
/// the changed middle window is rebuilt.
fn merge_array(node: &NodeRef, items: &[Value], path: &Path) -> Result<(), BridgeError> {
    let old_values: Vec<Value> = {
        let inner = node.borrow();
        let NodeBody::Array(existing) = &inner.body else {
            unreachable!()
        };
        existing.iter().map(slot_value).collect()
    };
    let (prefix, old_tail, new_tail) = crate::adapter::array_diff(&old_values, items);

    let mut middle = Vec::with_capacity(new_tail.saturating_sub(prefix));
    for v in &items[prefix..new_tail] {
        middle.push(make_slot(node, v, path)?);
    }

    let mut inner = node.borrow_mut();
    let NodeBody::Array(existing) = &mut inner.body else {
        unreachable!()
    };
    existing.splice(prefix..old_tail, middle);
    Ok(())
}

fn nested_kinds_match(slot: &Slot, value: &Value) -> bool {
    match slot {
        Slot::Leaf(_) => false,
        Slot::Child(node) => matches!(
            (&node.borrow().body, value),
            (NodeBody::Map(_), Value::Map(_))
                | (NodeBody::Array(_), Value::Array(_))
                | (NodeBody::Text(_), Value::Text(_))
        ),
    }
}

/// Fixes up parent back-references after a body is grafted onto a node.
pub(crate) fn reparent_children(owner: &NodeRef, body: &mut NodeBody) {
    let reparent = |slot: &Slot| {
        if let Slot::Child(child) = slot {
            child.borrow_mut().parent = Some(Rc::downgrade(owner));
        }
    };
    match body {
        NodeBody::Map(entries) => entries.values().for_each(reparent),
        NodeBody::Array(items) => items.iter().for_each(reparent),
        NodeBody::Text(_) => {}
    }
}
