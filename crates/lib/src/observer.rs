//! The change observer: replays document deltas into the mirror and fans
//! change batches out to subscribers.
//!
//! A deep observation on the root container fires once per committed
//! transaction. The transaction's origin decides what happens:
//!
//! - transactions this bridge issued through the coordinator (local,
//!   bootstrap, undo) already updated the mirror eagerly, so the observer
//!   only notifies subscribers and never replays, preventing double
//!   application of the echo;
//! - everything else (foreign origins, untagged transactions, and updates
//!   this bridge applied on behalf of a remote peer) is replayed into the
//!   mirror.
//!
//! Replay pools container nodes removed earlier in the same event batch by
//! their engine identity, so a remote array move re-attaches the existing
//! mirror node instead of rebuilding it.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;
use yrs::branch::{Branch, BranchID};
use yrs::types::{Change, EntryChange, Event, Events};
use yrs::{DeepObservable, GetString, MapRef, ReadTxn, Subscription, TransactionMut};

use crate::adapter;
use crate::change::{ChangeRecord, OriginKind, OriginTag};
use crate::clock::Clock;
use crate::proxy::{Mirror, NodeBody, NodeRef, Slot};
use crate::undo::UndoStack;

/// One committed transaction's worth of changes, as seen by subscribers.
#[derive(Debug, Clone)]
pub struct ChangeBatch {
    /// Who issued the transaction, from this replica's perspective. Foreign
    /// and untagged transactions report as [`OriginKind::Remote`] whatever
    /// their issuer called them.
    pub origin: OriginKind,
    /// True when the transaction was issued by this bridge instance.
    pub own: bool,
    /// Net change records, in event order, with container values
    /// materialized.
    pub records: Vec<ChangeRecord>,
}

type Callback = Rc<dyn Fn(&ChangeBatch)>;

#[derive(Default)]
struct CallbackList {
    next_id: u64,
    entries: Vec<(u64, Callback)>,
}

/// The subscriber registry, shared between the bridge and the observer
/// closure.
#[derive(Clone, Default)]
pub(crate) struct Callbacks {
    inner: Rc<RefCell<CallbackList>>,
}

impl Callbacks {
    pub(crate) fn subscribe(&self, f: impl Fn(&ChangeBatch) + 'static) -> ChangeSubscription {
        let mut list = self.inner.borrow_mut();
        let id = list.next_id;
        list.next_id += 1;
        list.entries.push((id, Rc::new(f)));
        ChangeSubscription {
            registry: Rc::downgrade(&self.inner),
            id,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.inner.borrow().entries.is_empty()
    }

    pub(crate) fn notify(&self, batch: &ChangeBatch) {
        // Snapshot under the borrow so callbacks may subscribe or drop
        // subscriptions re-entrantly.
        let snapshot: Vec<Callback> = self
            .inner
            .borrow()
            .entries
            .iter()
            .map(|(_, f)| f.clone())
            .collect();
        for f in snapshot {
            f(batch);
        }
    }
}

/// Keeps one change callback registered; dropping it unsubscribes.
#[must_use = "dropping the subscription unsubscribes the callback"]
pub struct ChangeSubscription {
    registry: Weak<RefCell<CallbackList>>,
    id: u64,
}

impl Drop for ChangeSubscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.borrow_mut().entries.retain(|(id, _)| *id != self.id);
        }
    }
}

/// Installs the deep observation on the root container.
///
/// The returned subscription must be kept alive for the bridge's lifetime;
/// dropping it detaches the observer.
pub(crate) fn subscribe_deep(
    root: &MapRef,
    bridge_id: Uuid,
    mirror: Mirror,
    callbacks: Callbacks,
    undo: Rc<RefCell<Option<UndoStack>>>,
    clock: Arc<dyn Clock>,
) -> Subscription {
    root.observe_deep(move |txn, events| {
        handle_events(bridge_id, &mirror, &callbacks, &undo, &clock, txn, events);
    })
}

fn handle_events(
    bridge_id: Uuid,
    mirror: &Mirror,
    callbacks: &Callbacks,
    undo: &Rc<RefCell<Option<UndoStack>>>,
    clock: &Arc<dyn Clock>,
    txn: &TransactionMut<'_>,
    events: &Events,
) {
    let tag = txn.origin().and_then(OriginTag::parse);
    let own = tag.as_ref().is_some_and(|t| t.issued_by(&bridge_id));
    // A foreign bridge's "local" batch is remote from this replica's
    // perspective; only our own tags keep their kind.
    let origin = match &tag {
        Some(t) if own => t.kind,
        _ => OriginKind::Remote,
    };
    // Our own coordinator-issued transactions already updated the mirror,
    // except remote-tagged ones, which wrap a peer's update.
    let replay = origin == OriginKind::Remote;
    if !replay && callbacks.is_empty() {
        return;
    }

    // Capture needs the pre-replay tree to dry-run inverses against.
    let capture = replay
        && undo
            .borrow()
            .as_ref()
            .is_some_and(|stack| stack.tracks(OriginKind::Remote));
    let scratch = capture.then(|| mirror.scratch_copy());

    let mut pool: HashMap<BranchID, NodeRef> = HashMap::new();
    let mut records = Vec::new();
    for event in events.iter() {
        let target = resolve_target(mirror, event);
        let base = match (&target, doc_path(event)) {
            (Some(node), _) => crate::proxy::path_of(node),
            (None, Some(path)) => adapter::convert_event_path(path),
            (None, None) => {
                warn!("ignoring event for unsupported shared type");
                continue;
            }
        };
        records.extend(adapter::event_records(txn, event, &base));
        if replay {
            match &target {
                Some(node) => replay_event(txn, node, event, &mut pool),
                None => {
                    warn!(path = %base, "event target missing from mirror; skipping");
                }
            }
        }
    }
    if let Some(scratch) = scratch {
        capture_remote_batch(&scratch, undo, clock, &records);
    }
    if records.is_empty() {
        return;
    }
    callbacks.notify(&ChangeBatch {
        origin,
        own,
        records,
    });
}

/// The reported path of an event's target, for containers the mirror
/// cannot resolve by identity.
fn doc_path(event: &Event) -> Option<yrs::types::Path> {
    match event {
        Event::Map(e) => Some(e.path()),
        Event::Array(e) => Some(e.path()),
        Event::Text(e) => Some(e.path()),
        _ => None,
    }
}

/// Resolves an event's target container in the mirror.
///
/// Resolution goes by engine identity first: event paths report a
/// relocated container at its pre-move index, while the mirror tracks it
/// at its current position. The reported path is only a fallback for
/// targets the mirror has not bound.
fn resolve_target(mirror: &Mirror, event: &Event) -> Option<NodeRef> {
    let branch: &Branch = match event {
        Event::Map(e) => e.target().as_ref(),
        Event::Array(e) => e.target().as_ref(),
        Event::Text(e) => e.target().as_ref(),
        _ => return None,
    };
    if let Some(node) = mirror.node_by_branch(&branch.id()) {
        return Some(node);
    }
    let path = adapter::convert_event_path(doc_path(event)?);
    mirror.node_at(path.segments()).ok()
}

/// Records a remote batch into the undo history by dry-running its records
/// on `scratch`, a pre-replay working copy of the mirror, to obtain their
/// inverses.
fn capture_remote_batch(
    scratch: &Mirror,
    undo: &Rc<RefCell<Option<UndoStack>>>,
    clock: &Arc<dyn Clock>,
    records: &[ChangeRecord],
) {
    if records.is_empty() {
        return;
    }
    let mut undo = undo.borrow_mut();
    let Some(stack) = undo.as_mut() else { return };
    let mut forward = Vec::new();
    let mut inverse = Vec::new();
    for rec in records {
        match scratch.apply(rec) {
            Ok(inv) => {
                forward.push(rec.clone());
                inverse.push(inv);
            }
            Err(err) => {
                warn!(record = %rec, error = %err, "remote record not invertible; not captured");
            }
        }
    }
    stack.record(OriginKind::Remote, &forward, &inverse, clock.now_millis());
}

/// Replays one deep event into its resolved mirror node.
///
/// Replay is fail-soft: a mismatched node kind is logged and skipped
/// rather than poisoning the rest of the batch.
fn replay_event(
    txn: &TransactionMut<'_>,
    node: &NodeRef,
    event: &Event,
    pool: &mut HashMap<BranchID, NodeRef>,
) {
    match event {
        Event::Map(e) => replay_map(txn, node, e, pool),
        Event::Array(e) => replay_array(txn, node, e, pool),
        Event::Text(e) => {
            let content = e.target().get_string(txn);
            let mut inner = node.borrow_mut();
            if let NodeBody::Text(existing) = &mut inner.body {
                *existing = content;
            } else {
                drop(inner);
                warn!(path = %crate::proxy::path_of(node), "text event targets a non-text mirror node");
            }
        }
        _ => {}
    }
}

fn replay_map(
    txn: &TransactionMut<'_>,
    node: &NodeRef,
    event: &yrs::types::map::MapEvent,
    pool: &mut HashMap<BranchID, NodeRef>,
) {
    for (key, change) in event.keys(txn) {
        match change {
            EntryChange::Inserted(out) | EntryChange::Updated(_, out) => {
                let slot = pooled_slot(txn, out.clone(), node, pool);
                let mut inner = node.borrow_mut();
                let NodeBody::Map(entries) = &mut inner.body else {
                    drop(inner);
                    warn!(path = %crate::proxy::path_of(node), key = %key, "map event targets a non-map mirror node");
                    return;
                };
                if let Some(old) = entries.insert(key.to_string(), slot) {
                    stash(old, pool);
                }
            }
            EntryChange::Removed(_) => {
                let mut inner = node.borrow_mut();
                let NodeBody::Map(entries) = &mut inner.body else {
                    drop(inner);
                    warn!(path = %crate::proxy::path_of(node), key = %key, "map event targets a non-map mirror node");
                    return;
                };
                if let Some(old) = entries.remove(key.as_ref()) {
                    stash(old, pool);
                }
            }
        }
    }
}

fn replay_array(
    txn: &TransactionMut<'_>,
    node: &NodeRef,
    event: &yrs::types::array::ArrayEvent,
    pool: &mut HashMap<BranchID, NodeRef>,
) {
    let delta = event.delta(txn);

    // Removals first, against the pre-event array, so a moved container is
    // stashed before its re-insertion is processed even when the engine
    // orders the addition ahead of the removal.
    {
        let mut inner = node.borrow_mut();
        let NodeBody::Array(items) = &mut inner.body else {
            warn!("array event targets a non-array mirror node");
            return;
        };
        let mut orig = 0usize;
        for change in delta {
            match change {
                Change::Retain(n) | Change::Removed(n) => {
                    if let Change::Removed(_) = change {
                        let end = usize::min(orig + *n as usize, items.len());
                        if orig > items.len() {
                            warn!(orig, len = items.len(), "array removal past mirror end");
                            return;
                        }
                        for old in items.drain(orig..end) {
                            stash(old, pool);
                        }
                        continue;
                    }
                    orig += *n as usize;
                }
                Change::Added(_) => {}
            }
        }
    }

    // Then insertions, against the post-removal array.
    let mut index = 0usize;
    for change in delta {
        match change {
            Change::Retain(n) => index += *n as usize,
            Change::Removed(_) => {}
            Change::Added(outs) => {
                for out in outs {
                    let slot = pooled_slot(txn, out.clone(), node, pool);
                    let mut inner = node.borrow_mut();
                    let NodeBody::Array(items) = &mut inner.body else {
                        return;
                    };
                    let at = usize::min(index, items.len());
                    items.insert(at, slot);
                    index += 1;
                }
            }
        }
    }
}

/// Converts a read-out into a mirror slot, re-attaching a node removed
/// earlier in the same batch when the container identity matches.
fn pooled_slot<T: ReadTxn>(
    txn: &T,
    out: yrs::Out,
    parent: &NodeRef,
    pool: &mut HashMap<BranchID, NodeRef>,
) -> Slot {
    if let Some(container) = adapter::out_to_container(&out) {
        let id = container.branch_id();
        if let Some(node) = pool.remove(&id) {
            node.borrow_mut().parent = Some(Rc::downgrade(parent));
            return Slot::Child(node);
        }
        return Slot::Child(adapter::materialize_node(txn, &container, Some(parent)));
    }
    Slot::Leaf(adapter::out_to_value(txn, out))
}

fn stash(slot: Slot, pool: &mut HashMap<BranchID, NodeRef>) {
    if let Slot::Child(node) = slot {
        let branch = node.borrow().branch.clone();
        if let Some(id) = branch {
            pool.insert(id, node);
        }
    }
}
