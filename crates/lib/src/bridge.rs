//! The bridge: the public facade tying the mirror, coordinator, observer,
//! bootstrap, and undo integration to one document.
//!
//! A bridge attaches to a named root map of a [`Doc`] and keeps a plain
//! value mirror of it for the bridge's lifetime. Reads come straight from
//! the mirror; writes are validated there, then committed to the document
//! as origin-tagged transactions. Updates applied from other replicas flow
//! back through the deep observation into the mirror.
//!
//! All paths use dot notation: `"todos.0.title"` addresses key `title` of
//! the map at index 0 of the array at root key `todos`. Numeric segments
//! address array indices.
//!
//! The bridge is single-threaded by construction; share it within one
//! thread via `Rc` if needed.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;
use yrs::branch::Branch;
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{Doc, Map, ReadTxn, StateVector, Subscription, Transact, Update};

use crate::adapter;
use crate::bootstrap;
use crate::change::{ChangeRecord, OriginKind};
use crate::clock::{Clock, SystemClock};
use crate::coordinator::{CommittedBatch, Coordinator};
use crate::errors::BridgeError;
use crate::observer::{self, Callbacks, ChangeBatch, ChangeSubscription};
use crate::path::Path;
use crate::proxy::Mirror;
use crate::undo::{UndoOptions, UndoStack};
use crate::value::{CrdtContainer, Value};

/// A live bidirectional binding between a document's root map and a plain
/// value tree.
pub struct Bridge {
    coordinator: Coordinator,
    callbacks: Callbacks,
    /// Shared with the observer so remote batches can be captured too.
    undo: Rc<RefCell<Option<UndoStack>>>,
    clock: Arc<dyn Clock>,
    /// Keeps the deep observation alive; dropped with the bridge.
    _deep_sub: Subscription,
}

impl Bridge {
    /// Attaches to the root map named `root_name`, creating it if absent.
    ///
    /// Content already present in the document is materialized into the
    /// mirror, so attaching to a synced document is immediately readable.
    pub fn attach(doc: Doc, root_name: &str) -> Self {
        Self::attach_with_clock(doc, root_name, Arc::new(SystemClock))
    }

    /// [`Bridge::attach`] with an explicit time source for the undo capture
    /// window.
    pub fn attach_with_clock(doc: Doc, root_name: &str, clock: Arc<dyn Clock>) -> Self {
        let root = doc.get_or_insert_map(root_name);
        let branch: &Branch = root.as_ref();
        let mirror = Mirror::new(branch.id());

        let existing = {
            let txn = doc.transact();
            (root.len(&txn) > 0).then(|| {
                adapter::materialize_node(&txn, &CrdtContainer::Map(root.clone()), None)
            })
        };
        if let Some(fresh) = existing {
            debug!(root = root_name, "materializing pre-existing document content");
            mirror.reset_from(fresh);
        }

        let bridge_id = Uuid::new_v4();
        let callbacks = Callbacks::default();
        let undo: Rc<RefCell<Option<UndoStack>>> = Rc::new(RefCell::new(None));
        let deep_sub = observer::subscribe_deep(
            &root,
            bridge_id,
            mirror.clone(),
            callbacks.clone(),
            undo.clone(),
            clock.clone(),
        );
        Bridge {
            coordinator: Coordinator::new(doc, root, mirror, bridge_id),
            callbacks,
            undo,
            clock,
            _deep_sub: deep_sub,
        }
    }

    /// The underlying document, for interop with other engine consumers.
    pub fn doc(&self) -> &Doc {
        self.coordinator.doc()
    }

    /// This bridge instance's identity, as carried in its origin tags.
    pub fn bridge_id(&self) -> Uuid {
        self.coordinator.bridge_id()
    }

    // --- reads ---------------------------------------------------------

    /// Snapshot of the whole tree as a plain value.
    pub fn snapshot(&self) -> Value {
        self.coordinator.mirror().snapshot()
    }

    /// Reads the whole tree from the document itself.
    ///
    /// [`Bridge::snapshot`] serves the mirror; this reads through the
    /// adapter's reverse translation instead, which is useful for checking
    /// the two agree and for documents shared with other engine consumers.
    pub fn materialize(&self) -> Value {
        let txn = self.doc().transact();
        adapter::container_value(&txn, &CrdtContainer::Map(self.coordinator.root().clone()))
    }

    /// Reads the value at `path`, or `None` when nothing is there.
    pub fn get(&self, path: &str) -> Result<Option<Value>, BridgeError> {
        let path: Path = path.parse()?;
        Ok(self.coordinator.mirror().value_at(&path))
    }

    /// True when something exists at `path`.
    pub fn contains(&self, path: &str) -> Result<bool, BridgeError> {
        Ok(self.get(path)?.is_some())
    }

    /// Entry count of the container at `path` (char count for text), or
    /// `None` when the path does not address a container.
    pub fn len(&self, path: &str) -> Result<Option<usize>, BridgeError> {
        let path: Path = path.parse()?;
        Ok(self.coordinator.mirror().len_at(&path))
    }

    // --- writes --------------------------------------------------------

    /// Writes `value` at `path`, inserting or overwriting.
    ///
    /// Nested maps, arrays, and text values expand into nested containers.
    /// Overwriting a container with a matching shape merges in place and
    /// preserves container identity; a conflicting container kind is a
    /// [`BridgeError::TypeMismatch`].
    pub fn set(&self, path: &str, value: impl Into<Value>) -> Result<(), BridgeError> {
        let path: Path = path.parse()?;
        let rec = if self.coordinator.mirror().value_at(&path).is_some() {
            ChangeRecord::update(path, value.into())
        } else {
            ChangeRecord::insert(path, value.into())
        };
        self.commit_record(rec)
    }

    /// Inserts `value` at `path`. For arrays this shifts later elements;
    /// the index must not exceed the array's length.
    pub fn insert(&self, path: &str, value: impl Into<Value>) -> Result<(), BridgeError> {
        let path: Path = path.parse()?;
        self.commit_record(ChangeRecord::insert(path, value.into()))
    }

    /// Appends `value` to the array at `path`.
    pub fn push(&self, path: &str, value: impl Into<Value>) -> Result<(), BridgeError> {
        let path: Path = path.parse()?;
        let len = self
            .coordinator
            .mirror()
            .len_at(&path)
            .ok_or_else(|| BridgeError::PathNotFound {
                path: path.to_string(),
            })?;
        self.commit_record(ChangeRecord::insert(path.child(len), value.into()))
    }

    /// Deletes the entry at `path`. Returns `false` when nothing was there.
    pub fn delete(&self, path: &str) -> Result<bool, BridgeError> {
        let path: Path = path.parse()?;
        if self.coordinator.mirror().value_at(&path).is_none() {
            return Ok(false);
        }
        self.commit_record(ChangeRecord::delete(path))?;
        Ok(true)
    }

    /// Moves the array element at `path` (its final segment is the source
    /// index) to index `to` in the same array, preserving its identity.
    pub fn move_entry(&self, path: &str, to: usize) -> Result<(), BridgeError> {
        let path: Path = path.parse()?;
        self.commit_record(ChangeRecord::r#move(path, to))
    }

    // --- transactions --------------------------------------------------

    /// Opens an explicit batch; mutations queue up until [`Bridge::commit`].
    /// Nested begins join the open batch.
    pub fn begin(&self) {
        self.coordinator.begin();
    }

    /// Commits the open batch as one tagged transaction.
    pub fn commit(&self) -> Result<(), BridgeError> {
        if let Some(batch) = self.coordinator.commit()? {
            self.after_commit(batch);
        }
        Ok(())
    }

    /// Aborts the open batch atomically; the document never sees it.
    /// Returns `true` when a batch was rolled back.
    pub fn rollback(&self) -> bool {
        self.coordinator.rollback()
    }

    /// Runs `f` inside a batch: committed on `Ok`, rolled back on `Err`.
    pub fn transact<T>(
        &self,
        f: impl FnOnce(&Bridge) -> Result<T, BridgeError>,
    ) -> Result<T, BridgeError> {
        self.begin();
        match f(self) {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(err) => {
                self.rollback();
                Err(err)
            }
        }
    }

    fn commit_record(&self, rec: ChangeRecord) -> Result<(), BridgeError> {
        if let Some(batch) = self.coordinator.enqueue(rec)? {
            self.after_commit(batch);
        }
        Ok(())
    }

    fn after_commit(&self, batch: CommittedBatch) {
        if let Some(stack) = self.undo.borrow_mut().as_mut() {
            stack.record(
                batch.tag.kind,
                &batch.forward,
                &batch.inverse,
                self.clock.now_millis(),
            );
        }
    }

    // --- bootstrap -----------------------------------------------------

    /// Seeds an empty root with `seed`, a map value, under a bootstrap
    /// origin. Returns `false` without writing when the root is already
    /// populated, which makes racing bootstraps safe.
    pub fn bootstrap(&self, seed: impl Into<Value>) -> Result<bool, BridgeError> {
        match bootstrap::bootstrap(&self.coordinator, seed.into())? {
            Some(batch) => {
                self.after_commit(batch);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // --- undo / redo ---------------------------------------------------

    /// Starts capturing history with the given options. Any previously
    /// captured history is discarded.
    pub fn enable_undo(&self, options: UndoOptions) {
        *self.undo.borrow_mut() = Some(UndoStack::new(options));
    }

    /// Stops capturing and discards the history.
    pub fn disable_undo(&self) {
        *self.undo.borrow_mut() = None;
    }

    pub fn can_undo(&self) -> bool {
        self.undo.borrow().as_ref().is_some_and(UndoStack::can_undo)
    }

    pub fn can_redo(&self) -> bool {
        self.undo.borrow().as_ref().is_some_and(UndoStack::can_redo)
    }

    /// Reverts the newest history entry. Returns `false` when there is
    /// nothing to undo.
    ///
    /// Records invalidated by interleaved remote edits are skipped rather
    /// than failing the whole step.
    pub fn undo(&self) -> Result<bool, BridgeError> {
        let entry = self.undo.borrow_mut().as_mut().and_then(UndoStack::take_undo);
        let Some(entry) = entry else {
            return Ok(false);
        };
        let counterpart = self.apply_history(&entry.records)?;
        if counterpart.is_empty() {
            return Ok(false);
        }
        if let Some(stack) = self.undo.borrow_mut().as_mut() {
            stack.push_redo(counterpart);
        }
        Ok(true)
    }

    /// Re-applies the newest undone entry. Returns `false` when there is
    /// nothing to redo.
    pub fn redo(&self) -> Result<bool, BridgeError> {
        let entry = self.undo.borrow_mut().as_mut().and_then(UndoStack::take_redo);
        let Some(entry) = entry else {
            return Ok(false);
        };
        let counterpart = self.apply_history(&entry.records)?;
        if counterpart.is_empty() {
            return Ok(false);
        }
        if let Some(stack) = self.undo.borrow_mut().as_mut() {
            stack.push_undo(counterpart);
        }
        Ok(true)
    }

    /// Applies history records under an undo-tagged transaction, returning
    /// the inverses of what actually applied, newest-first.
    fn apply_history(&self, records: &[ChangeRecord]) -> Result<Vec<ChangeRecord>, BridgeError> {
        if self.coordinator.in_transaction() {
            return Err(BridgeError::UnsupportedOperation {
                path: "<root>".to_string(),
                reason: "undo/redo inside an open transaction".to_string(),
            });
        }
        let mut applied = Vec::new();
        let mut counterpart = Vec::new();
        for rec in records {
            match self.coordinator.mirror().apply(rec) {
                Ok(inverse) => {
                    applied.push(rec.clone());
                    counterpart.push(inverse);
                }
                Err(err) => {
                    warn!(record = %rec, error = %err, "history record no longer applies; skipping");
                }
            }
        }
        if applied.is_empty() {
            return Ok(Vec::new());
        }
        let tag = self.coordinator.next_tag(OriginKind::Undo);
        self.coordinator.apply_to_doc(&tag, &applied)?;
        counterpart.reverse();
        Ok(counterpart)
    }

    // --- change observation --------------------------------------------

    /// Registers a callback invoked once per committed transaction with the
    /// net change records and their origin. Dropping the returned
    /// subscription unsubscribes.
    ///
    /// Callbacks run while the engine transaction is closing and must not
    /// mutate the bridge.
    pub fn observe_changes(&self, f: impl Fn(&ChangeBatch) + 'static) -> ChangeSubscription {
        self.callbacks.subscribe(f)
    }

    // --- replica sync --------------------------------------------------

    /// This replica's encoded state vector.
    pub fn state_vector(&self) -> Vec<u8> {
        self.doc().transact().state_vector().encode_v1()
    }

    /// Encodes the updates the replica described by `remote_state` is
    /// missing; the full document when `None`.
    pub fn encode_update(&self, remote_state: Option<&[u8]>) -> Result<Vec<u8>, BridgeError> {
        let vector = match remote_state {
            Some(bytes) => StateVector::decode_v1(bytes).map_err(|err| BridgeError::Engine {
                operation: "decode state vector".to_string(),
                reason: err.to_string(),
            })?,
            None => StateVector::default(),
        };
        Ok(self.doc().transact().encode_state_as_update_v1(&vector))
    }

    /// Applies an update received from another replica under a remote
    /// origin; the observer replays it into the mirror.
    pub fn apply_update(&self, update: &[u8]) -> Result<(), BridgeError> {
        let update = Update::decode_v1(update).map_err(|err| BridgeError::Engine {
            operation: "decode update".to_string(),
            reason: err.to_string(),
        })?;
        let tag = self.coordinator.next_tag(OriginKind::Remote);
        let mut txn = self.doc().transact_mut_with(tag.encode());
        txn.apply_update(update).map_err(|err| BridgeError::Engine {
            operation: "apply update".to_string(),
            reason: err.to_string(),
        })
    }

    /// Registers a callback receiving every committed update's encoded
    /// form, suitable for relaying to other replicas. Includes updates this
    /// replica applied from others; relay loops are the caller's concern.
    pub fn observe_updates(
        &self,
        f: impl Fn(&[u8]) + 'static,
    ) -> Result<Subscription, BridgeError> {
        self.doc()
            .observe_update_v1(move |_txn, event| f(&event.update))
            .map_err(|err| BridgeError::Engine {
                operation: "observe updates".to_string(),
                reason: err.to_string(),
            })
    }
}
