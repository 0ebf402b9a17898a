//! The transaction coordinator: batches local mutations and commits them as
//! one origin-tagged native transaction.
//!
//! Every local mutation is validated against and applied to the mirror
//! eagerly, which yields its inverse record. Forward/inverse pairs queue up
//! until commit, when the forward records flow through the adapter inside a
//! single tagged transaction. Rollback replays the queued inverses against
//! the mirror in reverse order; the document was never touched.
//!
//! The native engine commits on drop and has no rollback, so all fallible
//! validation happens in the mirror before the first document write. A
//! failure inside the adapter therefore means mirror and document have
//! diverged; the coordinator rebuilds the mirror from the document and
//! reports the commit as aborted.

use std::cell::{Cell, RefCell};

use tracing::{debug, warn};
use uuid::Uuid;
use yrs::{Doc, MapRef, Transact};

use crate::adapter;
use crate::change::{ChangeRecord, OriginKind, OriginTag};
use crate::errors::BridgeError;
use crate::proxy::Mirror;
use crate::value::CrdtContainer;

/// One committed batch, reported back to the bridge for undo capture and
/// change notification.
#[derive(Debug)]
pub(crate) struct CommittedBatch {
    pub(crate) tag: OriginTag,
    /// Forward records in application order.
    pub(crate) forward: Vec<ChangeRecord>,
    /// Inverse records, index-aligned with `forward`. Applying them in
    /// reverse order undoes the batch.
    pub(crate) inverse: Vec<ChangeRecord>,
}

struct TxnState {
    depth: usize,
    kind: OriginKind,
    queue: Vec<(ChangeRecord, ChangeRecord)>,
}

pub(crate) struct Coordinator {
    doc: Doc,
    root: MapRef,
    bridge_id: Uuid,
    mirror: Mirror,
    state: RefCell<TxnState>,
    seq: Cell<u64>,
}

impl Coordinator {
    pub(crate) fn new(doc: Doc, root: MapRef, mirror: Mirror, bridge_id: Uuid) -> Self {
        Coordinator {
            doc,
            root,
            bridge_id,
            mirror,
            state: RefCell::new(TxnState {
                depth: 0,
                kind: OriginKind::Local,
                queue: Vec::new(),
            }),
            seq: Cell::new(0),
        }
    }

    pub(crate) fn doc(&self) -> &Doc {
        &self.doc
    }

    pub(crate) fn root(&self) -> &MapRef {
        &self.root
    }

    pub(crate) fn bridge_id(&self) -> Uuid {
        self.bridge_id
    }

    pub(crate) fn mirror(&self) -> &Mirror {
        &self.mirror
    }

    pub(crate) fn in_transaction(&self) -> bool {
        self.state.borrow().depth > 0
    }

    /// Mints the next origin tag for a transaction of the given kind.
    pub(crate) fn next_tag(&self, kind: OriginKind) -> OriginTag {
        let seq = self.seq.get();
        self.seq.set(seq + 1);
        OriginTag::new(kind, self.bridge_id, seq)
    }

    /// Opens a batch, or joins the already open one when nested.
    pub(crate) fn begin(&self) {
        self.begin_with_kind(OriginKind::Local);
    }

    /// Opens a batch of a specific origin kind. Nested begins keep the
    /// outermost kind.
    pub(crate) fn begin_with_kind(&self, kind: OriginKind) {
        let mut state = self.state.borrow_mut();
        state.depth += 1;
        if state.depth == 1 {
            state.kind = kind;
        }
    }

    /// Validates one mutation against the mirror, applies it there, and
    /// queues the forward/inverse pair.
    ///
    /// Outside an open batch the record is committed immediately as its own
    /// batch; the returned value carries the committed batch in that case.
    /// A validation failure aborts the whole open batch, backing earlier
    /// queued records out of the mirror.
    pub(crate) fn enqueue(
        &self,
        rec: ChangeRecord,
    ) -> Result<Option<CommittedBatch>, BridgeError> {
        let wrapped = !self.in_transaction();
        if wrapped {
            self.begin();
        }
        match self.mirror.apply(&rec) {
            Ok(inverse) => {
                self.state.borrow_mut().queue.push((rec, inverse));
            }
            Err(err) => {
                self.rollback();
                return Err(err);
            }
        }
        if wrapped { self.commit() } else { Ok(None) }
    }

    /// Closes the current batch. The outermost commit flushes the queued
    /// records to the document in one tagged transaction.
    ///
    /// Returns `None` when the batch is still nested or had nothing to flush.
    pub(crate) fn commit(&self) -> Result<Option<CommittedBatch>, BridgeError> {
        let (kind, queue) = {
            let mut state = self.state.borrow_mut();
            if state.depth == 0 {
                return Err(BridgeError::UnsupportedOperation {
                    path: "<root>".to_string(),
                    reason: "commit without a matching begin".to_string(),
                });
            }
            if state.depth > 1 {
                state.depth -= 1;
                return Ok(None);
            }
            state.depth = 0;
            (state.kind, std::mem::take(&mut state.queue))
        };
        if queue.is_empty() {
            return Ok(None);
        }
        let tag = self.next_tag(kind);
        let (forward, inverse): (Vec<_>, Vec<_>) = queue.into_iter().unzip();
        debug!(origin = %tag.encode(), records = forward.len(), "committing batch");
        self.apply_to_doc(&tag, &forward)?;
        Ok(Some(CommittedBatch {
            tag,
            forward,
            inverse,
        }))
    }

    /// Aborts the current batch atomically: queued mutations are backed out
    /// of the mirror in reverse order and the document stays untouched.
    ///
    /// Returns `true` when an open batch was rolled back.
    pub(crate) fn rollback(&self) -> bool {
        let queue = {
            let mut state = self.state.borrow_mut();
            if state.depth == 0 {
                return false;
            }
            state.depth = 0;
            std::mem::take(&mut state.queue)
        };
        for (forward, inverse) in queue.into_iter().rev() {
            if let Err(err) = self.mirror.apply(&inverse) {
                // Inverses of applied records are valid by construction.
                warn!(record = %forward, error = %err, "rollback inverse failed");
                self.recover_divergence();
                return true;
            }
        }
        true
    }

    /// Applies an already-mirrored batch to the document under `tag`.
    ///
    /// Used by the commit path, and by the undo integration whose batches
    /// are applied to the mirror before they reach the document.
    pub(crate) fn apply_to_doc(
        &self,
        tag: &OriginTag,
        records: &[ChangeRecord],
    ) -> Result<(), BridgeError> {
        let outcome = {
            let mut txn = self.doc.transact_mut_with(tag.encode());
            adapter::apply_records(&mut txn, &self.root, records)
        };
        match outcome {
            Ok(created) => {
                for c in created {
                    self.mirror.bind(&c.path, c.branch);
                }
                Ok(())
            }
            Err(err) => {
                self.recover_divergence();
                Err(BridgeError::TransactionAbort {
                    reason: format!("document write failed: {err}"),
                })
            }
        }
    }

    /// Rebuilds the mirror from the document after the two disagreed.
    ///
    /// Container nodes lose their identity across recovery; this is the
    /// fallback path, not a normal mode of operation.
    pub(crate) fn recover_divergence(&self) {
        warn!("mirror and document diverged; rebuilding mirror from the document");
        let fresh = {
            let txn = self.doc.transact();
            adapter::materialize_node(&txn, &CrdtContainer::Map(self.root.clone()), None)
        };
        self.mirror.reset_from(fresh);
    }
}
