//! Undo/redo capture for committed batches.
//!
//! The stack records change batches by their inverse records; applying an
//! entry's records through the bridge rolls the document back one step, and
//! the inverses produced by that application become the matching redo entry.
//! Batches committed close together in time merge into one entry, controlled
//! by [`UndoOptions::capture_timeout_ms`].
//!
//! Recording is pure bookkeeping; the bridge applies entries under an
//! undo-tagged transaction so they are never captured again.

use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

use crate::change::{ChangeRecord, OriginKind};

/// Configuration for the undo integration.
#[derive(Clone)]
pub struct UndoOptions {
    /// Batches committed within this many milliseconds of the newest entry
    /// merge into it. Zero disables grouping.
    pub capture_timeout_ms: u64,
    /// Which origins are captured. Defaults to local edits only; remote and
    /// bootstrap batches can be opted in.
    pub tracked_origins: HashSet<OriginKind>,
    /// Optional per-record capture filter. Records it rejects are left out
    /// of the history and stay in place when the entry is applied.
    pub filter: Option<Rc<dyn Fn(&ChangeRecord) -> bool>>,
}

impl Default for UndoOptions {
    fn default() -> Self {
        UndoOptions {
            capture_timeout_ms: 500,
            tracked_origins: HashSet::from([OriginKind::Local]),
            filter: None,
        }
    }
}

impl fmt::Debug for UndoOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UndoOptions")
            .field("capture_timeout_ms", &self.capture_timeout_ms)
            .field("tracked_origins", &self.tracked_origins)
            .field("filter", &self.filter.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

/// One history step. Applying `records` in order reverses the step.
#[derive(Debug, Clone)]
pub(crate) struct UndoEntry {
    pub(crate) records: Vec<ChangeRecord>,
    captured_at: u64,
    /// Sealed entries never absorb later batches, regardless of timing.
    sealed: bool,
}

pub(crate) struct UndoStack {
    options: UndoOptions,
    undo: Vec<UndoEntry>,
    redo: Vec<UndoEntry>,
}

impl UndoStack {
    pub(crate) fn new(options: UndoOptions) -> Self {
        UndoStack {
            options,
            undo: Vec::new(),
            redo: Vec::new(),
        }
    }

    pub(crate) fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub(crate) fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    /// True when batches of this origin are captured.
    pub(crate) fn tracks(&self, origin: OriginKind) -> bool {
        self.options.tracked_origins.contains(&origin)
    }

    /// Records one committed batch.
    ///
    /// `forward` and `inverse` are index-aligned, both in application order.
    /// Untracked origins and fully filtered batches are ignored; anything
    /// captured clears the redo stack.
    pub(crate) fn record(
        &mut self,
        origin: OriginKind,
        forward: &[ChangeRecord],
        inverse: &[ChangeRecord],
        now_ms: u64,
    ) {
        if !self.options.tracked_origins.contains(&origin) {
            return;
        }
        let mut records: Vec<ChangeRecord> = forward
            .iter()
            .zip(inverse)
            .filter(|(fwd, _)| match &self.options.filter {
                Some(filter) => filter(fwd),
                None => true,
            })
            .map(|(_, inv)| inv.clone())
            .collect();
        if records.is_empty() {
            return;
        }
        // Inverses apply newest-first.
        records.reverse();

        self.redo.clear();
        let merge = self.undo.last().is_some_and(|last| {
            !last.sealed
                && self.options.capture_timeout_ms > 0
                && now_ms.saturating_sub(last.captured_at) <= self.options.capture_timeout_ms
        });
        if merge {
            if let Some(last) = self.undo.last_mut() {
                records.extend(std::mem::take(&mut last.records));
                last.records = records;
                last.captured_at = now_ms;
                return;
            }
        }
        self.undo.push(UndoEntry {
            records,
            captured_at: now_ms,
            sealed: false,
        });
    }

    pub(crate) fn take_undo(&mut self) -> Option<UndoEntry> {
        self.undo.pop()
    }

    pub(crate) fn take_redo(&mut self) -> Option<UndoEntry> {
        self.redo.pop()
    }

    /// Pushes the counterpart produced by applying an undo entry.
    pub(crate) fn push_redo(&mut self, records: Vec<ChangeRecord>) {
        self.redo.push(UndoEntry {
            records,
            captured_at: 0,
            sealed: true,
        });
    }

    /// Pushes the counterpart produced by applying a redo entry. Sealed, so
    /// later edits never merge into a redone step.
    pub(crate) fn push_undo(&mut self, records: Vec<ChangeRecord>) {
        self.undo.push(UndoEntry {
            records,
            captured_at: 0,
            sealed: true,
        });
    }
}
