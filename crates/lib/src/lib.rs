//!
//! Ymirror: a bidirectional bridge between plain Rust value trees and
//! Y-CRDT documents.
//!
//! ## Core Concepts
//!
//! The bridge keeps a plain, synchronously readable mirror of one document
//! root in lockstep with the CRDT state, in both directions:
//!
//! * **Bridge (`bridge::Bridge`)**: The facade. Attaches to a named root map
//!   of a document, serves reads from the mirror, and commits writes as
//!   origin-tagged transactions.
//! * **Values (`value::Value`)**: The plain tree vocabulary: primitives plus
//!   maps, arrays, and text, which expand into nested CRDT containers.
//! * **Paths (`path::Path`)**: Dot-notation addressing into the tree, with
//!   numeric segments for array indices.
//! * **Transactions**: `begin`/`commit`/`rollback` batch mutations into one
//!   engine transaction; rollback is atomic and the document never sees an
//!   aborted batch.
//! * **Change observation (`observer::ChangeBatch`)**: One callback per
//!   committed transaction with the net change records and their origin.
//!   The bridge never re-applies its own echo.
//! * **Bootstrap**: Idempotent seeding of an empty root, safe under races.
//! * **Undo/redo (`undo::UndoOptions`)**: History capture of selected
//!   origins with time-window grouping and an optional record filter.
//!
//! ## Example
//!
//! ```
//! use ymirror::{Bridge, Value};
//!
//! let bridge = Bridge::attach(ymirror::y_crdt::Doc::new(), "root");
//! bridge.bootstrap(serde_json::json!({"todos": []}))?;
//! bridge.push("todos", serde_json::json!({"title": "write docs"}))?;
//! assert_eq!(
//!     bridge.get("todos.0.title")?,
//!     Some(Value::from("write docs"))
//! );
//! # Ok::<(), ymirror::BridgeError>(())
//! ```

mod adapter;
mod bootstrap;
mod bridge;
mod change;
mod clock;
mod coordinator;
mod errors;
mod observer;
mod path;
mod proxy;
mod undo;
mod value;

pub use bridge::Bridge;
pub use change::{ChangeKind, ChangeRecord, OriginKind, OriginTag};
pub use clock::{Clock, SystemClock};
pub use errors::BridgeError;
pub use observer::{ChangeBatch, ChangeSubscription};
pub use path::{Path, PathSegment};
pub use undo::UndoOptions;
pub use value::{CrdtContainer, Value};

#[cfg(any(test, feature = "testing"))]
pub use clock::FixedClock;

/// Y-CRDT types re-exported for convenience.
///
/// This module re-exports the `yrs` crate so that client code constructing
/// documents or exchanging updates doesn't need to add `yrs` as a separate
/// dependency.
pub mod y_crdt {
    pub use yrs::*;
}

/// Result type used throughout the library.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for the library.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Structured bridge errors.
    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

impl Error {
    /// Check if this error indicates a missing path.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Bridge(err) if err.is_not_found())
    }

    /// Check if this error is a container-kind type mismatch.
    pub fn is_type_mismatch(&self) -> bool {
        matches!(self, Error::Bridge(err) if err.is_type_mismatch())
    }

    /// Check if this error is a mid-batch transaction abort.
    pub fn is_transaction_abort(&self) -> bool {
        matches!(self, Error::Bridge(err) if err.is_transaction_abort())
    }
}
