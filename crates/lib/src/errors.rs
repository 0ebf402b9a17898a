//! Error types for bridge operations.
//!
//! Local mutation errors are fail-fast: they abort the enclosing transaction
//! and surface synchronously at the mutation call site. Remote replay errors
//! are fail-soft: they are logged and only the affected container's replay is
//! skipped, so they never appear in this taxonomy.

use thiserror::Error;

/// Structured error types for bridge operations.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum BridgeError {
    /// A value is incompatible with the container kind bound at a path.
    #[error("type mismatch at '{path}': expected {expected}, found {actual}")]
    TypeMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    /// A structurally invalid request, e.g. a move on a map container.
    #[error("unsupported operation at '{path}': {reason}")]
    UnsupportedOperation { path: String, reason: String },

    /// An attempt to link a CRDT container that is already linked elsewhere
    /// in the document.
    #[error("container is already linked at another path (target '{path}')")]
    AlreadyLinked { path: String },

    /// Adapter translation failed mid-batch; the batch was rolled back.
    #[error("transaction aborted: {reason}")]
    TransactionAbort { reason: String },

    /// No value exists at the addressed path.
    #[error("path not found: '{path}'")]
    PathNotFound { path: String },

    /// An array index is outside the container's bounds.
    #[error("index {index} out of bounds for array of length {len} at '{path}'")]
    IndexOutOfBounds {
        path: String,
        index: usize,
        len: usize,
    },

    /// A path string failed to parse.
    #[error("invalid path: {reason}")]
    InvalidPath { reason: String },

    /// A CRDT engine operation failed (decode, apply, subscribe).
    #[error("CRDT engine operation failed: {operation} - {reason}")]
    Engine { operation: String, reason: String },
}

impl BridgeError {
    /// Check if this error is a container-kind type mismatch.
    pub fn is_type_mismatch(&self) -> bool {
        matches!(self, BridgeError::TypeMismatch { .. })
    }

    /// Check if this error classifies as a structurally invalid request.
    ///
    /// Covers [`BridgeError::UnsupportedOperation`] itself plus the more
    /// specific variants that refine it.
    pub fn is_unsupported_operation(&self) -> bool {
        matches!(
            self,
            BridgeError::UnsupportedOperation { .. }
                | BridgeError::AlreadyLinked { .. }
                | BridgeError::IndexOutOfBounds { .. }
        )
    }

    /// Check if this error is a mid-batch transaction abort.
    pub fn is_transaction_abort(&self) -> bool {
        matches!(self, BridgeError::TransactionAbort { .. })
    }

    /// Check if this error indicates a missing path.
    pub fn is_not_found(&self) -> bool {
        matches!(self, BridgeError::PathNotFound { .. })
    }

    /// Check if this error is path-syntax related.
    pub fn is_invalid_path(&self) -> bool {
        matches!(self, BridgeError::InvalidPath { .. })
    }

    /// Check if this error originated in the CRDT engine surface.
    pub fn is_engine_error(&self) -> bool {
        matches!(self, BridgeError::Engine { .. })
    }
}
