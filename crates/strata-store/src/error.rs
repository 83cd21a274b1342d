use strata_types::ObjectId;

use crate::object::ObjectKind;

/// Errors from object store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested object was not found.
    #[error("object not found: {0}")]
    NotFound(ObjectId),

    /// An object was found but has a different kind than the caller expected.
    #[error("object {id} is a {actual}, expected a {expected}")]
    KindMismatch {
        id: ObjectId,
        expected: ObjectKind,
        actual: ObjectKind,
    },

    /// Attempted to write under the null object id.
    #[error("cannot store object with null ID")]
    NullObjectId,

    /// I/O error from the underlying storage backend. Not raised by the
    /// in-memory store; file and network backends outside this crate map
    /// their failures here.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Backend-specific failure that has no better representation, for
    /// backends implemented outside this crate.
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
