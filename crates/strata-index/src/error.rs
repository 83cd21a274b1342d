//! Error types for the index crate.

use strata_diff::DiffError;
use strata_store::StoreError;
use strata_tree::{CodecError, TreeError};
use strata_types::ObjectId;

/// Errors that can occur while building or looking up spatial indexes.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// A feature payload requested in a batch was not returned by the store.
    #[error("object not found in store: {id}")]
    MissingObject { id: ObjectId },

    /// The index tree does not match the canonical tree it was built from.
    #[error("inconsistent index at {name}: {reason}")]
    Inconsistent { name: String, reason: String },

    /// An index is already registered for this tree and attribute.
    #[error("index already exists: {tree_name}:{attribute}")]
    AlreadyExists { tree_name: String, attribute: String },

    /// No index is registered for this tree and attribute.
    #[error("index not found: {tree_name}:{attribute}")]
    NotFound { tree_name: String, attribute: String },

    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Diff(#[from] DiffError),

    /// The index configuration could not be parsed.
    #[error("invalid index configuration: {0}")]
    Config(#[from] toml::de::Error),
}

/// Convenience alias for index results.
pub type IndexResult<T> = Result<T, IndexError>;
