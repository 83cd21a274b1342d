//! Error types for the diff crate.

use strata_tree::TreeError;
use strata_types::ObjectId;

/// Errors that can occur while walking a diff.
#[derive(Debug, thiserror::Error)]
pub enum DiffError {
    /// A bucket referenced by one of the trees is not in the store.
    #[error("tree not found: {0}")]
    MissingTree(ObjectId),

    /// Loading or decoding a tree failed.
    #[error(transparent)]
    Tree(#[from] TreeError),
}

/// Convenience alias for diff results.
pub type DiffResult<T> = Result<T, DiffError>;
