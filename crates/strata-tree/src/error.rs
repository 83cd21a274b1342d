use strata_store::StoreError;
use strata_types::ObjectId;

/// Errors decoding the binary tree format.
///
/// All decode errors are fatal: the stream is either truncated or was not
/// produced by a compatible encoder.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("invalid tree magic: {0:02x?}")]
    InvalidMagic(Vec<u8>),

    #[error("unsupported tree format version: {0}")]
    UnsupportedVersion(u8),

    #[error("truncated tree record at offset {offset}: {reason}")]
    Truncated { offset: usize, reason: String },

    #[error("{section} offset {offset} out of range (valid {min}..={max})")]
    OffsetOutOfRange {
        section: &'static str,
        offset: usize,
        min: usize,
        max: usize,
    },

    #[error("malformed tree record at offset {offset}: {reason}")]
    Malformed { offset: usize, reason: String },
}

/// Result alias for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors from the tree model, tree builders and tree persistence.
#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("duplicate node name {0:?} in tree")]
    DuplicateName(String),

    #[error("node {name:?} rejected: {reason}")]
    InvalidNode { name: String, reason: String },

    #[error("cannot encode {kind}: {reason}")]
    Encode { kind: &'static str, reason: String },

    #[error("cannot decode {kind} {id}: {reason}")]
    Decode {
        kind: &'static str,
        id: ObjectId,
        reason: String,
    },
}

/// Result alias for tree operations.
pub type TreeResult<T> = Result<T, TreeError>;
