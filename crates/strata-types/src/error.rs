/// Errors from foundation type operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid hex: {0}")]
    InvalidHex(String),

    #[error("invalid length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("unknown field type tag: {0:#04x}")]
    UnknownFieldType(u8),

    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),
}

/// Result alias for foundation type operations.
pub type TypeResult<T> = Result<T, TypeError>;
