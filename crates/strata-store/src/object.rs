use bytes::Bytes;

/// The kind of object stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    /// Encoded tree revision.
    Tree,
    /// Feature payload: an ordered list of attribute values.
    Feature,
    /// Schema descriptor referenced by node metadata ids.
    FeatureType,
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tree => write!(f, "tree"),
            Self::Feature => write!(f, "feature"),
            Self::FeatureType => write!(f, "feature type"),
        }
    }
}

/// A stored object: kind tag plus encoded bytes.
///
/// The store never interprets `data`. Ids are computed by the writer, since
/// a tree's id is a hash over its logical content rather than over the
/// encoded stream. `data` is reference counted so decoders can keep slices
/// of it alive without copying.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredObject {
    pub kind: ObjectKind,
    pub data: Bytes,
}

impl StoredObject {
    pub fn new(kind: ObjectKind, data: impl Into<Bytes>) -> Self {
        Self {
            kind,
            data: data.into(),
        }
    }

    /// Size of the encoded data in bytes.
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}
