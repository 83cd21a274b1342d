use strata_types::{Envelope, ObjectId};

/// One shard of a large tree: the sub-tree holding every child whose
/// clustering key falls into `index`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bucket {
    pub index: u32,
    pub object_id: ObjectId,
    /// Union of the bounds of everything below this bucket.
    pub bounds: Option<Envelope>,
}

impl Bucket {
    pub fn new(index: u32, object_id: ObjectId, bounds: Option<Envelope>) -> Self {
        Self {
            index,
            object_id,
            bounds,
        }
    }
}
