use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use strata_types::{Envelope, Funnel, ObjectId, Value};

use crate::codec::extra::ExtraSection;
use crate::error::CodecResult;

/// Open attribute mapping carried by a node.
pub type ExtraData = BTreeMap<String, Value>;

static NO_EXTRA_DATA: ExtraData = BTreeMap::new();

/// What a node points at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeKind {
    Tree,
    Feature,
}

impl NodeKind {
    pub(crate) fn tag(self) -> u8 {
        match self {
            NodeKind::Tree => 1,
            NodeKind::Feature => 2,
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Tree => f.write_str("tree"),
            NodeKind::Feature => f.write_str("feature"),
        }
    }
}

#[derive(Clone)]
enum Extra {
    None,
    Owned(Arc<ExtraData>),
    Lazy(Arc<LazyExtra>),
}

/// Extra data that still lives in an encoded buffer.
pub(crate) struct LazyExtra {
    section: Arc<ExtraSection>,
    offset: usize,
    cache: OnceLock<CodecResult<ExtraData>>,
}

impl LazyExtra {
    pub(crate) fn new(section: Arc<ExtraSection>, offset: usize) -> Self {
        Self {
            section,
            offset,
            cache: OnceLock::new(),
        }
    }

    fn get(&self) -> CodecResult<&ExtraData> {
        self.cache
            .get_or_init(|| self.section.decode_at(self.offset))
            .as_ref()
            .map_err(Clone::clone)
    }
}

/// One child of a tree revision: a feature or a sub-tree reference.
///
/// Nodes are cheap to clone. A node decoded from an encoded tree keeps its
/// `extra_data` in the shared buffer until first access.
#[derive(Clone)]
pub struct Node {
    name: Arc<str>,
    object_id: ObjectId,
    metadata_id: Option<ObjectId>,
    kind: NodeKind,
    bounds: Option<Envelope>,
    extra: Extra,
}

impl Node {
    pub fn new(
        kind: NodeKind,
        name: impl Into<Arc<str>>,
        object_id: ObjectId,
        metadata_id: Option<ObjectId>,
        bounds: Option<Envelope>,
    ) -> Self {
        Self {
            name: name.into(),
            object_id,
            metadata_id,
            kind,
            bounds,
            extra: Extra::None,
        }
    }

    pub fn feature(name: impl Into<Arc<str>>, object_id: ObjectId, bounds: Option<Envelope>) -> Self {
        Self::new(NodeKind::Feature, name, object_id, None, bounds)
    }

    pub fn tree(name: impl Into<Arc<str>>, object_id: ObjectId, bounds: Option<Envelope>) -> Self {
        Self::new(NodeKind::Tree, name, object_id, None, bounds)
    }

    pub fn with_metadata_id(mut self, metadata_id: Option<ObjectId>) -> Self {
        self.metadata_id = metadata_id;
        self
    }

    pub fn with_bounds(mut self, bounds: Option<Envelope>) -> Self {
        self.bounds = bounds;
        self
    }

    /// Replace the extra data. An empty map clears it.
    pub fn with_extra_data(mut self, extra: ExtraData) -> Self {
        self.extra = if extra.is_empty() {
            Extra::None
        } else {
            Extra::Owned(Arc::new(extra))
        };
        self
    }

    pub(crate) fn with_lazy_extra(mut self, lazy: LazyExtra) -> Self {
        self.extra = Extra::Lazy(Arc::new(lazy));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn object_id(&self) -> ObjectId {
        self.object_id
    }

    pub fn metadata_id(&self) -> Option<ObjectId> {
        self.metadata_id
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn is_tree(&self) -> bool {
        self.kind == NodeKind::Tree
    }

    pub fn bounds(&self) -> Option<&Envelope> {
        self.bounds.as_ref()
    }

    /// Returns `true` without decoding anything.
    pub fn has_extra_data(&self) -> bool {
        !matches!(self.extra, Extra::None)
    }

    /// The extra data, decoded and cached on first access for lazy nodes.
    pub fn extra_data(&self) -> CodecResult<&ExtraData> {
        match &self.extra {
            Extra::None => Ok(&NO_EXTRA_DATA),
            Extra::Owned(map) => Ok(map),
            Extra::Lazy(lazy) => lazy.get(),
        }
    }

    pub fn extra(&self, key: &str) -> CodecResult<Option<&Value>> {
        Ok(self.extra_data()?.get(key))
    }

    /// Canonical hash contribution. Bounds are derived from the referenced
    /// content and do not take part.
    pub(crate) fn funnel(&self, f: &mut Funnel) -> CodecResult<()> {
        f.put_u8(self.kind.tag());
        f.put_str(&self.name);
        f.put_id(&self.object_id);
        match &self.metadata_id {
            Some(md) => {
                f.put_u8(1);
                f.put_id(md);
            }
            None => f.put_u8(0),
        }
        let extra = self.extra_data()?;
        f.put_u32(extra.len() as u32);
        for (k, v) in extra {
            f.put_str(k);
            v.funnel(f);
        }
        Ok(())
    }

    fn extra_eq(&self, other: &Node) -> bool {
        match (&self.extra, &other.extra) {
            (Extra::None, Extra::None) => true,
            (Extra::Owned(a), Extra::Owned(b)) if Arc::ptr_eq(a, b) => true,
            (Extra::Lazy(a), Extra::Lazy(b)) if Arc::ptr_eq(a, b) => true,
            _ => match (self.extra_data(), other.extra_data()) {
                (Ok(a), Ok(b)) => a == b,
                _ => false,
            },
        }
    }
}

/// Content equality: kind, name, ids and extra data. Bounds are derived
/// data and are compared separately where needed.
impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.object_id == other.object_id
            && self.metadata_id == other.metadata_id
            && self.name == other.name
            && self.extra_eq(other)
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let extra = match &self.extra {
            Extra::None => "none",
            Extra::Owned(_) => "owned",
            Extra::Lazy(lazy) if lazy.cache.get().is_some() => "decoded",
            Extra::Lazy(_) => "lazy",
        };
        f.debug_struct("Node")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("object_id", &self.object_id)
            .field("metadata_id", &self.metadata_id)
            .field("bounds", &self.bounds)
            .field("extra", &extra)
            .finish()
    }
}
