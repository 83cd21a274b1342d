use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, LazyLock, OnceLock};

use strata_types::{ContentHasher, Envelope, ObjectId};

use crate::bucket::Bucket;
use crate::codec::nodeset::NodeSetView;
use crate::error::{CodecResult, TreeError, TreeResult};
use crate::node::Node;

static NO_BUCKETS: BTreeMap<u32, Bucket> = BTreeMap::new();

static EMPTY: LazyLock<RevTree> = LazyLock::new(|| {
    let body = TreeBody::Leaf {
        trees: NodeList::Built(Vec::new()),
        features: NodeList::Built(Vec::new()),
    };
    // hashing an empty body touches no extra data and cannot fail
    let id = hash_content(0, 0, &[], &[], &NO_BUCKETS).unwrap_or(ObjectId::NULL);
    RevTree::from_parts(id, 0, 0, body)
});

/// A node list that is either built in memory or still encoded.
pub(crate) enum NodeList {
    Built(Vec<Node>),
    Encoded {
        view: NodeSetView,
        nodes: OnceLock<Vec<Node>>,
    },
}

impl NodeList {
    pub(crate) fn encoded(view: NodeSetView) -> Self {
        NodeList::Encoded {
            view,
            nodes: OnceLock::new(),
        }
    }

    fn as_slice(&self) -> &[Node] {
        match self {
            NodeList::Built(nodes) => nodes,
            NodeList::Encoded { view, nodes } => nodes.get_or_init(|| view.materialize()),
        }
    }

    fn len(&self) -> usize {
        match self {
            NodeList::Built(nodes) => nodes.len(),
            NodeList::Encoded { view, .. } => view.len(),
        }
    }
}

pub(crate) enum TreeBody {
    Leaf { trees: NodeList, features: NodeList },
    Buckets(BTreeMap<u32, Bucket>),
}

struct TreeInner {
    id: ObjectId,
    size: u64,
    num_trees: u32,
    body: TreeBody,
}

/// An immutable tree revision.
///
/// Either a flat, name-sorted list of tree and feature nodes, or a set of
/// buckets indexed by shard number, never both. Cloning shares the
/// underlying revision, so unchanged sub-trees are reused by reference
/// across revisions.
#[derive(Clone)]
pub struct RevTree {
    inner: Arc<TreeInner>,
}

impl RevTree {
    /// The shared empty tree.
    pub fn empty() -> RevTree {
        EMPTY.clone()
    }

    pub fn empty_id() -> ObjectId {
        EMPTY.id()
    }

    /// Build a flat tree. Nodes are sorted by name; names must be unique
    /// across both lists.
    ///
    /// `size` counts features in the whole subtree (a tree node contributes
    /// its own size) and `num_trees` counts every descendant tree.
    pub fn leaf(
        size: u64,
        num_trees: u32,
        mut trees: Vec<Node>,
        mut features: Vec<Node>,
    ) -> TreeResult<RevTree> {
        if size == 0 && num_trees == 0 && trees.is_empty() && features.is_empty() {
            return Ok(Self::empty());
        }
        trees.sort_by(|a, b| a.name().cmp(b.name()));
        features.sort_by(|a, b| a.name().cmp(b.name()));
        check_unique(&trees, &features)?;
        let id = hash_content(size, num_trees, &trees, &features, &NO_BUCKETS)?;
        let body = TreeBody::Leaf {
            trees: NodeList::Built(trees),
            features: NodeList::Built(features),
        };
        Ok(Self::from_parts(id, size, num_trees, body))
    }

    /// Build a bucketed tree.
    pub fn bucketed(size: u64, num_trees: u32, buckets: BTreeMap<u32, Bucket>) -> RevTree {
        if buckets.is_empty() {
            return Self::empty();
        }
        // bucket hashing reads only indexes and ids
        let id = hash_content(size, num_trees, &[], &[], &buckets).unwrap_or(ObjectId::NULL);
        Self::from_parts(id, size, num_trees, TreeBody::Buckets(buckets))
    }

    pub(crate) fn from_parts(id: ObjectId, size: u64, num_trees: u32, body: TreeBody) -> RevTree {
        RevTree {
            inner: Arc::new(TreeInner {
                id,
                size,
                num_trees,
                body,
            }),
        }
    }

    pub fn id(&self) -> ObjectId {
        self.inner.id
    }

    /// Number of features in the whole subtree.
    pub fn size(&self) -> u64 {
        self.inner.size
    }

    /// Number of descendant trees.
    pub fn num_trees(&self) -> u32 {
        self.inner.num_trees
    }

    pub fn is_empty(&self) -> bool {
        self.inner.size == 0
            && self.inner.num_trees == 0
            && match &self.inner.body {
                TreeBody::Leaf { trees, features } => trees.len() == 0 && features.len() == 0,
                TreeBody::Buckets(b) => b.is_empty(),
            }
    }

    /// `true` for flat trees, including the empty tree.
    pub fn is_leaf(&self) -> bool {
        matches!(self.inner.body, TreeBody::Leaf { .. })
    }

    /// Direct tree children, sorted by name.
    pub fn trees(&self) -> &[Node] {
        match &self.inner.body {
            TreeBody::Leaf { trees, .. } => trees.as_slice(),
            TreeBody::Buckets(_) => &[],
        }
    }

    /// Direct feature children, sorted by name.
    pub fn features(&self) -> &[Node] {
        match &self.inner.body {
            TreeBody::Leaf { features, .. } => features.as_slice(),
            TreeBody::Buckets(_) => &[],
        }
    }

    /// Number of direct node children, without materializing them.
    pub fn node_count(&self) -> usize {
        match &self.inner.body {
            TreeBody::Leaf { trees, features } => trees.len() + features.len(),
            TreeBody::Buckets(_) => 0,
        }
    }

    pub fn buckets(&self) -> &BTreeMap<u32, Bucket> {
        match &self.inner.body {
            TreeBody::Buckets(buckets) => buckets,
            TreeBody::Leaf { .. } => &NO_BUCKETS,
        }
    }

    /// Trees and features merged into a single name-sorted list.
    pub fn children(&self) -> Vec<Node> {
        let (trees, features) = (self.trees(), self.features());
        let mut out = Vec::with_capacity(trees.len() + features.len());
        let (mut i, mut j) = (0, 0);
        while i < trees.len() && j < features.len() {
            if trees[i].name() <= features[j].name() {
                out.push(trees[i].clone());
                i += 1;
            } else {
                out.push(features[j].clone());
                j += 1;
            }
        }
        out.extend_from_slice(&trees[i..]);
        out.extend_from_slice(&features[j..]);
        out
    }

    /// Look up a direct child node by name.
    pub fn node(&self, name: &str) -> Option<&Node> {
        fn find<'a>(nodes: &'a [Node], name: &str) -> Option<&'a Node> {
            nodes
                .binary_search_by(|n| n.name().cmp(name))
                .ok()
                .map(|i| &nodes[i])
        }
        find(self.trees(), name).or_else(|| find(self.features(), name))
    }

    /// Union of the bounds of all direct children.
    pub fn bounds(&self) -> Option<Envelope> {
        match &self.inner.body {
            TreeBody::Buckets(buckets) => {
                Envelope::union_all(buckets.values().map(|b| b.bounds.as_ref()))
            }
            TreeBody::Leaf { .. } => Envelope::union_all(
                self.trees()
                    .iter()
                    .chain(self.features())
                    .map(Node::bounds),
            ),
        }
    }

    /// Recompute the content hash from the logical content.
    pub fn compute_id(&self) -> CodecResult<ObjectId> {
        hash_content(
            self.size(),
            self.num_trees(),
            self.trees(),
            self.features(),
            self.buckets(),
        )
    }

    /// Identity, not equality: both handles share one revision.
    pub fn ptr_eq(a: &RevTree, b: &RevTree) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }
}

impl PartialEq for RevTree {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl fmt::Debug for RevTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("RevTree");
        s.field("id", &self.id())
            .field("size", &self.size())
            .field("num_trees", &self.num_trees());
        match &self.inner.body {
            TreeBody::Leaf { trees, features } => s
                .field("trees", &trees.len())
                .field("features", &features.len()),
            TreeBody::Buckets(b) => s.field("buckets", &b.len()),
        };
        s.finish()
    }
}

fn check_unique(trees: &[Node], features: &[Node]) -> TreeResult<()> {
    for nodes in [trees, features] {
        if let Some(w) = nodes.windows(2).find(|w| w[0].name() == w[1].name()) {
            return Err(TreeError::DuplicateName(w[0].name().to_string()));
        }
    }
    for t in trees {
        if features
            .binary_search_by(|f| f.name().cmp(t.name()))
            .is_ok()
        {
            return Err(TreeError::DuplicateName(t.name().to_string()));
        }
    }
    Ok(())
}

/// Content hash over `(size, num_trees, sorted nodes | buckets)`.
///
/// Only logical content is funneled, so any encoding of the same tree hashes
/// to the same id.
pub(crate) fn hash_content(
    size: u64,
    num_trees: u32,
    trees: &[Node],
    features: &[Node],
    buckets: &BTreeMap<u32, Bucket>,
) -> CodecResult<ObjectId> {
    let mut f = ContentHasher::TREE.funnel();
    f.put_u64(size);
    f.put_u32(num_trees);
    f.put_u32(trees.len() as u32);
    for node in trees {
        node.funnel(&mut f)?;
    }
    f.put_u32(features.len() as u32);
    for node in features {
        node.funnel(&mut f)?;
    }
    f.put_u32(buckets.len() as u32);
    for (index, bucket) in buckets {
        f.put_u32(*index);
        f.put_id(&bucket.object_id);
    }
    Ok(f.finish())
}
