//! Incremental tree builder.
//!
//! A [`TreeBuilder`] holds a mutable DAG over an optional original tree.
//! Subtrees stay as references to stored trees until an operation needs to
//! look inside them, so editing a few nodes of a large tree only loads and
//! rewrites the trees on the paths to those nodes.

use std::collections::BTreeMap;
use std::sync::Arc;

use strata_store::{ObjectStore, StoredObject, NOOP_LISTENER};
use strata_types::{Envelope, ObjectId};
use tracing::{debug, trace};

use crate::bucket::Bucket;
use crate::cluster::ClusteringStrategy;
use crate::codec::precision::quantize;
use crate::error::{TreeError, TreeResult};
use crate::node::Node;
use crate::store_ext::{tree_object, TreeStore};
use crate::tree::RevTree;

struct Ctx<'a, S> {
    store: &'a dyn ObjectStore,
    strategy: &'a S,
}

impl<S: ClusteringStrategy> Ctx<'_, S> {
    fn load(&self, id: &ObjectId) -> TreeResult<RevTree> {
        self.store.get_tree(id)
    }

    fn bucket(&self, node: &Node, path: &[u32]) -> TreeResult<u32> {
        self.strategy
            .bucket(node, path)
            .ok_or_else(|| TreeError::InvalidNode {
                name: node.name().to_string(),
                reason: format!("no bucket at depth {}", path.len()),
            })
    }

    /// `(size, num_trees)` contributed by one node.
    fn counts(&self, node: &Node) -> TreeResult<(u64, u32)> {
        if node.is_tree() {
            let tree = self.load(&node.object_id())?;
            Ok((tree.size(), tree.num_trees() + 1))
        } else {
            Ok((1, 0))
        }
    }
}

/// A stored tree not touched since it was loaded or built.
struct StoredTree {
    id: ObjectId,
    bounds: Option<Envelope>,
    tree: Option<RevTree>,
}

impl StoredTree {
    fn load<S: ClusteringStrategy>(&mut self, cx: &Ctx<'_, S>) -> TreeResult<&RevTree> {
        let tree = match self.tree.take() {
            Some(tree) => tree,
            None => cx.load(&self.id)?,
        };
        Ok(self.tree.insert(tree))
    }
}

enum Body {
    Leaf(BTreeMap<String, Node>),
    Buckets(BTreeMap<u32, DagNode>),
}

enum DagNode {
    Stored(StoredTree),
    Mutable(Body),
}

impl DagNode {
    fn empty() -> Self {
        DagNode::Mutable(Body::Leaf(BTreeMap::new()))
    }

    fn unloaded(id: ObjectId, bounds: Option<Envelope>) -> Self {
        DagNode::Stored(StoredTree {
            id,
            bounds,
            tree: None,
        })
    }

    fn loaded(tree: RevTree, bounds: Option<Envelope>) -> Self {
        DagNode::Stored(StoredTree {
            id: tree.id(),
            bounds,
            tree: Some(tree),
        })
    }

    fn is_empty_leaf(&self) -> bool {
        matches!(self, DagNode::Mutable(Body::Leaf(nodes)) if nodes.is_empty())
    }

    /// Mutable view, expanding a stored tree one level.
    fn body<S: ClusteringStrategy>(&mut self, cx: &Ctx<'_, S>) -> TreeResult<&mut Body> {
        if let DagNode::Stored(stored) = self {
            let tree = stored.load(cx)?;
            let body = if tree.is_leaf() {
                Body::Leaf(
                    tree.trees()
                        .iter()
                        .chain(tree.features())
                        .map(|n| (n.name().to_string(), n.clone()))
                        .collect(),
                )
            } else {
                Body::Buckets(
                    tree.buckets()
                        .values()
                        .map(|b| (b.index, DagNode::unloaded(b.object_id, b.bounds)))
                        .collect(),
                )
            };
            *self = DagNode::Mutable(body);
        }
        match self {
            DagNode::Mutable(body) => Ok(body),
            DagNode::Stored(_) => unreachable!(),
        }
    }

    fn put<S: ClusteringStrategy>(
        &mut self,
        cx: &Ctx<'_, S>,
        path: &mut Vec<u32>,
        node: Node,
    ) -> TreeResult<bool> {
        let limit = cx.strategy.leaf_limit(path);
        let changed = match self.body(cx)? {
            Body::Leaf(nodes) => {
                let changed = match nodes.get(node.name()) {
                    Some(existing) => existing != &node || !same_bounds(existing, &node),
                    None => true,
                };
                if changed {
                    nodes.insert(node.name().to_string(), node);
                }
                if nodes.len() <= limit {
                    return Ok(changed);
                }
                changed
            }
            Body::Buckets(children) => {
                let index = cx.bucket(&node, path)?;
                path.push(index);
                let changed = children
                    .entry(index)
                    .or_insert_with(DagNode::empty)
                    .put(cx, path, node)?;
                path.pop();
                return Ok(changed);
            }
        };
        self.split(cx, path)?;
        Ok(changed)
    }

    /// Shard an oversized flat tree. It stays flat when the strategy has no
    /// deeper level for some of its nodes.
    fn split<S: ClusteringStrategy>(&mut self, cx: &Ctx<'_, S>, path: &mut Vec<u32>) -> TreeResult<()> {
        let Body::Leaf(nodes) = self.body(cx)? else {
            return Ok(());
        };
        let mut assigned = Vec::with_capacity(nodes.len());
        for node in nodes.values() {
            match cx.strategy.bucket(node, path) {
                Some(index) => assigned.push(index),
                None => return Ok(()),
            }
        }
        let mut groups: BTreeMap<u32, BTreeMap<String, Node>> = BTreeMap::new();
        for ((name, node), index) in std::mem::take(nodes).into_iter().zip(assigned) {
            groups.entry(index).or_default().insert(name, node);
        }
        trace!(depth = path.len(), buckets = groups.len(), "splitting flat tree");

        let mut children = BTreeMap::new();
        for (index, group) in groups {
            path.push(index);
            let oversized = group.len() > cx.strategy.leaf_limit(path);
            let mut child = DagNode::Mutable(Body::Leaf(group));
            if oversized {
                child.split(cx, path)?;
            }
            path.pop();
            children.insert(index, child);
        }
        *self = DagNode::Mutable(Body::Buckets(children));
        Ok(())
    }

    fn remove<S: ClusteringStrategy>(
        &mut self,
        cx: &Ctx<'_, S>,
        path: &mut Vec<u32>,
        node: &Node,
    ) -> TreeResult<bool> {
        match self.body(cx)? {
            Body::Leaf(nodes) => return Ok(nodes.remove(node.name()).is_some()),
            Body::Buckets(children) => {
                let Some(index) = cx.strategy.bucket(node, path) else {
                    return Ok(false);
                };
                let Some(child) = children.get_mut(&index) else {
                    return Ok(false);
                };
                path.push(index);
                let removed = child.remove(cx, path, node)?;
                path.pop();
                if !removed {
                    return Ok(false);
                }
                if child.is_empty_leaf() {
                    children.remove(&index);
                }
            }
        }
        self.collapse_if_small(cx, path)?;
        Ok(true)
    }

    /// Merge a bucketed tree back into a flat one once it fits.
    fn collapse_if_small<S: ClusteringStrategy>(&mut self, cx: &Ctx<'_, S>, path: &[u32]) -> TreeResult<()> {
        if !matches!(self, DagNode::Mutable(Body::Buckets(_)))
            || self.entry_count(cx)? > cx.strategy.leaf_limit(path)
        {
            return Ok(());
        }
        let mut nodes = Vec::new();
        std::mem::replace(self, DagNode::empty()).collect_into(cx, &mut nodes)?;
        trace!(depth = path.len(), entries = nodes.len(), "collapsing buckets");
        *self = DagNode::Mutable(Body::Leaf(
            nodes
                .into_iter()
                .map(|n| (n.name().to_string(), n))
                .collect(),
        ));
        Ok(())
    }

    /// Number of nodes held in flat trees anywhere below.
    fn entry_count<S: ClusteringStrategy>(&mut self, cx: &Ctx<'_, S>) -> TreeResult<usize> {
        match self {
            DagNode::Stored(stored) => stored_entry_count(cx, stored.load(cx)?),
            DagNode::Mutable(Body::Leaf(nodes)) => Ok(nodes.len()),
            DagNode::Mutable(Body::Buckets(children)) => {
                children.values_mut().map(|c| c.entry_count(cx)).sum()
            }
        }
    }

    fn collect_into<S: ClusteringStrategy>(self, cx: &Ctx<'_, S>, out: &mut Vec<Node>) -> TreeResult<()> {
        match self {
            DagNode::Stored(mut stored) => collect_stored(cx, stored.load(cx)?, out),
            DagNode::Mutable(Body::Leaf(nodes)) => {
                out.extend(nodes.into_values());
                Ok(())
            }
            DagNode::Mutable(Body::Buckets(children)) => {
                for child in children.into_values() {
                    child.collect_into(cx, out)?;
                }
                Ok(())
            }
        }
    }

    /// Build every changed tree below, queueing it in `out` (children first),
    /// and turn this node back into a stored reference.
    fn build<S: ClusteringStrategy>(
        &mut self,
        cx: &Ctx<'_, S>,
        path: &mut Vec<u32>,
        out: &mut Vec<(ObjectId, StoredObject)>,
    ) -> TreeResult<(RevTree, Option<Envelope>)> {
        let (tree, bounds) = match self {
            DagNode::Stored(stored) => {
                let bounds = stored.bounds;
                return Ok((stored.load(cx)?.clone(), bounds));
            }
            DagNode::Mutable(Body::Leaf(nodes)) => {
                let (mut size, mut num_trees) = (0u64, 0u32);
                let (mut trees, mut features) = (Vec::new(), Vec::new());
                for node in nodes.values() {
                    let (s, t) = cx.counts(node)?;
                    size += s;
                    num_trees += t;
                    if node.is_tree() {
                        trees.push(node.clone());
                    } else {
                        features.push(node.clone());
                    }
                }
                let bounds = Envelope::union_all(nodes.values().map(Node::bounds));
                (RevTree::leaf(size, num_trees, trees, features)?, bounds)
            }
            DagNode::Mutable(Body::Buckets(children)) => {
                let (mut size, mut num_trees) = (0u64, 0u32);
                let mut buckets = BTreeMap::new();
                for (index, child) in children.iter_mut() {
                    path.push(*index);
                    let (tree, bounds) = child.build(cx, path, out)?;
                    path.pop();
                    if tree.is_empty() {
                        continue;
                    }
                    size += tree.size();
                    num_trees += tree.num_trees();
                    buckets.insert(*index, Bucket::new(*index, tree.id(), bounds));
                }
                let bounds = Envelope::union_all(buckets.values().map(|b| b.bounds.as_ref()));
                (RevTree::bucketed(size, num_trees, buckets), bounds)
            }
        };
        if !tree.is_empty() {
            out.push(tree_object(&tree)?);
        }
        *self = DagNode::loaded(tree.clone(), bounds);
        Ok((tree, bounds))
    }
}

/// Bounds as they compare after a trip through the codec.
fn same_bounds(a: &Node, b: &Node) -> bool {
    a.bounds().map(quantize) == b.bounds().map(quantize)
}

fn stored_entry_count<S: ClusteringStrategy>(cx: &Ctx<'_, S>, tree: &RevTree) -> TreeResult<usize> {
    if tree.num_trees() == 0 {
        return Ok(tree.size() as usize);
    }
    if tree.is_leaf() {
        return Ok(tree.node_count());
    }
    tree.buckets()
        .values()
        .map(|b| stored_entry_count(cx, &cx.load(&b.object_id)?))
        .sum()
}

fn collect_stored<S: ClusteringStrategy>(
    cx: &Ctx<'_, S>,
    tree: &RevTree,
    out: &mut Vec<Node>,
) -> TreeResult<()> {
    if tree.is_leaf() {
        out.extend(tree.children());
        return Ok(());
    }
    for bucket in tree.buckets().values() {
        collect_stored(cx, &cx.load(&bucket.object_id)?, out)?;
    }
    Ok(())
}

/// Mutable builder producing new tree revisions from an original one.
///
/// Placement follows the clustering strategy: flat trees split into
/// buckets once they exceed the strategy's leaf limit and collapse back
/// when removals bring them under it. Nodes are keyed by name, and a node
/// is found again for removal through the same placement, so callers
/// changing a node's placement key (its bounds, for a quad-tree) must
/// [`update`](Self::update) it rather than put the new version.
pub struct TreeBuilder<S> {
    store: Arc<dyn ObjectStore>,
    strategy: S,
    original: RevTree,
    root: DagNode,
}

impl<S> std::fmt::Debug for TreeBuilder<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeBuilder")
            .field("original", &self.original.id())
            .field("modified", &matches!(self.root, DagNode::Mutable(_)))
            .finish()
    }
}

impl<S: ClusteringStrategy> TreeBuilder<S> {
    /// A builder starting from the empty tree.
    pub fn new(store: Arc<dyn ObjectStore>, strategy: S) -> Self {
        Self::from_tree(store, strategy, RevTree::empty())
    }

    /// A builder starting from `original`, which must have been built with
    /// the same strategy.
    pub fn from_tree(store: Arc<dyn ObjectStore>, strategy: S, original: RevTree) -> Self {
        let root = DagNode::loaded(original.clone(), original.bounds());
        Self {
            store,
            strategy,
            original,
            root,
        }
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    pub fn original(&self) -> &RevTree {
        &self.original
    }

    /// Insert or replace a node. Returns `false` if an identical node was
    /// already present.
    pub fn put(&mut self, node: Node) -> TreeResult<bool> {
        self.strategy.accepts(&node)?;
        let cx = Ctx {
            store: &*self.store,
            strategy: &self.strategy,
        };
        self.root.put(&cx, &mut Vec::new(), node)
    }

    /// Remove the node with `node`'s name from where `node` would be placed.
    /// Returns `false` if there is no such node.
    pub fn remove(&mut self, node: &Node) -> TreeResult<bool> {
        let cx = Ctx {
            store: &*self.store,
            strategy: &self.strategy,
        };
        self.root.remove(&cx, &mut Vec::new(), node)
    }

    /// Replace `old` with `new`. Returns `false`, leaving the tree as it
    /// was, if `old` is not present.
    pub fn update(&mut self, old: &Node, new: Node) -> TreeResult<bool> {
        self.strategy.accepts(&new)?;
        if !self.remove(old)? {
            return Ok(false);
        }
        self.put(new)?;
        Ok(true)
    }

    /// Build the current state, writing every new tree to the store in one
    /// batch. Unchanged subtrees keep their ids and are not rewritten.
    pub fn build(&mut self) -> TreeResult<RevTree> {
        let cx = Ctx {
            store: &*self.store,
            strategy: &self.strategy,
        };
        let mut out = Vec::new();
        let (tree, _) = self.root.build(&cx, &mut Vec::new(), &mut out)?;
        let queued = out.len();
        let written = self.store.put_all(out, &NOOP_LISTENER)?;
        debug!(
            tree = %tree.id().short_hex(),
            size = tree.size(),
            queued,
            written,
            "built tree"
        );
        Ok(tree)
    }
}
