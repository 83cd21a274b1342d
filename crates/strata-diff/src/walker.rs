//! Lock-step pre-order walk over two tree revisions.
//!
//! Subtrees with equal ids are never entered. Flat trees are merged by
//! name; bucketed trees are compared bucket by bucket. When one side is
//! flat and the other bucketed at the same level, the flat side's nodes are
//! grouped with the clustering strategy that built the trees, so both sides
//! are again compared one bucket at a time.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use strata_store::{ObjectStore, NOOP_LISTENER};
use strata_tree::{Bucket, CanonicalClustering, ClusteringStrategy, Node, RevTree, TreeStore};
use strata_types::ObjectId;
use tracing::trace;

use crate::error::{DiffError, DiffResult};
use crate::visitor::DiffVisitor;

/// Walk the differences between `left` and `right`, two canonical trees.
pub fn diff<V: DiffVisitor + ?Sized>(
    store: &dyn ObjectStore,
    left: &RevTree,
    right: &RevTree,
    visitor: &mut V,
) -> DiffResult<()> {
    DiffWalk::new(store, left.clone(), right.clone()).walk(visitor)
}

/// A configured diff between two trees.
pub struct DiffWalk<'a, S = CanonicalClustering> {
    store: &'a dyn ObjectStore,
    left: RevTree,
    right: RevTree,
    strategy: S,
}

impl<'a> DiffWalk<'a> {
    pub fn new(store: &'a dyn ObjectStore, left: RevTree, right: RevTree) -> Self {
        Self {
            store,
            left,
            right,
            strategy: CanonicalClustering,
        }
    }
}

impl<'a, S: ClusteringStrategy> DiffWalk<'a, S> {
    /// Use the strategy both trees were built with, for trees that are not
    /// canonical (a quad-tree index, for instance).
    pub fn with_strategy<T: ClusteringStrategy>(self, strategy: T) -> DiffWalk<'a, T> {
        DiffWalk {
            store: self.store,
            left: self.left,
            right: self.right,
            strategy,
        }
    }

    pub fn left(&self) -> &RevTree {
        &self.left
    }

    pub fn right(&self) -> &RevTree {
        &self.right
    }

    /// Run the walk. Trees with the same id produce no callbacks at all.
    pub fn walk<V: DiffVisitor + ?Sized>(&self, visitor: &mut V) -> DiffResult<()> {
        if self.left.id() == self.right.id() {
            return Ok(());
        }
        let left = Node::tree("", self.left.id(), self.left.bounds());
        let right = Node::tree("", self.right.id(), self.right.bounds());
        let mut walker = Walker {
            store: self.store,
            strategy: &self.strategy,
            visitor,
            stopped: false,
        };
        walker.tree(Some(&left), Some(&right), &self.left, &self.right)
    }
}

/// One side of a comparison at some level.
enum Side {
    Tree(RevTree),
    Nodes(Vec<Node>),
}

impl Side {
    /// Flat trees are compared as their node lists.
    fn normalize(self) -> Side {
        match self {
            Side::Tree(tree) if tree.is_leaf() => Side::Nodes(tree.children()),
            other => other,
        }
    }
}

struct Walker<'w, S, V: ?Sized> {
    store: &'w dyn ObjectStore,
    strategy: &'w S,
    visitor: &'w mut V,
    stopped: bool,
}

impl<S: ClusteringStrategy, V: DiffVisitor + ?Sized> Walker<'_, S, V> {
    fn cancelled(&mut self) -> bool {
        if !self.stopped && self.visitor.is_cancelled() {
            trace!("diff walk cancelled");
            self.stopped = true;
        }
        self.stopped
    }

    fn tree(
        &mut self,
        left: Option<&Node>,
        right: Option<&Node>,
        left_tree: &RevTree,
        right_tree: &RevTree,
    ) -> DiffResult<()> {
        if self.cancelled() || !self.visitor.visit_tree(left, right) {
            return Ok(());
        }
        let mut path = Vec::new();
        self.compare(&mut path, Side::Tree(left_tree.clone()), Side::Tree(right_tree.clone()))?;
        if !self.stopped {
            self.visitor.end_tree(left, right);
        }
        Ok(())
    }

    fn compare(&mut self, path: &mut Vec<u32>, left: Side, right: Side) -> DiffResult<()> {
        if let (Side::Tree(l), Side::Tree(r)) = (&left, &right) {
            if l.id() == r.id() {
                return Ok(());
            }
        }
        if self.cancelled() {
            return Ok(());
        }
        match (left.normalize(), right.normalize()) {
            (Side::Nodes(l), Side::Nodes(r)) => self.nodes(&l, &r),
            (Side::Tree(l), Side::Tree(r)) => self.buckets(path, l.buckets(), r.buckets()),
            (Side::Nodes(l), Side::Tree(r)) => self.nodes_vs_buckets(path, l, &r, true),
            (Side::Tree(l), Side::Nodes(r)) => self.nodes_vs_buckets(path, r, &l, false),
        }
    }

    /// Merge two name-sorted node lists.
    fn nodes(&mut self, left: &[Node], right: &[Node]) -> DiffResult<()> {
        let (mut i, mut j) = (0, 0);
        while !self.stopped {
            match (left.get(i), right.get(j)) {
                (Some(l), Some(r)) => match l.name().cmp(r.name()) {
                    Ordering::Less => {
                        self.node(Some(l), None)?;
                        i += 1;
                    }
                    Ordering::Greater => {
                        self.node(None, Some(r))?;
                        j += 1;
                    }
                    Ordering::Equal => {
                        if l != r {
                            self.node(Some(l), Some(r))?;
                        }
                        i += 1;
                        j += 1;
                    }
                },
                (Some(l), None) => {
                    self.node(Some(l), None)?;
                    i += 1;
                }
                (None, Some(r)) => {
                    self.node(None, Some(r))?;
                    j += 1;
                }
                (None, None) => break,
            }
        }
        Ok(())
    }

    fn node(&mut self, left: Option<&Node>, right: Option<&Node>) -> DiffResult<()> {
        if let (Some(l), Some(r)) = (left, right) {
            if l.kind() != r.kind() {
                self.node(Some(l), None)?;
                return self.node(None, Some(r));
            }
        }
        if self.cancelled() {
            return Ok(());
        }
        let is_tree = left.or(right).is_some_and(Node::is_tree);
        if is_tree {
            let left_tree = self.subtree(left)?;
            let right_tree = self.subtree(right)?;
            return self.tree(left, right, &left_tree, &right_tree);
        }
        if !self.visitor.on_feature(left, right) {
            trace!("diff walk stopped by visitor");
            self.stopped = true;
        }
        Ok(())
    }

    fn subtree(&self, node: Option<&Node>) -> DiffResult<RevTree> {
        match node {
            Some(n) => Ok(self.store.get_tree(&n.object_id())?),
            None => Ok(RevTree::empty()),
        }
    }

    fn buckets(
        &mut self,
        path: &mut Vec<u32>,
        left: &BTreeMap<u32, Bucket>,
        right: &BTreeMap<u32, Bucket>,
    ) -> DiffResult<()> {
        let mut changed = Vec::new();
        let indexes: BTreeSet<u32> = left.keys().chain(right.keys()).copied().collect();
        for index in indexes {
            let (l, r) = (left.get(&index), right.get(&index));
            if let (Some(l), Some(r)) = (l, r) {
                if l.object_id == r.object_id {
                    continue;
                }
            }
            changed.push((index, l, r));
        }

        let ids: Vec<ObjectId> = changed
            .iter()
            .flat_map(|(_, l, r)| l.iter().chain(r.iter()).map(|b| b.object_id))
            .collect();
        let trees = self.load_all(&ids)?;

        for (index, l, r) in changed {
            if self.cancelled() {
                break;
            }
            path.push(index);
            if self.visitor.visit_bucket(path, l, r) {
                let left_tree = tree_for(&trees, l)?;
                let right_tree = tree_for(&trees, r)?;
                self.compare(path, Side::Tree(left_tree), Side::Tree(right_tree))?;
                if !self.stopped {
                    self.visitor.end_bucket(path, l, r);
                }
            }
            path.pop();
        }
        Ok(())
    }

    /// Compare a flat side against a bucketed tree at the same level.
    fn nodes_vs_buckets(
        &mut self,
        path: &mut Vec<u32>,
        nodes: Vec<Node>,
        tree: &RevTree,
        nodes_on_left: bool,
    ) -> DiffResult<()> {
        let mut groups: BTreeMap<u32, Vec<Node>> = BTreeMap::new();
        for node in nodes {
            match self.strategy.bucket(&node, path) {
                Some(index) => groups.entry(index).or_default().push(node),
                None => {
                    // cannot place it below this level: compare everything flat
                    let mut all: Vec<Node> = groups.into_values().flatten().collect();
                    all.push(node);
                    return self.nodes_vs_flattened(all, tree, nodes_on_left);
                }
            }
        }

        let buckets = tree.buckets();
        let ids: Vec<ObjectId> = buckets.values().map(|b| b.object_id).collect();
        let trees = self.load_all(&ids)?;
        let indexes: BTreeSet<u32> = groups.keys().chain(buckets.keys()).copied().collect();
        for index in indexes {
            if self.cancelled() {
                break;
            }
            let bucket = buckets.get(&index);
            let flat = Side::Nodes(groups.remove(&index).unwrap_or_default());
            let sharded = Side::Tree(tree_for(&trees, bucket)?);
            let (l, r) = if nodes_on_left { (None, bucket) } else { (bucket, None) };
            path.push(index);
            if self.visitor.visit_bucket(path, l, r) {
                if nodes_on_left {
                    self.compare(path, flat, sharded)?;
                } else {
                    self.compare(path, sharded, flat)?;
                }
                if !self.stopped {
                    self.visitor.end_bucket(path, l, r);
                }
            }
            path.pop();
        }
        Ok(())
    }

    fn nodes_vs_flattened(&mut self, mut nodes: Vec<Node>, tree: &RevTree, nodes_on_left: bool) -> DiffResult<()> {
        let mut other = Vec::new();
        self.flatten(tree, &mut other)?;
        other.sort_by(|a, b| a.name().cmp(b.name()));
        nodes.sort_by(|a, b| a.name().cmp(b.name()));
        if nodes_on_left {
            self.nodes(&nodes, &other)
        } else {
            self.nodes(&other, &nodes)
        }
    }

    fn flatten(&self, tree: &RevTree, out: &mut Vec<Node>) -> DiffResult<()> {
        if tree.is_leaf() {
            out.extend(tree.children());
            return Ok(());
        }
        for bucket in tree.buckets().values() {
            let child = self.store.get_tree(&bucket.object_id)?;
            self.flatten(&child, out)?;
        }
        Ok(())
    }

    /// Load bucket trees in one bulk read; every id must be present.
    fn load_all(&self, ids: &[ObjectId]) -> DiffResult<HashMap<ObjectId, RevTree>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let trees: HashMap<ObjectId, RevTree> = self
            .store
            .get_trees(ids, &NOOP_LISTENER)?
            .into_iter()
            .map(|t| (t.id(), t))
            .collect();
        if let Some(missing) = ids.iter().find(|id| !trees.contains_key(id)) {
            return Err(DiffError::MissingTree(*missing));
        }
        Ok(trees)
    }
}

fn tree_for(trees: &HashMap<ObjectId, RevTree>, bucket: Option<&Bucket>) -> DiffResult<RevTree> {
    match bucket {
        Some(b) => trees
            .get(&b.object_id)
            .cloned()
            .ok_or(DiffError::MissingTree(b.object_id)),
        None => Ok(RevTree::empty()),
    }
}
