//! Ready-made visitors.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use strata_tree::{Bucket, Node};
use strata_types::Envelope;

use crate::visitor::DiffVisitor;

/// Counts feature changes and the subtrees entered to find them.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DiffCounter {
    pub added: u64,
    pub removed: u64,
    pub modified: u64,
    pub trees: u64,
    pub buckets: u64,
}

impl DiffCounter {
    pub fn total(&self) -> u64 {
        self.added + self.removed + self.modified
    }
}

impl DiffVisitor for DiffCounter {
    fn visit_tree(&mut self, _left: Option<&Node>, _right: Option<&Node>) -> bool {
        self.trees += 1;
        true
    }

    fn visit_bucket(&mut self, _path: &[u32], _left: Option<&Bucket>, _right: Option<&Bucket>) -> bool {
        self.buckets += 1;
        true
    }

    fn on_feature(&mut self, left: Option<&Node>, right: Option<&Node>) -> bool {
        match (left, right) {
            (None, Some(_)) => self.added += 1,
            (Some(_), None) => self.removed += 1,
            (Some(_), Some(_)) => self.modified += 1,
            (None, None) => {}
        }
        true
    }
}

/// One feature-level change.
#[derive(Clone, Debug, PartialEq)]
pub enum Change {
    Added(Node),
    Removed(Node),
    Modified { old: Node, new: Node },
}

impl Change {
    fn from_pair(left: Option<&Node>, right: Option<&Node>) -> Option<Change> {
        match (left, right) {
            (None, Some(n)) => Some(Change::Added(n.clone())),
            (Some(n), None) => Some(Change::Removed(n.clone())),
            (Some(old), Some(new)) => Some(Change::Modified {
                old: old.clone(),
                new: new.clone(),
            }),
            (None, None) => None,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Change::Added(n) | Change::Removed(n) => n.name(),
            Change::Modified { new, .. } => new.name(),
        }
    }
}

/// Collects every feature change in walk order.
#[derive(Debug, Default)]
pub struct CollectingVisitor {
    changes: Vec<Change>,
}

impl CollectingVisitor {
    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    pub fn into_changes(self) -> Vec<Change> {
        self.changes
    }
}

impl DiffVisitor for CollectingVisitor {
    fn on_feature(&mut self, left: Option<&Node>, right: Option<&Node>) -> bool {
        self.changes.extend(Change::from_pair(left, right));
        true
    }
}

/// Forwards only the features accepted by a predicate.
///
/// With [`FilteringVisitor::within`] the filter is spatial and also prunes
/// trees and buckets whose bounds lie entirely outside the area.
pub struct FilteringVisitor<V, F> {
    inner: V,
    accept: F,
    area: Option<Envelope>,
}

impl<V: DiffVisitor, F: FnMut(&Node) -> bool> FilteringVisitor<V, F> {
    pub fn new(inner: V, accept: F) -> Self {
        Self {
            inner,
            accept,
            area: None,
        }
    }

    pub fn into_inner(self) -> V {
        self.inner
    }
}

impl<V: DiffVisitor> FilteringVisitor<V, fn(&Node) -> bool> {
    /// Keep changes whose bounds intersect `area`.
    pub fn within(inner: V, area: Envelope) -> Self {
        Self {
            inner,
            accept: |_| true,
            area: Some(area),
        }
    }
}

impl<V, F> FilteringVisitor<V, F> {
    fn overlaps(&self, bounds: Option<&Envelope>) -> bool {
        match (&self.area, bounds) {
            (Some(area), Some(b)) => area.intersects(b),
            // without bounds nothing can be ruled out
            _ => true,
        }
    }

    fn either_overlaps(&self, left: Option<&Envelope>, right: Option<&Envelope>) -> bool {
        if left.is_none() && right.is_none() {
            return self.overlaps(None);
        }
        left.is_some_and(|b| self.overlaps(Some(b))) || right.is_some_and(|b| self.overlaps(Some(b)))
    }
}

impl<V: DiffVisitor, F: FnMut(&Node) -> bool> DiffVisitor for FilteringVisitor<V, F> {
    fn visit_tree(&mut self, left: Option<&Node>, right: Option<&Node>) -> bool {
        let root = left.or(right).is_some_and(|n| n.name().is_empty());
        (root || self.either_overlaps(left.and_then(Node::bounds), right.and_then(Node::bounds)))
            && self.inner.visit_tree(left, right)
    }

    fn end_tree(&mut self, left: Option<&Node>, right: Option<&Node>) {
        self.inner.end_tree(left, right)
    }

    fn visit_bucket(&mut self, path: &[u32], left: Option<&Bucket>, right: Option<&Bucket>) -> bool {
        let l = left.and_then(|b| b.bounds.as_ref());
        let r = right.and_then(|b| b.bounds.as_ref());
        // a missing bucket may stand for a flat side that still has to be read
        let open = left.is_none() || right.is_none();
        (open || self.either_overlaps(l, r)) && self.inner.visit_bucket(path, left, right)
    }

    fn end_bucket(&mut self, path: &[u32], left: Option<&Bucket>, right: Option<&Bucket>) {
        self.inner.end_bucket(path, left, right)
    }

    fn on_feature(&mut self, left: Option<&Node>, right: Option<&Node>) -> bool {
        let spatial = self.either_overlaps(left.and_then(Node::bounds), right.and_then(Node::bounds));
        let accepted = left.or(right).is_some_and(|n| (self.accept)(n));
        if spatial && accepted {
            return self.inner.on_feature(left, right);
        }
        true
    }

    fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }
}

/// Handle that cancels a running walk from any thread.
#[derive(Clone, Debug, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Wraps a visitor so the walk can be cancelled through a [`CancelHandle`].
pub struct CancellableVisitor<V> {
    inner: V,
    handle: CancelHandle,
}

impl<V: DiffVisitor> CancellableVisitor<V> {
    pub fn new(inner: V) -> Self {
        Self::with_handle(inner, CancelHandle::default())
    }

    pub fn with_handle(inner: V, handle: CancelHandle) -> Self {
        Self { inner, handle }
    }

    pub fn handle(&self) -> CancelHandle {
        self.handle.clone()
    }

    pub fn into_inner(self) -> V {
        self.inner
    }
}

impl<V: DiffVisitor> DiffVisitor for CancellableVisitor<V> {
    fn visit_tree(&mut self, left: Option<&Node>, right: Option<&Node>) -> bool {
        self.inner.visit_tree(left, right)
    }

    fn end_tree(&mut self, left: Option<&Node>, right: Option<&Node>) {
        self.inner.end_tree(left, right)
    }

    fn visit_bucket(&mut self, path: &[u32], left: Option<&Bucket>, right: Option<&Bucket>) -> bool {
        self.inner.visit_bucket(path, left, right)
    }

    fn end_bucket(&mut self, path: &[u32], left: Option<&Bucket>, right: Option<&Bucket>) {
        self.inner.end_bucket(path, left, right)
    }

    fn on_feature(&mut self, left: Option<&Node>, right: Option<&Node>) -> bool {
        self.inner.on_feature(left, right)
    }

    fn is_cancelled(&self) -> bool {
        self.handle.is_cancelled() || self.inner.is_cancelled()
    }
}
