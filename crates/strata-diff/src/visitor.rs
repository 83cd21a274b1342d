use strata_tree::{Bucket, Node};

/// Receives the differences between two trees.
///
/// `left` is the base and `right` the target; a missing side means the
/// entry was added (`left` is `None`) or removed (`right` is `None`).
/// Every method has a default, so a visitor only implements what it needs
/// and by default descends everywhere.
///
/// Return values control the walk: `false` from [`visit_tree`] or
/// [`visit_bucket`] skips that subtree, `false` from [`on_feature`] stops
/// the whole walk. [`is_cancelled`] is polled before every callback.
///
/// [`visit_tree`]: DiffVisitor::visit_tree
/// [`visit_bucket`]: DiffVisitor::visit_bucket
/// [`on_feature`]: DiffVisitor::on_feature
/// [`is_cancelled`]: DiffVisitor::is_cancelled
pub trait DiffVisitor {
    /// Called before descending into a pair of differing trees. The roots
    /// of a walk are reported as tree nodes named `""`.
    fn visit_tree(&mut self, _left: Option<&Node>, _right: Option<&Node>) -> bool {
        true
    }

    /// Called once a tree accepted by [`visit_tree`](Self::visit_tree) has
    /// been fully walked.
    fn end_tree(&mut self, _left: Option<&Node>, _right: Option<&Node>) {}

    /// Called before descending into a pair of differing buckets. `path`
    /// holds the bucket indexes from the enclosing tree's root down to this
    /// bucket. A side is `None` when it has no such bucket, including when
    /// that side is still a flat tree at this level.
    fn visit_bucket(&mut self, _path: &[u32], _left: Option<&Bucket>, _right: Option<&Bucket>) -> bool {
        true
    }

    fn end_bucket(&mut self, _path: &[u32], _left: Option<&Bucket>, _right: Option<&Bucket>) {}

    /// A feature was added, removed or changed.
    fn on_feature(&mut self, _left: Option<&Node>, _right: Option<&Node>) -> bool {
        true
    }

    fn is_cancelled(&self) -> bool {
        false
    }
}

impl<V: DiffVisitor + ?Sized> DiffVisitor for &mut V {
    fn visit_tree(&mut self, left: Option<&Node>, right: Option<&Node>) -> bool {
        (**self).visit_tree(left, right)
    }

    fn end_tree(&mut self, left: Option<&Node>, right: Option<&Node>) {
        (**self).end_tree(left, right)
    }

    fn visit_bucket(&mut self, path: &[u32], left: Option<&Bucket>, right: Option<&Bucket>) -> bool {
        (**self).visit_bucket(path, left, right)
    }

    fn end_bucket(&mut self, path: &[u32], left: Option<&Bucket>, right: Option<&Bucket>) {
        (**self).end_bucket(path, left, right)
    }

    fn on_feature(&mut self, left: Option<&Node>, right: Option<&Node>) -> bool {
        (**self).on_feature(left, right)
    }

    fn is_cancelled(&self) -> bool {
        (**self).is_cancelled()
    }
}
