//! Structural diff between two Strata tree revisions.
//!
//! The walk visits both trees in lock step and reports every feature that
//! was added, removed or changed to a [`DiffVisitor`]. Subtrees and buckets
//! with identical ids are skipped without being loaded, so the cost of a
//! diff follows the size of the change rather than the size of the trees.
//!
//! # Key Types
//!
//! - [`DiffWalk`] -- a configured walk between two trees
//! - [`DiffVisitor`] -- callbacks for trees, buckets and features
//! - [`DiffCounter`], [`CollectingVisitor`] -- summarize or collect changes
//! - [`FilteringVisitor`], [`CancellableVisitor`] -- wrap another visitor

pub mod error;
pub mod visitor;
pub mod visitors;
pub mod walker;

pub use error::{DiffError, DiffResult};
pub use visitor::DiffVisitor;
pub use visitors::{CancelHandle, CancellableVisitor, Change, CollectingVisitor, DiffCounter, FilteringVisitor};
pub use walker::{diff, DiffWalk};
