//! Tree revisions for Strata: the immutable, content-addressed trees that
//! hold a feature collection, their binary encoding, and the builders that
//! produce new revisions.
//!
//! # Key Types
//!
//! - [`RevTree`] -- immutable tree revision: flat nodes or buckets
//! - [`Node`] / [`Bucket`] -- children of a tree revision
//! - [`RevFeature`] / [`FeatureType`] -- feature payloads and their schema
//! - [`TreeBuilder`] -- incremental builder over an original tree
//! - [`ClusteringStrategy`] -- placement of nodes in sharded trees, with
//!   [`CanonicalClustering`] (name hash) and [`QuadClustering`] (bounds)
//! - [`TreeStore`] -- typed loading and storing on any object store
//!
//! # Encoding
//!
//! [`encode_tree`] / [`decode_tree`] implement the binary format described
//! in [`codec`]. A tree's id is a hash over its logical content, so it does
//! not change when the same tree is encoded differently.

pub mod bucket;
pub mod builder;
pub mod cluster;
pub mod codec;
pub mod error;
pub mod feature;
pub mod node;
pub mod store_ext;
pub mod tree;

pub use bucket::Bucket;
pub use builder::TreeBuilder;
pub use cluster::{CanonicalClustering, ClusteringStrategy, QuadClustering};
pub use codec::precision::{quantize, ENVELOPE_TOLERANCE};
pub use codec::{decode_tree, encode_tree};
pub use error::{CodecError, CodecResult, TreeError, TreeResult};
pub use feature::{AttributeDescriptor, FeatureType, RevFeature};
pub use node::{ExtraData, Node, NodeKind};
pub use store_ext::{tree_object, TreeStore};
pub use tree::RevTree;
