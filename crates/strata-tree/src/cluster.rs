//! Clustering strategies decide where a node lives inside a sharded tree.
//!
//! A strategy maps a node and the bucket path leading to the current tree
//! (bucket indexes from the root) to the bucket the node belongs to one
//! level further down. Returning `None` means the depth is exhausted and
//! the tree at `path` stays flat however many nodes it holds.

use strata_types::{Envelope, Quadrant};

use crate::codec::precision::quantize;
use crate::error::{TreeError, TreeResult};
use crate::node::Node;

pub trait ClusteringStrategy: Send + Sync {
    /// Bucket of `node` in the tree reached through `path`.
    fn bucket(&self, node: &Node, path: &[u32]) -> Option<u32>;

    /// Maximum number of nodes a flat tree at `path` may hold before it is
    /// split into buckets.
    fn leaf_limit(&self, path: &[u32]) -> usize;

    /// Reject nodes the strategy cannot place.
    fn accepts(&self, _node: &Node) -> TreeResult<()> {
        Ok(())
    }
}

const FNV64_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV64_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Deepest bucket level of a canonical tree; one hash byte per level.
pub const CANONICAL_MAX_DEPTH: usize = 8;

/// FNV-1a 64 over the UTF-16 code units of `name`, high byte first.
///
/// Bytes are sign-extended before the xor, which keeps bucket assignment
/// compatible with trees written by other implementations of the format.
pub fn canonical_hash(name: &str) -> u64 {
    let mut hash = FNV64_OFFSET_BASIS;
    for unit in name.encode_utf16() {
        for byte in [(unit >> 8) as u8, unit as u8] {
            hash ^= byte as i8 as i64 as u64;
            hash = hash.wrapping_mul(FNV64_PRIME);
        }
    }
    hash
}

/// Fan-out of a canonical tree at `depth`.
pub fn canonical_max_buckets(depth: usize) -> u32 {
    match depth {
        0..=2 => 32,
        3..=4 => 8,
        5..=6 => 4,
        _ => 2,
    }
}

/// Bucket of a name hash at `depth`, or `None` past the last level.
pub fn canonical_bucket(hash: u64, depth: usize) -> Option<u32> {
    if depth >= CANONICAL_MAX_DEPTH {
        return None;
    }
    let byte = ((hash >> (8 * (7 - depth))) & 0xFF) as u32;
    Some(byte * canonical_max_buckets(depth) / 256)
}

/// Name-hash sharding used by canonical trees.
#[derive(Clone, Copy, Debug, Default)]
pub struct CanonicalClustering;

impl CanonicalClustering {
    pub const fn new() -> Self {
        Self
    }
}

impl ClusteringStrategy for CanonicalClustering {
    fn bucket(&self, node: &Node, path: &[u32]) -> Option<u32> {
        canonical_bucket(canonical_hash(node.name()), path.len())
    }

    fn leaf_limit(&self, path: &[u32]) -> usize {
        if path.len() <= 2 {
            512
        } else {
            256
        }
    }
}

/// Quad-tree sharding by node bounds.
///
/// Buckets 0 to 3 are the quadrants of the current tree's extent (see
/// [`Quadrant`]). A node that does not fit in a single quadrant goes to
/// [`QuadClustering::UNPROMOTABLE`], below which nodes are sharded by
/// name hash like a canonical tree.
#[derive(Clone, Copy, Debug)]
pub struct QuadClustering {
    max_bounds: Envelope,
    max_depth: usize,
    leaf_limit: usize,
}

impl QuadClustering {
    pub const UNPROMOTABLE: u32 = 4;
    pub const DEFAULT_MAX_DEPTH: usize = 16;
    pub const DEFAULT_LEAF_LIMIT: usize = 128;

    pub fn new(max_bounds: Envelope, max_depth: usize) -> Self {
        Self {
            max_bounds,
            max_depth,
            leaf_limit: Self::DEFAULT_LEAF_LIMIT,
        }
    }

    pub fn with_leaf_limit(mut self, leaf_limit: usize) -> Self {
        self.leaf_limit = leaf_limit.max(1);
        self
    }

    pub fn max_bounds(&self) -> &Envelope {
        &self.max_bounds
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Extent of the tree at `path`, or `None` if the path leaves the quad
    /// structure (enters an unpromotable subtree or names no quadrant).
    pub fn extent(&self, path: &[u32]) -> Option<Envelope> {
        path.iter().try_fold(self.max_bounds, |env, index| {
            Quadrant::from_index(*index).map(|q| env.quadrant(q))
        })
    }
}

impl ClusteringStrategy for QuadClustering {
    fn bucket(&self, node: &Node, path: &[u32]) -> Option<u32> {
        if let Some(at) = path.iter().position(|b| *b == Self::UNPROMOTABLE) {
            let depth = path.len() - at - 1;
            return canonical_bucket(canonical_hash(node.name()), depth);
        }
        if path.len() >= self.max_depth {
            return None;
        }
        let bounds = quantize(node.bounds()?);
        let extent = self.extent(path)?;
        Some(
            extent
                .quadrant_containing(&bounds)
                .map_or(Self::UNPROMOTABLE, Quadrant::index),
        )
    }

    fn leaf_limit(&self, _path: &[u32]) -> usize {
        self.leaf_limit
    }

    fn accepts(&self, node: &Node) -> TreeResult<()> {
        if node.bounds().is_none() {
            return Err(TreeError::InvalidNode {
                name: node.name().to_string(),
                reason: "quad-tree nodes need bounds".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_types::ObjectId;

    fn at(name: &str, x: f64, y: f64) -> Node {
        Node::feature(name, ObjectId::from_bytes(name.as_bytes()), Some(Envelope::point(x, y)))
    }

    #[test]
    fn canonical_hash_known_values() {
        assert_eq!(canonical_hash(""), FNV64_OFFSET_BASIS);
        assert_eq!(canonical_hash("a"), 0x0832_6707_b4eb_37da);
        assert_eq!(canonical_hash("feature.1"), 0xbb91_9801_ae82_f4d4);
        // U+00FC: the low byte is negative as i8
        assert_eq!(canonical_hash("ü"), 0xf7cd_79f8_4b14_9379);
    }

    #[test]
    fn canonical_buckets_per_depth() {
        let hash = canonical_hash("feature.1");
        let buckets: Vec<_> = (0..CANONICAL_MAX_DEPTH)
            .map(|d| canonical_bucket(hash, d).unwrap())
            .collect();
        assert_eq!(buckets, [23, 18, 19, 0, 5, 2, 3, 1]);
        assert_eq!(canonical_bucket(hash, CANONICAL_MAX_DEPTH), None);
    }

    #[test]
    fn canonical_limits() {
        let s = CanonicalClustering::new();
        assert_eq!(s.leaf_limit(&[]), 512);
        assert_eq!(s.leaf_limit(&[1, 2]), 512);
        assert_eq!(s.leaf_limit(&[1, 2, 3]), 256);
        let node = at("feature.1", 0.0, 0.0);
        assert_eq!(s.bucket(&node, &[]), Some(23));
        assert_eq!(s.bucket(&node, &[23, 18]), Some(19));
        assert_eq!(s.bucket(&node, &[0; 8]), None);
    }

    #[test]
    fn quad_assigns_quadrants() {
        let s = QuadClustering::new(Envelope::WGS84, 16);
        assert_eq!(s.bucket(&at("sw", -10.0, -10.0), &[]), Some(0));
        assert_eq!(s.bucket(&at("nw", -10.0, 10.0), &[]), Some(1));
        assert_eq!(s.bucket(&at("ne", 10.0, 10.0), &[]), Some(2));
        assert_eq!(s.bucket(&at("se", 10.0, -10.0), &[]), Some(3));
        // NE of the world, then SW of that quadrant
        assert_eq!(s.bucket(&at("ne-sw", 10.0, 10.0), &[2]), Some(0));
    }

    #[test]
    fn straddling_nodes_are_unpromotable() {
        let s = QuadClustering::new(Envelope::WGS84, 16);
        let wide = Node::feature(
            "wide",
            ObjectId::NULL,
            Some(Envelope::new(-10.0, 10.0, 5.0, 6.0).unwrap()),
        );
        assert_eq!(s.bucket(&wide, &[]), Some(QuadClustering::UNPROMOTABLE));
        // below an unpromotable bucket placement is by name hash
        let expected = canonical_bucket(canonical_hash("wide"), 0);
        assert_eq!(s.bucket(&wide, &[QuadClustering::UNPROMOTABLE]), expected);
        let expected = canonical_bucket(canonical_hash("wide"), 1);
        assert_eq!(s.bucket(&wide, &[1, QuadClustering::UNPROMOTABLE, 7]), expected);
    }

    #[test]
    fn quad_depth_is_bounded() {
        let s = QuadClustering::new(Envelope::WGS84, 2);
        let node = at("p", 1.0, 1.0);
        assert!(s.bucket(&node, &[2]).is_some());
        assert_eq!(s.bucket(&node, &[2, 0]), None);
    }

    #[test]
    fn quad_rejects_nodes_without_bounds() {
        let s = QuadClustering::new(Envelope::WGS84, 16);
        let node = Node::feature("nowhere", ObjectId::NULL, None);
        assert!(matches!(s.accepts(&node), Err(TreeError::InvalidNode { .. })));
        assert!(s.accepts(&at("somewhere", 0.5, 0.5)).is_ok());
        assert_eq!(s.leaf_limit(&[]), 128);
        assert_eq!(s.with_leaf_limit(0).leaf_limit(&[]), 1);
    }

    #[test]
    fn extent_follows_the_path() {
        let s = QuadClustering::new(Envelope::WGS84, 16);
        assert_eq!(s.extent(&[]), Some(Envelope::WGS84));
        assert_eq!(
            s.extent(&[2, 0]),
            Some(Envelope::new(0.0, 90.0, 0.0, 45.0).unwrap())
        );
        assert_eq!(s.extent(&[QuadClustering::UNPROMOTABLE]), None);
    }

    proptest::proptest! {
        #[test]
        fn canonical_bucket_is_within_fan_out(name in ".{0,24}", depth in 0usize..8) {
            let b = canonical_bucket(canonical_hash(&name), depth).unwrap();
            proptest::prop_assert!(b < canonical_max_buckets(depth));
        }

        #[test]
        fn points_inside_the_extent_get_a_quadrant(x in -180.0f64..180.0, y in -90.0f64..90.0) {
            let s = QuadClustering::new(Envelope::WGS84, 16);
            let b = s.bucket(&at("p", x, y), &[]).unwrap();
            proptest::prop_assert!(b < QuadClustering::UNPROMOTABLE);
        }
    }
}
