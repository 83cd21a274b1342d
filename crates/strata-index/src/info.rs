use serde::{Deserialize, Serialize};
use strata_tree::QuadClustering;
use strata_types::{ContentHasher, Envelope, ObjectId};

use crate::config::IndexConfig;

const INDEX_INFO: ContentHasher = ContentHasher::new("strata-indexinfo-v1");

/// Kind of spatial index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexType {
    QuadTree,
}

/// Description of one index over a canonical feature tree.
///
/// An index is registered per `(tree_name, attribute)`. Its [`id`](Self::id)
/// covers every parameter that shapes the index tree, so changing the
/// extent or the materialized attributes invalidates previously built
/// index trees.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub tree_name: String,
    /// Geometry attribute the index is built on.
    pub attribute: String,
    pub index_type: IndexType,
    /// Attributes copied into every index node, sorted and unique.
    pub materialized_attributes: Vec<String>,
    pub max_bounds: Envelope,
    pub max_depth: usize,
    pub leaf_size_limit: usize,
    /// `max_bounds` was taken from a reference system's nominal extent
    /// rather than from the data; features outside it call for a rebuild.
    pub bounds_estimated: bool,
}

impl IndexInfo {
    /// A quad-tree index with the extent and shape of `config`.
    pub fn new(tree_name: impl Into<String>, attribute: impl Into<String>, config: &IndexConfig) -> Self {
        Self {
            tree_name: tree_name.into(),
            attribute: attribute.into(),
            index_type: IndexType::QuadTree,
            materialized_attributes: Vec::new(),
            max_bounds: config.max_bounds,
            max_depth: config.max_depth,
            leaf_size_limit: config.leaf_size_limit,
            bounds_estimated: false,
        }
    }

    pub fn with_materialized_attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut attributes: Vec<String> = attributes.into_iter().map(Into::into).collect();
        attributes.sort();
        attributes.dedup();
        self.materialized_attributes = attributes;
        self
    }

    pub fn with_max_bounds(mut self, max_bounds: Envelope, estimated: bool) -> Self {
        self.max_bounds = max_bounds;
        self.bounds_estimated = estimated;
        self
    }

    pub fn is_materialized(&self) -> bool {
        !self.materialized_attributes.is_empty()
    }

    /// Placement strategy for this index's trees.
    pub fn strategy(&self) -> QuadClustering {
        QuadClustering::new(self.max_bounds, self.max_depth).with_leaf_limit(self.leaf_size_limit)
    }

    /// Identity of this index configuration.
    pub fn id(&self) -> ObjectId {
        let mut f = INDEX_INFO.funnel();
        f.put_str(&self.tree_name);
        f.put_str(&self.attribute);
        f.put_u8(match self.index_type {
            IndexType::QuadTree => 1,
        });
        f.put_u32(self.materialized_attributes.len() as u32);
        for name in &self.materialized_attributes {
            f.put_str(name);
        }
        for v in [
            self.max_bounds.min_x,
            self.max_bounds.max_x,
            self.max_bounds.min_y,
            self.max_bounds.max_y,
        ] {
            f.put_f64(v);
        }
        f.put_u64(self.max_depth as u64);
        f.put_u64(self.leaf_size_limit as u64);
        f.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn materialized_attributes_are_normalized() {
        let info = IndexInfo::new("roads", "geom", &IndexConfig::default())
            .with_materialized_attributes(["name", "lanes", "name"]);
        assert_eq!(info.materialized_attributes, ["lanes", "name"]);
        assert!(info.is_materialized());

        let same = IndexInfo::new("roads", "geom", &IndexConfig::default())
            .with_materialized_attributes(["lanes", "name"]);
        assert_eq!(info.id(), same.id());
    }

    #[test]
    fn id_covers_the_index_shape() {
        let config = IndexConfig::default();
        let base = IndexInfo::new("roads", "geom", &config);
        let deeper = IndexInfo {
            max_depth: 8,
            ..base.clone()
        };
        let materialized = base.clone().with_materialized_attributes(["name"]);
        let other_tree = IndexInfo::new("rivers", "geom", &config);
        assert_ne!(base.id(), deeper.id());
        assert_ne!(base.id(), materialized.id());
        assert_ne!(base.id(), other_tree.id());
        // whether the extent was estimated does not change the tree
        let estimated = base.clone().with_max_bounds(Envelope::WGS84, true);
        assert_eq!(base.id(), estimated.id());
    }

    #[test]
    fn strategy_follows_the_info() {
        let info = IndexInfo::new("roads", "geom", &IndexConfig::default())
            .with_max_bounds(Envelope::new(0.0, 10.0, 0.0, 10.0).unwrap(), false);
        let strategy = info.strategy();
        assert_eq!(*strategy.max_bounds(), info.max_bounds);
        assert_eq!(strategy.max_depth(), 16);
    }

    #[test]
    fn serde_roundtrip() {
        let info = IndexInfo::new("roads", "geom", &IndexConfig::default())
            .with_materialized_attributes(["name"]);
        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains("\"QuadTree\""));
        let back: IndexInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(back, info);
    }
}
