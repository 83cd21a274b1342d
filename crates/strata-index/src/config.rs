use serde::{Deserialize, Serialize};
use strata_tree::QuadClustering;
use strata_types::Envelope;

use crate::error::IndexResult;

/// Tuning and default extent for quad-tree index builds.
///
/// Every field is optional when parsed from TOML:
///
/// ```toml
/// batch_size = 500
/// max_depth = 12
///
/// [max_bounds]
/// min_x = 0.0
/// max_x = 100.0
/// min_y = 0.0
/// max_y = 100.0
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Pending feature changes buffered before their payloads are fetched.
    pub batch_size: usize,
    /// Deepest quadrant level; trees at this depth stay flat.
    pub max_depth: usize,
    /// Extent of the root quadrant for new indexes.
    pub max_bounds: Envelope,
    /// Nodes a flat index tree may hold before it is split.
    pub leaf_size_limit: usize,
    /// Payloads fetched ahead of the applying thread.
    pub prefetch_capacity: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            max_depth: QuadClustering::DEFAULT_MAX_DEPTH,
            max_bounds: Envelope::WGS84,
            leaf_size_limit: QuadClustering::DEFAULT_LEAF_LIMIT,
            prefetch_capacity: 1000,
        }
    }
}

impl IndexConfig {
    pub fn from_toml_str(s: &str) -> IndexResult<Self> {
        Ok(toml::from_str(s)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IndexError;

    #[test]
    fn default_config() {
        let c = IndexConfig::default();
        assert_eq!(c.batch_size, 1000);
        assert_eq!(c.max_depth, 16);
        assert_eq!(c.max_bounds, Envelope::WGS84);
        assert_eq!(c.leaf_size_limit, 128);
        assert_eq!(c.prefetch_capacity, 1000);
    }

    #[test]
    fn empty_document_is_the_default() {
        assert_eq!(IndexConfig::from_toml_str("").unwrap(), IndexConfig::default());
    }

    #[test]
    fn partial_document_overrides_fields() {
        let c = IndexConfig::from_toml_str(
            r#"
            batch_size = 10
            max_depth = 4

            [max_bounds]
            min_x = 0.0
            max_x = 100.0
            min_y = -50.0
            max_y = 50.0
            "#,
        )
        .unwrap();
        assert_eq!(c.batch_size, 10);
        assert_eq!(c.max_depth, 4);
        assert_eq!(c.max_bounds, Envelope::new(0.0, 100.0, -50.0, 50.0).unwrap());
        assert_eq!(c.leaf_size_limit, 128);
    }

    #[test]
    fn bad_document_is_a_config_error() {
        let err = IndexConfig::from_toml_str("batch_size = \"many\"").unwrap_err();
        assert!(matches!(err, IndexError::Config(_)));
    }
}
