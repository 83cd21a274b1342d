//! Builds and incrementally updates quad-tree indexes of canonical trees.
//!
//! The index of a canonical tree is derived by walking the diff between a
//! canonical tree that was already indexed (or the empty tree) and the new
//! one, replaying the feature changes on a copy of the old index tree.
//! Nothing is written until the whole diff has been applied, so a failed or
//! cancelled build leaves no partial index behind.

use std::sync::Arc;

use strata_diff::DiffWalk;
use strata_store::ObjectStore;
use strata_tree::{RevTree, TreeBuilder, TreeStore};
use strata_types::ObjectId;
use tracing::{debug, info};

use crate::config::IndexConfig;
use crate::database::IndexDatabase;
use crate::error::IndexResult;
use crate::info::IndexInfo;
use crate::progress::ProgressListener;
use crate::updater::{IndexStats, IndexUpdater};

/// Outcome of a successful index build.
#[derive(Clone, Debug)]
pub struct IndexBuild {
    pub tree_id: ObjectId,
    pub tree: RevTree,
    pub stats: IndexStats,
    /// The index tree had already been built and was returned as is.
    pub reused: bool,
}

pub struct IndexBuilder {
    store: Arc<dyn ObjectStore>,
    database: Arc<dyn IndexDatabase>,
    config: IndexConfig,
}

impl std::fmt::Debug for IndexBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexBuilder").field("config", &self.config).finish()
    }
}

impl IndexBuilder {
    pub fn new(store: Arc<dyn ObjectStore>, database: Arc<dyn IndexDatabase>) -> Self {
        Self {
            store,
            database,
            config: IndexConfig::default(),
        }
    }

    pub fn with_config(mut self, config: IndexConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Build the index of `canonical_tree` from scratch, or return the one
    /// already recorded for it.
    ///
    /// `feature_type` is the type of features whose nodes carry no metadata
    /// id. Returns `Ok(None)` if `listener` cancelled the build.
    pub fn build_index(
        &self,
        info: &IndexInfo,
        canonical_tree: &ObjectId,
        feature_type: Option<ObjectId>,
        listener: &dyn ProgressListener,
    ) -> IndexResult<Option<IndexBuild>> {
        self.build_or_update_index(info, None, canonical_tree, feature_type, listener)
    }

    /// Build the index of `new_canonical`, starting from the index of
    /// `old_canonical` when one is recorded.
    pub fn build_or_update_index(
        &self,
        info: &IndexInfo,
        old_canonical: Option<&ObjectId>,
        new_canonical: &ObjectId,
        feature_type: Option<ObjectId>,
        listener: &dyn ProgressListener,
    ) -> IndexResult<Option<IndexBuild>> {
        if let Some(index_id) = self.database.resolve_indexed_tree(info, new_canonical)? {
            info!(
                index = %info.tree_name,
                canonical = %new_canonical.short_hex(),
                tree = %index_id.short_hex(),
                "index tree already built"
            );
            let tree = self.store.get_tree(&index_id)?;
            return Ok(Some(IndexBuild {
                tree_id: index_id,
                tree,
                stats: IndexStats::default(),
                reused: true,
            }));
        }

        let new_tree = self.store.get_tree(new_canonical)?;
        let (old_tree, start) = self.starting_point(info, old_canonical)?;
        info!(
            index = %info.tree_name,
            attribute = %info.attribute,
            from = %old_tree.id().short_hex(),
            to = %new_canonical.short_hex(),
            features = new_tree.size(),
            "building index"
        );
        listener.started();

        let builder = TreeBuilder::from_tree(Arc::clone(&self.store), info.strategy(), start);
        let mut updater = IndexUpdater::new(
            Arc::clone(&self.store),
            info,
            &self.config,
            listener,
            builder,
            feature_type,
        );
        DiffWalk::new(&*self.store, old_tree, new_tree).walk(&mut updater)?;
        let Some((mut builder, stats)) = updater.finish()? else {
            info!(index = %info.tree_name, "index build cancelled");
            return Ok(None);
        };

        let tree = builder.build()?;
        self.database.add_indexed_tree(info, *new_canonical, tree.id())?;
        listener.complete();
        info!(
            index = %info.tree_name,
            tree = %tree.id().short_hex(),
            size = tree.size(),
            added = stats.added,
            removed = stats.removed,
            updated = stats.updated,
            out_of_bounds = stats.out_of_bounds,
            "index built"
        );
        Ok(Some(IndexBuild {
            tree_id: tree.id(),
            tree,
            stats,
            reused: false,
        }))
    }

    /// The canonical tree to diff from and the index tree to start with.
    fn starting_point(&self, info: &IndexInfo, old_canonical: Option<&ObjectId>) -> IndexResult<(RevTree, RevTree)> {
        if let Some(old) = old_canonical {
            if let Some(index_id) = self.database.resolve_indexed_tree(info, old)? {
                return Ok((self.store.get_tree(old)?, self.store.get_tree(&index_id)?));
            }
            debug!(canonical = %old.short_hex(), "previous tree is not indexed, building from scratch");
        }
        Ok((RevTree::empty(), RevTree::empty()))
    }
}
