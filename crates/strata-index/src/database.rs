//! Registry of index definitions and of the index trees built for them.
//!
//! [`InMemoryIndexDatabase`] keeps everything in `HashMap`s behind
//! `RwLock`s; data is lost when it is dropped.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use strata_types::ObjectId;

use crate::error::{IndexError, IndexResult};
use crate::info::IndexInfo;

/// Storage for [`IndexInfo`]s and the canonical-tree to index-tree mapping.
pub trait IndexDatabase: Send + Sync {
    /// Register a new index. Fails if one already exists for the same tree
    /// and attribute.
    fn create_index_info(&self, info: IndexInfo) -> IndexResult<IndexInfo>;

    /// Replace the definition of an existing index.
    fn update_index_info(&self, info: IndexInfo) -> IndexResult<IndexInfo>;

    fn get_index_info(&self, tree_name: &str, attribute: &str) -> IndexResult<Option<IndexInfo>>;

    /// All indexes over `tree_name`, ordered by attribute.
    fn index_infos(&self, tree_name: &str) -> IndexResult<Vec<IndexInfo>>;

    /// Remove an index definition and every index tree recorded for it.
    /// Returns `false` if there was no such index.
    fn drop_index(&self, tree_name: &str, attribute: &str) -> IndexResult<bool>;

    /// Record that `index_tree` indexes `canonical_tree` under `info`.
    fn add_indexed_tree(&self, info: &IndexInfo, canonical_tree: ObjectId, index_tree: ObjectId) -> IndexResult<()>;

    fn resolve_indexed_tree(&self, info: &IndexInfo, canonical_tree: &ObjectId) -> IndexResult<Option<ObjectId>>;
}

type IndexKey = (String, String);

#[derive(Debug, Default)]
pub struct InMemoryIndexDatabase {
    infos: RwLock<BTreeMap<IndexKey, IndexInfo>>,
    /// `(index info id, canonical tree id) -> index tree id`
    trees: RwLock<HashMap<(ObjectId, ObjectId), ObjectId>>,
}

impl InMemoryIndexDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded index trees across all indexes.
    pub fn indexed_tree_count(&self) -> usize {
        self.trees.read().expect("lock poisoned").len()
    }
}

fn key(info: &IndexInfo) -> IndexKey {
    (info.tree_name.clone(), info.attribute.clone())
}

impl IndexDatabase for InMemoryIndexDatabase {
    fn create_index_info(&self, info: IndexInfo) -> IndexResult<IndexInfo> {
        let mut infos = self.infos.write().expect("lock poisoned");
        let key = key(&info);
        if infos.contains_key(&key) {
            return Err(IndexError::AlreadyExists {
                tree_name: key.0,
                attribute: key.1,
            });
        }
        infos.insert(key, info.clone());
        Ok(info)
    }

    fn update_index_info(&self, info: IndexInfo) -> IndexResult<IndexInfo> {
        let mut infos = self.infos.write().expect("lock poisoned");
        match infos.get_mut(&key(&info)) {
            Some(existing) => {
                *existing = info.clone();
                Ok(info)
            }
            None => Err(IndexError::NotFound {
                tree_name: info.tree_name,
                attribute: info.attribute,
            }),
        }
    }

    fn get_index_info(&self, tree_name: &str, attribute: &str) -> IndexResult<Option<IndexInfo>> {
        let infos = self.infos.read().expect("lock poisoned");
        Ok(infos.get(&(tree_name.to_string(), attribute.to_string())).cloned())
    }

    fn index_infos(&self, tree_name: &str) -> IndexResult<Vec<IndexInfo>> {
        let infos = self.infos.read().expect("lock poisoned");
        Ok(infos
            .iter()
            .filter(|((tree, _), _)| tree == tree_name)
            .map(|(_, info)| info.clone())
            .collect())
    }

    fn drop_index(&self, tree_name: &str, attribute: &str) -> IndexResult<bool> {
        let removed = self
            .infos
            .write()
            .expect("lock poisoned")
            .remove(&(tree_name.to_string(), attribute.to_string()));
        let Some(info) = removed else {
            return Ok(false);
        };
        let id = info.id();
        self.trees
            .write()
            .expect("lock poisoned")
            .retain(|(info_id, _), _| *info_id != id);
        Ok(true)
    }

    fn add_indexed_tree(&self, info: &IndexInfo, canonical_tree: ObjectId, index_tree: ObjectId) -> IndexResult<()> {
        self.trees
            .write()
            .expect("lock poisoned")
            .insert((info.id(), canonical_tree), index_tree);
        Ok(())
    }

    fn resolve_indexed_tree(&self, info: &IndexInfo, canonical_tree: &ObjectId) -> IndexResult<Option<ObjectId>> {
        let trees = self.trees.read().expect("lock poisoned");
        Ok(trees.get(&(info.id(), *canonical_tree)).copied())
    }
}
