use strata_store::{BulkListener, ObjectKind, ObjectStore, StoreError, StoredObject};
use strata_types::ObjectId;

use crate::codec::{decode_tree, encode_tree};
use crate::error::TreeResult;
use crate::feature::{FeatureType, RevFeature};
use crate::tree::RevTree;

/// Typed access to trees, features and feature types on any object store.
pub trait TreeStore {
    /// Load a tree. The empty tree id always resolves, stored or not.
    fn get_tree(&self, id: &ObjectId) -> TreeResult<RevTree>;

    fn get_tree_if_present(&self, id: &ObjectId) -> TreeResult<Option<RevTree>>;

    /// Load many trees in one round trip, in request order, skipping misses.
    fn get_trees(&self, ids: &[ObjectId], listener: &dyn BulkListener) -> TreeResult<Vec<RevTree>>;

    /// Encode and store a tree. Returns `true` if it was newly written.
    fn put_tree(&self, tree: &RevTree) -> TreeResult<bool>;

    fn get_feature(&self, id: &ObjectId) -> TreeResult<RevFeature>;

    fn put_feature(&self, feature: &RevFeature) -> TreeResult<ObjectId>;

    fn get_feature_type(&self, id: &ObjectId) -> TreeResult<FeatureType>;

    fn put_feature_type(&self, feature_type: &FeatureType) -> TreeResult<ObjectId>;
}

/// Encoded form of a tree ready for [`ObjectStore::put_all`].
pub fn tree_object(tree: &RevTree) -> TreeResult<(ObjectId, StoredObject)> {
    let data = encode_tree(tree)?;
    Ok((tree.id(), StoredObject::new(ObjectKind::Tree, data)))
}

fn expect_kind(id: &ObjectId, object: &StoredObject, expected: ObjectKind) -> TreeResult<()> {
    if object.kind != expected {
        return Err(StoreError::KindMismatch {
            id: *id,
            expected,
            actual: object.kind,
        }
        .into());
    }
    Ok(())
}

fn to_tree(id: ObjectId, object: StoredObject) -> TreeResult<RevTree> {
    expect_kind(&id, &object, ObjectKind::Tree)?;
    Ok(decode_tree(id, object.data)?)
}

impl<T: ObjectStore + ?Sized> TreeStore for T {
    fn get_tree(&self, id: &ObjectId) -> TreeResult<RevTree> {
        self.get_tree_if_present(id)?
            .ok_or_else(|| StoreError::NotFound(*id).into())
    }

    fn get_tree_if_present(&self, id: &ObjectId) -> TreeResult<Option<RevTree>> {
        if *id == RevTree::empty_id() {
            return Ok(Some(RevTree::empty()));
        }
        self.get_if_present(id)?
            .map(|object| to_tree(*id, object))
            .transpose()
    }

    fn get_trees(&self, ids: &[ObjectId], listener: &dyn BulkListener) -> TreeResult<Vec<RevTree>> {
        self.get_all(ids, listener)?
            .into_iter()
            .map(|(id, object)| to_tree(id, object))
            .collect()
    }

    fn put_tree(&self, tree: &RevTree) -> TreeResult<bool> {
        let (id, object) = tree_object(tree)?;
        Ok(self.put(id, object)?)
    }

    fn get_feature(&self, id: &ObjectId) -> TreeResult<RevFeature> {
        let object = self.get(id)?;
        expect_kind(id, &object, ObjectKind::Feature)?;
        RevFeature::decode(*id, &object.data)
    }

    fn put_feature(&self, feature: &RevFeature) -> TreeResult<ObjectId> {
        let (id, object) = feature.to_object()?;
        self.put(id, object)?;
        Ok(id)
    }

    fn get_feature_type(&self, id: &ObjectId) -> TreeResult<FeatureType> {
        let object = self.get(id)?;
        expect_kind(id, &object, ObjectKind::FeatureType)?;
        FeatureType::decode(*id, &object.data)
    }

    fn put_feature_type(&self, feature_type: &FeatureType) -> TreeResult<ObjectId> {
        let (id, object) = feature_type.to_object()?;
        self.put(id, object)?;
        Ok(id)
    }
}
