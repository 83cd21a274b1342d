use std::collections::HashMap;
use std::sync::RwLock;

use strata_types::ObjectId;

use crate::error::{StoreError, StoreResult};
use crate::object::StoredObject;
use crate::traits::{BulkListener, ObjectStore};

/// In-memory, HashMap-based object store.
///
/// Intended for tests and embedding. Reads clone the object handle, which
/// shares the underlying buffer.
pub struct InMemoryObjectStore {
    objects: RwLock<HashMap<ObjectId, StoredObject>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.objects.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().expect("lock poisoned").is_empty()
    }

    /// Total encoded bytes across all stored objects.
    pub fn total_bytes(&self) -> u64 {
        self.objects
            .read()
            .expect("lock poisoned")
            .values()
            .map(StoredObject::size)
            .sum()
    }

    /// Sorted list of all stored ids.
    pub fn all_ids(&self) -> Vec<ObjectId> {
        let map = self.objects.read().expect("lock poisoned");
        let mut ids: Vec<ObjectId> = map.keys().copied().collect();
        ids.sort();
        ids
    }
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectStore for InMemoryObjectStore {
    fn get_if_present(&self, id: &ObjectId) -> StoreResult<Option<StoredObject>> {
        let map = self.objects.read().expect("lock poisoned");
        Ok(map.get(id).cloned())
    }

    fn put(&self, id: ObjectId, object: StoredObject) -> StoreResult<bool> {
        if id.is_null() {
            return Err(StoreError::NullObjectId);
        }
        let mut map = self.objects.write().expect("lock poisoned");
        if map.contains_key(&id) {
            return Ok(false);
        }
        map.insert(id, object);
        Ok(true)
    }

    fn exists(&self, id: &ObjectId) -> StoreResult<bool> {
        let map = self.objects.read().expect("lock poisoned");
        Ok(map.contains_key(id))
    }

    fn delete(&self, id: &ObjectId) -> StoreResult<bool> {
        let mut map = self.objects.write().expect("lock poisoned");
        Ok(map.remove(id).is_some())
    }

    // One lock acquisition per batch instead of one per id.
    fn get_all(
        &self,
        ids: &[ObjectId],
        listener: &dyn BulkListener,
    ) -> StoreResult<Vec<(ObjectId, StoredObject)>> {
        let map = self.objects.read().expect("lock poisoned");
        let mut found = Vec::with_capacity(ids.len());
        for id in ids {
            match map.get(id) {
                Some(obj) => {
                    listener.found(id, obj.size());
                    found.push((*id, obj.clone()));
                }
                None => listener.not_found(id),
            }
        }
        Ok(found)
    }

    fn put_all(
        &self,
        objects: Vec<(ObjectId, StoredObject)>,
        listener: &dyn BulkListener,
    ) -> StoreResult<usize> {
        let mut map = self.objects.write().expect("lock poisoned");
        let mut inserted = 0;
        for (id, obj) in objects {
            if id.is_null() {
                return Err(StoreError::NullObjectId);
            }
            if map.contains_key(&id) {
                continue;
            }
            listener.inserted(&id, obj.size());
            map.insert(id, obj);
            inserted += 1;
        }
        Ok(inserted)
    }
}

impl std::fmt::Debug for InMemoryObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryObjectStore")
            .field("object_count", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectKind;
    use crate::traits::{CountingListener, NOOP_LISTENER};

    fn feature(content: &[u8]) -> (ObjectId, StoredObject) {
        (
            ObjectId::from_bytes(content),
            StoredObject::new(ObjectKind::Feature, content.to_vec()),
        )
    }

    // -----------------------------------------------------------------------
    // Single-object operations
    // -----------------------------------------------------------------------

    #[test]
    fn put_and_get() {
        let store = InMemoryObjectStore::new();
        let (id, obj) = feature(b"road-1");
        assert!(store.put(id, obj.clone()).unwrap());
        assert_eq!(store.get(&id).unwrap(), obj);
        assert!(store.exists(&id).unwrap());
    }

    #[test]
    fn put_is_idempotent() {
        let store = InMemoryObjectStore::new();
        let (id, obj) = feature(b"dup");
        assert!(store.put(id, obj.clone()).unwrap());
        assert!(!store.put(id, obj).unwrap());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn get_missing_is_not_found() {
        let store = InMemoryObjectStore::new();
        let id = ObjectId::from_bytes(b"missing");
        assert!(store.get_if_present(&id).unwrap().is_none());
        assert!(matches!(store.get(&id), Err(StoreError::NotFound(missing)) if missing == id));
    }

    #[test]
    fn null_id_is_rejected() {
        let store = InMemoryObjectStore::new();
        let (_, obj) = feature(b"x");
        assert!(matches!(
            store.put(ObjectId::NULL, obj),
            Err(StoreError::NullObjectId)
        ));
    }

    #[test]
    fn delete_reports_presence() {
        let store = InMemoryObjectStore::new();
        let (id, obj) = feature(b"gone");
        store.put(id, obj).unwrap();
        assert!(store.delete(&id).unwrap());
        assert!(!store.delete(&id).unwrap());
        assert!(store.is_empty());
    }

    // -----------------------------------------------------------------------
    // Bulk operations
    // -----------------------------------------------------------------------

    #[test]
    fn get_all_returns_every_present_id() {
        let store = InMemoryObjectStore::new();
        let objects: Vec<_> = (0..50u32).map(|i| feature(&i.to_be_bytes())).collect();
        let ids: Vec<_> = objects.iter().map(|(id, _)| *id).collect();
        let listener = CountingListener::new();
        assert_eq!(store.put_all(objects, &listener).unwrap(), 50);
        assert_eq!(listener.inserted_count(), 50);

        let found = store.get_all(&ids, &listener).unwrap();
        assert_eq!(found.len(), 50);
        assert_eq!(listener.found_count(), 50);
        // request order is preserved
        let returned: Vec<_> = found.iter().map(|(id, _)| *id).collect();
        assert_eq!(returned, ids);
    }

    #[test]
    fn get_all_tolerates_partial_misses() {
        let store = InMemoryObjectStore::new();
        let (present, obj) = feature(b"here");
        store.put(present, obj).unwrap();
        let absent = ObjectId::from_bytes(b"not here");

        let listener = CountingListener::new();
        let found = store.get_all(&[present, absent], &listener).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0, present);
        assert_eq!(listener.found_count(), 1);
        assert_eq!(listener.not_found_count(), 1);
    }

    #[test]
    fn put_all_skips_existing() {
        let store = InMemoryObjectStore::new();
        let a = feature(b"a");
        let b = feature(b"b");
        store.put(a.0, a.1.clone()).unwrap();
        let listener = CountingListener::new();
        assert_eq!(store.put_all(vec![a, b], &listener).unwrap(), 1);
        assert_eq!(listener.inserted_count(), 1);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn delete_all_counts_existing() {
        let store = InMemoryObjectStore::new();
        let a = feature(b"a");
        store.put(a.0, a.1).unwrap();
        let listener = CountingListener::new();
        let missing = ObjectId::from_bytes(b"z");
        assert_eq!(store.delete_all(&[a.0, missing], &listener).unwrap(), 1);
        assert_eq!(listener.deleted_count(), 1);
    }

    #[test]
    fn utility_methods() {
        let store = InMemoryObjectStore::default();
        let a = feature(b"12345");
        let b = feature(b"123456789");
        store.put_all(vec![a, b], &NOOP_LISTENER).unwrap();
        assert_eq!(store.total_bytes(), 14);
        let ids = store.all_ids();
        assert!(ids.windows(2).all(|w| w[0] <= w[1]));
        assert!(format!("{store:?}").contains("object_count"));
    }

    #[test]
    fn concurrent_reads_are_safe() {
        use std::sync::Arc;
        use std::thread;

        let store = Arc::new(InMemoryObjectStore::new());
        let (id, obj) = feature(b"shared");
        store.put(id, obj).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || store.get(&id).unwrap().size())
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().expect("thread should not panic"), 6);
        }
    }
}
