use std::sync::atomic::{AtomicU64, Ordering};

use strata_types::ObjectId;

use crate::error::{StoreError, StoreResult};
use crate::object::StoredObject;

/// Observer for bulk store operations.
///
/// Implementations must be cheap and thread safe: backends may report from
/// worker threads.
pub trait BulkListener: Sync {
    fn found(&self, _id: &ObjectId, _size: u64) {}

    fn not_found(&self, _id: &ObjectId) {}

    fn inserted(&self, _id: &ObjectId, _size: u64) {}

    fn deleted(&self, _id: &ObjectId) {}
}

/// Listener that ignores every callback.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopListener;

impl BulkListener for NoopListener {}

/// Shared no-op listener instance.
pub const NOOP_LISTENER: NoopListener = NoopListener;

/// Listener that tallies callbacks.
#[derive(Debug, Default)]
pub struct CountingListener {
    found: AtomicU64,
    not_found: AtomicU64,
    inserted: AtomicU64,
    deleted: AtomicU64,
}

impl CountingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn found_count(&self) -> u64 {
        self.found.load(Ordering::Relaxed)
    }

    pub fn not_found_count(&self) -> u64 {
        self.not_found.load(Ordering::Relaxed)
    }

    pub fn inserted_count(&self) -> u64 {
        self.inserted.load(Ordering::Relaxed)
    }

    pub fn deleted_count(&self) -> u64 {
        self.deleted.load(Ordering::Relaxed)
    }
}

impl BulkListener for CountingListener {
    fn found(&self, _id: &ObjectId, _size: u64) {
        self.found.fetch_add(1, Ordering::Relaxed);
    }

    fn not_found(&self, _id: &ObjectId) {
        self.not_found.fetch_add(1, Ordering::Relaxed);
    }

    fn inserted(&self, _id: &ObjectId, _size: u64) {
        self.inserted.fetch_add(1, Ordering::Relaxed);
    }

    fn deleted(&self, _id: &ObjectId) {
        self.deleted.fetch_add(1, Ordering::Relaxed);
    }
}

/// Content-addressed object store.
///
/// All implementations must satisfy these invariants:
/// - Objects are immutable once written; writing an id twice is a no-op.
/// - Concurrent reads are always safe.
/// - The store never interprets object contents.
/// - Bulk reads tolerate partial misses: missing ids are reported to the
///   listener and skipped, never turned into an error. Callers that need
///   completeness check the result themselves.
pub trait ObjectStore: Send + Sync {
    /// Read an object, `Ok(None)` if it does not exist.
    fn get_if_present(&self, id: &ObjectId) -> StoreResult<Option<StoredObject>>;

    /// Store `object` under `id`. Returns `true` if it was newly inserted.
    fn put(&self, id: ObjectId, object: StoredObject) -> StoreResult<bool>;

    fn exists(&self, id: &ObjectId) -> StoreResult<bool>;

    /// Delete an object. Returns `true` if it existed.
    fn delete(&self, id: &ObjectId) -> StoreResult<bool>;

    /// Read an object that must exist.
    fn get(&self, id: &ObjectId) -> StoreResult<StoredObject> {
        self.get_if_present(id)?.ok_or(StoreError::NotFound(*id))
    }

    /// Read many objects in one call.
    ///
    /// Results come back in request order with missing ids omitted. The
    /// default implementation loops over [`get_if_present`](Self::get_if_present);
    /// backends override it to save round trips.
    fn get_all(
        &self,
        ids: &[ObjectId],
        listener: &dyn BulkListener,
    ) -> StoreResult<Vec<(ObjectId, StoredObject)>> {
        let mut found = Vec::with_capacity(ids.len());
        for id in ids {
            match self.get_if_present(id)? {
                Some(obj) => {
                    listener.found(id, obj.size());
                    found.push((*id, obj));
                }
                None => listener.not_found(id),
            }
        }
        Ok(found)
    }

    /// Write many objects in one call, returning how many were new.
    fn put_all(
        &self,
        objects: Vec<(ObjectId, StoredObject)>,
        listener: &dyn BulkListener,
    ) -> StoreResult<usize> {
        let mut inserted = 0;
        for (id, obj) in objects {
            let size = obj.size();
            if self.put(id, obj)? {
                listener.inserted(&id, size);
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    /// Delete many objects, returning how many existed.
    fn delete_all(&self, ids: &[ObjectId], listener: &dyn BulkListener) -> StoreResult<usize> {
        let mut deleted = 0;
        for id in ids {
            if self.delete(id)? {
                listener.deleted(id);
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}
