//! Content-addressed object storage for Strata.
//!
//! Trees, features and feature types are stored as immutable objects keyed
//! by their [`ObjectId`](strata_types::ObjectId). The store is a pure
//! key-value store; encoding lives in `strata-tree`.
//!
//! # Components
//!
//! - [`ObjectStore`] -- backend trait with batched `get_all` / `put_all`
//! - [`BulkListener`] -- observer for bulk operations
//! - [`InMemoryObjectStore`] -- `HashMap`-based store for tests and embedding
//! - [`BackgroundIterator`] -- bounded-queue prefetch on a worker thread

pub mod error;
pub mod memory;
pub mod object;
pub mod prefetch;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use memory::InMemoryObjectStore;
pub use object::{ObjectKind, StoredObject};
pub use prefetch::{prefetch_all, BackgroundIterator};
pub use traits::{BulkListener, CountingListener, NoopListener, ObjectStore, NOOP_LISTENER};
