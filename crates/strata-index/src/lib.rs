//! Spatial indexes over Strata feature trees.
//!
//! A quad-tree index is a second tree revision holding the same features
//! as a canonical tree, sharded by location instead of by name. Indexes
//! are derived incrementally: the diff between the previously indexed
//! canonical tree and the new one is replayed on the previous index tree.
//!
//! # Key Types
//!
//! - [`IndexBuilder`] -- builds and updates index trees
//! - [`IndexInfo`] -- definition of one index (extent, depth, attributes)
//! - [`IndexDatabase`] -- registry of index definitions and built trees
//! - [`IndexConfig`] -- batch sizes and defaults for new indexes
//! - [`ProgressListener`] -- progress reporting and cooperative cancellation

pub mod builder;
pub mod config;
pub mod database;
pub mod error;
pub mod info;
pub mod progress;
pub mod updater;

pub use builder::{IndexBuild, IndexBuilder};
pub use config::IndexConfig;
pub use database::{InMemoryIndexDatabase, IndexDatabase};
pub use error::{IndexError, IndexResult};
pub use info::{IndexInfo, IndexType};
pub use progress::{DefaultProgressListener, ProgressListener};
pub use updater::{IndexStats, ATTRIBUTES_KEY};
