//! Foundation types for Strata, a versioned tree store for geospatial
//! feature collections.
//!
//! Every other Strata crate depends on `strata-types`.
//!
//! # Key Types
//!
//! - [`ObjectId`] -- content-addressed identifier (BLAKE3 digest)
//! - [`ContentHasher`] / [`Funnel`] -- domain-separated canonical hashing
//! - [`Envelope`] -- axis-aligned bounding box with quadrant slicing
//! - [`Geometry`] -- minimal planar geometry for envelope derivation
//! - [`Value`] / [`FieldType`] -- tagged attribute values

pub mod envelope;
pub mod error;
pub mod geometry;
pub mod hasher;
pub mod object;
pub mod value;

pub use envelope::{Envelope, Quadrant};
pub use error::{TypeError, TypeResult};
pub use geometry::{Coord, Geometry};
pub use hasher::{ContentHasher, Funnel};
pub use object::ObjectId;
pub use value::{FieldType, Value};
