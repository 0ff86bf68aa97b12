//! Gridfold Foundation
//!
//! Leaf types shared by every gridfold crate: dimension names with role
//! tags, ordered integer tuples over dimensions, and the stable hashing
//! used for structural expression fingerprints.

pub mod dims;
pub mod stable_hash;

pub use dims::{DimError, DimKind, DimTuple};
