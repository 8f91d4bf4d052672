//! Shared foundational types used across the kiln compilation service.
//!
//! This crate provides content hashing for cache keys and artifact checksums,
//! and the internal error type shared by the other crates.

#![warn(missing_docs)]

pub mod hash;
pub mod result;

pub use hash::{ContentHash, KeyHasher};
pub use result::InternalError;
