//! Content-addressed result caching for the compilation engine.
//!
//! A [`CacheKey`] is a deterministic digest of everything that determines a
//! compilation's output. Cached values are opaque byte payloads stored behind
//! the [`ResultCache`] trait, either in process memory ([`MemoryCache`]) or as
//! headered, checksummed files on disk ([`DiskCache`]).

#![warn(missing_docs)]

pub mod artifact;
pub mod error;
pub mod key;
pub mod store;

pub use artifact::DiskCache;
pub use error::CacheError;
pub use key::CacheKey;
pub use store::{MemoryCache, ResultCache};
