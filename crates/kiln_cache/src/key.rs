//! Deterministic cache keys.

use std::fmt;

use kiln_common::{ContentHash, KeyHasher};
use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// An opaque, deterministic digest identifying one compilation.
///
/// Keys are computed from a serializable description of the full request.
/// Serialization goes through canonical JSON: struct fields are emitted in
/// declaration order and sequences keep their order, so identical inputs
/// always produce identical keys and reordering a sequence changes the key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey(ContentHash);

impl CacheKey {
    /// Computes the key of any serializable value.
    ///
    /// Values containing maps should use ordered maps (`BTreeMap`) so that
    /// iteration order cannot leak into the key.
    pub fn of<T: Serialize + ?Sized>(value: &T) -> Result<Self, CacheError> {
        let bytes = serde_json::to_vec(value)?;
        Ok(Self(ContentHash::from_bytes(&bytes)))
    }

    /// Derives a second key in a separate namespace from this one.
    ///
    /// Used to store companion entries (such as a built executable) next to
    /// the primary result without colliding with it.
    pub fn derive(&self, namespace: &str) -> Self {
        let hash = KeyHasher::new()
            .part(namespace.as_bytes())
            .part(self.0.as_bytes())
            .finish();
        Self(hash)
    }

    /// Returns the underlying content hash.
    pub fn hash(&self) -> ContentHash {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({})", self.0)
    }
}
