//! Error types for cache operations.

use std::path::PathBuf;

use kiln_common::ContentHash;

use crate::key::CacheKey;

/// Errors from computing keys and reading or writing cache entries.
///
/// Result payloads and built executables are both entries, addressed by
/// their key. Readers treat every entry error as a miss; the variants exist
/// so the reason can be logged.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The request description could not be encoded into a key.
    #[error("cannot encode cache key material: {0}")]
    KeyMaterial(#[from] serde_json::Error),

    /// A cache file or directory could not be read or written.
    #[error("cache I/O error at {path}: {source}")]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The header of an entry could not be encoded.
    #[error("cannot encode header for cache entry {key}: {reason}")]
    HeaderEncode {
        /// The entry being written.
        key: CacheKey,
        /// Encoder message.
        reason: String,
    },

    /// An entry is truncated or its header is unreadable.
    #[error("cache entry {key} is corrupt: {reason}")]
    Corrupt {
        /// The entry.
        key: CacheKey,
        /// What is wrong with it.
        reason: String,
    },

    /// The payload does not hash to the checksum in the header.
    #[error("cache entry {key} hashes to {actual}, header says {expected}")]
    ChecksumMismatch {
        /// The entry.
        key: CacheKey,
        /// Checksum recorded in the header.
        expected: ContentHash,
        /// Checksum of the payload on disk.
        actual: ContentHash,
    },

    /// The entry uses another artifact layout.
    #[error("cache entry {key} has artifact format {found}, expected {expected}")]
    FormatVersion {
        /// The entry.
        key: CacheKey,
        /// Format this build reads.
        expected: u32,
        /// Format found in the header.
        found: u32,
    },

    /// The entry was produced by a different kiln release, whose results
    /// may not match this one's.
    #[error("cache entry {key} was written by kiln {found}, this is kiln {expected}")]
    StaleEntry {
        /// The entry.
        key: CacheKey,
        /// This kiln's version.
        expected: String,
        /// Version recorded in the header.
        found: String,
    },
}

impl CacheError {
    /// Whether this is a plain miss: the entry file does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}
