//! On-disk cache backend with validated artifact files.
//!
//! Each entry is stored at `<cache_dir>/results/<key>.res`. The file starts
//! with a 4-byte little-endian header length, then a `bincode` header holding
//! magic bytes, the format version, the kiln version and a payload checksum,
//! then the payload itself.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use kiln_common::ContentHash;
use serde::{Deserialize, Serialize};

use crate::error::CacheError;
use crate::key::CacheKey;
use crate::store::ResultCache;

/// Magic bytes identifying a kiln cache artifact.
const ARTIFACT_MAGIC: [u8; 4] = *b"KILN";

/// Current artifact format version. Increment on breaking changes to
/// the header or payload format.
const ARTIFACT_FORMAT_VERSION: u32 = 1;

/// Subdirectory holding result artifacts.
const RESULTS_SUBDIR: &str = "results";

/// File extension for result artifacts.
const RESULT_EXT: &str = "res";

/// Distinguishes concurrent writers' temporary files within one process.
static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Header prepended to every cached artifact for validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactHeader {
    /// Magic bytes: must be `b"KILN"`.
    pub magic: [u8; 4],

    /// Artifact format version.
    pub format_version: u32,

    /// Kiln version that produced this artifact.
    pub kiln_version: String,

    /// Content hash of the payload data (for integrity checks).
    pub checksum: ContentHash,
}

/// Content-addressed result store on the local filesystem.
///
/// Reads are fail-safe: a missing, truncated, corrupt or foreign file is a
/// cache miss. Writes go to a temporary file that is renamed into place, so
/// readers never observe a half-written artifact.
pub struct DiskCache {
    /// Root cache directory.
    cache_dir: PathBuf,

    /// Version string written into every header.
    kiln_version: String,
}

impl DiskCache {
    /// Creates a disk cache rooted at the given directory.
    pub fn new(cache_dir: &Path, kiln_version: &str) -> Self {
        Self {
            cache_dir: cache_dir.to_path_buf(),
            kiln_version: kiln_version.to_string(),
        }
    }

    /// Ensures that the results subdirectory exists.
    pub fn ensure_dirs(&self) -> Result<(), CacheError> {
        let dir = self.cache_dir.join(RESULTS_SUBDIR);
        std::fs::create_dir_all(&dir).map_err(|e| CacheError::Io {
            path: dir,
            source: e,
        })
    }

    /// Returns the file path for the artifact stored under `key`.
    pub fn artifact_path(&self, key: &CacheKey) -> PathBuf {
        self.cache_dir
            .join(RESULTS_SUBDIR)
            .join(format!("{key}.{RESULT_EXT}"))
    }

    /// Writes an artifact with a validated header.
    pub fn write_artifact(&self, key: &CacheKey, data: &[u8]) -> Result<(), CacheError> {
        self.ensure_dirs()?;

        let header = ArtifactHeader {
            magic: ARTIFACT_MAGIC,
            format_version: ARTIFACT_FORMAT_VERSION,
            kiln_version: self.kiln_version.clone(),
            checksum: ContentHash::from_bytes(data),
        };

        let header_bytes = bincode::serde::encode_to_vec(&header, bincode::config::standard())
            .map_err(|e| CacheError::HeaderEncode {
                key: *key,
                reason: e.to_string(),
            })?;

        let header_len = header_bytes.len() as u32;
        let mut output = Vec::with_capacity(4 + header_bytes.len() + data.len());
        output.extend_from_slice(&header_len.to_le_bytes());
        output.extend_from_slice(&header_bytes);
        output.extend_from_slice(data);

        let path = self.artifact_path(key);
        let seq = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let tmp = path.with_extension(format!("{RESULT_EXT}.{}-{seq}.tmp", std::process::id()));
        std::fs::write(&tmp, &output).map_err(|e| CacheError::Io {
            path: tmp.clone(),
            source: e,
        })?;
        std::fs::rename(&tmp, &path).map_err(|e| CacheError::Io { path, source: e })
    }

    /// Reads and validates an artifact, reporting why validation failed.
    pub fn read_artifact(&self, key: &CacheKey) -> Result<Vec<u8>, CacheError> {
        let path = self.artifact_path(key);
        let raw = std::fs::read(&path).map_err(|e| CacheError::Io {
            path: path.clone(),
            source: e,
        })?;

        if raw.len() < 4 {
            return Err(CacheError::Corrupt {
                key: *key,
                reason: "file shorter than header length prefix".to_string(),
            });
        }

        let header_len = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize;
        if raw.len() < 4 + header_len {
            return Err(CacheError::Corrupt {
                key: *key,
                reason: "truncated header".to_string(),
            });
        }

        let header: ArtifactHeader =
            bincode::serde::decode_from_slice(&raw[4..4 + header_len], bincode::config::standard())
                .map_err(|e| CacheError::Corrupt {
                    key: *key,
                    reason: e.to_string(),
                })?
                .0;

        if header.magic != ARTIFACT_MAGIC {
            return Err(CacheError::Corrupt {
                key: *key,
                reason: "bad magic bytes".to_string(),
            });
        }

        if header.format_version != ARTIFACT_FORMAT_VERSION {
            return Err(CacheError::FormatVersion {
                key: *key,
                expected: ARTIFACT_FORMAT_VERSION,
                found: header.format_version,
            });
        }

        if header.kiln_version != self.kiln_version {
            return Err(CacheError::StaleEntry {
                key: *key,
                expected: self.kiln_version.clone(),
                found: header.kiln_version,
            });
        }

        let payload = &raw[4 + header_len..];
        let actual = ContentHash::from_bytes(payload);
        if actual != header.checksum {
            return Err(CacheError::ChecksumMismatch {
                key: *key,
                expected: header.checksum,
                actual,
            });
        }

        Ok(payload.to_vec())
    }
}

impl ResultCache for DiskCache {
    fn get(&self, key: &CacheKey) -> Option<Vec<u8>> {
        match self.read_artifact(key) {
            Ok(data) => Some(data),
            Err(e) if e.is_not_found() => None,
            Err(e) => {
                tracing::debug!(key = %key, error = %e, "discarding unreadable cache artifact");
                None
            }
        }
    }

    fn put(&self, key: &CacheKey, data: &[u8]) -> Result<(), CacheError> {
        self.write_artifact(key, data)
    }
}
