//! The engine's view of the result cache.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use kiln_cache::{CacheKey, DiskCache, MemoryCache, ResultCache};
use kiln_config::{CacheBackend, CacheConfig};
use tracing::{debug, warn};

use crate::result::CompilationResult;

/// Namespace of the companion entry holding a built executable.
const EXECUTABLE_NAMESPACE: &str = "executable";

/// Reads and writes [`CompilationResult`]s through a [`ResultCache`].
///
/// Lookups never fail: anything unreadable is a miss. Writes log failures
/// and carry on, since a lost cache entry only costs a recompile.
#[derive(Clone)]
pub struct CacheGateway {
    backend: Arc<dyn ResultCache>,
}

impl CacheGateway {
    /// Wraps a cache backend.
    pub fn new(backend: Arc<dyn ResultCache>) -> Self {
        Self { backend }
    }

    /// A gateway over a fresh in-memory cache.
    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryCache::new()))
    }

    /// Builds the backend selected by `[cache]`.
    pub fn from_config(config: &CacheConfig, kiln_version: &str) -> Self {
        match config.backend {
            CacheBackend::Memory => Self::memory(),
            CacheBackend::Disk => {
                let dir = config
                    .dir
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(".kiln-cache"));
                Self::new(Arc::new(DiskCache::new(&dir, kiln_version)))
            }
        }
    }

    /// Looks up the result stored under `key`.
    ///
    /// A hit is stamped with `retrieved_from_cache` and the lookup duration.
    pub async fn get(&self, key: &CacheKey) -> Option<CompilationResult> {
        let start = Instant::now();
        let bytes = self.get_raw(*key).await?;
        match serde_json::from_slice::<CompilationResult>(&bytes) {
            Ok(mut result) => {
                result.retrieved_from_cache = true;
                result.retrieved_from_cache_time = Some(start.elapsed());
                debug!(key = %key, "cache hit");
                Some(result)
            }
            Err(e) => {
                debug!(key = %key, error = %e, "discarding undecodable cached result");
                None
            }
        }
    }

    /// Stores `result` under `key`.
    ///
    /// Request-local state is stripped first: the workspace path, any
    /// execution result and the cache-hit stamps.
    pub async fn put(&self, key: &CacheKey, result: &CompilationResult) {
        let stored = CompilationResult {
            dir_path: None,
            opt_path: None,
            exec_result: None,
            retrieved_from_cache: false,
            retrieved_from_cache_time: None,
            ..result.clone()
        };
        match serde_json::to_vec(&stored) {
            Ok(bytes) => self.put_raw(*key, bytes).await,
            Err(e) => warn!(key = %key, error = %e, "failed to encode result for caching"),
        }
    }

    /// Looks up the executable built for `key`.
    pub async fn get_executable(&self, key: &CacheKey) -> Option<Vec<u8>> {
        self.get_raw(key.derive(EXECUTABLE_NAMESPACE)).await
    }

    /// Stores the executable built for `key`.
    pub async fn put_executable(&self, key: &CacheKey, bytes: Vec<u8>) {
        self.put_raw(key.derive(EXECUTABLE_NAMESPACE), bytes).await;
    }

    async fn get_raw(&self, key: CacheKey) -> Option<Vec<u8>> {
        let backend = self.backend.clone();
        match tokio::task::spawn_blocking(move || backend.get(&key)).await {
            Ok(found) => {
                if found.is_none() {
                    debug!(key = %key, "cache miss");
                }
                found
            }
            Err(e) => {
                warn!(key = %key, error = %e, "cache lookup task failed");
                None
            }
        }
    }

    async fn put_raw(&self, key: CacheKey, bytes: Vec<u8>) {
        let backend = self.backend.clone();
        match tokio::task::spawn_blocking(move || backend.put(&key, &bytes)).await {
            Ok(Ok(())) => debug!(key = %key, "cached"),
            Ok(Err(e)) => warn!(key = %key, error = %e, "failed to write cache entry"),
            Err(e) => warn!(key = %key, error = %e, "cache write task failed"),
        }
    }
}

impl std::fmt::Debug for CacheGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheGateway").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::ExecutionResult;

    fn key(s: &str) -> CacheKey {
        CacheKey::of(s).unwrap()
    }

    #[tokio::test]
    async fn miss_then_hit() {
        let gateway = CacheGateway::memory();
        assert!(gateway.get(&key("a")).await.is_none());

        let result = CompilationResult {
            code: 0,
            asm: "mov eax, 1".into(),
            ok_to_cache: true,
            ..CompilationResult::default()
        };
        gateway.put(&key("a"), &result).await;
        let hit = gateway.get(&key("a")).await.unwrap();
        assert!(hit.retrieved_from_cache);
        assert!(hit.retrieved_from_cache_time.is_some());
        assert_eq!(hit.asm, "mov eax, 1");
    }

    #[tokio::test]
    async fn stored_results_lose_request_state() {
        let gateway = CacheGateway::memory();
        let result = CompilationResult {
            dir_path: Some(PathBuf::from("/tmp/kiln-x")),
            exec_result: Some(ExecutionResult::not_executed("x")),
            ..CompilationResult::default()
        };
        gateway.put(&key("b"), &result).await;
        let hit = gateway.get(&key("b")).await.unwrap();
        assert!(hit.dir_path.is_none());
        assert!(hit.exec_result.is_none());
    }

    #[tokio::test]
    async fn executables_do_not_collide_with_results() {
        let gateway = CacheGateway::memory();
        gateway.put_executable(&key("c"), b"\x7fELF".to_vec()).await;
        assert!(gateway.get(&key("c")).await.is_none());
        assert_eq!(gateway.get_executable(&key("c")).await.unwrap(), b"\x7fELF");
    }

    #[tokio::test]
    async fn undecodable_payload_is_miss() {
        let backend = Arc::new(MemoryCache::new());
        backend.put(&key("d"), b"not json").unwrap();
        let gateway = CacheGateway::new(backend);
        assert!(gateway.get(&key("d")).await.is_none());
    }

    #[tokio::test]
    async fn disk_backend_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = CacheConfig {
            backend: CacheBackend::Disk,
            dir: Some(dir.path().to_path_buf()),
        };
        let gateway = CacheGateway::from_config(&config, "0.1.0");
        gateway.put(&key("e"), &CompilationResult::default()).await;
        let again = CacheGateway::from_config(&config, "0.1.0");
        assert!(again.get(&key("e")).await.is_some());
    }
}
