// Cache-aside layer with stale-while-revalidate semantics.
// Values are serialized JSON keyed by (namespace, key); the storage backend
// and the operating mode are both pluggable. Failures never propagate: a
// broken entry degrades to a miss and supplier errors surface as "no value".

pub mod disk;
pub mod redis;

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, error, info, trace, warn};

use crate::error::Result;

pub use self::disk::DiskBackend;
pub use self::redis::RedisBackend;

/// Storage operations a cache backend must provide. Timestamps come from the
/// backend's own notion of last-write time.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn read(&self, namespace: &str, key: &str) -> Result<Option<String>>;
    async fn write(&self, namespace: &str, key: &str, value: &str) -> Result<()>;
    async fn delete(&self, namespace: &str, key: &str) -> Result<()>;
    async fn insert_time_ms(&self, namespace: &str, key: &str) -> Result<Option<u64>>;
}

/// Key spaces for cached records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    /// Raw GitHub page responses.
    Github,
    /// Ranked result sets per query.
    Queries,
    /// Operational flags (readiness).
    Meta,
}

impl Namespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Github => "github",
            Namespace::Queries => "queries",
            Namespace::Meta => "meta",
        }
    }
}

/// How the cache treats reads and writes. Boot-time configuration, except
/// that force-refresh can be toggled at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    #[default]
    ReadWrite,
    /// Serving-only deployments: writes are no-ops, stale hits are hits.
    ReadOnly,
    /// Skip reads entirely and recompute; existing entries are overwritten.
    ForceRefresh,
}

impl FromStr for CacheMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "read-write" => Ok(CacheMode::ReadWrite),
            "read-only" => Ok(CacheMode::ReadOnly),
            "force-refresh" => Ok(CacheMode::ForceRefresh),
            other => Err(format!(
                "invalid cache mode '{other}', expected read-write, read-only or force-refresh"
            )),
        }
    }
}

impl fmt::Display for CacheMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CacheMode::ReadWrite => "read-write",
            CacheMode::ReadOnly => "read-only",
            CacheMode::ForceRefresh => "force-refresh",
        };
        f.write_str(s)
    }
}

/// Which storage backend to boot with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    #[default]
    Disk,
    Redis,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "disk" => Ok(BackendKind::Disk),
            "redis" => Ok(BackendKind::Redis),
            other => Err(format!(
                "invalid cache backend '{other}', expected disk or redis"
            )),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BackendKind::Disk => "disk",
            BackendKind::Redis => "redis",
        })
    }
}

const READY_KEY: &str = "cache_is_ready";

/// Cheap-to-clone handle over the backend and mode.
#[derive(Clone)]
pub struct Cache {
    backend: Arc<dyn CacheBackend>,
    mode: Arc<RwLock<CacheMode>>,
    /// When false, readiness gating is disabled and `is_ready` is always true.
    should_be_ready: bool,
}

impl Cache {
    pub fn new(backend: Arc<dyn CacheBackend>, mode: CacheMode, should_be_ready: bool) -> Self {
        info!("Cache initialized in {} mode", mode);
        Self {
            backend,
            mode: Arc::new(RwLock::new(mode)),
            should_be_ready,
        }
    }

    pub fn mode(&self) -> CacheMode {
        *self.mode.read().expect("cache mode lock poisoned")
    }

    /// Runtime toggle; used to flip force-refresh on and off.
    pub fn set_mode(&self, mode: CacheMode) {
        info!("Cache mode set to {}", mode);
        *self.mode.write().expect("cache mode lock poisoned") = mode;
    }

    /// Plain read without staleness checks. A read or decode failure deletes
    /// the broken entry and reports a miss.
    pub async fn get<T: DeserializeOwned>(&self, namespace: Namespace, key: &str) -> Option<T> {
        let raw = match self.backend.read(namespace.as_str(), key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!("Cache miss for key '{}'", key);
                return None;
            }
            Err(e) => {
                warn!("Failed to read cache for key '{}': {}", key, e);
                self.delete_broken(namespace, key).await;
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => {
                debug!("Cache hit for key '{}'", key);
                Some(value)
            }
            Err(e) => {
                warn!("Corrupted cache entry for key '{}': {}", key, e);
                self.delete_broken(namespace, key).await;
                None
            }
        }
    }

    /// Stores a value. No-op in read-only mode; failures are logged, never
    /// raised.
    pub async fn put<T: Serialize>(&self, namespace: Namespace, key: &str, value: &T) {
        if self.mode() == CacheMode::ReadOnly {
            trace!("Ignoring put in read-only mode for key '{}'", key);
            return;
        }
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                error!("Failed to serialize cache value for key '{}': {}", key, e);
                return;
            }
        };
        if let Err(e) = self.backend.write(namespace.as_str(), key, &raw).await {
            error!("Failed to write cache for key '{}': {}", key, e);
        }
    }

    /// Removes an entry. No-op in read-only mode.
    pub async fn invalidate(&self, namespace: Namespace, key: &str) {
        if self.mode() == CacheMode::ReadOnly {
            trace!("Ignoring invalidate in read-only mode for key '{}'", key);
            return;
        }
        if let Err(e) = self.backend.delete(namespace.as_str(), key).await {
            error!("Failed to invalidate cache for key '{}': {}", key, e);
        }
    }

    /// Cache-aside read with stale-while-revalidate.
    ///
    /// Fresh hits return immediately. A stale hit is still returned to the
    /// caller, while the supplier runs in a detached task whose result
    /// overwrites the entry; its failure is logged and discarded. Concurrent
    /// stale hits may refresh redundantly; the last writer wins. On a miss
    /// the supplier runs synchronously. In read-only mode a stale hit is a
    /// hit and no refresh ever runs; in force-refresh mode the read is
    /// skipped entirely.
    pub async fn get_or_compute<T, E, Fut>(
        &self,
        namespace: Namespace,
        key: &str,
        refresh_interval: Duration,
        supplier: impl FnOnce() -> Fut,
    ) -> Option<T>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        E: fmt::Display + Send + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
    {
        let mode = self.mode();

        if mode == CacheMode::ForceRefresh {
            return self.compute_and_store(namespace, key, supplier()).await;
        }

        match self.get::<T>(namespace, key).await {
            Some(value) => {
                if mode != CacheMode::ReadOnly
                    && self.is_stale(namespace, key, refresh_interval).await
                {
                    // Serve the stale value now; replace it only once the
                    // new data has arrived.
                    info!("Cache entry stale for key '{}', refreshing behind", key);
                    let cache = self.clone();
                    let key = key.to_string();
                    let fut = supplier();
                    tokio::spawn(async move {
                        match fut.await {
                            Ok(fresh) => cache.put(namespace, &key, &fresh).await,
                            Err(e) => warn!("Background refresh failed for key '{}': {}", key, e),
                        }
                    });
                }
                Some(value)
            }
            None => {
                if mode == CacheMode::ReadOnly {
                    return None;
                }
                self.compute_and_store(namespace, key, supplier()).await
            }
        }
    }

    async fn compute_and_store<T, E>(
        &self,
        namespace: Namespace,
        key: &str,
        fut: impl Future<Output = std::result::Result<T, E>>,
    ) -> Option<T>
    where
        T: Serialize,
        E: fmt::Display,
    {
        match fut.await {
            Ok(value) => {
                self.put(namespace, key, &value).await;
                Some(value)
            }
            Err(e) => {
                error!("Error fetching data for key '{}': {}", key, e);
                None
            }
        }
    }

    /// Age check against the backend write timestamp. Unknown or unreadable
    /// timestamps count as stale.
    async fn is_stale(&self, namespace: Namespace, key: &str, refresh_interval: Duration) -> bool {
        match self.backend.insert_time_ms(namespace.as_str(), key).await {
            Ok(Some(written_ms)) => {
                let age_ms = now_ms().saturating_sub(written_ms);
                age_ms > refresh_interval.as_millis() as u64
            }
            Ok(None) => true,
            Err(e) => {
                warn!("Error checking cache entry age for key '{}': {}", key, e);
                true
            }
        }
    }

    async fn delete_broken(&self, namespace: Namespace, key: &str) {
        if let Err(e) = self.backend.delete(namespace.as_str(), key).await {
            error!("Failed to delete broken cache entry '{}': {}", key, e);
        }
    }

    /// Readiness gate for serving: true once the initial population has
    /// completed, or unconditionally when gating is disabled.
    pub async fn is_ready(&self) -> bool {
        if !self.should_be_ready {
            return true;
        }
        self.get::<bool>(Namespace::Meta, READY_KEY)
            .await
            .unwrap_or(false)
    }

    pub async fn set_ready(&self, ready: bool) {
        self.put(Namespace::Meta, READY_KEY, &ready).await;
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
