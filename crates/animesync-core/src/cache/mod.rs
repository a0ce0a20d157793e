// # Cache
//
// TTL-bounded cache of remote metadata with fallback to the last known
// good value.
//
// ## Lookup rules
//
// 1. A non-expired entry is returned without calling the fetcher
// 2. Otherwise the fetcher runs; on success the new value is persisted and
//    returned
// 3. On fetch failure a stale entry is returned as `Degraded`, carrying
//    the error
// 4. With no entry at all the caller gets `Unavailable`, never a panic
//
// Corrupt entries are treated as misses.

pub mod file;
pub mod memory;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::traits::{CacheBackend, ClearReport};

pub use file::FileCacheBackend;
pub use memory::MemoryCacheBackend;

/// Group of cache entries that can be cleared together
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheNamespace {
    Art,
    Details,
    Trending,
    Recommendations,
    Upcoming,
    Similar,
}

impl CacheNamespace {
    pub const ALL: [CacheNamespace; 6] = [
        CacheNamespace::Art,
        CacheNamespace::Details,
        CacheNamespace::Trending,
        CacheNamespace::Recommendations,
        CacheNamespace::Upcoming,
        CacheNamespace::Similar,
    ];

    /// Directory name used by the file backend
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheNamespace::Art => "art",
            CacheNamespace::Details => "details",
            CacheNamespace::Trending => "trending",
            CacheNamespace::Recommendations => "recommendations",
            CacheNamespace::Upcoming => "upcoming",
            CacheNamespace::Similar => "similar",
        }
    }
}

impl fmt::Display for CacheNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A cached value with its fetch time and time-to-live
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry<T> {
    pub key: String,
    pub fetched_at: DateTime<Utc>,
    pub ttl_seconds: u64,
    pub value: T,
}

impl<T> CacheEntry<T> {
    pub fn new(key: impl Into<String>, value: T, fetched_at: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            key: key.into(),
            fetched_at,
            ttl_seconds: ttl.as_secs(),
            value,
        }
    }

    /// `now - fetched_at > ttl`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let ttl = i64::try_from(self.ttl_seconds).unwrap_or(i64::MAX);
        match chrono::Duration::try_seconds(ttl) {
            Some(ttl) => now.signed_duration_since(self.fetched_at) > ttl,
            None => false,
        }
    }
}

/// Result of [`CacheStore::get`]
#[derive(Debug)]
pub enum CacheLookup<T> {
    /// Served from cache, fetcher not called
    Fresh(T),
    /// Fetched from the source just now
    Refreshed(T),
    /// Refresh failed, stale value served
    Degraded { value: T, error: Error },
    /// Refresh failed and nothing was cached
    Unavailable { error: Error },
}

impl<T> CacheLookup<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            CacheLookup::Fresh(v) | CacheLookup::Refreshed(v) => Some(v),
            CacheLookup::Degraded { value, .. } => Some(value),
            CacheLookup::Unavailable { .. } => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            CacheLookup::Fresh(v) | CacheLookup::Refreshed(v) => Some(v),
            CacheLookup::Degraded { value, .. } => Some(value),
            CacheLookup::Unavailable { .. } => None,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, CacheLookup::Degraded { .. })
    }

    /// Fetch error noted on a degraded or unavailable lookup
    pub fn error(&self) -> Option<&Error> {
        match self {
            CacheLookup::Degraded { error, .. } | CacheLookup::Unavailable { error } => Some(error),
            _ => None,
        }
    }

    /// Value if any, else the fetch error
    pub fn into_result(self) -> Result<T> {
        match self {
            CacheLookup::Fresh(v) | CacheLookup::Refreshed(v) => Ok(v),
            CacheLookup::Degraded { value, .. } => Ok(value),
            CacheLookup::Unavailable { error } => Err(error),
        }
    }
}

/// TTL cache in front of a [`CacheBackend`]
#[derive(Clone)]
pub struct CacheStore {
    backend: Arc<dyn CacheBackend>,
    clock: Arc<dyn Clock>,
    enabled: bool,
}

impl CacheStore {
    pub fn new(backend: Arc<dyn CacheBackend>, clock: Arc<dyn Clock>) -> Self {
        Self {
            backend,
            clock,
            enabled: true,
        }
    }

    /// Turn caching off; every `get` then calls the fetcher
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Look up `key`, refreshing through `fetch` when missing or expired
    pub async fn get<T, F, Fut>(
        &self,
        namespace: CacheNamespace,
        key: &str,
        ttl: Duration,
        fetch: F,
    ) -> CacheLookup<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if !self.enabled {
            return match fetch().await {
                Ok(value) => CacheLookup::Refreshed(value),
                Err(error) => CacheLookup::Unavailable { error },
            };
        }

        let now = self.clock.now();
        let stale = match self.load::<T>(namespace, key).await {
            Some(entry) if !entry.is_expired(now) => {
                debug!("Cache hit {}/{}", namespace, key);
                return CacheLookup::Fresh(entry.value);
            }
            Some(entry) => {
                debug!("Cache entry {}/{} expired", namespace, key);
                Some(entry.value)
            }
            None => {
                debug!("Cache miss {}/{}", namespace, key);
                None
            }
        };

        match fetch().await {
            Ok(value) => {
                if let Err(e) = self.put(namespace, key, ttl, &value).await {
                    warn!("Failed to persist cache entry {}/{}: {}", namespace, key, e);
                }
                CacheLookup::Refreshed(value)
            }
            Err(error) => match stale {
                Some(value) => {
                    warn!(
                        "Refresh of {}/{} failed, serving stale value: {}",
                        namespace, key, error
                    );
                    CacheLookup::Degraded { value, error }
                }
                None => {
                    warn!("Refresh of {}/{} failed with nothing cached: {}", namespace, key, error);
                    CacheLookup::Unavailable { error }
                }
            },
        }
    }

    /// Store `value` under `key`, replacing any previous entry
    pub async fn put<T: Serialize>(
        &self,
        namespace: CacheNamespace,
        key: &str,
        ttl: Duration,
        value: &T,
    ) -> Result<()> {
        let value = serde_json::to_value(value)?;
        let entry = CacheEntry::new(key, value, self.clock.now(), ttl);
        self.backend.write(namespace, &entry).await
    }

    /// Drop a single entry
    pub async fn invalidate(&self, namespace: CacheNamespace, key: &str) -> Result<bool> {
        self.backend.remove(namespace, key).await
    }

    /// Remove every entry of a namespace
    ///
    /// Never fails; partial failures are logged and counted.
    pub async fn clear(&self, namespace: CacheNamespace) -> ClearReport {
        match self.backend.clear(namespace).await {
            Ok(report) => {
                if report.failed > 0 {
                    warn!(
                        "Cleared {} cache: {} removed, {} failed",
                        namespace, report.removed, report.failed
                    );
                } else {
                    info!("Cleared {} cache: {} removed", namespace, report.removed);
                }
                report
            }
            Err(e) => {
                warn!("Failed to clear {} cache: {}", namespace, e);
                ClearReport {
                    removed: 0,
                    failed: 1,
                }
            }
        }
    }

    async fn load<T: DeserializeOwned>(
        &self,
        namespace: CacheNamespace,
        key: &str,
    ) -> Option<CacheEntry<T>> {
        let raw = match self.backend.read(namespace, key).await {
            Ok(raw) => raw?,
            Err(e) => {
                warn!("Ignoring unreadable cache entry {}/{}: {}", namespace, key, e);
                return None;
            }
        };

        match serde_json::from_value(raw.value) {
            Ok(value) => Some(CacheEntry {
                key: raw.key,
                fetched_at: raw.fetched_at,
                ttl_seconds: raw.ttl_seconds,
                value,
            }),
            Err(e) => {
                warn!("Ignoring corrupt cache entry {}/{}: {}", namespace, key, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn store() -> (CacheStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let store = CacheStore::new(Arc::new(MemoryCacheBackend::new()), clock.clone());
        (store, clock)
    }

    #[test]
    fn entry_expires_strictly_after_ttl() {
        let now = Utc::now();
        let entry = CacheEntry::new("k", 1, now, Duration::from_secs(60));
        assert!(!entry.is_expired(now + chrono::Duration::seconds(60)));
        assert!(entry.is_expired(now + chrono::Duration::seconds(61)));
    }

    #[tokio::test]
    async fn fresh_entry_skips_fetch() {
        let (store, _clock) = store();
        let ttl = Duration::from_secs(60);

        let first = store
            .get(CacheNamespace::Trending, "k", ttl, || async { Ok(vec![1, 2, 3]) })
            .await;
        assert!(matches!(first, CacheLookup::Refreshed(_)));

        let fetched = std::sync::atomic::AtomicBool::new(false);
        let second: CacheLookup<Vec<i32>> = store
            .get(CacheNamespace::Trending, "k", ttl, || {
                fetched.store(true, std::sync::atomic::Ordering::SeqCst);
                async { Ok(vec![]) }
            })
            .await;
        assert!(!fetched.load(std::sync::atomic::Ordering::SeqCst));
        match second {
            CacheLookup::Fresh(v) => assert_eq!(v, vec![1, 2, 3]),
            other => panic!("expected fresh, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn failed_refresh_without_entry_is_unavailable() {
        let (store, _clock) = store();
        let lookup: CacheLookup<String> = store
            .get(CacheNamespace::Details, "x", Duration::from_secs(1), || async {
                Err(Error::network("offline"))
            })
            .await;
        assert!(lookup.value().is_none());
        assert!(lookup.into_result().is_err());
    }

    #[tokio::test]
    async fn disabled_cache_always_fetches() {
        let (store, _clock) = store();
        let store = store.with_enabled(false);
        let ttl = Duration::from_secs(3600);

        store
            .get(CacheNamespace::Art, "k", ttl, || async { Ok(1) })
            .await;
        let again = store
            .get(CacheNamespace::Art, "k", ttl, || async { Ok(2) })
            .await;
        assert!(matches!(again, CacheLookup::Refreshed(2)));
    }
}
