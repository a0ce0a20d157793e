// # Cache Backend Trait
//
// Key-value persistence underneath `CacheStore`. Entries are grouped by
// namespace and always replaced whole.
//
// ## Implementations
//
// - `MemoryCacheBackend`: tests and ephemeral runs
// - `FileCacheBackend`: one JSON file per namespace and key

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::cache::{CacheEntry, CacheNamespace};
use crate::error::Result;

/// Outcome of clearing one namespace
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearReport {
    /// Entries removed
    pub removed: usize,
    /// Entries that could not be removed
    pub failed: usize,
}

#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Read an entry
    ///
    /// `Ok(None)` for a missing entry, `Err(CacheCorrupt)` when the stored
    /// data cannot be decoded.
    async fn read(
        &self,
        namespace: CacheNamespace,
        key: &str,
    ) -> Result<Option<CacheEntry<serde_json::Value>>>;

    /// Atomically replace an entry
    async fn write(
        &self,
        namespace: CacheNamespace,
        entry: &CacheEntry<serde_json::Value>,
    ) -> Result<()>;

    /// Remove one entry, returning whether it existed
    async fn remove(&self, namespace: CacheNamespace, key: &str) -> Result<bool>;

    /// Remove every entry in a namespace
    ///
    /// Individual failures are counted in the report instead of aborting.
    async fn clear(&self, namespace: CacheNamespace) -> Result<ClearReport>;
}
