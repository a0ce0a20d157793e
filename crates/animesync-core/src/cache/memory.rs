// # Memory Cache Backend
//
// Keeps entries in a map; nothing survives a restart. Used by tests and
// by the daemon when no cache directory is configured.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::cache::{CacheEntry, CacheNamespace};
use crate::error::Result;
use crate::traits::{CacheBackend, ClearReport};

type Entries = HashMap<(CacheNamespace, String), CacheEntry<serde_json::Value>>;

#[derive(Debug, Clone, Default)]
pub struct MemoryCacheBackend {
    inner: Arc<RwLock<Entries>>,
}

impl MemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries across all namespaces
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[async_trait]
impl CacheBackend for MemoryCacheBackend {
    async fn read(
        &self,
        namespace: CacheNamespace,
        key: &str,
    ) -> Result<Option<CacheEntry<serde_json::Value>>> {
        let guard = self.inner.read().await;
        Ok(guard.get(&(namespace, key.to_string())).cloned())
    }

    async fn write(
        &self,
        namespace: CacheNamespace,
        entry: &CacheEntry<serde_json::Value>,
    ) -> Result<()> {
        let mut guard = self.inner.write().await;
        guard.insert((namespace, entry.key.clone()), entry.clone());
        Ok(())
    }

    async fn remove(&self, namespace: CacheNamespace, key: &str) -> Result<bool> {
        let mut guard = self.inner.write().await;
        Ok(guard.remove(&(namespace, key.to_string())).is_some())
    }

    async fn clear(&self, namespace: CacheNamespace) -> Result<ClearReport> {
        let mut guard = self.inner.write().await;
        let before = guard.len();
        guard.retain(|(ns, _), _| *ns != namespace);
        Ok(ClearReport {
            removed: before - guard.len(),
            failed: 0,
        })
    }
}
