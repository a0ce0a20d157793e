// # Memory Watchlist Store
//
// Ordered list behind a lock. Writes cannot fail, so the all-or-nothing
// rule holds trivially.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::model::{ItemRef, WatchlistEntry};
use crate::traits::WatchlistStore;

#[derive(Debug, Clone, Default)]
pub struct MemoryWatchlistStore {
    inner: Arc<RwLock<Vec<WatchlistEntry>>>,
}

impl MemoryWatchlistStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store, keeping the first entry for any repeated `ItemRef`
    pub fn with_entries(entries: Vec<WatchlistEntry>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(super::dedup_entries(entries))),
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[async_trait]
impl WatchlistStore for MemoryWatchlistStore {
    async fn add(&self, entry: WatchlistEntry) -> Result<bool> {
        let mut guard = self.inner.write().await;
        if guard.iter().any(|e| e.item_ref == entry.item_ref) {
            return Ok(false);
        }
        guard.push(entry);
        Ok(true)
    }

    async fn remove(&self, item_ref: &ItemRef) -> Result<bool> {
        let mut guard = self.inner.write().await;
        let before = guard.len();
        guard.retain(|e| &e.item_ref != item_ref);
        Ok(guard.len() != before)
    }

    async fn contains(&self, item_ref: &ItemRef) -> Result<bool> {
        let guard = self.inner.read().await;
        Ok(guard.iter().any(|e| &e.item_ref == item_ref))
    }

    async fn get(&self, item_ref: &ItemRef) -> Result<Option<WatchlistEntry>> {
        let guard = self.inner.read().await;
        Ok(guard.iter().find(|e| &e.item_ref == item_ref).cloned())
    }

    async fn list(&self) -> Result<Vec<WatchlistEntry>> {
        Ok(self.inner.read().await.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SourceKind;
    use chrono::Utc;

    fn entry(id: &str, source: SourceKind) -> WatchlistEntry {
        WatchlistEntry::new(ItemRef::new(id, source), format!("Title {}", id), Utc::now())
    }

    #[tokio::test]
    async fn same_id_on_two_sources_is_two_entries() {
        let store = MemoryWatchlistStore::new();
        assert!(store.add(entry("1", SourceKind::AniList)).await.unwrap());
        assert!(store.add(entry("1", SourceKind::MyAnimeList)).await.unwrap());
        assert!(!store.add(entry("1", SourceKind::AniList)).await.unwrap());
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn list_keeps_insertion_order() {
        let store = MemoryWatchlistStore::new();
        for id in ["3", "1", "2"] {
            store.add(entry(id, SourceKind::Trakt)).await.unwrap();
        }
        store.remove(&ItemRef::new("1", SourceKind::Trakt)).await.unwrap();

        let ids: Vec<String> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.item_ref.id)
            .collect();
        assert_eq!(ids, vec!["3", "2"]);
    }

    #[test]
    fn seeding_drops_duplicates() {
        let store = MemoryWatchlistStore::with_entries(vec![
            entry("1", SourceKind::AniList),
            entry("1", SourceKind::AniList),
        ]);
        tokio_test::block_on(async {
            assert_eq!(store.len().await, 1);
        });
    }
}
