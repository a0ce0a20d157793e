// # File Watchlist Store
//
// File-backed implementation of WatchlistStore.
//
// ## Durability
//
// - Every mutation is applied to a copy, the copy is written with
//   write-then-rename, and only then does it replace the in-memory list.
//   A failed write leaves both disk and memory untouched.
// - The previous file is kept as `.backup`; a corrupt main file is
//   recovered from it on load.
//
// ## File Format
//
// ```json
// {
//   "version": "1.0",
//   "entries": [
//     {
//       "item_ref": { "id": "12345", "source": "anilist" },
//       "title": "Frieren",
//       "poster_url": null,
//       "banner_url": null,
//       "added_at": "2025-01-09T12:00:00Z"
//     }
//   ]
// }
// ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

use crate::error::Result;
use crate::model::{ItemRef, WatchlistEntry};
use crate::persist;
use crate::traits::WatchlistStore;

/// Watchlist file format version
const WATCHLIST_FILE_VERSION: &str = "1.0";

#[derive(Debug, Serialize, Deserialize)]
struct WatchlistFile {
    version: String,
    entries: Vec<WatchlistEntry>,
}

#[derive(Debug)]
pub struct FileWatchlistStore {
    path: PathBuf,
    entries: RwLock<Vec<WatchlistEntry>>,
}

impl FileWatchlistStore {
    /// Open the watchlist at `path`, creating parent directories
    ///
    /// A missing file is an empty watchlist. A corrupt one is recovered
    /// from its backup, or started empty if that fails too.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        persist::ensure_parent(&path).await?;

        let entries = match persist::load_with_recovery::<WatchlistFile>(&path).await? {
            Some(file) => {
                if file.version != WATCHLIST_FILE_VERSION {
                    tracing::warn!(
                        "Watchlist version mismatch: expected {}, got {}. Loading anyway.",
                        WATCHLIST_FILE_VERSION,
                        file.version
                    );
                }
                super::dedup_entries(file.entries)
            }
            None => Vec::new(),
        };

        tracing::debug!("Loaded watchlist from {}: {} entries", path.display(), entries.len());

        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, entries: &[WatchlistEntry]) -> Result<()> {
        #[derive(Serialize)]
        struct Borrowed<'a> {
            version: &'a str,
            entries: &'a [WatchlistEntry],
        }

        persist::write_json(
            &self.path,
            &Borrowed {
                version: WATCHLIST_FILE_VERSION,
                entries,
            },
            true,
        )
        .await
        .inspect_err(|e| tracing::error!("Failed to persist watchlist: {}", e))
    }
}

#[async_trait]
impl WatchlistStore for FileWatchlistStore {
    async fn add(&self, entry: WatchlistEntry) -> Result<bool> {
        let mut guard = self.entries.write().await;
        if guard.iter().any(|e| e.item_ref == entry.item_ref) {
            return Ok(false);
        }

        let mut next = guard.clone();
        next.push(entry);
        self.persist(&next).await?;
        *guard = next;
        Ok(true)
    }

    async fn remove(&self, item_ref: &ItemRef) -> Result<bool> {
        let mut guard = self.entries.write().await;
        if !guard.iter().any(|e| &e.item_ref == item_ref) {
            return Ok(false);
        }

        let next: Vec<WatchlistEntry> = guard
            .iter()
            .filter(|e| &e.item_ref != item_ref)
            .cloned()
            .collect();
        self.persist(&next).await?;
        *guard = next;
        Ok(true)
    }

    async fn contains(&self, item_ref: &ItemRef) -> Result<bool> {
        let guard = self.entries.read().await;
        Ok(guard.iter().any(|e| &e.item_ref == item_ref))
    }

    async fn get(&self, item_ref: &ItemRef) -> Result<Option<WatchlistEntry>> {
        let guard = self.entries.read().await;
        Ok(guard.iter().find(|e| &e.item_ref == item_ref).cloned())
    }

    async fn list(&self) -> Result<Vec<WatchlistEntry>> {
        Ok(self.entries.read().await.clone())
    }
}
