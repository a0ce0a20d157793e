// # Watchlist Store Trait
//
// Durable local record of items the user intends to track.
//
// ## Invariants
//
// - At most one entry per `ItemRef`
// - `list()` returns entries in insertion order
// - A failed write leaves both the persisted and the in-memory state as
//   they were, and surfaces `StoreWriteFailed`

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{ItemRef, WatchlistEntry};

#[async_trait]
pub trait WatchlistStore: Send + Sync {
    /// Append `entry` unless its `ItemRef` is already present
    ///
    /// Returns `true` if the entry was added, `false` for the no-op case.
    async fn add(&self, entry: WatchlistEntry) -> Result<bool>;

    /// Remove the entry for `item_ref`
    ///
    /// Returns `true` if something was removed.
    async fn remove(&self, item_ref: &ItemRef) -> Result<bool>;

    async fn contains(&self, item_ref: &ItemRef) -> Result<bool>;

    async fn get(&self, item_ref: &ItemRef) -> Result<Option<WatchlistEntry>>;

    /// All entries, oldest first
    async fn list(&self) -> Result<Vec<WatchlistEntry>>;

    /// Remove `item_ref` if present, otherwise add `entry`
    ///
    /// Returns whether `item_ref` is contained afterwards.
    async fn toggle(&self, item_ref: &ItemRef, entry: WatchlistEntry) -> Result<bool> {
        if self.contains(item_ref).await? {
            self.remove(item_ref).await?;
            Ok(false)
        } else {
            self.add(entry).await?;
            Ok(true)
        }
    }
}
