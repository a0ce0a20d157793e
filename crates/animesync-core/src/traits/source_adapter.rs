// # Source Adapter Trait
//
// Narrow query surface of one external tracking or metadata service.
//
// ## Implementations
//
// - AniList: `animesync-source-anilist` crate
// - Test doubles: `tests/common/mod.rs`
//
// ## Usage
//
// ```rust,ignore
// use animesync_core::{ListKind, SourceAdapter};
//
// let adapter: Arc<dyn SourceAdapter> = /* from SourceRegistry */;
// let trending = adapter.fetch_list(&ListKind::Trending).await?;
// let pushed = adapter.push_list(&entries).await?;
// ```

use async_trait::async_trait;

use crate::config::SourceConfig;
use crate::error::Result;
use crate::model::{ListKind, MediaItem, SourceKind, WatchlistEntry};

/// One external anime-tracking or metadata service
///
/// Adapters are single-shot: one call maps to one remote request (or one
/// small fixed sequence of them). They never retry, cache, sleep or touch
/// the stores; those concerns belong to the `SyncEngine`, the `CacheStore`
/// and the `RetryPolicy`. Errors should be classified as
/// `NetworkUnavailable` (transport) or `RemoteRejected` (the service said no).
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Which service this adapter talks to
    fn source(&self) -> SourceKind;

    /// Whether the adapter takes part in aggregation and sync
    fn is_enabled(&self) -> bool;

    /// Fetch details of a single item by its source-specific id
    ///
    /// `Ok(None)` when the service does not know the id.
    async fn fetch_details(&self, id: &str) -> Result<Option<MediaItem>>;

    /// Fetch one list (trending, recommendations, upcoming, similar)
    async fn fetch_list(&self, kind: &ListKind) -> Result<Vec<MediaItem>>;

    /// Push the user's tracked entries for this source
    ///
    /// Every entry passed belongs to `self.source()`. Returns how many
    /// entries the service accepted.
    async fn push_list(&self, entries: &[WatchlistEntry]) -> Result<usize>;
}

/// Builds adapters from configuration; registered in a `SourceRegistry`
pub trait SourceAdapterFactory: Send + Sync {
    fn create(&self, config: &SourceConfig) -> Result<Box<dyn SourceAdapter>>;
}
