// # animesync-core
//
// Core library for multi-source anime tracking.
//
// ## Architecture Overview
//
// - **SourceAdapter**: Query and push surface of one tracking service
// - **CacheStore**: TTL cache with fallback to the last known good value
// - **WatchlistStore**: Durable set of tracked items keyed by (id, source)
// - **Aggregator**: Merges per-source lists into one ordered list
// - **SyncEngine**: Pushes the watchlist to every enabled source with retry
// - **PlaybackTracker**: Turns playback ticks into watch marks
// - **SourceRegistry**: Builds adapters from configuration
//
// ## Design Principles
//
// 1. **Explicit wiring**: Stores, clock and adapters are constructed by the
//    caller and passed in; there are no globals
// 2. **Degrade, don't fail**: A failing source yields an empty or stale
//    result, never a crash
// 3. **Single-shot adapters**: Retry, caching and scheduling live in the
//    core, not in adapters
// 4. **Atomic persistence**: File-backed state is replaced with
//    write-then-rename and a backup copy

pub mod aggregator;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod library;
pub mod model;
pub mod persist;
pub mod playback;
pub mod registry;
pub mod retry;
pub mod sync;
pub mod traits;
pub mod watchlist;

// Re-export core types for convenience
pub use aggregator::{Aggregator, SortKey, aggregate};
pub use cache::{
    CacheEntry, CacheLookup, CacheNamespace, CacheStore, FileCacheBackend, MemoryCacheBackend,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    AggregationConfig, AnimeSyncConfig, CacheConfig, PlaybackConfig, SourceConfig, StoreConfig,
    SyncConfig,
};
pub use error::{Error, ErrorKind, Result};
pub use library::{LibraryRecord, LocalLibrary, ResumePoint, WatchEvent, WatchStatus};
pub use model::{
    Artwork, ItemRef, ListKind, MediaItem, SourceKind, SyncResult, WatchlistEntry,
};
pub use playback::{
    PlaybackEvent, PlaybackRequest, PlaybackSession, PlaybackTracker, SessionId, TickOutcome,
    TrackerState,
};
pub use registry::SourceRegistry;
pub use retry::{Backoff, RetryOutcome, RetryPolicy};
pub use sync::{SyncEngine, SyncEvent, SyncRun, SyncSummary};
pub use traits::{
    CacheBackend, ClearReport, Library, SourceAdapter, SourceAdapterFactory, WatchlistStore,
};
pub use watchlist::{FileWatchlistStore, MemoryWatchlistStore};
