//! Core traits for animesync
//!
//! These are the seams between the engine and its collaborators.
//!
//! - [`SourceAdapter`]: Query and push surface of one tracking service
//! - [`WatchlistStore`]: Durable set of tracked items
//! - [`CacheBackend`]: Key-value persistence under the cache
//! - [`Library`]: Host library receiving watch marks and resume points

pub mod cache_backend;
pub mod library;
pub mod source_adapter;
pub mod watchlist_store;

pub use cache_backend::{CacheBackend, ClearReport};
pub use library::Library;
pub use source_adapter::{SourceAdapter, SourceAdapterFactory};
pub use watchlist_store::WatchlistStore;
