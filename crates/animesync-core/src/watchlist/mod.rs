// # Watchlist Store Implementations
//
// - `MemoryWatchlistStore`: process lifetime only
// - `FileWatchlistStore`: JSON file with atomic writes and backup recovery

pub mod file;
pub mod memory;

pub use file::FileWatchlistStore;
pub use memory::MemoryWatchlistStore;

use crate::model::WatchlistEntry;

/// Drop entries whose `ItemRef` already appeared earlier in the list
pub(crate) fn dedup_entries(entries: Vec<WatchlistEntry>) -> Vec<WatchlistEntry> {
    let mut seen = std::collections::HashSet::new();
    entries
        .into_iter()
        .filter(|e| seen.insert(e.item_ref.clone()))
        .collect()
}
