//! Domain model shared by every component
//!
//! Identity is always the pair (source-specific id, source). The same title
//! tracked on two services shows up as two unrelated [`ItemRef`]s; there is no
//! cross-source identity mapping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, ErrorKind};

/// An external tracking or metadata service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// AniList (GraphQL)
    #[serde(rename = "anilist")]
    AniList,
    /// MyAnimeList
    #[serde(rename = "mal")]
    MyAnimeList,
    /// Trakt
    Trakt,
    /// The Movie Database
    Tmdb,
}

impl SourceKind {
    /// All known sources, in their canonical order
    pub const ALL: [SourceKind; 4] = [
        SourceKind::AniList,
        SourceKind::MyAnimeList,
        SourceKind::Trakt,
        SourceKind::Tmdb,
    ];

    /// Stable identifier used in keys, file names and configuration
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::AniList => "anilist",
            SourceKind::MyAnimeList => "mal",
            SourceKind::Trakt => "trakt",
            SourceKind::Tmdb => "tmdb",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anilist" => Ok(SourceKind::AniList),
            "mal" | "myanimelist" => Ok(SourceKind::MyAnimeList),
            "trakt" => Ok(SourceKind::Trakt),
            "tmdb" => Ok(SourceKind::Tmdb),
            other => Err(Error::config(format!("Unknown source: {}", other))),
        }
    }
}

/// Identity key of an item on one source
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemRef {
    /// Source-specific id
    pub id: String,
    /// Source the id belongs to
    pub source: SourceKind,
}

impl ItemRef {
    pub fn new(id: impl Into<String>, source: SourceKind) -> Self {
        Self {
            id: id.into(),
            source,
        }
    }

    /// Flat key of the form `source_id`, used for file names and maps
    pub fn key(&self) -> String {
        format!("{}_{}", self.source, self.id)
    }
}

impl fmt::Display for ItemRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.id)
    }
}

/// An item as returned by a source adapter
///
/// Recommendations, upcoming episodes and similar items are all projections
/// of this type; the optional fields are filled depending on the list kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaItem {
    pub item_ref: ItemRef,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Average score on a 0-100 scale
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub poster_url: Option<String>,
    #[serde(default)]
    pub banner_url: Option<String>,
    /// Episode number (upcoming episodes)
    #[serde(default)]
    pub episode: Option<u32>,
    #[serde(default)]
    pub total_episodes: Option<u32>,
    /// Air time of `episode` (upcoming episodes)
    #[serde(default)]
    pub airing_at: Option<DateTime<Utc>>,
}

impl MediaItem {
    /// Create an item with only identity and title set
    pub fn new(item_ref: ItemRef, title: impl Into<String>) -> Self {
        Self {
            item_ref,
            title: title.into(),
            description: None,
            score: None,
            genres: Vec::new(),
            poster_url: None,
            banner_url: None,
            episode: None,
            total_episodes: None,
            airing_at: None,
        }
    }

    pub fn source(&self) -> SourceKind {
        self.item_ref.source
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }

    pub fn with_airing(mut self, episode: u32, airing_at: DateTime<Utc>) -> Self {
        self.episode = Some(episode);
        self.airing_at = Some(airing_at);
        self
    }

    pub fn with_art(mut self, poster_url: Option<String>, banner_url: Option<String>) -> Self {
        self.poster_url = poster_url;
        self.banner_url = banner_url;
        self
    }
}

/// Artwork for an item, as resolved from its details
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artwork {
    pub poster: Option<String>,
    pub fanart: Option<String>,
    pub banner: Option<String>,
    pub clearlogo: Option<String>,
}

impl From<&MediaItem> for Artwork {
    fn from(item: &MediaItem) -> Self {
        Self {
            poster: item.poster_url.clone(),
            fanart: item.banner_url.clone(),
            banner: item.banner_url.clone(),
            clearlogo: None,
        }
    }
}

/// Which list a source adapter is asked for
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ListKind {
    /// Currently popular titles
    Trending,
    /// Personalised (or, without a user, top rated) recommendations
    Recommendations,
    /// Episodes airing soon
    Upcoming,
    /// Titles related to the given source-specific id
    Similar { id: String },
}

impl ListKind {
    /// Short label used in cache keys and logs
    pub fn label(&self) -> String {
        match self {
            ListKind::Trending => "trending".to_string(),
            ListKind::Recommendations => "recommendations".to_string(),
            ListKind::Upcoming => "upcoming".to_string(),
            ListKind::Similar { id } => format!("similar_{}", id),
        }
    }
}

/// An item the user intends to track
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchlistEntry {
    pub item_ref: ItemRef,
    pub title: String,
    #[serde(default)]
    pub poster_url: Option<String>,
    #[serde(default)]
    pub banner_url: Option<String>,
    pub added_at: DateTime<Utc>,
}

impl WatchlistEntry {
    pub fn new(item_ref: ItemRef, title: impl Into<String>, added_at: DateTime<Utc>) -> Self {
        Self {
            item_ref,
            title: title.into(),
            poster_url: None,
            banner_url: None,
            added_at,
        }
    }

    /// Build an entry from adapter details
    pub fn from_item(item: &MediaItem, added_at: DateTime<Utc>) -> Self {
        Self {
            item_ref: item.item_ref.clone(),
            title: item.title.clone(),
            poster_url: item.poster_url.clone(),
            banner_url: item.banner_url.clone(),
            added_at,
        }
    }
}

/// Outcome of one push attempt against one source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    pub source: SourceKind,
    pub succeeded: bool,
    pub items_synced: usize,
    pub error: Option<ErrorKind>,
    /// 1-based attempt number within the cycle
    pub attempt: u32,
}

impl SyncResult {
    pub fn success(source: SourceKind, items_synced: usize, attempt: u32) -> Self {
        Self {
            source,
            succeeded: true,
            items_synced,
            error: None,
            attempt,
        }
    }

    pub fn failure(source: SourceKind, error: ErrorKind, attempt: u32) -> Self {
        Self {
            source,
            succeeded: false,
            items_synced: 0,
            error: Some(error),
            attempt,
        }
    }
}
