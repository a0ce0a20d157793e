//! Configuration types for animesync
//!
//! Everything the engine consumes: per-source switches, cache TTLs, sync
//! retry policy, playback thresholds and store locations.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::error::Error;
use crate::model::SourceKind;
use crate::retry::{Backoff, RetryPolicy};

/// Main animesync configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnimeSyncConfig {
    /// Sources in declaration order; aggregation preserves this order on ties
    #[serde(default)]
    pub sources: Vec<SourceConfig>,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub playback: PlaybackConfig,

    #[serde(default)]
    pub aggregation: AggregationConfig,

    /// Where the watchlist lives
    #[serde(default)]
    pub watchlist: StoreConfig,
}

impl AnimeSyncConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), Error> {
        let mut seen = HashSet::new();
        for source in &self.sources {
            if !seen.insert(source.source) {
                return Err(Error::config(format!(
                    "Source {} configured more than once",
                    source.source
                )));
            }
            source.validate()?;
        }

        self.sync.validate()?;
        self.playback.validate()?;
        self.aggregation.validate()?;
        self.watchlist.validate()?;

        Ok(())
    }
}

/// Per-source settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub source: SourceKind,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// OAuth access token obtained out of band; required for pushes
    #[serde(default, skip_serializing)]
    pub access_token: Option<String>,

    /// Overrides `aggregation.items_per_page` for this source
    #[serde(default)]
    pub items_per_page: Option<u32>,

    /// Adapter-specific settings
    #[serde(default)]
    pub options: HashMap<String, serde_json::Value>,
}

impl SourceConfig {
    pub fn new(source: SourceKind) -> Self {
        Self {
            source,
            enabled: true,
            access_token: None,
            items_per_page: None,
            options: HashMap::new(),
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn with_items_per_page(mut self, items: u32) -> Self {
        self.items_per_page = Some(items);
        self
    }

    /// String option, if set
    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(|v| v.as_str())
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.items_per_page == Some(0) {
            return Err(Error::config(format!(
                "{}: items_per_page must be > 0",
                self.source
            )));
        }
        if self.access_token.as_deref() == Some("") {
            return Err(Error::config(format!(
                "{}: access token cannot be empty",
                self.source
            )));
        }
        Ok(())
    }
}

/// Cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// With caching off every lookup goes to the source
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Cache directory; in memory when unset
    #[serde(default)]
    pub directory: Option<String>,

    /// TTL for details, trending, recommendations and similar lists
    #[serde(default = "default_ttl_hours")]
    pub ttl_hours: u64,

    /// TTL for the upcoming-episodes list
    #[serde(default = "default_upcoming_ttl_secs")]
    pub upcoming_ttl_secs: u64,

    /// TTL for artwork
    #[serde(default = "default_art_ttl_hours")]
    pub art_ttl_hours: u64,
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_hours.saturating_mul(3600))
    }

    pub fn upcoming_ttl(&self) -> Duration {
        Duration::from_secs(self.upcoming_ttl_secs)
    }

    pub fn art_ttl(&self) -> Duration {
        Duration::from_secs(self.art_ttl_hours.saturating_mul(3600))
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: None,
            ttl_hours: default_ttl_hours(),
            upcoming_ttl_secs: default_upcoming_ttl_secs(),
            art_ttl_hours: default_art_ttl_hours(),
        }
    }
}

/// Sync engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Whether the periodic scheduler runs
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default = "default_interval_hours")]
    pub interval_hours: u64,

    /// Attempts per source and cycle, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay between attempts (in seconds)
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    /// Double the delay after each failed attempt, up to `max_retry_delay_secs`
    #[serde(default)]
    pub exponential_backoff: bool,

    #[serde(default = "default_max_retry_delay_secs")]
    pub max_retry_delay_secs: u64,

    /// Capacity of the sync event channel
    ///
    /// When full, events are dropped with a warning.
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl SyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_hours.saturating_mul(3600))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let backoff = if self.exponential_backoff {
            Backoff::Exponential {
                base_secs: self.retry_delay_secs,
                max_secs: self.max_retry_delay_secs,
            }
        } else {
            Backoff::Fixed {
                delay_secs: self.retry_delay_secs,
            }
        };
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            backoff,
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.interval_hours == 0 {
            return Err(Error::config("sync.interval_hours must be >= 1"));
        }
        if self.max_attempts == 0 {
            return Err(Error::config("sync.max_attempts must be >= 1"));
        }
        if self.event_channel_capacity == 0 {
            return Err(Error::config("sync.event_channel_capacity must be > 0"));
        }
        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_hours: default_interval_hours(),
            max_attempts: default_max_attempts(),
            retry_delay_secs: default_retry_delay_secs(),
            exponential_backoff: false,
            max_retry_delay_secs: default_max_retry_delay_secs(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

/// Playback tracker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Progress percentage at which an episode counts as watched
    #[serde(default = "default_watched_threshold_pct")]
    pub watched_threshold_pct: f64,

    /// A progress event is emitted each time progress crosses a multiple
    /// of this percentage
    #[serde(default = "default_report_step_pct")]
    pub report_step_pct: f64,

    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl PlaybackConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if !(self.watched_threshold_pct > 0.0 && self.watched_threshold_pct <= 100.0) {
            return Err(Error::config(
                "playback.watched_threshold_pct must be in (0, 100]",
            ));
        }
        if !(self.report_step_pct > 0.0 && self.report_step_pct <= 100.0) {
            return Err(Error::config("playback.report_step_pct must be in (0, 100]"));
        }
        if self.event_channel_capacity == 0 {
            return Err(Error::config("playback.event_channel_capacity must be > 0"));
        }
        Ok(())
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            watched_threshold_pct: default_watched_threshold_pct(),
            report_step_pct: default_report_step_pct(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

/// Aggregated list settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationConfig {
    #[serde(default = "default_items_per_page")]
    pub items_per_page: u32,

    /// Upcoming episodes further out than this are dropped
    #[serde(default = "default_upcoming_window_days")]
    pub upcoming_window_days: u32,
}

impl AggregationConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if self.items_per_page == 0 {
            return Err(Error::config("aggregation.items_per_page must be > 0"));
        }
        if self.upcoming_window_days == 0 {
            return Err(Error::config("aggregation.upcoming_window_days must be > 0"));
        }
        Ok(())
    }
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            items_per_page: default_items_per_page(),
            upcoming_window_days: default_upcoming_window_days(),
        }
    }
}

/// Persistence location for the watchlist
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreConfig {
    /// JSON file with atomic writes
    File {
        /// Path to the file
        path: String,
    },

    /// Not persisted
    #[default]
    Memory,
}

impl StoreConfig {
    pub fn validate(&self) -> Result<(), Error> {
        match self {
            StoreConfig::File { path } if path.trim().is_empty() => {
                Err(Error::config("Store file path cannot be empty"))
            }
            _ => Ok(()),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_ttl_hours() -> u64 {
    24
}

fn default_upcoming_ttl_secs() -> u64 {
    3600
}

fn default_art_ttl_hours() -> u64 {
    168
}

fn default_interval_hours() -> u64 {
    6
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay_secs() -> u64 {
    5
}

fn default_max_retry_delay_secs() -> u64 {
    300
}

fn default_event_channel_capacity() -> usize {
    256
}

fn default_watched_threshold_pct() -> f64 {
    90.0
}

fn default_report_step_pct() -> f64 {
    10.0
}

fn default_items_per_page() -> u32 {
    20
}

fn default_upcoming_window_days() -> u32 {
    7
}
