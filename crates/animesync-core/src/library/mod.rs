// # Local Library
//
// Built-in implementation of the `Library` collaborator.
//
// Each title gets a `LibraryRecord` holding its watch status, the set of
// watched episodes and an optional resume point. Watch marks are also
// appended to a bounded history used for "recently watched".
//
// ## Status transitions
//
// - `Planning` -> `Watching` on the first watched episode
// - `Watching` -> `Completed` when the highest watched episode reaches the
//   known total, or on `mark_series_complete`
// - Unwatching drops back to `Watching`, or to `Planning` once no episode
//   is left watched
//
// With a path the library is persisted like the watchlist (copy, write,
// commit); without one it lives in memory.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::clock::Clock;
use crate::error::Result;
use crate::model::ItemRef;
use crate::persist;
use crate::traits::Library;

const LIBRARY_FILE_VERSION: &str = "1.0";

/// Oldest history events are dropped past this many
const HISTORY_LIMIT: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchStatus {
    Planning,
    Watching,
    Completed,
}

/// Where to continue an episode that was stopped early
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumePoint {
    pub episode: u32,
    pub position_secs: f64,
    pub duration_secs: f64,
    pub updated_at: DateTime<Utc>,
}

impl ResumePoint {
    /// Position as a percentage of the duration
    pub fn percent(&self) -> f64 {
        if self.duration_secs > 0.0 {
            (self.position_secs / self.duration_secs * 100.0).clamp(0.0, 100.0)
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryRecord {
    pub item_ref: ItemRef,
    pub title: String,
    #[serde(default)]
    pub poster_url: Option<String>,
    #[serde(default)]
    pub banner_url: Option<String>,
    pub status: WatchStatus,
    #[serde(default)]
    pub watched_episodes: BTreeSet<u32>,
    #[serde(default)]
    pub total_episodes: Option<u32>,
    #[serde(default)]
    pub resume: Option<ResumePoint>,
    pub added_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LibraryRecord {
    fn new(item_ref: ItemRef, title: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            item_ref,
            title: title.into(),
            poster_url: None,
            banner_url: None,
            status: WatchStatus::Planning,
            watched_episodes: BTreeSet::new(),
            total_episodes: None,
            resume: None,
            added_at: now,
            updated_at: now,
        }
    }

    /// Highest watched episode, 0 if none
    pub fn progress(&self) -> u32 {
        self.watched_episodes.last().copied().unwrap_or(0)
    }

    pub fn is_watched(&self, episode: u32) -> bool {
        self.watched_episodes.contains(&episode)
    }

    fn refresh_status(&mut self) {
        if self.status == WatchStatus::Completed {
            if let Some(total) = self.total_episodes {
                if self.progress() < total {
                    self.status = WatchStatus::Watching;
                }
            }
        }
        if self.status != WatchStatus::Completed {
            let complete = self.total_episodes.is_some_and(|t| t > 0 && self.progress() >= t);
            self.status = if complete {
                WatchStatus::Completed
            } else if self.watched_episodes.is_empty() {
                WatchStatus::Planning
            } else {
                WatchStatus::Watching
            };
        }
    }
}

/// One watched mark in the history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchEvent {
    pub item_ref: ItemRef,
    pub episode: u32,
    pub watched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LibraryState {
    #[serde(default = "default_version")]
    version: String,
    #[serde(default)]
    records: Vec<LibraryRecord>,
    #[serde(default)]
    history: Vec<WatchEvent>,
}

fn default_version() -> String {
    LIBRARY_FILE_VERSION.to_string()
}

impl LibraryState {
    fn record_mut(&mut self, item_ref: &ItemRef) -> Option<&mut LibraryRecord> {
        self.records.iter_mut().find(|r| &r.item_ref == item_ref)
    }

    fn ensure_record(&mut self, item_ref: &ItemRef, now: DateTime<Utc>) -> &mut LibraryRecord {
        let index = match self.records.iter().position(|r| &r.item_ref == item_ref) {
            Some(index) => index,
            None => {
                self.records
                    .push(LibraryRecord::new(item_ref.clone(), item_ref.to_string(), now));
                self.records.len() - 1
            }
        };
        &mut self.records[index]
    }
}

pub struct LocalLibrary {
    path: Option<PathBuf>,
    clock: Arc<dyn Clock>,
    state: RwLock<LibraryState>,
}

impl LocalLibrary {
    /// Library that is never written to disk
    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        Self {
            path: None,
            clock,
            state: RwLock::new(LibraryState {
                version: default_version(),
                ..LibraryState::default()
            }),
        }
    }

    /// Open (or create) a library file at `path`
    pub async fn open(path: impl AsRef<Path>, clock: Arc<dyn Clock>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        persist::ensure_parent(&path).await?;

        let state = persist::load_with_recovery::<LibraryState>(&path)
            .await?
            .unwrap_or_else(|| LibraryState {
                version: default_version(),
                ..LibraryState::default()
            });

        tracing::debug!(
            "Loaded library from {}: {} titles, {} history events",
            path.display(),
            state.records.len(),
            state.history.len()
        );

        Ok(Self {
            path: Some(path),
            clock,
            state: RwLock::new(state),
        })
    }

    pub async fn record(&self, item_ref: &ItemRef) -> Option<LibraryRecord> {
        let guard = self.state.read().await;
        guard.records.iter().find(|r| &r.item_ref == item_ref).cloned()
    }

    /// All titles in the order they were added
    pub async fn records(&self) -> Vec<LibraryRecord> {
        self.state.read().await.records.clone()
    }

    /// Titles with a resume point, most recently updated first
    pub async fn continue_watching(&self, limit: usize) -> Vec<LibraryRecord> {
        let guard = self.state.read().await;
        let mut started: Vec<LibraryRecord> = guard
            .records
            .iter()
            .filter(|r| r.resume.is_some() && r.status != WatchStatus::Completed)
            .cloned()
            .collect();
        started.sort_by(|a, b| {
            let a = a.resume.as_ref().map(|p| p.updated_at);
            let b = b.resume.as_ref().map(|p| p.updated_at);
            b.cmp(&a)
        });
        started.truncate(limit);
        started
    }

    /// Latest watch marks first
    pub async fn recently_watched(&self, limit: usize) -> Vec<WatchEvent> {
        let guard = self.state.read().await;
        guard.history.iter().rev().take(limit).cloned().collect()
    }

    /// Apply `f` to a copy of the state, persist it, then commit
    async fn mutate<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut LibraryState, DateTime<Utc>),
    {
        let now = self.clock.now();
        let mut guard = self.state.write().await;
        let mut next = guard.clone();
        f(&mut next, now);

        if let Some(path) = &self.path {
            persist::write_json(path, &next, true).await?;
        }
        *guard = next;
        Ok(())
    }
}

#[async_trait]
impl Library for LocalLibrary {
    async fn add_to_library(
        &self,
        item_ref: &ItemRef,
        title: &str,
        poster_url: Option<&str>,
        banner_url: Option<&str>,
    ) -> Result<()> {
        {
            let guard = self.state.read().await;
            if let Some(existing) = guard.records.iter().find(|r| &r.item_ref == item_ref) {
                let unchanged = existing.title == title
                    && existing.poster_url.as_deref() == poster_url
                    && existing.banner_url.as_deref() == banner_url;
                if unchanged {
                    return Ok(());
                }
            }
        }

        self.mutate(|state, now| {
            let record = state.ensure_record(item_ref, now);
            record.title = title.to_string();
            record.poster_url = poster_url.map(str::to_string);
            record.banner_url = banner_url.map(str::to_string);
            record.updated_at = now;
        })
        .await?;
        tracing::debug!("Library now tracks {}", item_ref);
        Ok(())
    }

    async fn mark_episode_watched(
        &self,
        item_ref: &ItemRef,
        episode: u32,
        total_episodes: Option<u32>,
    ) -> Result<()> {
        self.mutate(|state, now| {
            let record = state.ensure_record(item_ref, now);
            if total_episodes.is_some() {
                record.total_episodes = total_episodes;
            }
            record.watched_episodes.insert(episode);
            if record.resume.as_ref().is_some_and(|p| p.episode <= episode) {
                record.resume = None;
            }
            record.updated_at = now;
            record.refresh_status();

            state.history.push(WatchEvent {
                item_ref: item_ref.clone(),
                episode,
                watched_at: now,
            });
            if state.history.len() > HISTORY_LIMIT {
                let excess = state.history.len() - HISTORY_LIMIT;
                state.history.drain(..excess);
            }
        })
        .await?;
        tracing::info!("Marked {} episode {} watched", item_ref, episode);
        Ok(())
    }

    async fn mark_episode_unwatched(&self, item_ref: &ItemRef, episode: u32) -> Result<()> {
        self.mutate(|state, now| {
            if let Some(record) = state.record_mut(item_ref) {
                record.watched_episodes.remove(&episode);
                record.updated_at = now;
                record.refresh_status();
            }
            state
                .history
                .retain(|e| !(&e.item_ref == item_ref && e.episode == episode));
        })
        .await?;
        tracing::info!("Marked {} episode {} unwatched", item_ref, episode);
        Ok(())
    }

    async fn update_progress(
        &self,
        item_ref: &ItemRef,
        episode: u32,
        position_secs: f64,
        duration_secs: f64,
    ) -> Result<()> {
        self.mutate(|state, now| {
            let record = state.ensure_record(item_ref, now);
            record.resume = Some(ResumePoint {
                episode,
                position_secs,
                duration_secs,
                updated_at: now,
            });
            record.updated_at = now;
        })
        .await?;
        tracing::debug!(
            "Saved resume point for {} episode {} at {:.0}s",
            item_ref,
            episode,
            position_secs
        );
        Ok(())
    }

    async fn mark_series_complete(&self, item_ref: &ItemRef) -> Result<()> {
        self.mutate(|state, now| {
            let record = state.ensure_record(item_ref, now);
            record.status = WatchStatus::Completed;
            record.resume = None;
            record.updated_at = now;
        })
        .await?;
        tracing::info!("Series {} complete", item_ref);
        Ok(())
    }
}
