//! Test doubles and common utilities for contract tests
//!
//! The doubles count their calls so tests can assert on how often the
//! engine reached out to a source or the library, not just on results.

#![allow(dead_code)]

use animesync_core::error::{Error, Result};
use animesync_core::model::{ItemRef, ListKind, MediaItem, SourceKind, WatchlistEntry};
use animesync_core::traits::{Library, SourceAdapter};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use tokio::sync::Notify;

/// How a mock adapter's push behaves
#[derive(Debug, Clone, Copy)]
pub enum PushBehavior {
    /// Accept every entry
    Accept,
    /// Fail this many times with `NetworkUnavailable`, then accept
    FailTimes(u32),
    /// Always fail with `RemoteRejected`
    Reject,
}

/// A SourceAdapter that serves canned lists and records pushes
pub struct MockSourceAdapter {
    source: SourceKind,
    enabled: bool,
    lists: Mutex<HashMap<String, Vec<MediaItem>>>,
    details: Mutex<HashMap<String, MediaItem>>,
    fail_fetch: AtomicBool,
    push_behavior: PushBehavior,
    push_failures: AtomicU32,
    fetch_list_calls: Arc<AtomicUsize>,
    fetch_details_calls: Arc<AtomicUsize>,
    push_calls: Arc<AtomicUsize>,
    pushed: Mutex<Vec<Vec<WatchlistEntry>>>,
    /// When set, `push_list` signals `push_entered` then waits here
    gate: Option<Arc<Notify>>,
    push_entered: Arc<Notify>,
}

impl MockSourceAdapter {
    pub fn new(source: SourceKind) -> Self {
        Self {
            source,
            enabled: true,
            lists: Mutex::new(HashMap::new()),
            details: Mutex::new(HashMap::new()),
            fail_fetch: AtomicBool::new(false),
            push_behavior: PushBehavior::Accept,
            push_failures: AtomicU32::new(0),
            fetch_list_calls: Arc::new(AtomicUsize::new(0)),
            fetch_details_calls: Arc::new(AtomicUsize::new(0)),
            push_calls: Arc::new(AtomicUsize::new(0)),
            pushed: Mutex::new(Vec::new()),
            gate: None,
            push_entered: Arc::new(Notify::new()),
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn with_list(self, kind: ListKind, items: Vec<MediaItem>) -> Self {
        self.lists.lock().unwrap().insert(kind.label(), items);
        self
    }

    pub fn with_details(self, item: MediaItem) -> Self {
        self.details
            .lock()
            .unwrap()
            .insert(item.item_ref.id.clone(), item);
        self
    }

    pub fn with_push(mut self, behavior: PushBehavior) -> Self {
        self.push_behavior = behavior;
        self
    }

    pub fn with_gate(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Make every fetch fail with `NetworkUnavailable` from now on
    pub fn set_fail_fetch(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    pub fn fetch_list_calls(&self) -> usize {
        self.fetch_list_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_details_calls(&self) -> usize {
        self.fetch_details_calls.load(Ordering::SeqCst)
    }

    pub fn push_calls(&self) -> usize {
        self.push_calls.load(Ordering::SeqCst)
    }

    /// Batches received by `push_list`, one per call
    pub fn pushed(&self) -> Vec<Vec<WatchlistEntry>> {
        self.pushed.lock().unwrap().clone()
    }

    /// Resolves once a push has started (gated adapters only)
    pub async fn push_started(&self) {
        self.push_entered.notified().await;
    }
}

#[async_trait::async_trait]
impl SourceAdapter for MockSourceAdapter {
    fn source(&self) -> SourceKind {
        self.source
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn fetch_details(&self, id: &str) -> Result<Option<MediaItem>> {
        self.fetch_details_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(Error::network(format!("{} unreachable", self.source)));
        }
        Ok(self.details.lock().unwrap().get(id).cloned())
    }

    async fn fetch_list(&self, kind: &ListKind) -> Result<Vec<MediaItem>> {
        self.fetch_list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(Error::network(format!("{} unreachable", self.source)));
        }
        Ok(self
            .lists
            .lock()
            .unwrap()
            .get(&kind.label())
            .cloned()
            .unwrap_or_default())
    }

    async fn push_list(&self, entries: &[WatchlistEntry]) -> Result<usize> {
        self.push_calls.fetch_add(1, Ordering::SeqCst);
        self.pushed.lock().unwrap().push(entries.to_vec());

        if let Some(gate) = &self.gate {
            self.push_entered.notify_one();
            gate.notified().await;
        }

        match self.push_behavior {
            PushBehavior::Accept => Ok(entries.len()),
            PushBehavior::FailTimes(n) => {
                if self.push_failures.fetch_add(1, Ordering::SeqCst) < n {
                    Err(Error::network("connection reset"))
                } else {
                    Ok(entries.len())
                }
            }
            PushBehavior::Reject => Err(Error::rejected(self.source.as_str(), "401 Unauthorized")),
        }
    }
}

/// A call received by [`RecordingLibrary`]
#[derive(Debug, Clone, PartialEq)]
pub enum LibraryCall {
    Added(ItemRef),
    Watched(ItemRef, u32, Option<u32>),
    Unwatched(ItemRef, u32),
    Progress(ItemRef, u32, f64, f64),
    SeriesComplete(ItemRef),
}

/// A Library that records every call
#[derive(Default)]
pub struct RecordingLibrary {
    calls: Mutex<Vec<LibraryCall>>,
    fail_watched: AtomicBool,
    fail_series: AtomicBool,
}

impl RecordingLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_watched(&self, fail: bool) {
        self.fail_watched.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_series_complete(&self, fail: bool) {
        self.fail_series.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<LibraryCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn watched_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, LibraryCall::Watched(..)))
            .count()
    }

    pub fn series_complete_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, LibraryCall::SeriesComplete(_)))
            .count()
    }

    pub fn progress_calls(&self) -> Vec<LibraryCall> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, LibraryCall::Progress(..)))
            .collect()
    }
}

#[async_trait::async_trait]
impl Library for RecordingLibrary {
    async fn add_to_library(
        &self,
        item_ref: &ItemRef,
        _title: &str,
        _poster_url: Option<&str>,
        _banner_url: Option<&str>,
    ) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(LibraryCall::Added(item_ref.clone()));
        Ok(())
    }

    async fn mark_episode_watched(
        &self,
        item_ref: &ItemRef,
        episode: u32,
        total_episodes: Option<u32>,
    ) -> Result<()> {
        if self.fail_watched.load(Ordering::SeqCst) {
            return Err(Error::store_write("library is read-only"));
        }
        self.calls.lock().unwrap().push(LibraryCall::Watched(
            item_ref.clone(),
            episode,
            total_episodes,
        ));
        Ok(())
    }

    async fn mark_episode_unwatched(&self, item_ref: &ItemRef, episode: u32) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(LibraryCall::Unwatched(item_ref.clone(), episode));
        Ok(())
    }

    async fn update_progress(
        &self,
        item_ref: &ItemRef,
        episode: u32,
        position_secs: f64,
        duration_secs: f64,
    ) -> Result<()> {
        self.calls.lock().unwrap().push(LibraryCall::Progress(
            item_ref.clone(),
            episode,
            position_secs,
            duration_secs,
        ));
        Ok(())
    }

    async fn mark_series_complete(&self, item_ref: &ItemRef) -> Result<()> {
        if self.fail_series.load(Ordering::SeqCst) {
            return Err(Error::store_write("library is read-only"));
        }
        self.calls
            .lock()
            .unwrap()
            .push(LibraryCall::SeriesComplete(item_ref.clone()));
        Ok(())
    }
}

/// Upcast a mock for use where the engine expects a trait object
pub fn as_source(adapter: &Arc<MockSourceAdapter>) -> Arc<dyn SourceAdapter> {
    adapter.clone()
}

pub fn item_ref(id: &str, source: SourceKind) -> ItemRef {
    ItemRef::new(id, source)
}

pub fn entry(id: &str, source: SourceKind) -> WatchlistEntry {
    WatchlistEntry::new(ItemRef::new(id, source), format!("Title {}", id), Utc::now())
}

pub fn item(id: &str, source: SourceKind) -> MediaItem {
    MediaItem::new(ItemRef::new(id, source), format!("Title {}", id))
}

/// Ids of `items` in order
pub fn ids(items: &[MediaItem]) -> Vec<String> {
    items.iter().map(|i| i.item_ref.id.clone()).collect()
}
