//! Playback progress tracker
//!
//! Turns the host player's position ticks into library mutations.
//!
//! ## States
//!
//! ```text
//!            start            stop / complete / error
//!   Idle ───────────▶ Playing ─────────────────────────▶ Stopped | Completed | Errored
//!                       ▲  │
//!                       └──┘ start (previous session ends as Stopped)
//! ```
//!
//! ## Rules
//!
//! - Every session has a [`SessionId`]; ticks carrying another id are stale
//!   and dropped, so a new `start` always wins over a late tick
//! - Position never moves backwards within a session; regressing ticks are
//!   ignored
//! - Progress is reported once per crossed step (every 10% by default),
//!   keyed by the highest bucket seen, so duplicate ticks report nothing.
//!   Below the threshold each crossing also records progress in the library
//! - The episode is marked watched once per session, the first time
//!   progress reaches the threshold (90% by default)
//! - `stop` below the threshold saves a resume point; `complete` marks
//!   watched whatever the position
//! - Marking the last episode watched also marks the series complete. The
//!   two library writes are tracked separately, so a failed series mark is
//!   retried without marking the episode a second time

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::PlaybackConfig;
use crate::error::Result;
use crate::model::{ItemRef, WatchlistEntry};
use crate::traits::{Library, WatchlistStore};

/// Identity of one playback session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerState {
    Idle,
    Playing,
    Completed,
    Stopped,
    Errored,
}

/// What the host tells the tracker when playback begins
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackRequest {
    pub item_ref: ItemRef,
    pub title: String,
    #[serde(default)]
    pub poster_url: Option<String>,
    #[serde(default)]
    pub banner_url: Option<String>,
    pub episode: u32,
    #[serde(default)]
    pub total_episodes: Option<u32>,
    /// Stream or file being played
    #[serde(default)]
    pub url: Option<String>,
}

impl PlaybackRequest {
    pub fn new(item_ref: ItemRef, title: impl Into<String>, episode: u32) -> Self {
        Self {
            item_ref,
            title: title.into(),
            poster_url: None,
            banner_url: None,
            episode,
            total_episodes: None,
            url: None,
        }
    }

    pub fn with_total_episodes(mut self, total: u32) -> Self {
        self.total_episodes = Some(total);
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

/// The active session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaybackSession {
    pub id: SessionId,
    pub item_ref: ItemRef,
    pub episode: u32,
    pub total_episodes: Option<u32>,
    pub url: Option<String>,
    pub started_at: DateTime<Utc>,
    pub last_position_secs: f64,
    pub duration_secs: f64,
    pub watched_threshold_pct: f64,
    /// Highest progress bucket reported so far
    pub last_bucket: u32,
    pub watched_marked: bool,
    /// Set once the library accepted the series-complete mark
    pub series_signaled: bool,
}

impl PlaybackSession {
    /// Current progress in percent, 0 without a known duration
    pub fn progress_pct(&self) -> f64 {
        progress_pct(self.last_position_secs, self.duration_secs)
    }

    fn is_last_episode(&self) -> bool {
        self.total_episodes == Some(self.episode)
    }
}

fn progress_pct(position: f64, duration: f64) -> f64 {
    if duration > 0.0 {
        (position / duration * 100.0).clamp(0.0, 100.0)
    } else {
        0.0
    }
}

/// Events emitted by the PlaybackTracker
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    Started {
        session: SessionId,
        item_ref: ItemRef,
        episode: u32,
    },

    /// Progress crossed `percent` (a multiple of the report step)
    Progress {
        session: SessionId,
        item_ref: ItemRef,
        episode: u32,
        percent: u32,
    },

    /// Episode marked watched (by threshold, completion or directly)
    Watched { item_ref: ItemRef, episode: u32 },

    Unwatched { item_ref: ItemRef, episode: u32 },

    SeriesComplete { item_ref: ItemRef },

    ResumeSaved {
        session: SessionId,
        item_ref: ItemRef,
        episode: u32,
        position_secs: f64,
    },

    /// Session reached a terminal state
    Ended {
        session: SessionId,
        state: TrackerState,
    },

    Errored { session: SessionId, cause: String },
}

/// Why a tick had no effect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoredTick {
    NotPlaying,
    /// Tick belongs to an earlier session
    StaleSession,
    /// Position went backwards
    Regressed,
    /// Duration unknown or non-positive
    NoDuration,
}

/// Result of [`PlaybackTracker::tick`]
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Ignored(IgnoredTick),
    Applied {
        progress_pct: f64,
        /// Report-step percentages crossed by this tick
        reported: Vec<u32>,
        /// Whether this tick marked the episode watched
        marked_watched: bool,
    },
}

struct TrackerInner {
    state: TrackerState,
    session: Option<PlaybackSession>,
    next_id: u64,
}

/// Per-session playback state machine
pub struct PlaybackTracker {
    library: Arc<dyn Library>,
    watchlist: Arc<dyn WatchlistStore>,
    clock: Arc<dyn Clock>,
    config: PlaybackConfig,
    inner: Mutex<TrackerInner>,
    event_tx: mpsc::Sender<PlaybackEvent>,
}

impl PlaybackTracker {
    /// Create a tracker and the receiving end of its event channel
    pub fn new(
        library: Arc<dyn Library>,
        watchlist: Arc<dyn WatchlistStore>,
        clock: Arc<dyn Clock>,
        config: PlaybackConfig,
    ) -> Result<(Self, mpsc::Receiver<PlaybackEvent>)> {
        config.validate()?;
        let (tx, rx) = mpsc::channel(config.event_channel_capacity);

        let tracker = Self {
            library,
            watchlist,
            clock,
            config,
            inner: Mutex::new(TrackerInner {
                state: TrackerState::Idle,
                session: None,
                next_id: 1,
            }),
            event_tx: tx,
        };
        Ok((tracker, rx))
    }

    pub async fn state(&self) -> TrackerState {
        self.inner.lock().await.state
    }

    /// Snapshot of the active session
    pub async fn session(&self) -> Option<PlaybackSession> {
        self.inner.lock().await.session.clone()
    }

    /// Begin a new session
    ///
    /// An unterminated previous session is ended as `Stopped` first. The
    /// item is added to the watchlist and the library if missing; failures
    /// there are logged and do not prevent tracking.
    pub async fn start(&self, request: PlaybackRequest) -> Result<SessionId> {
        let mut inner = self.inner.lock().await;

        if inner.state == TrackerState::Playing {
            if let Some(previous) = inner.session.take() {
                debug!("{} superseded by a new start", previous.id);
                self.finish_stopped(&previous).await;
            }
        }

        let id = SessionId(inner.next_id);
        inner.next_id += 1;

        let session = PlaybackSession {
            id,
            item_ref: request.item_ref.clone(),
            episode: request.episode,
            total_episodes: request.total_episodes,
            url: request.url.clone(),
            started_at: self.clock.now(),
            last_position_secs: 0.0,
            duration_secs: 0.0,
            watched_threshold_pct: self.config.watched_threshold_pct,
            last_bucket: 0,
            watched_marked: false,
            series_signaled: false,
        };
        inner.session = Some(session);
        inner.state = TrackerState::Playing;

        info!(
            "Playback started: {} episode {} ({})",
            request.item_ref, request.episode, id
        );
        self.emit_event(PlaybackEvent::Started {
            session: id,
            item_ref: request.item_ref.clone(),
            episode: request.episode,
        });

        self.ensure_tracked(&request).await;
        Ok(id)
    }

    /// Apply a position update from the player
    pub async fn tick(
        &self,
        session_id: SessionId,
        position_secs: f64,
        duration_secs: f64,
    ) -> Result<TickOutcome> {
        let mut inner = self.inner.lock().await;

        if inner.state != TrackerState::Playing {
            return Ok(TickOutcome::Ignored(IgnoredTick::NotPlaying));
        }
        let Some(session) = inner.session.as_mut() else {
            return Ok(TickOutcome::Ignored(IgnoredTick::NotPlaying));
        };
        if session.id != session_id {
            debug!("Dropping tick for stale {} (active {})", session_id, session.id);
            return Ok(TickOutcome::Ignored(IgnoredTick::StaleSession));
        }
        if !(duration_secs > 0.0) || !position_secs.is_finite() {
            return Ok(TickOutcome::Ignored(IgnoredTick::NoDuration));
        }
        if position_secs < session.last_position_secs {
            debug!(
                "Ignoring regressing tick {:.1}s < {:.1}s",
                position_secs, session.last_position_secs
            );
            return Ok(TickOutcome::Ignored(IgnoredTick::Regressed));
        }

        session.last_position_secs = position_secs;
        session.duration_secs = duration_secs;
        let pct = session.progress_pct();

        let step = self.config.report_step_pct;
        let bucket = (pct / step).floor() as u32;
        let mut reported = Vec::new();
        if bucket > session.last_bucket {
            for b in (session.last_bucket + 1)..=bucket {
                let percent = (f64::from(b) * step).round().min(100.0) as u32;
                reported.push(percent);
                self.emit_event(PlaybackEvent::Progress {
                    session: session.id,
                    item_ref: session.item_ref.clone(),
                    episode: session.episode,
                    percent,
                });
            }
            session.last_bucket = bucket;

            // At the threshold the watch mark below supersedes progress
            if pct < session.watched_threshold_pct {
                if let Err(e) = self
                    .library
                    .update_progress(&session.item_ref, session.episode, position_secs, duration_secs)
                    .await
                {
                    warn!(
                        "Failed to record progress for {} episode {}: {}",
                        session.item_ref, session.episode, e
                    );
                }
            }
        }

        let mut marked_watched = false;
        if pct >= session.watched_threshold_pct {
            marked_watched = self.settle_watched(session).await?;
        }

        Ok(TickOutcome::Applied {
            progress_pct: pct,
            reported,
            marked_watched,
        })
    }

    /// End the session because the user stopped
    ///
    /// No-op unless playing. Below the threshold a resume point is saved.
    pub async fn stop(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.state != TrackerState::Playing {
            debug!("stop() with no active session");
            return Ok(());
        }

        if let Some(session) = inner.session.take() {
            self.finish_stopped(&session).await;
        }
        inner.state = TrackerState::Stopped;
        Ok(())
    }

    /// End the session because the episode played to the end
    ///
    /// Marks watched whatever the measured position, unless a tick already
    /// did so for this session.
    pub async fn complete(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.state != TrackerState::Playing {
            debug!("complete() with no active session");
            return Ok(());
        }

        if let Some(session) = inner.session.as_mut() {
            self.settle_watched(session).await?;
        }

        let ended = inner.session.take();
        inner.state = TrackerState::Completed;
        if let Some(session) = ended {
            info!("Playback completed: {} episode {}", session.item_ref, session.episode);
            self.emit_event(PlaybackEvent::Ended {
                session: session.id,
                state: TrackerState::Completed,
            });
        }
        Ok(())
    }

    /// End the session because the player failed
    pub async fn error(&self, cause: impl Into<String>) -> Result<()> {
        let cause = cause.into();
        let mut inner = self.inner.lock().await;
        if inner.state != TrackerState::Playing {
            debug!("error() with no active session: {}", cause);
            return Ok(());
        }

        if let Some(session) = inner.session.take() {
            warn!("Playback of {} failed: {}", session.item_ref, cause);
            self.emit_event(PlaybackEvent::Errored {
                session: session.id,
                cause,
            });
            self.emit_event(PlaybackEvent::Ended {
                session: session.id,
                state: TrackerState::Errored,
            });
        }
        inner.state = TrackerState::Errored;
        Ok(())
    }

    /// Mark an episode watched outside of any session
    pub async fn mark_watched(
        &self,
        item_ref: &ItemRef,
        episode: u32,
        total_episodes: Option<u32>,
    ) -> Result<()> {
        self.library
            .mark_episode_watched(item_ref, episode, total_episodes)
            .await?;
        self.emit_event(PlaybackEvent::Watched {
            item_ref: item_ref.clone(),
            episode,
        });
        if total_episodes == Some(episode) {
            self.signal_series_complete(item_ref).await?;
        }
        Ok(())
    }

    /// Mark an episode unwatched outside of any session
    pub async fn mark_unwatched(&self, item_ref: &ItemRef, episode: u32) -> Result<()> {
        self.library.mark_episode_unwatched(item_ref, episode).await?;
        self.emit_event(PlaybackEvent::Unwatched {
            item_ref: item_ref.clone(),
            episode,
        });
        Ok(())
    }

    /// Record the session's episode as watched, then the series as complete
    /// when this is its last episode
    ///
    /// Each write happens at most once per session. If one fails the error
    /// is returned and the next call retries only the pending write. Returns
    /// whether this call marked the episode.
    async fn settle_watched(&self, session: &mut PlaybackSession) -> Result<bool> {
        let mut newly_marked = false;
        if !session.watched_marked {
            self.library
                .mark_episode_watched(&session.item_ref, session.episode, session.total_episodes)
                .await
                .inspect_err(|e| {
                    error!(
                        "Failed to mark {} episode {} watched: {}",
                        session.item_ref, session.episode, e
                    )
                })?;
            session.watched_marked = true;
            newly_marked = true;
            info!(
                "Episode {} of {} watched ({:.0}%)",
                session.episode,
                session.item_ref,
                session.progress_pct()
            );
            self.emit_event(PlaybackEvent::Watched {
                item_ref: session.item_ref.clone(),
                episode: session.episode,
            });
        }

        if session.is_last_episode() && !session.series_signaled {
            self.signal_series_complete(&session.item_ref)
                .await
                .inspect_err(|e| {
                    error!("Failed to mark {} complete: {}", session.item_ref, e)
                })?;
            session.series_signaled = true;
        }
        Ok(newly_marked)
    }

    async fn signal_series_complete(&self, item_ref: &ItemRef) -> Result<()> {
        self.library.mark_series_complete(item_ref).await?;
        self.emit_event(PlaybackEvent::SeriesComplete {
            item_ref: item_ref.clone(),
        });
        Ok(())
    }

    /// Stop bookkeeping shared by `stop` and a superseding `start`
    async fn finish_stopped(&self, session: &PlaybackSession) {
        let below_threshold = session.progress_pct() < session.watched_threshold_pct;
        if !session.watched_marked && below_threshold && session.last_position_secs > 0.0 {
            match self
                .library
                .update_progress(
                    &session.item_ref,
                    session.episode,
                    session.last_position_secs,
                    session.duration_secs,
                )
                .await
            {
                Ok(()) => self.emit_event(PlaybackEvent::ResumeSaved {
                    session: session.id,
                    item_ref: session.item_ref.clone(),
                    episode: session.episode,
                    position_secs: session.last_position_secs,
                }),
                Err(e) => error!("Failed to save resume point for {}: {}", session.item_ref, e),
            }
        }

        info!(
            "Playback stopped: {} episode {} at {:.0}%",
            session.item_ref,
            session.episode,
            session.progress_pct()
        );
        self.emit_event(PlaybackEvent::Ended {
            session: session.id,
            state: TrackerState::Stopped,
        });
    }

    /// Add the item to the watchlist and the library if missing
    async fn ensure_tracked(&self, request: &PlaybackRequest) {
        let mut entry = WatchlistEntry::new(
            request.item_ref.clone(),
            request.title.clone(),
            self.clock.now(),
        );
        entry.poster_url = request.poster_url.clone();
        entry.banner_url = request.banner_url.clone();

        match self.watchlist.add(entry).await {
            Ok(true) => info!("Added {} to the watchlist", request.item_ref),
            Ok(false) => {}
            Err(e) => error!("Failed to add {} to the watchlist: {}", request.item_ref, e),
        }

        if let Err(e) = self
            .library
            .add_to_library(
                &request.item_ref,
                &request.title,
                request.poster_url.as_deref(),
                request.banner_url.as_deref(),
            )
            .await
        {
            error!("Failed to add {} to the library: {}", request.item_ref, e);
        }
    }

    fn emit_event(&self, event: PlaybackEvent) {
        if self.event_tx.try_send(event).is_err() {
            warn!("Playback event channel full, dropping event. Consider increasing event_channel_capacity.");
        }
    }
}
