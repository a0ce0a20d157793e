//! Contract Test: Playback Progress Tracking
//!
//! Constraints verified:
//! - Crossing the watched threshold marks the episode watched exactly once
//!   per session, however many ticks follow
//! - complete() marks watched regardless of position
//! - Watching the last episode marks the series complete
//! - Ticks from a superseded session are dropped
//! - stop() without a session is a no-op; stop() below the threshold saves
//!   a resume point
//! - Each crossed progress step below the threshold reaches the library
//! - A failed library write is retried by the next tick, and only the write
//!   that failed is repeated

mod common;

use animesync_core::clock::ManualClock;
use animesync_core::config::PlaybackConfig;
use animesync_core::library::{LocalLibrary, WatchStatus};
use animesync_core::model::SourceKind;
use animesync_core::playback::{
    IgnoredTick, PlaybackEvent, PlaybackRequest, PlaybackTracker, TickOutcome, TrackerState,
};
use animesync_core::traits::WatchlistStore;
use animesync_core::MemoryWatchlistStore;
use common::*;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_test::{assert_err, assert_ok};

struct Harness {
    tracker: PlaybackTracker,
    library: Arc<RecordingLibrary>,
    watchlist: Arc<MemoryWatchlistStore>,
    events: mpsc::Receiver<PlaybackEvent>,
}

fn harness() -> Harness {
    let library = Arc::new(RecordingLibrary::new());
    let watchlist = Arc::new(MemoryWatchlistStore::new());
    let (tracker, events) = PlaybackTracker::new(
        library.clone(),
        watchlist.clone(),
        Arc::new(ManualClock::default()),
        PlaybackConfig::default(),
    )
    .unwrap();
    Harness {
        tracker,
        library,
        watchlist,
        events,
    }
}

fn request(id: &str, episode: u32, total: u32) -> PlaybackRequest {
    PlaybackRequest::new(item_ref(id, SourceKind::AniList), format!("Title {}", id), episode)
        .with_total_episodes(total)
}

fn drain(events: &mut mpsc::Receiver<PlaybackEvent>) -> Vec<PlaybackEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

#[tokio::test]
async fn threshold_marks_watched_once() {
    let h = harness();
    let session = h.tracker.start(request("1", 5, 12)).await.unwrap();

    let first = h.tracker.tick(session, 550.0, 600.0).await.unwrap();
    assert!(matches!(
        first,
        TickOutcome::Applied {
            marked_watched: true,
            ..
        }
    ));

    let second = h.tracker.tick(session, 580.0, 600.0).await.unwrap();
    assert!(matches!(
        second,
        TickOutcome::Applied {
            marked_watched: false,
            ..
        }
    ));

    h.tracker.complete().await.unwrap();
    assert_eq!(h.library.watched_count(), 1);
    assert_eq!(h.library.series_complete_count(), 0);
    assert_eq!(h.tracker.state().await, TrackerState::Completed);
}

#[tokio::test]
async fn complete_marks_watched_at_any_position() {
    let h = harness();
    h.tracker.start(request("1", 3, 12)).await.unwrap();
    h.tracker.complete().await.unwrap();

    assert_eq!(
        h.library.calls().last(),
        Some(&LibraryCall::Watched(item_ref("1", SourceKind::AniList), 3, Some(12)))
    );
}

#[tokio::test]
async fn last_episode_marks_series_complete() {
    let h = harness();
    let session = h.tracker.start(request("7", 12, 12)).await.unwrap();
    h.tracker.tick(session, 590.0, 600.0).await.unwrap();

    assert_eq!(h.library.watched_count(), 1);
    assert_eq!(h.library.series_complete_count(), 1);
}

#[tokio::test]
async fn stale_session_tick_is_dropped() {
    let h = harness();
    let old = h.tracker.start(request("1", 1, 12)).await.unwrap();
    let new = h.tracker.start(request("1", 2, 12)).await.unwrap();
    assert_ne!(old, new);

    let outcome = h.tracker.tick(old, 599.0, 600.0).await.unwrap();
    assert_eq!(outcome, TickOutcome::Ignored(IgnoredTick::StaleSession));
    assert_eq!(h.library.watched_count(), 0);
    assert_eq!(h.tracker.session().await.map(|s| s.episode), Some(2));
}

#[tokio::test]
async fn stop_without_session_is_noop() {
    let mut h = harness();
    assert_ok!(h.tracker.stop().await);

    assert_eq!(h.tracker.state().await, TrackerState::Idle);
    assert!(h.library.calls().is_empty());
    assert!(drain(&mut h.events).is_empty());
}

#[tokio::test]
async fn stop_below_threshold_saves_resume_point() {
    let mut h = harness();
    let session = h.tracker.start(request("1", 4, 12)).await.unwrap();
    h.tracker.tick(session, 300.0, 1440.0).await.unwrap();
    h.tracker.stop().await.unwrap();

    // One update from the tick crossing 10% and 20%, one resume point on stop
    let at_300 = LibraryCall::Progress(item_ref("1", SourceKind::AniList), 4, 300.0, 1440.0);
    assert_eq!(h.library.progress_calls(), vec![at_300.clone(), at_300]);
    assert_eq!(h.library.watched_count(), 0);
    assert_eq!(h.tracker.state().await, TrackerState::Stopped);

    let events = drain(&mut h.events);
    assert!(
        events
            .iter()
            .any(|e| matches!(e, PlaybackEvent::ResumeSaved { episode: 4, .. }))
    );
    assert!(events.iter().any(|e| matches!(
        e,
        PlaybackEvent::Ended {
            state: TrackerState::Stopped,
            ..
        }
    )));
}

#[tokio::test]
async fn regressing_tick_is_ignored() {
    let h = harness();
    let session = h.tracker.start(request("1", 1, 12)).await.unwrap();

    h.tracker.tick(session, 400.0, 600.0).await.unwrap();
    let outcome = h.tracker.tick(session, 100.0, 600.0).await.unwrap();
    assert_eq!(outcome, TickOutcome::Ignored(IgnoredTick::Regressed));

    let outcome = h.tracker.tick(session, 10.0, 0.0).await.unwrap();
    assert_eq!(outcome, TickOutcome::Ignored(IgnoredTick::NoDuration));
}

#[tokio::test]
async fn progress_is_reported_once_per_step() {
    let h = harness();
    let session = h.tracker.start(request("1", 1, 12)).await.unwrap();

    let reported = |outcome: TickOutcome| match outcome {
        TickOutcome::Applied { reported, .. } => reported,
        other => panic!("tick ignored: {:?}", other),
    };

    assert_eq!(
        reported(h.tracker.tick(session, 130.0, 600.0).await.unwrap()),
        vec![10, 20]
    );
    assert_eq!(
        reported(h.tracker.tick(session, 130.0, 600.0).await.unwrap()),
        Vec::<u32>::new()
    );
    assert_eq!(
        reported(h.tracker.tick(session, 185.0, 600.0).await.unwrap()),
        vec![30]
    );
}

#[tokio::test]
async fn library_sees_progress_at_each_step() {
    let h = harness();
    let session = h.tracker.start(request("1", 1, 12)).await.unwrap();
    let r = item_ref("1", SourceKind::AniList);

    for position in [70.0, 130.0, 190.0, 250.0, 310.0] {
        h.tracker.tick(session, position, 600.0).await.unwrap();
    }
    // Same bucket as 310s: nothing new to record
    h.tracker.tick(session, 320.0, 600.0).await.unwrap();

    assert_eq!(
        h.library.progress_calls(),
        vec![
            LibraryCall::Progress(r.clone(), 1, 70.0, 600.0),
            LibraryCall::Progress(r.clone(), 1, 130.0, 600.0),
            LibraryCall::Progress(r.clone(), 1, 190.0, 600.0),
            LibraryCall::Progress(r.clone(), 1, 250.0, 600.0),
            LibraryCall::Progress(r, 1, 310.0, 600.0),
        ]
    );

    // Crossing the threshold marks watched instead of recording progress
    h.tracker.tick(session, 560.0, 600.0).await.unwrap();
    assert_eq!(h.library.progress_calls().len(), 5);
    assert_eq!(h.library.watched_count(), 1);
}

#[tokio::test]
async fn failed_series_mark_does_not_repeat_the_watch_mark() {
    let h = harness();
    let session = h.tracker.start(request("12", 12, 12)).await.unwrap();
    h.library.set_fail_series_complete(true);

    for position in [550.0, 570.0, 590.0] {
        assert_err!(h.tracker.tick(session, position, 600.0).await);
    }
    assert_eq!(h.library.watched_count(), 1);
    assert_eq!(h.library.series_complete_count(), 0);

    h.library.set_fail_series_complete(false);
    let outcome = h.tracker.tick(session, 595.0, 600.0).await.unwrap();
    assert!(matches!(
        outcome,
        TickOutcome::Applied {
            marked_watched: false,
            ..
        }
    ));
    h.tracker.complete().await.unwrap();

    assert_eq!(h.library.watched_count(), 1);
    assert_eq!(h.library.series_complete_count(), 1);
}

#[tokio::test]
async fn complete_retries_only_the_failed_series_mark() {
    let h = harness();
    h.tracker.start(request("12", 12, 12)).await.unwrap();

    h.library.set_fail_series_complete(true);
    assert_err!(h.tracker.complete().await);
    assert_eq!(h.tracker.state().await, TrackerState::Playing);

    h.library.set_fail_series_complete(false);
    assert_ok!(h.tracker.complete().await);

    assert_eq!(h.library.watched_count(), 1);
    assert_eq!(h.library.series_complete_count(), 1);
    assert_eq!(h.tracker.state().await, TrackerState::Completed);
}

#[tokio::test]
async fn failed_watch_mark_is_retried_on_next_tick() {
    let h = harness();
    let session = h.tracker.start(request("1", 2, 12)).await.unwrap();

    h.library.set_fail_watched(true);
    assert_err!(h.tracker.tick(session, 560.0, 600.0).await);
    assert_eq!(h.library.watched_count(), 0);

    h.library.set_fail_watched(false);
    let outcome = h.tracker.tick(session, 570.0, 600.0).await.unwrap();
    assert!(matches!(
        outcome,
        TickOutcome::Applied {
            marked_watched: true,
            ..
        }
    ));
    assert_eq!(h.library.watched_count(), 1);
}

#[tokio::test]
async fn start_adds_item_to_watchlist_and_library() {
    let h = harness();
    h.tracker.start(request("99", 1, 24)).await.unwrap();

    let r = item_ref("99", SourceKind::AniList);
    assert!(h.watchlist.contains(&r).await.unwrap());
    assert_eq!(h.library.calls()[0], LibraryCall::Added(r.clone()));

    // A second start does not duplicate the entry
    h.tracker.start(request("99", 2, 24)).await.unwrap();
    assert_eq!(h.watchlist.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn direct_marks_reach_the_library() {
    let h = harness();
    let r = item_ref("5", SourceKind::MyAnimeList);

    h.tracker.mark_watched(&r, 13, Some(13)).await.unwrap();
    h.tracker.mark_unwatched(&r, 13).await.unwrap();

    assert_eq!(
        h.library.calls(),
        vec![
            LibraryCall::Watched(r.clone(), 13, Some(13)),
            LibraryCall::SeriesComplete(r.clone()),
            LibraryCall::Unwatched(r, 13),
        ]
    );
}

#[tokio::test]
async fn local_library_follows_a_full_season() {
    let clock = Arc::new(ManualClock::default());
    let library = Arc::new(LocalLibrary::in_memory(clock.clone()));
    let (tracker, _events) = PlaybackTracker::new(
        library.clone(),
        Arc::new(MemoryWatchlistStore::new()),
        clock,
        PlaybackConfig::default(),
    )
    .unwrap();
    let r = item_ref("30", SourceKind::AniList);

    for episode in 1..=3 {
        let session = tracker.start(request("30", episode, 3)).await.unwrap();
        tracker.tick(session, 1400.0, 1440.0).await.unwrap();
    }

    let record = library.record(&r).await.expect("record created on start");
    assert_eq!(record.title, "Title 30");
    assert_eq!(record.progress(), 3);
    assert_eq!(record.status, WatchStatus::Completed);
    assert_eq!(library.recently_watched(10).await.len(), 3);
}
