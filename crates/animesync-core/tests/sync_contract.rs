//! Contract Test: Engine-Owned Retry and Per-Source Isolation
//!
//! Constraints verified:
//! - Each source receives exactly the watchlist entries that belong to it
//! - Pushes are retried by the engine according to max_attempts, with the
//!   configured delay between attempts, and one SyncResult per attempt
//! - A source that exhausts its attempts is marked failed (RemoteRejected)
//!   without stopping the other sources
//! - Disabled sources are skipped
//! - A second sync_all while one is in flight is coalesced, not queued

mod common;

use animesync_core::clock::ManualClock;
use animesync_core::config::SyncConfig;
use animesync_core::error::ErrorKind;
use animesync_core::model::SourceKind;
use animesync_core::sync::{SyncEngine, SyncEvent, SyncRun, SyncSummary};
use animesync_core::traits::WatchlistStore;
use animesync_core::MemoryWatchlistStore;
use common::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_test::assert_ok;

fn sync_config(max_attempts: u32, retry_delay_secs: u64) -> SyncConfig {
    SyncConfig {
        max_attempts,
        retry_delay_secs,
        ..SyncConfig::default()
    }
}

async fn watchlist() -> Arc<MemoryWatchlistStore> {
    let store = MemoryWatchlistStore::new();
    store.add(entry("1", SourceKind::AniList)).await.unwrap();
    store.add(entry("2", SourceKind::MyAnimeList)).await.unwrap();
    store.add(entry("3", SourceKind::AniList)).await.unwrap();
    store.add(entry("4", SourceKind::Trakt)).await.unwrap();
    Arc::new(store)
}

fn completed(run: SyncRun) -> SyncSummary {
    match run {
        SyncRun::Completed(summary) => summary,
        SyncRun::Coalesced => panic!("expected a completed cycle"),
    }
}

#[tokio::test]
async fn entries_are_partitioned_by_source() {
    let anilist = Arc::new(MockSourceAdapter::new(SourceKind::AniList));
    let mal = Arc::new(MockSourceAdapter::new(SourceKind::MyAnimeList));
    let clock = Arc::new(ManualClock::default());

    let (engine, _events) = SyncEngine::new(
        vec![as_source(&anilist), as_source(&mal)],
        watchlist().await,
        clock,
        &sync_config(3, 5),
    )
    .unwrap();

    let summary = completed(engine.sync_all().await.unwrap());

    let pushed: Vec<Vec<String>> = anilist
        .pushed()
        .iter()
        .map(|batch| batch.iter().map(|e| e.item_ref.id.clone()).collect())
        .collect();
    assert_eq!(pushed, vec![vec!["1".to_string(), "3".to_string()]]);
    assert_eq!(mal.pushed()[0].len(), 1);
    assert!(
        mal.pushed()[0]
            .iter()
            .all(|e| e.item_ref.source == SourceKind::MyAnimeList)
    );

    assert_eq!(
        summary.final_result(SourceKind::AniList).map(|r| r.items_synced),
        Some(2)
    );
    assert_eq!(summary.failed(), Vec::<SourceKind>::new());
}

#[tokio::test]
async fn transient_failures_are_retried_with_delay() {
    let anilist = Arc::new(
        MockSourceAdapter::new(SourceKind::AniList).with_push(PushBehavior::FailTimes(2)),
    );
    let clock = Arc::new(ManualClock::default());

    let (engine, _events) = SyncEngine::new(
        vec![as_source(&anilist)],
        watchlist().await,
        clock.clone(),
        &sync_config(3, 7),
    )
    .unwrap();

    let summary = completed(engine.sync_all().await.unwrap());

    assert_eq!(anilist.push_calls(), 3);
    assert_eq!(clock.sleeps(), vec![Duration::from_secs(7); 2]);

    let attempts = summary.attempts(SourceKind::AniList);
    assert_eq!(attempts.len(), 3, "one SyncResult per attempt");
    assert_eq!(attempts[0].error, Some(ErrorKind::NetworkUnavailable));
    assert_eq!(attempts[0].attempt, 1);
    assert!(attempts[2].succeeded);
    assert_eq!(attempts[2].attempt, 3);
}

#[tokio::test]
async fn exhausted_source_fails_without_blocking_others() {
    let rejecting = Arc::new(
        MockSourceAdapter::new(SourceKind::AniList).with_push(PushBehavior::Reject),
    );
    let healthy = Arc::new(MockSourceAdapter::new(SourceKind::Trakt));
    let clock = Arc::new(ManualClock::default());

    let (engine, mut events) = SyncEngine::new(
        vec![as_source(&rejecting), as_source(&healthy)],
        watchlist().await,
        clock,
        &sync_config(2, 1),
    )
    .unwrap();

    let summary = completed(engine.sync_all().await.unwrap());

    assert_eq!(rejecting.push_calls(), 2);
    assert_eq!(healthy.push_calls(), 1);

    let failed = summary.final_result(SourceKind::AniList).unwrap();
    assert!(!failed.succeeded);
    assert_eq!(failed.error, Some(ErrorKind::RemoteRejected));
    assert_eq!(summary.succeeded(), vec![SourceKind::Trakt]);
    assert_eq!(summary.failed(), vec![SourceKind::AniList]);

    let mut saw_failure = false;
    while let Ok(event) = events.try_recv() {
        if let SyncEvent::SourceFailed { source, error, attempts } = event {
            assert_eq!(source, SourceKind::AniList);
            assert_eq!(error, ErrorKind::RemoteRejected);
            assert_eq!(attempts, 2);
            saw_failure = true;
        }
    }
    assert!(saw_failure);
}

#[tokio::test]
async fn single_attempt_config_never_retries() {
    let failing = Arc::new(
        MockSourceAdapter::new(SourceKind::AniList).with_push(PushBehavior::FailTimes(5)),
    );
    let clock = Arc::new(ManualClock::default());

    let (engine, _events) = SyncEngine::new(
        vec![as_source(&failing)],
        watchlist().await,
        clock.clone(),
        &sync_config(1, 30),
    )
    .unwrap();

    completed(engine.sync_all().await.unwrap());
    assert_eq!(failing.push_calls(), 1);
    assert!(clock.sleeps().is_empty());
}

#[tokio::test]
async fn disabled_source_is_skipped() {
    let disabled = Arc::new(MockSourceAdapter::new(SourceKind::AniList).disabled());
    let clock = Arc::new(ManualClock::default());

    let (engine, _events) = SyncEngine::new(
        vec![as_source(&disabled)],
        watchlist().await,
        clock,
        &sync_config(3, 5),
    )
    .unwrap();

    let summary = completed(engine.sync_all().await.unwrap());
    assert_eq!(disabled.push_calls(), 0);
    assert!(summary.results.is_empty());
}

#[tokio::test]
async fn concurrent_sync_is_coalesced() {
    let gate = Arc::new(Notify::new());
    let slow = Arc::new(MockSourceAdapter::new(SourceKind::AniList).with_gate(gate.clone()));
    let clock = Arc::new(ManualClock::default());

    let (engine, _events) = SyncEngine::new(
        vec![as_source(&slow)],
        watchlist().await,
        clock,
        &sync_config(1, 0),
    )
    .unwrap();
    let engine = Arc::new(engine);

    let first = tokio::spawn({
        let engine = engine.clone();
        async move { engine.sync_all().await }
    });

    slow.push_started().await;
    assert!(engine.is_syncing());

    let second = assert_ok!(engine.sync_all().await);
    assert_eq!(second, SyncRun::Coalesced);

    gate.notify_one();
    let first = first.await.unwrap().unwrap();
    assert!(matches!(first, SyncRun::Completed(_)));
    assert_eq!(slow.push_calls(), 1, "the coalesced call must not be queued");
    assert!(!engine.is_syncing());
}

#[tokio::test]
async fn scheduler_stops_on_shutdown() {
    let anilist = Arc::new(MockSourceAdapter::new(SourceKind::AniList));
    let clock = Arc::new(ManualClock::default());

    let (engine, mut events) = SyncEngine::new(
        vec![as_source(&anilist)],
        watchlist().await,
        clock,
        &sync_config(1, 0),
    )
    .unwrap();
    let engine = Arc::new(engine);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let handle = tokio::spawn({
        let engine = engine.clone();
        async move {
            engine
                .run_with_shutdown(Duration::from_secs(3600), Some(shutdown_rx))
                .await
        }
    });

    // The first tick fires immediately
    loop {
        match events.recv().await {
            Some(SyncEvent::CycleCompleted { .. }) => break,
            Some(_) => continue,
            None => panic!("event channel closed"),
        }
    }

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("scheduler stops promptly")
        .unwrap()
        .unwrap();

    assert_eq!(anilist.push_calls(), 1);
}
