//! Sync engine
//!
//! Reconciles the local watchlist with every enabled source.
//!
//! ## Cycle
//!
//! 1. Read the watchlist once
//! 2. For each enabled source (declaration order), take the entries whose
//!    `ItemRef` belongs to that source
//! 3. Push them through the shared [`RetryPolicy`]; every attempt produces a
//!    [`SyncResult`]
//! 4. A source that exhausts its attempts is marked failed for this cycle;
//!    the remaining sources still run
//!
//! A `sync_all` issued while another is running is coalesced: it returns
//! [`SyncRun::Coalesced`] immediately and nothing is queued.
//!
//! ## Events
//!
//! Progress is reported on a bounded channel. When the channel is full the
//! event is dropped with a warning rather than blocking the cycle.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::IntervalStream;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::SyncConfig;
use crate::error::{ErrorKind, Result};
use crate::model::{SourceKind, SyncResult, WatchlistEntry};
use crate::retry::RetryPolicy;
use crate::traits::{SourceAdapter, WatchlistStore};

/// Events emitted by the SyncEngine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A cycle started
    CycleStarted { sources: usize },

    /// A disabled source was skipped
    SourceSkipped { source: SourceKind },

    /// One push attempt failed (more may follow)
    AttemptFailed {
        source: SourceKind,
        attempt: u32,
        error: String,
    },

    /// A source accepted its entries
    SourceSynced {
        source: SourceKind,
        items: usize,
        attempts: u32,
    },

    /// A source exhausted its attempts
    SourceFailed {
        source: SourceKind,
        error: ErrorKind,
        attempts: u32,
    },

    /// A cycle finished
    CycleCompleted { succeeded: usize, failed: usize },

    /// A `sync_all` arrived while a cycle was running and was dropped
    Coalesced,

    /// The scheduler stopped
    Stopped { reason: String },
}

/// Every attempt of one cycle, in order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub results: Vec<SyncResult>,
}

impl SyncSummary {
    /// Last result recorded for `source`
    pub fn final_result(&self, source: SourceKind) -> Option<&SyncResult> {
        self.results.iter().rev().find(|r| r.source == source)
    }

    /// All attempts for `source`
    pub fn attempts(&self, source: SourceKind) -> Vec<&SyncResult> {
        self.results.iter().filter(|r| r.source == source).collect()
    }

    /// Sources whose final attempt succeeded, in cycle order
    pub fn succeeded(&self) -> Vec<SourceKind> {
        self.sources_where(true)
    }

    /// Sources whose final attempt failed, in cycle order
    pub fn failed(&self) -> Vec<SourceKind> {
        self.sources_where(false)
    }

    fn sources_where(&self, succeeded: bool) -> Vec<SourceKind> {
        let mut out: Vec<SourceKind> = Vec::new();
        for r in &self.results {
            if !out.contains(&r.source)
                && self.final_result(r.source).map(|f| f.succeeded) == Some(succeeded)
            {
                out.push(r.source);
            }
        }
        out
    }
}

/// Outcome of [`SyncEngine::sync_all`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncRun {
    Completed(SyncSummary),
    /// Another cycle was already running
    Coalesced,
}

/// Resets the in-flight flag when a cycle ends, including on early return
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Watchlist-to-source reconciliation
pub struct SyncEngine {
    sources: Vec<Arc<dyn SourceAdapter>>,
    watchlist: Arc<dyn WatchlistStore>,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
    in_flight: AtomicBool,
    event_tx: mpsc::Sender<SyncEvent>,
}

impl SyncEngine {
    /// Create a new sync engine
    ///
    /// Returns the engine and the receiving end of its event channel.
    pub fn new(
        sources: Vec<Arc<dyn SourceAdapter>>,
        watchlist: Arc<dyn WatchlistStore>,
        clock: Arc<dyn Clock>,
        config: &SyncConfig,
    ) -> Result<(Self, mpsc::Receiver<SyncEvent>)> {
        config.validate()?;

        let (tx, rx) = mpsc::channel(config.event_channel_capacity);

        let engine = Self {
            sources,
            watchlist,
            retry: config.retry_policy(),
            clock,
            in_flight: AtomicBool::new(false),
            event_tx: tx,
        };

        Ok((engine, rx))
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Whether a cycle is running right now
    pub fn is_syncing(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Run one reconciliation cycle
    ///
    /// Only a failure to read the watchlist is returned as an error; source
    /// failures are reported in the summary.
    pub async fn sync_all(&self) -> Result<SyncRun> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Sync already in flight, coalescing");
            self.emit_event(SyncEvent::Coalesced);
            return Ok(SyncRun::Coalesced);
        }
        let _guard = InFlight(&self.in_flight);

        let entries = self.watchlist.list().await?;
        self.emit_event(SyncEvent::CycleStarted {
            sources: self.sources.len(),
        });
        info!(
            "Sync cycle started: {} entries, {} sources",
            entries.len(),
            self.sources.len()
        );

        let mut summary = SyncSummary::default();
        for adapter in &self.sources {
            let source = adapter.source();
            if !adapter.is_enabled() {
                debug!("Source {} is disabled, skipping", source);
                self.emit_event(SyncEvent::SourceSkipped { source });
                continue;
            }

            let batch: Vec<WatchlistEntry> = entries
                .iter()
                .filter(|e| e.item_ref.source == source)
                .cloned()
                .collect();

            summary
                .results
                .extend(self.push_with_retry(adapter.as_ref(), &batch).await);
        }

        let succeeded = summary.succeeded().len();
        let failed = summary.failed().len();
        info!(
            "Sync cycle completed: {} sources succeeded, {} failed",
            succeeded, failed
        );
        self.emit_event(SyncEvent::CycleCompleted { succeeded, failed });

        Ok(SyncRun::Completed(summary))
    }

    /// Push one source's batch, producing one result per attempt
    async fn push_with_retry(
        &self,
        adapter: &dyn SourceAdapter,
        batch: &[WatchlistEntry],
    ) -> Vec<SyncResult> {
        let source = adapter.source();
        debug!("Pushing {} entries to {}", batch.len(), source);

        let outcome = self
            .retry
            .run(self.clock.as_ref(), |_| adapter.push_list(batch))
            .await;

        let mut results = Vec::with_capacity(outcome.attempts as usize);
        for (i, e) in outcome.failures.iter().enumerate() {
            let attempt = i as u32 + 1;
            self.emit_event(SyncEvent::AttemptFailed {
                source,
                attempt,
                error: e.to_string(),
            });
            results.push(SyncResult::failure(source, e.kind(), attempt));
        }

        match outcome.result {
            Ok(items) => {
                info!(
                    "Synced {} items to {} (attempt {})",
                    items, source, outcome.attempts
                );
                self.emit_event(SyncEvent::SourceSynced {
                    source,
                    items,
                    attempts: outcome.attempts,
                });
                results.push(SyncResult::success(source, items, outcome.attempts));
            }
            Err(e) => {
                error!(
                    "Sync to {} failed after {} attempts: {}",
                    source, outcome.attempts, e
                );
                self.emit_event(SyncEvent::AttemptFailed {
                    source,
                    attempt: outcome.attempts,
                    error: e.to_string(),
                });
                self.emit_event(SyncEvent::SourceFailed {
                    source,
                    error: ErrorKind::RemoteRejected,
                    attempts: outcome.attempts,
                });
                results.push(SyncResult::failure(
                    source,
                    ErrorKind::RemoteRejected,
                    outcome.attempts,
                ));
            }
        }

        results
    }

    /// Run `sync_all` every `interval` until shut down
    ///
    /// The first cycle runs immediately. With `shutdown_rx` the loop ends
    /// when the sender fires or is dropped; without it the loop ends on
    /// Ctrl-C.
    pub async fn run_with_shutdown(
        &self,
        interval: Duration,
        shutdown_rx: Option<oneshot::Receiver<()>>,
    ) -> Result<()> {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut ticks = IntervalStream::new(ticker);

        let shutdown = async move {
            match shutdown_rx {
                Some(rx) => {
                    let _ = rx.await;
                }
                None => {
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
        };
        tokio::pin!(shutdown);

        info!("Sync scheduler started, interval {:?}", interval);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    self.emit_event(SyncEvent::Stopped {
                        reason: "Shutdown signal".to_string(),
                    });
                    break;
                }

                Some(_) = ticks.next() => {
                    if let Err(e) = self.sync_all().await {
                        error!("Sync cycle aborted: {}", e);
                    }
                }
            }
        }

        Ok(())
    }

    fn emit_event(&self, event: SyncEvent) {
        if self.event_tx.try_send(event).is_err() {
            warn!("Sync event channel full, dropping event. Consider increasing event_channel_capacity.");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_reports_final_outcome_per_source() {
        let summary = SyncSummary {
            results: vec![
                SyncResult::failure(SourceKind::AniList, ErrorKind::NetworkUnavailable, 1),
                SyncResult::success(SourceKind::AniList, 3, 2),
                SyncResult::failure(SourceKind::Trakt, ErrorKind::RemoteRejected, 1),
            ],
        };

        assert_eq!(summary.succeeded(), vec![SourceKind::AniList]);
        assert_eq!(summary.failed(), vec![SourceKind::Trakt]);
        assert_eq!(summary.attempts(SourceKind::AniList).len(), 2);
        assert_eq!(
            summary.final_result(SourceKind::AniList).map(|r| r.items_synced),
            Some(3)
        );
    }

    #[test]
    fn in_flight_guard_releases_flag() {
        let flag = AtomicBool::new(true);
        {
            let _guard = InFlight(&flag);
        }
        assert!(!flag.load(Ordering::Acquire));
    }
}
