// # animesyncd - watchlist sync daemon
//
// Thin integration layer: reads configuration from the environment, builds
// the stores and source adapters, and runs the periodic SyncEngine until
// SIGTERM or SIGINT. All sync, retry and caching logic lives in
// animesync-core.
//
// ## Configuration
//
// ### Sources
// - `ANIMESYNC_SOURCES`: Comma-separated sources in priority order (default: anilist)
// - `ANIMESYNC_<SOURCE>_TOKEN`: Access token, e.g. `ANIMESYNC_ANILIST_TOKEN`
// - `ANIMESYNC_ITEMS_PER_PAGE`: Items requested per list (default: 20)
//
// ### Storage
// - `ANIMESYNC_DATA_DIR`: Directory for watchlist.json and the cache;
//   everything is kept in memory when unset
// - `ANIMESYNC_CACHE_ENABLED`: true/false (default: true)
// - `ANIMESYNC_CACHE_TTL_HOURS`: List cache TTL (default: 24)
// - `ANIMESYNC_WARM_CACHE`: Refresh trending and upcoming lists after each
//   sync cycle (default: false)
//
// ### Sync
// - `ANIMESYNC_SYNC_ENABLED`: true/false (default: true)
// - `ANIMESYNC_SYNC_INTERVAL_HOURS`: Hours between cycles (default: 6)
// - `ANIMESYNC_MAX_ATTEMPTS`: Attempts per source and cycle (default: 3)
// - `ANIMESYNC_RETRY_DELAY_SECS`: Delay between attempts (default: 5)
// - `ANIMESYNC_EXPONENTIAL_BACKOFF`: true/false (default: false)
//
// ### Logging
// - `ANIMESYNC_LOG_LEVEL`: trace, debug, info, warn, error (default: info)
//
// ## Example
//
// ```bash
// export ANIMESYNC_SOURCES=anilist
// export ANIMESYNC_ANILIST_TOKEN=your_token
// export ANIMESYNC_DATA_DIR=/var/lib/animesync
//
// animesyncd
// ```

use animesync_core::cache::CacheStore;
use animesync_core::config::{AnimeSyncConfig, SourceConfig, StoreConfig};
use animesync_core::model::SourceKind;
use animesync_core::registry::SourceRegistry;
use animesync_core::traits::{CacheBackend, SourceAdapter, WatchlistStore};
use animesync_core::{
    Aggregator, Clock, FileCacheBackend, FileWatchlistStore, MemoryCacheBackend,
    MemoryWatchlistStore, SyncEngine, SyncEvent, SystemClock,
};
use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum AnimesyncExitCode {
    CleanShutdown = 0,
    ConfigError = 1,
    RuntimeError = 2,
}

impl From<AnimesyncExitCode> for ExitCode {
    fn from(code: AnimesyncExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Daemon configuration
struct Config {
    core: AnimeSyncConfig,
    data_dir: Option<PathBuf>,
    warm_cache: bool,
    log_level: Level,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to
    /// its value
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut core = AnimeSyncConfig::new();

        let sources = lookup("ANIMESYNC_SOURCES").unwrap_or_else(|| "anilist".to_string());
        let items_per_page: Option<u32> = parse_var(&lookup, "ANIMESYNC_ITEMS_PER_PAGE")?;
        for name in sources.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let source = SourceKind::from_str(name)
                .with_context(|| format!("ANIMESYNC_SOURCES contains '{}'", name))?;
            let mut source_config = SourceConfig::new(source);
            let token_var = format!("ANIMESYNC_{}_TOKEN", source.as_str().to_uppercase());
            if let Some(token) = lookup(&token_var) {
                source_config = source_config.with_access_token(token);
            }
            if let Some(items) = items_per_page {
                source_config = source_config.with_items_per_page(items);
            }
            core.sources.push(source_config);
        }
        if let Some(items) = items_per_page {
            core.aggregation.items_per_page = items;
        }

        let data_dir = lookup("ANIMESYNC_DATA_DIR")
            .filter(|d| !d.trim().is_empty())
            .map(PathBuf::from);
        if let Some(dir) = &data_dir {
            core.watchlist = StoreConfig::File {
                path: dir.join("watchlist.json").to_string_lossy().into_owned(),
            };
            core.cache.directory = Some(dir.join("cache").to_string_lossy().into_owned());
        }

        if let Some(enabled) = parse_var(&lookup, "ANIMESYNC_CACHE_ENABLED")? {
            core.cache.enabled = enabled;
        }
        if let Some(hours) = parse_var(&lookup, "ANIMESYNC_CACHE_TTL_HOURS")? {
            core.cache.ttl_hours = hours;
        }
        if let Some(enabled) = parse_var(&lookup, "ANIMESYNC_SYNC_ENABLED")? {
            core.sync.enabled = enabled;
        }
        if let Some(hours) = parse_var(&lookup, "ANIMESYNC_SYNC_INTERVAL_HOURS")? {
            core.sync.interval_hours = hours;
        }
        if let Some(attempts) = parse_var(&lookup, "ANIMESYNC_MAX_ATTEMPTS")? {
            core.sync.max_attempts = attempts;
        }
        if let Some(delay) = parse_var(&lookup, "ANIMESYNC_RETRY_DELAY_SECS")? {
            core.sync.retry_delay_secs = delay;
        }
        if let Some(exponential) = parse_var(&lookup, "ANIMESYNC_EXPONENTIAL_BACKOFF")? {
            core.sync.exponential_backoff = exponential;
        }

        let warm_cache = parse_var(&lookup, "ANIMESYNC_WARM_CACHE")?.unwrap_or(false);

        let log_level = match lookup("ANIMESYNC_LOG_LEVEL")
            .unwrap_or_else(|| "info".to_string())
            .to_lowercase()
            .as_str()
        {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            other => anyhow::bail!(
                "ANIMESYNC_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                other
            ),
        };

        Ok(Self {
            core,
            data_dir,
            warm_cache,
            log_level,
        })
    }

    fn validate(&self) -> Result<()> {
        self.core.validate()?;

        if self.core.sources.is_empty() {
            anyhow::bail!(
                "ANIMESYNC_SOURCES must name at least one source. \
                Set it via: export ANIMESYNC_SOURCES=anilist"
            );
        }

        if let Some(dir) = &self.data_dir {
            if !dir.is_dir() {
                anyhow::bail!(
                    "ANIMESYNC_DATA_DIR does not exist: {}. \
                    Create it first: mkdir -p {}",
                    dir.display(),
                    dir.display()
                );
            }
        }

        Ok(())
    }
}

/// Parse an optional variable, failing on a malformed value
fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{} has an invalid value '{}': {}", key, raw, e)),
    }
}

fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return AnimesyncExitCode::ConfigError.into();
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {:#}", e);
        return AnimesyncExitCode::ConfigError.into();
    }

    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.log_level)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return AnimesyncExitCode::ConfigError.into();
    }

    info!("Starting animesyncd");

    let registry = SourceRegistry::new();
    #[cfg(feature = "anilist")]
    {
        info!("Registering AniList adapter");
        animesync_source_anilist::register(&registry);
    }

    let sources = match registry.create_all(&config.core.sources) {
        Ok(sources) => sources,
        Err(e) => {
            error!("Failed to create source adapters: {}", e);
            return AnimesyncExitCode::ConfigError.into();
        }
    };
    info!(
        "Configured sources: {}",
        sources
            .iter()
            .map(|s| s.source().as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return AnimesyncExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        if let Err(e) = run_daemon(config, sources).await {
            error!("Daemon error: {:#}", e);
            AnimesyncExitCode::RuntimeError
        } else {
            AnimesyncExitCode::CleanShutdown
        }
    });

    result.into()
}

/// Run the daemon
async fn run_daemon(config: Config, sources: Vec<Arc<dyn SourceAdapter>>) -> Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let watchlist: Arc<dyn WatchlistStore> = match &config.core.watchlist {
        StoreConfig::File { path } => Arc::new(
            FileWatchlistStore::new(path)
                .await
                .with_context(|| format!("opening watchlist {}", path))?,
        ),
        StoreConfig::Memory => {
            warn!("No ANIMESYNC_DATA_DIR set; the watchlist is not persisted");
            Arc::new(MemoryWatchlistStore::new())
        }
    };
    info!("Watchlist holds {} entries", watchlist.list().await?.len());

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    tokio::spawn(async move {
        match wait_for_shutdown().await {
            Ok(signal) => info!("Received shutdown signal: {}", signal),
            Err(e) => error!("Signal handling failed, shutting down: {}", e),
        }
        let _ = shutdown_tx.send(());
    });

    if !config.core.sync.enabled {
        info!("Sync disabled; waiting for shutdown");
        let _ = shutdown_rx.await;
        return Ok(());
    }

    let aggregator = if config.warm_cache {
        let backend: Arc<dyn CacheBackend> =
            match &config.core.cache.directory {
                Some(dir) => Arc::new(FileCacheBackend::new(dir)),
                None => Arc::new(MemoryCacheBackend::new()),
            };
        let cache =
            CacheStore::new(backend, clock.clone()).with_enabled(config.core.cache.enabled);
        Some(
            Aggregator::new(sources.clone(), cache, clock.clone())
                .with_config(config.core.cache.clone(), config.core.aggregation.clone()),
        )
    } else {
        None
    };

    let (engine, events) = SyncEngine::new(sources, watchlist, clock, &config.core.sync)?;
    let event_task = tokio::spawn(log_events(events, aggregator));

    info!(
        "Sync every {}h, {} attempt(s) per source",
        config.core.sync.interval_hours,
        engine.retry_policy().max_attempts
    );
    engine
        .run_with_shutdown(config.core.sync.interval(), Some(shutdown_rx))
        .await?;

    // Dropping the engine closes the event channel and ends the logger
    drop(engine);
    if let Err(e) = event_task.await {
        warn!("Event logger ended abnormally: {}", e);
    }

    info!("Shutting down daemon");
    Ok(())
}

/// Log engine events; refresh cached lists after each cycle when warming
async fn log_events(mut events: mpsc::Receiver<SyncEvent>, aggregator: Option<Aggregator>) {
    while let Some(event) = events.recv().await {
        match event {
            SyncEvent::AttemptFailed {
                source,
                attempt,
                error,
            } => warn!("{} attempt {} failed: {}", source, attempt, error),
            SyncEvent::CycleCompleted { succeeded, failed } => {
                debug!("Cycle done ({} ok, {} failed)", succeeded, failed);
                if let Some(aggregator) = &aggregator {
                    let trending = aggregator.trending().await;
                    let upcoming = aggregator.upcoming().await;
                    info!(
                        "Cache warmed: {} trending, {} upcoming",
                        trending.len(),
                        upcoming.len()
                    );
                }
            }
            other => debug!("Sync event: {:?}", other),
        }
    }
}

/// Wait for SIGTERM or SIGINT
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to setup SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to setup SIGINT handler")?;

    let received = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    };
    Ok(received)
}

/// Wait for Ctrl-C
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to wait for CTRL-C")?;
    Ok("SIGINT")
}
