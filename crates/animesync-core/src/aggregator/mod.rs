// # Aggregator
//
// Merges per-source lists into one presented list.
//
// ## Rules
//
// - Sources are asked in declaration order
// - A disabled or failing source contributes an empty list; it never
//   blocks the others
// - With a sort key the merged list is sorted stably, so ties keep source
//   declaration order
// - There is no cross-source de-duplication: the same title on two
//   services appears twice
//
// `Aggregator` adds per-(list, source) caching on top of [`aggregate`], so
// a source that is down serves its own stale list instead of nothing.

use chrono::{DateTime, NaiveDate, Utc};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::cache::{CacheNamespace, CacheStore};
use crate::clock::Clock;
use crate::config::{AggregationConfig, CacheConfig};
use crate::error::{Error, Result};
use crate::model::{Artwork, ItemRef, ListKind, MediaItem};
use crate::traits::SourceAdapter;

/// Global ordering applied after merging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    /// Earliest `airing_at` first; items without an air time last
    SoonestAiring,
    /// Highest `score` first; unscored items last
    HighestScore,
}

/// Fields the sort keys look at
pub trait Rankable {
    fn airing_at(&self) -> Option<DateTime<Utc>>;
    fn score(&self) -> Option<f64>;
}

impl Rankable for MediaItem {
    fn airing_at(&self) -> Option<DateTime<Utc>> {
        self.airing_at
    }

    fn score(&self) -> Option<f64> {
        self.score
    }
}

impl SortKey {
    /// Compare two items; `None` values sort after any value, and a NaN
    /// score counts as `None`
    pub fn compare<T: Rankable>(&self, a: &T, b: &T) -> Ordering {
        match self {
            SortKey::SoonestAiring => match (a.airing_at(), b.airing_at()) {
                (Some(x), Some(y)) => x.cmp(&y),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            },
            SortKey::HighestScore => match (real_score(a), real_score(b)) {
                (Some(x), Some(y)) => y.total_cmp(&x),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            },
        }
    }
}

fn real_score<T: Rankable>(item: &T) -> Option<f64> {
    item.score().filter(|s| !s.is_nan())
}

/// Fetch from every enabled source and merge
///
/// Sources are fetched one after another. Errors are logged and the
/// source contributes nothing.
pub async fn aggregate<T, F, Fut>(
    sources: &[Arc<dyn SourceAdapter>],
    mut fetch: F,
    sort: Option<SortKey>,
) -> Vec<T>
where
    T: Rankable,
    F: FnMut(Arc<dyn SourceAdapter>) -> Fut,
    Fut: Future<Output = Result<Vec<T>>>,
{
    let mut merged = Vec::new();

    for adapter in sources {
        let source = adapter.source();
        if !adapter.is_enabled() {
            debug!("Skipping disabled source {}", source);
            continue;
        }

        match fetch(adapter.clone()).await {
            Ok(items) => {
                debug!("{} contributed {} items", source, items.len());
                merged.extend(items);
            }
            Err(e) => {
                warn!("{} failed, contributing no results: {}", source, e);
            }
        }
    }

    if let Some(key) = sort {
        merged.sort_by(|a, b| key.compare(a, b));
    }
    merged
}

/// Cached, multi-source list views
pub struct Aggregator {
    sources: Vec<Arc<dyn SourceAdapter>>,
    cache: CacheStore,
    clock: Arc<dyn Clock>,
    cache_config: CacheConfig,
    config: AggregationConfig,
}

impl Aggregator {
    pub fn new(
        sources: Vec<Arc<dyn SourceAdapter>>,
        cache: CacheStore,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            sources,
            cache,
            clock,
            cache_config: CacheConfig::default(),
            config: AggregationConfig::default(),
        }
    }

    pub fn with_config(mut self, cache: CacheConfig, aggregation: AggregationConfig) -> Self {
        self.cache_config = cache;
        self.config = aggregation;
        self
    }

    pub fn sources(&self) -> &[Arc<dyn SourceAdapter>] {
        &self.sources
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Recommendations from every source, best scored first
    pub async fn recommendations(&self) -> Vec<MediaItem> {
        self.merged_list(
            ListKind::Recommendations,
            CacheNamespace::Recommendations,
            self.cache_config.ttl(),
            Some(SortKey::HighestScore),
        )
        .await
    }

    /// Trending titles, in source order
    pub async fn trending(&self) -> Vec<MediaItem> {
        self.merged_list(
            ListKind::Trending,
            CacheNamespace::Trending,
            self.cache_config.ttl(),
            None,
        )
        .await
    }

    /// Episodes airing between now and the end of the upcoming window,
    /// soonest first
    pub async fn upcoming(&self) -> Vec<MediaItem> {
        let items = self
            .merged_list(
                ListKind::Upcoming,
                CacheNamespace::Upcoming,
                self.cache_config.upcoming_ttl(),
                Some(SortKey::SoonestAiring),
            )
            .await;

        let now = self.clock.now();
        let end = now + chrono::Duration::days(i64::from(self.config.upcoming_window_days));
        items
            .into_iter()
            .filter(|item| item.airing_at.is_some_and(|at| at >= now && at <= end))
            .collect()
    }

    /// Upcoming episodes grouped by UTC air date
    pub async fn calendar(&self) -> BTreeMap<NaiveDate, Vec<MediaItem>> {
        let mut days: BTreeMap<NaiveDate, Vec<MediaItem>> = BTreeMap::new();
        for item in self.upcoming().await {
            if let Some(at) = item.airing_at {
                days.entry(at.date_naive()).or_default().push(item);
            }
        }
        days
    }

    /// Titles similar to `item_ref`, asked only of its own source
    pub async fn similar(&self, item_ref: &ItemRef) -> Vec<MediaItem> {
        let Some(adapter) = self.adapter_for(item_ref) else {
            debug!("No enabled adapter for {}", item_ref);
            return Vec::new();
        };

        let kind = ListKind::Similar {
            id: item_ref.id.clone(),
        };
        let limit = self.config.items_per_page as usize;
        let key = format!("{}_{}", item_ref.source, kind.label());
        let lookup = self
            .cache
            .get(CacheNamespace::Similar, &key, self.cache_config.ttl(), || async {
                adapter.fetch_list(&kind).await
            })
            .await;

        match lookup.into_result() {
            Ok(mut items) => {
                items.truncate(limit);
                items
            }
            Err(e) => {
                warn!("Similar titles for {} unavailable: {}", item_ref, e);
                Vec::new()
            }
        }
    }

    /// Details of one item, cached
    pub async fn details(&self, item_ref: &ItemRef) -> Option<MediaItem> {
        let adapter = self.adapter_for(item_ref)?;
        let lookup = self
            .cache
            .get(
                CacheNamespace::Details,
                &item_ref.key(),
                self.cache_config.ttl(),
                || async { adapter.fetch_details(&item_ref.id).await },
            )
            .await;

        match lookup.into_result() {
            Ok(item) => item,
            Err(e) => {
                warn!("Details for {} unavailable: {}", item_ref, e);
                None
            }
        }
    }

    /// Poster, fanart and banner for one item
    pub async fn artwork(&self, item_ref: &ItemRef) -> Option<Artwork> {
        let adapter = self.adapter_for(item_ref)?;
        let lookup = self
            .cache
            .get(
                CacheNamespace::Art,
                &item_ref.key(),
                self.cache_config.art_ttl(),
                || async {
                    let details = adapter.fetch_details(&item_ref.id).await?;
                    Ok::<_, Error>(details.as_ref().map(Artwork::from))
                },
            )
            .await;

        match lookup.into_result() {
            Ok(art) => art,
            Err(e) => {
                warn!("Artwork for {} unavailable: {}", item_ref, e);
                None
            }
        }
    }

    fn adapter_for(&self, item_ref: &ItemRef) -> Option<Arc<dyn SourceAdapter>> {
        self.sources
            .iter()
            .find(|a| a.source() == item_ref.source && a.is_enabled())
            .cloned()
    }

    async fn merged_list(
        &self,
        kind: ListKind,
        namespace: CacheNamespace,
        ttl: Duration,
        sort: Option<SortKey>,
    ) -> Vec<MediaItem> {
        let cache = &self.cache;
        let kind = &kind;
        let limit = self.config.items_per_page as usize;

        aggregate(
            &self.sources,
            |adapter| async move {
                let key = format!("{}_{}", adapter.source(), kind.label());
                let lookup = cache
                    .get(namespace, &key, ttl, || async { adapter.fetch_list(kind).await })
                    .await;
                if let Some(e) = lookup.error() {
                    if lookup.is_degraded() {
                        debug!("{} is serving a stale {} list: {}", adapter.source(), kind.label(), e);
                    }
                }
                let mut items = lookup.into_result()?;
                items.truncate(limit);
                Ok::<_, Error>(items)
            },
            sort,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SourceKind;

    fn item(id: &str, score: Option<f64>) -> MediaItem {
        let mut item = MediaItem::new(ItemRef::new(id, SourceKind::AniList), id);
        item.score = score;
        item
    }

    #[test]
    fn score_sort_puts_unscored_last() {
        let mut items = vec![item("a", None), item("b", Some(70.0)), item("c", Some(85.0))];
        items.sort_by(|x, y| SortKey::HighestScore.compare(x, y));
        let ids: Vec<&str> = items.iter().map(|i| i.item_ref.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b", "a"]);
    }

    #[test]
    fn nan_score_sorts_with_unscored() {
        let mut items = vec![
            item("nan", Some(f64::NAN)),
            item("low", Some(10.0)),
            item("none", None),
            item("high", Some(95.0)),
        ];
        items.sort_by(|x, y| SortKey::HighestScore.compare(x, y));
        let ids: Vec<&str> = items.iter().map(|i| i.item_ref.id.as_str()).collect();
        assert_eq!(ids, vec!["high", "low", "nan", "none"]);
        assert_eq!(
            SortKey::HighestScore.compare(&items[2], &items[3]),
            Ordering::Equal
        );
    }

    #[test]
    fn airing_sort_is_stable_on_ties() {
        let at = Utc::now();
        let mut items = vec![
            item("first", None).with_airing(1, at),
            item("later", None).with_airing(1, at + chrono::Duration::hours(1)),
            item("second", None).with_airing(2, at),
        ];
        items.sort_by(|x, y| SortKey::SoonestAiring.compare(x, y));
        let ids: Vec<&str> = items.iter().map(|i| i.item_ref.id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second", "later"]);
    }
}
