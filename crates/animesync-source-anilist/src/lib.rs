// # AniList Source Adapter
//
// `SourceAdapter` for the AniList GraphQL API.
//
// ## Behaviour
//
// - One GraphQL request per call. Viewer recommendations need two (viewer
//   id, then the list); a push sends one mutation per entry
// - No retry, backoff or caching here; the SyncEngine and CacheStore own
//   those
// - Transport failures and 5xx map to `NetworkUnavailable`, every other
//   non-success status and GraphQL `errors` map to `RemoteRejected`
// - Without an access token the read queries still work (public data,
//   top-rated instead of personal recommendations) but pushes are rejected
//
// ## Security
//
// The access token never appears in logs or Debug output.
//
// ## API Reference
//
// - Endpoint: POST https://graphql.anilist.co
// - Docs: https://docs.anilist.co/

use animesync_core::config::SourceConfig;
use animesync_core::model::{ItemRef, ListKind, MediaItem, SourceKind, WatchlistEntry};
use animesync_core::registry::SourceRegistry;
use animesync_core::traits::{SourceAdapter, SourceAdapterFactory};
use animesync_core::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use std::time::Duration;

/// AniList GraphQL endpoint
const ANILIST_API: &str = "https://graphql.anilist.co";

/// Default HTTP timeout for API requests (30 seconds)
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

const DEFAULT_ITEMS_PER_PAGE: u32 = 20;

/// Airing schedules are requested this far ahead
const DEFAULT_UPCOMING_DAYS: i64 = 7;

const SERVICE: &str = "anilist";

const MEDIA_FIELDS: &str = "id title { romaji english native } description(asHtml: false) \
     averageScore genres episodes coverImage { extraLarge large medium } bannerImage";

const DETAILS_QUERY: &str = "query ($id: Int) { Media(id: $id, type: ANIME) { MEDIA_FIELDS } }";

const TRENDING_QUERY: &str = "query ($page: Int, $perPage: Int) { Page(page: $page, perPage: $perPage) { \
     media(type: ANIME, sort: TRENDING_DESC) { MEDIA_FIELDS } } }";

const TOP_RATED_QUERY: &str = "query ($page: Int, $perPage: Int) { Page(page: $page, perPage: $perPage) { \
     media(type: ANIME, sort: SCORE_DESC) { MEDIA_FIELDS } } }";

const VIEWER_QUERY: &str = "query { Viewer { id } }";

const RECOMMENDATIONS_QUERY: &str = "query ($userId: Int, $page: Int, $perPage: Int) { \
     Page(page: $page, perPage: $perPage) { recommendations(userId: $userId, sort: RATING_DESC) { \
     media { MEDIA_FIELDS } } } }";

const AIRING_QUERY: &str = "query ($page: Int, $perPage: Int, $airingAtGreater: Int, $airingAtLesser: Int) { \
     Page(page: $page, perPage: $perPage) { airingSchedules(airingAt_greater: $airingAtGreater, \
     airingAt_lesser: $airingAtLesser, sort: TIME) { airingAt episode media { MEDIA_FIELDS } } } }";

const SIMILAR_QUERY: &str = "query ($id: Int, $perPage: Int) { Media(id: $id, type: ANIME) { \
     recommendations(perPage: $perPage, sort: RATING_DESC) { nodes { mediaRecommendation { MEDIA_FIELDS } } } } }";

const SAVE_ENTRY_MUTATION: &str = "mutation ($mediaId: Int, $status: MediaListStatus) { \
     SaveMediaListEntry(mediaId: $mediaId, status: $status) { id status } }";

fn with_fields(query: &str) -> String {
    query.replace("MEDIA_FIELDS", MEDIA_FIELDS)
}

/// AniList adapter
pub struct AniListAdapter {
    /// ⚠️ NEVER log this value
    access_token: Option<String>,
    endpoint: String,
    enabled: bool,
    items_per_page: u32,
    upcoming_days: i64,
    client: reqwest::Client,
}

// Custom Debug implementation that hides the access token
impl std::fmt::Debug for AniListAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AniListAdapter")
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "<REDACTED>"),
            )
            .field("endpoint", &self.endpoint)
            .field("enabled", &self.enabled)
            .field("items_per_page", &self.items_per_page)
            .finish()
    }
}

impl AniListAdapter {
    /// Create an adapter from its source configuration
    ///
    /// Recognised options: `endpoint` (string), `upcoming_days` (integer).
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .user_agent(concat!("animesync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        let upcoming_days = config
            .options
            .get("upcoming_days")
            .and_then(Value::as_i64)
            .unwrap_or(DEFAULT_UPCOMING_DAYS);
        if upcoming_days <= 0 {
            return Err(Error::config("anilist: upcoming_days must be > 0"));
        }

        Ok(Self {
            access_token: config.access_token.clone(),
            endpoint: config
                .option_str("endpoint")
                .unwrap_or(ANILIST_API)
                .to_string(),
            enabled: config.enabled,
            items_per_page: config.items_per_page.unwrap_or(DEFAULT_ITEMS_PER_PAGE),
            upcoming_days,
            client,
        })
    }

    /// Run one GraphQL request and return its `data` object
    async fn query(&self, query: &str, variables: Value) -> Result<Value> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header("Accept", "application/json")
            .json(&json!({ "query": query, "variables": variables }));
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::network(format!("AniList request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(status_error(status.as_u16(), &body));
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| Error::rejected(SERVICE, format!("Failed to parse response: {}", e)))?;

        graphql_data(json)
    }

    async fn viewer_id(&self) -> Result<i64> {
        let data = self.query(VIEWER_QUERY, json!({})).await?;
        data["Viewer"]["id"]
            .as_i64()
            .ok_or_else(|| Error::rejected(SERVICE, "Invalid response format: Viewer.id missing"))
    }

    async fn recommendations(&self) -> Result<Vec<MediaItem>> {
        if self.access_token.is_none() {
            tracing::debug!("No AniList token, using top rated titles as recommendations");
            let data = self
                .query(&with_fields(TOP_RATED_QUERY), self.page_vars())
                .await?;
            return Ok(parse_page_media(&data));
        }

        let user_id = self.viewer_id().await?;
        let data = self
            .query(
                &with_fields(RECOMMENDATIONS_QUERY),
                json!({ "userId": user_id, "page": 1, "perPage": self.items_per_page }),
            )
            .await?;
        Ok(parse_recommendations(&data))
    }

    async fn upcoming(&self) -> Result<Vec<MediaItem>> {
        let now = Utc::now().timestamp();
        let until = now + self.upcoming_days * 24 * 3600;
        let data = self
            .query(
                &with_fields(AIRING_QUERY),
                json!({
                    "page": 1,
                    "perPage": self.items_per_page,
                    "airingAtGreater": now,
                    "airingAtLesser": until,
                }),
            )
            .await?;
        Ok(parse_airing(&data))
    }

    async fn similar(&self, id: &str) -> Result<Vec<MediaItem>> {
        let id = media_id(id)?;
        let data = self
            .query(
                &with_fields(SIMILAR_QUERY),
                json!({ "id": id, "perPage": self.items_per_page }),
            )
            .await?;
        Ok(parse_similar(&data))
    }

    fn page_vars(&self) -> Value {
        json!({ "page": 1, "perPage": self.items_per_page })
    }
}

#[async_trait]
impl SourceAdapter for AniListAdapter {
    fn source(&self) -> SourceKind {
        SourceKind::AniList
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn fetch_details(&self, id: &str) -> Result<Option<MediaItem>> {
        let media_id = media_id(id)?;
        match self
            .query(&with_fields(DETAILS_QUERY), json!({ "id": media_id }))
            .await
        {
            Ok(data) => Ok(parse_media(&data["Media"])),
            // AniList answers unknown ids with 404
            Err(Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn fetch_list(&self, kind: &ListKind) -> Result<Vec<MediaItem>> {
        tracing::debug!("Fetching AniList {}", kind.label());
        match kind {
            ListKind::Trending => {
                let data = self
                    .query(&with_fields(TRENDING_QUERY), self.page_vars())
                    .await?;
                Ok(parse_page_media(&data))
            }
            ListKind::Recommendations => self.recommendations().await,
            ListKind::Upcoming => self.upcoming().await,
            ListKind::Similar { id } => self.similar(id).await,
        }
    }

    async fn push_list(&self, entries: &[WatchlistEntry]) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }
        if self.access_token.is_none() {
            return Err(Error::rejected(SERVICE, "Access token required to update lists"));
        }

        let mut accepted = 0;
        for entry in entries {
            let Ok(id) = media_id(&entry.item_ref.id) else {
                tracing::warn!("Skipping {}: not an AniList media id", entry.item_ref);
                continue;
            };
            // Re-saving an existing entry with the same status is a no-op upstream
            self.query(
                SAVE_ENTRY_MUTATION,
                json!({ "mediaId": id, "status": "PLANNING" }),
            )
            .await?;
            accepted += 1;
        }

        tracing::info!("Pushed {} of {} entries to AniList", accepted, entries.len());
        Ok(accepted)
    }
}

/// Factory for creating AniList adapters
pub struct AniListFactory;

impl SourceAdapterFactory for AniListFactory {
    fn create(&self, config: &SourceConfig) -> Result<Box<dyn SourceAdapter>> {
        if config.source != SourceKind::AniList {
            return Err(Error::config(format!(
                "Invalid config for AniList adapter: {}",
                config.source
            )));
        }
        if config.access_token.is_none() {
            tracing::warn!("AniList adapter has no access token; pushes will be rejected");
        }
        Ok(Box::new(AniListAdapter::new(config)?))
    }
}

/// Register the AniList adapter with a registry
///
/// ```rust,ignore
/// let registry = SourceRegistry::new();
/// animesync_source_anilist::register(&registry);
/// ```
pub fn register(registry: &SourceRegistry) {
    registry.register(SourceKind::AniList, Box::new(AniListFactory));
}

fn media_id(id: &str) -> Result<i64> {
    id.parse::<i64>()
        .map_err(|_| Error::rejected(SERVICE, format!("Invalid media id: {}", id)))
}

/// Map a non-success HTTP status to an error
fn status_error(status: u16, body: &str) -> Error {
    match status {
        401 | 403 => Error::rejected(
            SERVICE,
            format!(
                "Authentication failed: invalid or expired access token. Status: {}",
                status
            ),
        ),
        404 => Error::not_found(format!("AniList: {}", body)),
        429 => Error::rejected(
            SERVICE,
            format!("Rate limit exceeded. Status: {}", status),
        ),
        408 | 500..=599 => Error::network(format!(
            "AniList server error (transient): {} - {}",
            status, body
        )),
        _ => Error::rejected(SERVICE, format!("Request failed: {} - {}", status, body)),
    }
}

/// Unwrap a GraphQL response body into its `data` object
fn graphql_data(mut json: Value) -> Result<Value> {
    if let Some(errors) = json["errors"].as_array() {
        if !errors.is_empty() {
            let messages: Vec<&str> = errors
                .iter()
                .map(|e| e["message"].as_str().unwrap_or("Unknown error"))
                .collect();
            return Err(Error::rejected(SERVICE, messages.join("; ")));
        }
    }
    match json.get_mut("data") {
        Some(data) if !data.is_null() => Ok(data.take()),
        _ => Err(Error::rejected(SERVICE, "Invalid response format: data missing")),
    }
}

/// Parse one `Media` object; `None` for null or id-less media
fn parse_media(media: &Value) -> Option<MediaItem> {
    let id = media["id"].as_i64()?;
    let title = ["english", "romaji", "native"]
        .iter()
        .filter_map(|k| media["title"][*k].as_str())
        .find(|t| !t.is_empty())
        .unwrap_or_default();

    let mut item = MediaItem::new(ItemRef::new(id.to_string(), SourceKind::AniList), title);
    item.description = media["description"].as_str().map(str::to_string);
    item.score = media["averageScore"].as_f64();
    item.genres = media["genres"]
        .as_array()
        .map(|g| g.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default();
    item.poster_url = ["extraLarge", "large", "medium"]
        .iter()
        .filter_map(|k| media["coverImage"][*k].as_str())
        .find(|u| !u.is_empty())
        .map(str::to_string);
    item.banner_url = media["bannerImage"]
        .as_str()
        .filter(|u| !u.is_empty())
        .map(str::to_string);
    item.total_episodes = media["episodes"].as_u64().map(|n| n as u32);
    Some(item)
}

fn parse_page_media(data: &Value) -> Vec<MediaItem> {
    data["Page"]["media"]
        .as_array()
        .map(|list| list.iter().filter_map(parse_media).collect())
        .unwrap_or_default()
}

fn parse_recommendations(data: &Value) -> Vec<MediaItem> {
    data["Page"]["recommendations"]
        .as_array()
        .map(|list| list.iter().filter_map(|r| parse_media(&r["media"])).collect())
        .unwrap_or_default()
}

fn parse_airing(data: &Value) -> Vec<MediaItem> {
    let Some(schedules) = data["Page"]["airingSchedules"].as_array() else {
        return Vec::new();
    };
    schedules
        .iter()
        .filter_map(|s| {
            let item = parse_media(&s["media"])?;
            let airing_at = DateTime::<Utc>::from_timestamp(s["airingAt"].as_i64()?, 0)?;
            let episode = s["episode"].as_u64()? as u32;
            Some(item.with_airing(episode, airing_at))
        })
        .collect()
}

fn parse_similar(data: &Value) -> Vec<MediaItem> {
    data["Media"]["recommendations"]["nodes"]
        .as_array()
        .map(|nodes| {
            nodes
                .iter()
                .filter_map(|n| parse_media(&n["mediaRecommendation"]))
                .collect()
        })
        .unwrap_or_default()
}
