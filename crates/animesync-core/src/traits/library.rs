// # Library Trait
//
// The host's media library as seen by the playback tracker: titles the user
// has started, per-episode watch marks and resume positions.

use async_trait::async_trait;

use crate::error::Result;
use crate::model::ItemRef;

#[async_trait]
pub trait Library: Send + Sync {
    /// Make sure the title exists in the library
    async fn add_to_library(
        &self,
        item_ref: &ItemRef,
        title: &str,
        poster_url: Option<&str>,
        banner_url: Option<&str>,
    ) -> Result<()>;

    async fn mark_episode_watched(
        &self,
        item_ref: &ItemRef,
        episode: u32,
        total_episodes: Option<u32>,
    ) -> Result<()>;

    async fn mark_episode_unwatched(&self, item_ref: &ItemRef, episode: u32) -> Result<()>;

    /// Record a resume point for an episode
    async fn update_progress(
        &self,
        item_ref: &ItemRef,
        episode: u32,
        position_secs: f64,
        duration_secs: f64,
    ) -> Result<()>;

    async fn mark_series_complete(&self, item_ref: &ItemRef) -> Result<()>;
}
