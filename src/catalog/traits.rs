//! Trait definition for the catalog client.
//!
//! The negotiator, orchestrator and backfill code depend on [`CatalogApi`],
//! never on [`CatalogClient`] directly, so tests can substitute the mock
//! implementation below.
//!
//! # Example
//!
//! ```ignore
//! use tidekeeper::catalog::CatalogApi;
//!
//! async fn title<C: CatalogApi + ?Sized>(catalog: &C, id: &str) -> Result<String, CatalogError> {
//!     Ok(catalog.get_track(id).await?.title)
//! }
//! ```

use async_trait::async_trait;

use super::client::CatalogClient;
use super::domain::{Album, CatalogError, PlaybackInfo, Quality, Track, Video};

/// Remote catalog operations used by the downloader.
#[async_trait]
pub trait CatalogApi: Send + Sync {
    async fn get_track(&self, track_id: &str) -> Result<Track, CatalogError>;

    /// Album metadata including the full track listing.
    async fn get_album(&self, album_id: &str) -> Result<Album, CatalogError>;

    async fn get_video(&self, video_id: &str) -> Result<Video, CatalogError>;

    async fn favorite_tracks(&self) -> Result<Vec<Track>, CatalogError>;

    /// Playback manifest for a track at exactly `quality` (no fallback).
    async fn playback_info(
        &self,
        track_id: &str,
        quality: Quality,
    ) -> Result<PlaybackInfo, CatalogError>;

    async fn video_playback_info(
        &self,
        video_id: &str,
        video_quality: &str,
    ) -> Result<PlaybackInfo, CatalogError>;
}

#[async_trait]
impl CatalogApi for CatalogClient {
    async fn get_track(&self, track_id: &str) -> Result<Track, CatalogError> {
        self.get_track(track_id).await
    }

    async fn get_album(&self, album_id: &str) -> Result<Album, CatalogError> {
        self.get_album(album_id).await
    }

    async fn get_video(&self, video_id: &str) -> Result<Video, CatalogError> {
        self.get_video(video_id).await
    }

    async fn favorite_tracks(&self) -> Result<Vec<Track>, CatalogError> {
        self.favorite_tracks().await
    }

    async fn playback_info(
        &self,
        track_id: &str,
        quality: Quality,
    ) -> Result<PlaybackInfo, CatalogError> {
        self.playback_info(track_id, quality).await
    }

    async fn video_playback_info(
        &self,
        video_id: &str,
        video_quality: &str,
    ) -> Result<PlaybackInfo, CatalogError> {
        self.video_playback_info(video_id, video_quality).await
    }
}
