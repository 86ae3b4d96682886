//! Catalog HTTP client
//!
//! Thin wrapper over the service's JSON API. Every request goes through the
//! shared [`RetryPolicy`]: connection failures and timeouts back off and
//! retry, HTTP 429 honors `Retry-After`, anything else is returned as-is.
//!
//! ## API Quirks
//!
//! ### countryCode
//! Every request must carry the session's `countryCode`, otherwise most
//! endpoints answer 400 or silently return region-less results.
//!
//! ### Pagination
//! Listing endpoints cap `limit` at 50 and sometimes return short pages
//! even when more items remain, so we page until the reported total is
//! reached or a page comes back empty.

use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::debug;

use super::credentials::SessionCredentials;
use super::domain::{Album, CatalogError, PlaybackInfo, Quality, Track, Video};
use super::{adapter, dto};
use crate::retry::{RetryError, RetryPolicy, parse_retry_after};

const DEFAULT_BASE_URL: &str = "https://api.tidalhifi.com/v1";
const PAGE_LIMIT: u32 = 50;

/// Catalog API client
pub struct CatalogClient {
    http_client: reqwest::Client,
    base_url: String,
    session: SessionCredentials,
    retry: RetryPolicy,
    /// Longest wait for response headers, and for the body once they arrive
    stall_timeout: Duration,
}

impl CatalogClient {
    /// Create a new client for `session`
    ///
    /// The client is configured to:
    /// - Accept gzip-compressed responses
    /// - Send a User-Agent header identifying the application
    /// - Fail connection attempts after `connect_timeout`
    /// - Treat a server that stays silent for `stall_timeout` as timed out
    pub fn new(
        session: SessionCredentials,
        retry: RetryPolicy,
        connect_timeout: Duration,
        stall_timeout: Duration,
    ) -> Result<Self, CatalogError> {
        let http_client = reqwest::Client::builder()
            .gzip(true)
            .connect_timeout(connect_timeout)
            .user_agent(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            ))
            .build()
            .map_err(|e| CatalogError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            base_url: DEFAULT_BASE_URL.to_string(),
            session,
            retry,
            stall_timeout,
        })
    }

    /// Create a client for testing with custom base URL
    #[cfg(test)]
    pub fn with_base_url(session: SessionCredentials, base_url: impl Into<String>) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            base_url: base_url.into(),
            session,
            retry: RetryPolicy::immediate(0, 0),
            stall_timeout: Duration::from_secs(30),
        }
    }

    pub fn session(&self) -> &SessionCredentials {
        &self.session
    }

    pub async fn get_track(&self, track_id: &str) -> Result<Track, CatalogError> {
        let dto: dto::TrackDto = self.get_json(&format!("tracks/{track_id}"), &[]).await?;
        adapter::to_track(dto)
    }

    /// Fetch album metadata together with its full track listing.
    pub async fn get_album(&self, album_id: &str) -> Result<Album, CatalogError> {
        let album: dto::AlbumDto = self.get_json(&format!("albums/{album_id}"), &[]).await?;
        let tracks: Vec<dto::TrackDto> = self.get_items(&format!("albums/{album_id}/tracks")).await?;
        adapter::to_album(album, tracks)
    }

    pub async fn get_video(&self, video_id: &str) -> Result<Video, CatalogError> {
        let dto: dto::VideoDto = self.get_json(&format!("videos/{video_id}"), &[]).await?;
        adapter::to_video(dto)
    }

    /// All tracks the session's user has marked as favorite.
    pub async fn favorite_tracks(&self) -> Result<Vec<Track>, CatalogError> {
        let user_id = self.session.require_user_id()?;
        let favorites: Vec<dto::FavoriteDto<dto::TrackDto>> = self
            .get_items(&format!("users/{user_id}/favorites/tracks"))
            .await?;
        favorites
            .into_iter()
            .map(|f| adapter::to_track(f.item))
            .collect()
    }

    /// Request a playback manifest for one track at exactly `quality`.
    pub async fn playback_info(
        &self,
        track_id: &str,
        quality: Quality,
    ) -> Result<PlaybackInfo, CatalogError> {
        let dto: dto::PlaybackInfoDto = self
            .get_json(
                &format!("tracks/{track_id}/playbackinfopostpaywall"),
                &[
                    ("audioquality", quality.wire_value()),
                    ("playbackmode", "STREAM"),
                    ("assetpresentation", "FULL"),
                ],
            )
            .await?;
        adapter::to_playback(dto)
    }

    pub async fn video_playback_info(
        &self,
        video_id: &str,
        video_quality: &str,
    ) -> Result<PlaybackInfo, CatalogError> {
        let dto: dto::PlaybackInfoDto = self
            .get_json(
                &format!("videos/{video_id}/playbackinfopostpaywall"),
                &[
                    ("videoquality", video_quality),
                    ("playbackmode", "STREAM"),
                    ("assetpresentation", "FULL"),
                ],
            )
            .await?;
        adapter::to_playback(dto)
    }

    /// Collect every item of a paginated listing.
    async fn get_items<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>, CatalogError> {
        let mut items = Vec::new();
        let mut offset = 0u32;

        loop {
            let limit = PAGE_LIMIT.to_string();
            let offset_param = offset.to_string();
            let page: dto::PageDto<T> = self
                .get_json(path, &[("limit", &limit), ("offset", &offset_param)])
                .await?;

            let page_size = page.items.len() as u32;
            debug!(
                "Pagination page {}: offset={} size={} total={:?}",
                path, offset, page_size, page.total_number_of_items
            );
            items.extend(page.items);

            let reached_total = page
                .total_number_of_items
                .is_some_and(|total| items.len() as u32 >= total);
            if page_size == 0 || reached_total {
                break;
            }
            offset += page_size;
        }

        Ok(items)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<T, CatalogError> {
        let url = self.build_url(path, params);
        self.retry
            .run(
                path,
                |_| self.send_once::<T>(&url),
                CatalogError::retry_class,
            )
            .await
            .map_err(|e| match e {
                RetryError::Fatal(err) => err,
                RetryError::Exhausted { attempts, last } => CatalogError::RetriesExhausted {
                    attempts,
                    last: last.to_string(),
                },
            })
    }

    /// Build the request URL by hand so parameter order stays stable in logs.
    fn build_url(&self, path: &str, params: &[(&str, &str)]) -> String {
        let mut url = format!(
            "{}/{}?countryCode={}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/'),
            urlencoding::encode(&self.session.country_code)
        );
        for (key, value) in params {
            url.push('&');
            url.push_str(key);
            url.push('=');
            url.push_str(&urlencoding::encode(value));
        }
        url
    }

    async fn send_once<T: DeserializeOwned>(&self, url: &str) -> Result<T, CatalogError> {
        debug!("API request: GET {}", url);

        let request = self
            .http_client
            .get(url)
            .bearer_auth(&self.session.access_token)
            .send();
        let response = tokio::time::timeout(self.stall_timeout, request)
            .await
            .map_err(|_| self.stalled(url))?
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            return Err(CatalogError::RateLimited { retry_after });
        }

        let body = tokio::time::timeout(self.stall_timeout, response.text())
            .await
            .map_err(|_| self.stalled(url))?
            .map_err(map_reqwest_error)?;
        if !status.is_success() {
            return Err(adapter::to_api_error(status.as_u16(), &body));
        }

        serde_json::from_str(&body).map_err(|e| {
            CatalogError::Malformed(format!(
                "{e}: {}",
                body.chars().take(200).collect::<String>()
            ))
        })
    }

    fn stalled(&self, url: &str) -> CatalogError {
        CatalogError::Timeout(format!(
            "no response from {} within {}s",
            url,
            self.stall_timeout.as_secs_f64()
        ))
    }
}

fn map_reqwest_error(e: reqwest::Error) -> CatalogError {
    if e.is_timeout() {
        CatalogError::Timeout(e.to_string())
    } else if e.is_decode() {
        CatalogError::Malformed(e.to_string())
    } else {
        CatalogError::Network(e.to_string())
    }
}
