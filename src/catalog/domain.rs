//! Internal domain models for the remote catalog.
//!
//! These types are OUR types - they don't change when the service's JSON
//! changes. Every response is converted into these via the adapter, and
//! anything required that is missing surfaces as [`CatalogError::Malformed`].

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::Retryable;

/// Audio quality tiers, best first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Quality {
    /// Top of the ladder
    Max,
    #[serde(alias = "HIGH_RES")]
    HiRes,
    Lossless,
    High,
    Low,
}

impl Quality {
    /// The fallback ladder, best first.
    pub const LADDER: [Quality; 5] = [
        Quality::Max,
        Quality::HiRes,
        Quality::Lossless,
        Quality::High,
        Quality::Low,
    ];

    /// Tiers to try for a request at `self`, in order.
    pub fn fallback_ladder(self) -> &'static [Quality] {
        let start = Self::LADDER.iter().position(|q| *q == self).unwrap_or(0);
        &Self::LADDER[start..]
    }

    /// Value sent as the `audioquality` request parameter.
    pub fn wire_value(self) -> &'static str {
        match self {
            Quality::Max => "HI_RES_LOSSLESS",
            Quality::HiRes => "HI_RES",
            Quality::Lossless => "LOSSLESS",
            Quality::High => "HIGH",
            Quality::Low => "LOW",
        }
    }

    /// Parse a quality reported by the service.
    pub fn from_wire(value: &str) -> Option<Quality> {
        match value.to_ascii_uppercase().as_str() {
            "HI_RES_LOSSLESS" | "MAX" => Some(Quality::Max),
            "HI_RES" | "HIGH_RES" => Some(Quality::HiRes),
            "LOSSLESS" => Some(Quality::Lossless),
            "HIGH" => Some(Quality::High),
            "LOW" => Some(Quality::Low),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Quality::Max => "MAX",
            Quality::HiRes => "HI_RES",
            Quality::Lossless => "LOSSLESS",
            Quality::High => "HIGH",
            Quality::Low => "LOW",
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Quality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Quality::from_wire(s).ok_or_else(|| {
            format!("unknown quality '{s}' (expected MAX, HI_RES, LOSSLESS, HIGH or LOW)")
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artist {
    pub id: String,
    pub name: String,
}

/// Album reference embedded in a track or video
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlbumSummary {
    pub id: String,
    pub title: String,
    pub release_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    pub id: String,
    pub title: String,
    pub track_number: Option<u32>,
    pub volume_number: Option<u32>,
    /// Catalog-wide recording code
    pub isrc: Option<String>,
    pub explicit: bool,
    pub version: Option<String>,
    pub artists: Vec<Artist>,
    pub album: Option<AlbumSummary>,
}

impl Track {
    /// Display string for all credited artists.
    pub fn artist_names(&self) -> String {
        join_names(&self.artists)
    }

    pub fn album_id(&self) -> Option<&str> {
        self.album.as_ref().map(|a| a.id.as_str())
    }

    pub fn album_title(&self) -> Option<&str> {
        self.album.as_ref().map(|a| a.title.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Album {
    pub id: String,
    pub title: String,
    pub number_of_tracks: Option<u32>,
    pub release_date: Option<String>,
    pub artists: Vec<Artist>,
    /// Full track listing, when it was fetched
    pub tracks: Vec<Track>,
}

impl Album {
    pub fn artist_names(&self) -> String {
        join_names(&self.artists)
    }

    /// Track count, preferring the listed tracks over the advertised number.
    pub fn total_tracks(&self) -> u32 {
        if self.tracks.is_empty() {
            self.number_of_tracks.unwrap_or(0)
        } else {
            self.tracks.len() as u32
        }
    }

    pub fn track_ids(&self) -> Vec<String> {
        self.tracks.iter().map(|t| t.id.clone()).collect()
    }

    /// Four-digit year from the release date.
    pub fn year(&self) -> Option<&str> {
        self.release_date
            .as_deref()
            .and_then(|d| d.get(..4))
            .filter(|y| y.chars().all(|c| c.is_ascii_digit()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Video {
    pub id: String,
    pub title: String,
    pub artists: Vec<Artist>,
    pub album: Option<AlbumSummary>,
}

impl Video {
    pub fn artist_names(&self) -> String {
        join_names(&self.artists)
    }
}

fn join_names(artists: &[Artist]) -> String {
    artists
        .iter()
        .map(|a| a.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Raw playback grant for a track or video: a still-encoded manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackInfo {
    pub item_id: String,
    /// Quality the service actually granted, as reported
    pub granted_quality: Option<String>,
    pub manifest_mime_type: String,
    /// Base64 manifest body
    pub manifest: String,
}

/// Errors from the remote catalog
#[derive(Debug, Clone, thiserror::Error)]
pub enum CatalogError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("API error {status}{}: {message}", .sub_status.map(|s| format!("/{s}")).unwrap_or_default())]
    Api {
        status: u16,
        sub_status: Option<u32>,
        message: String,
    },

    #[error("Rate limited by the catalog service")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Malformed upstream response: {0}")]
    Malformed(String),

    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },
}

/// Sub-status for "not available at this quality" / "resource not found"
pub const SUB_STATUS_UNAVAILABLE: u32 = 2001;
/// Sub-status for "asset is not ready for playback"
pub const SUB_STATUS_NOT_READY: u32 = 4005;

impl CatalogError {
    /// Requested asset is not available at this quality tier.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            CatalogError::Api {
                status: 404,
                sub_status: Some(SUB_STATUS_UNAVAILABLE),
                ..
            }
        )
    }

    /// Asset exists but cannot be played yet.
    pub fn is_not_ready(&self) -> bool {
        matches!(
            self,
            CatalogError::Api {
                status: 401,
                sub_status: Some(SUB_STATUS_NOT_READY),
                ..
            }
        )
    }

    /// The resource no longer exists upstream. A bare 404 without the
    /// not-found sub-status is not enough.
    pub fn is_gone(&self) -> bool {
        matches!(
            self,
            CatalogError::Api {
                status: 404,
                sub_status: Some(SUB_STATUS_UNAVAILABLE),
                ..
            }
        )
    }

    /// Retry classification used by the client's request loop.
    pub fn retry_class(&self) -> Retryable {
        match self {
            CatalogError::Network(_) | CatalogError::Timeout(_) => Retryable::Transient,
            CatalogError::RateLimited { retry_after } => Retryable::RateLimited(*retry_after),
            _ => Retryable::No,
        }
    }
}
