//! Persisted library state.
//!
//! One JSON document holds every known track, album and video:
//!
//! ```json
//! {
//!   "version": "2",
//!   "generated_at": "2024-05-01T10:00:00Z",
//!   "tracks": { "123": { "file_path": "...", "exists_on_disk": true, ... } },
//!   "albums": { "77": { "title": "...", "total_tracks": 10, ... } },
//!   "videos": { }
//! }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current schema version tag
pub const STATE_VERSION: &str = "2";

/// Requested and granted quality of a stored track
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityInfo {
    pub requested: Option<String>,
    pub actual: Option<String>,
    pub codec: Option<String>,
}

/// Where a track was requested from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Sources {
    pub favorites: bool,
    pub playlists: BTreeSet<String>,
    pub artists: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackRecord {
    /// `None` for index-only entries
    pub file_path: Option<PathBuf>,
    pub exists_on_disk: bool,
    pub downloaded_at: Option<DateTime<Utc>>,
    pub last_verified: Option<DateTime<Utc>>,
    pub album_id: Option<String>,
    pub album_title: Option<String>,
    pub artist_names: Option<String>,
    pub title: Option<String>,
    pub isrc: Option<String>,
    pub quality: QualityInfo,
    pub sources: Sources,
}

impl TrackRecord {
    /// Fields the metadata backfill can fill in.
    pub fn missing_metadata(&self) -> bool {
        is_blank(&self.artist_names)
            || is_blank(&self.album_id)
            || is_blank(&self.album_title)
            || is_blank(&self.title)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoRecord {
    pub file_path: Option<PathBuf>,
    pub exists_on_disk: bool,
    pub downloaded_at: Option<DateTime<Utc>>,
    pub last_verified: Option<DateTime<Utc>>,
    pub artist_names: Option<String>,
    pub album_id: Option<String>,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlbumStatus {
    #[default]
    NotStarted,
    InProgress,
    Complete,
}

impl AlbumStatus {
    /// Name as persisted
    pub fn as_str(self) -> &'static str {
        match self {
            AlbumStatus::NotStarted => "not_started",
            AlbumStatus::InProgress => "in_progress",
            AlbumStatus::Complete => "complete",
        }
    }
}

impl fmt::Display for AlbumStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AlbumStatus::NotStarted => "not started",
            AlbumStatus::InProgress => "in progress",
            AlbumStatus::Complete => "complete",
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlbumRecord {
    pub title: String,
    pub total_tracks: u32,
    /// Full track listing, empty until the album was registered with tracks
    pub track_ids: Vec<String>,
    pub downloaded_track_ids: BTreeSet<String>,
    pub status: AlbumStatus,
    #[serde(alias = "updated_at")]
    pub last_updated: DateTime<Utc>,
}

impl AlbumRecord {
    /// Status implied by the counts. An album with no known tracks is never complete.
    pub fn derived_status(&self) -> AlbumStatus {
        let downloaded = self.downloaded_track_ids.len() as u32;
        if self.total_tracks > 0 && downloaded >= self.total_tracks {
            AlbumStatus::Complete
        } else if downloaded > 0 {
            AlbumStatus::InProgress
        } else {
            AlbumStatus::NotStarted
        }
    }

    pub fn refresh_status(&mut self) {
        self.status = self.derived_status();
    }

    pub fn is_complete(&self) -> bool {
        self.status == AlbumStatus::Complete
    }

    pub fn downloaded_count(&self) -> u32 {
        self.downloaded_track_ids.len() as u32
    }

    /// Track ids of the listing not yet downloaded, in listing order.
    pub fn remaining_tracks(&self) -> Vec<String> {
        self.track_ids
            .iter()
            .filter(|id| !self.downloaded_track_ids.contains(*id))
            .cloned()
            .collect()
    }
}

/// Root aggregate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryState {
    pub version: String,
    pub generated_at: DateTime<Utc>,
    #[serde(default)]
    pub tracks: BTreeMap<String, TrackRecord>,
    #[serde(default)]
    pub albums: BTreeMap<String, AlbumRecord>,
    #[serde(default)]
    pub videos: BTreeMap<String, VideoRecord>,
}

impl Default for LibraryState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            generated_at: Utc::now(),
            tracks: BTreeMap::new(),
            albums: BTreeMap::new(),
            videos: BTreeMap::new(),
        }
    }
}

impl LibraryState {
    pub fn counts(&self) -> Counts {
        Counts {
            tracks: self.tracks.len(),
            albums: self.albums.len(),
            videos: self.videos.len(),
        }
    }
}

/// Record cardinalities, for diagnostics and wipe confirmation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counts {
    pub tracks: usize,
    pub albums: usize,
    pub videos: usize,
}

impl fmt::Display for Counts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} tracks, {} albums, {} videos",
            self.tracks, self.albums, self.videos
        )
    }
}

pub(crate) fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().is_none_or(|s| s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn album(total: u32, downloaded: &[&str]) -> AlbumRecord {
        AlbumRecord {
            title: "LP".into(),
            total_tracks: total,
            track_ids: (1..=total).map(|i| i.to_string()).collect(),
            downloaded_track_ids: downloaded.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_album_status_derivation() {
        assert_eq!(album(3, &[]).derived_status(), AlbumStatus::NotStarted);
        assert_eq!(album(3, &["1"]).derived_status(), AlbumStatus::InProgress);
        assert_eq!(
            album(3, &["1", "2", "3"]).derived_status(),
            AlbumStatus::Complete
        );
        // Nothing known about the album yet
        assert_eq!(album(0, &[]).derived_status(), AlbumStatus::NotStarted);
    }

    #[test]
    fn test_remaining_tracks_keep_listing_order() {
        let a = album(5, &["2", "4"]);
        assert_eq!(a.remaining_tracks(), vec!["1", "3", "5"]);
    }

    #[test]
    fn test_state_json_shape() {
        let mut state = LibraryState::default();
        state.tracks.insert(
            "1".into(),
            TrackRecord {
                file_path: Some(PathBuf::from("/music/a.flac")),
                quality: QualityInfo {
                    requested: Some("LOSSLESS".into()),
                    ..Default::default()
                },
                ..Default::default()
            },
        );
        state.albums.insert("9".into(), album(2, &["1"]));

        let json: serde_json::Value = serde_json::to_value(&state).unwrap();
        assert_eq!(json["version"], "2");
        assert_eq!(json["tracks"]["1"]["file_path"], "/music/a.flac");
        assert_eq!(json["tracks"]["1"]["quality"]["requested"], "LOSSLESS");
        assert_eq!(json["tracks"]["1"]["sources"]["favorites"], false);
        assert_eq!(json["albums"]["9"]["status"], "not_started");
        assert!(json["videos"].as_object().unwrap().is_empty());
    }

    #[test]
    fn test_sparse_records_deserialize() {
        let json = r#"{
            "version": "2",
            "generated_at": "2024-05-01T10:00:00Z",
            "tracks": {"1": {"file_path": "/x.flac"}},
            "albums": {"2": {"title": "LP", "total_tracks": 3, "status": "in_progress",
                             "downloaded_track_ids": ["a"], "updated_at": "2024-05-01T10:00:00Z"}}
        }"#;
        let state: LibraryState = serde_json::from_str(json).unwrap();
        assert_eq!(state.version, STATE_VERSION);
        assert_eq!(state.counts().videos, 0);
        assert_eq!(state.albums["2"].status, AlbumStatus::InProgress);
        assert!(state.tracks["1"].missing_metadata());
    }
}
