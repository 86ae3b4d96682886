//! One-time import of the pre-v2 index files.
//!
//! `track_index.json` maps track id to `{path, hash, size, last_modified}`;
//! `album_status.json` maps album id to `{album_title, total_tracks,
//! track_ids, downloaded_track_ids, status}`. Both are read, never written.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{info, warn};

use super::state::{AlbumRecord, LibraryState, TrackRecord};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LegacyTrack {
    pub path: Option<PathBuf>,
    pub hash: Option<String>,
    pub size: Option<u64>,
    pub last_modified: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LegacyAlbum {
    pub album_title: Option<String>,
    pub total_tracks: Option<u32>,
    pub track_ids: Vec<String>,
    pub downloaded_track_ids: Vec<String>,
    pub status: Option<String>,
    pub last_updated: Option<f64>,
}

/// Read a legacy map, treating a missing or unreadable file as empty.
async fn read_map<T: for<'de> Deserialize<'de>>(path: &Path) -> BTreeMap<String, T> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return BTreeMap::new(),
        Err(e) => {
            warn!("Could not read legacy file {:?}: {}", path, e);
            return BTreeMap::new();
        }
    };

    if contents.trim().is_empty() {
        return BTreeMap::new();
    }

    match serde_json::from_str(&contents) {
        Ok(map) => map,
        Err(e) => {
            warn!("Ignoring unparseable legacy file {:?}: {}", path, e);
            BTreeMap::new()
        }
    }
}

pub async fn read_tracks(path: &Path) -> BTreeMap<String, LegacyTrack> {
    read_map(path).await
}

pub async fn read_albums(path: &Path) -> BTreeMap<String, LegacyAlbum> {
    read_map(path).await
}

fn timestamp(seconds: Option<f64>) -> Option<DateTime<Utc>> {
    seconds.and_then(|s| DateTime::from_timestamp(s.trunc() as i64, 0))
}

/// Translate both legacy maps into a current-version state.
///
/// One record per legacy entry; album statuses are re-derived from counts.
pub fn migrate(
    tracks: BTreeMap<String, LegacyTrack>,
    albums: BTreeMap<String, LegacyAlbum>,
) -> LibraryState {
    let now = Utc::now();
    let mut state = LibraryState::default();

    for (id, legacy) in tracks {
        let exists = legacy.path.as_deref().is_some_and(Path::exists);
        let verified = legacy.path.as_ref().map(|_| now);
        state.tracks.insert(
            id,
            TrackRecord {
                file_path: legacy.path,
                exists_on_disk: exists,
                last_verified: verified,
                ..Default::default()
            },
        );
    }

    for (id, legacy) in albums {
        let mut downloaded: BTreeSet<String> = legacy.downloaded_track_ids.into_iter().collect();
        if !legacy.track_ids.is_empty() {
            downloaded.retain(|t| legacy.track_ids.contains(t));
        }

        let total = legacy
            .total_tracks
            .unwrap_or(legacy.track_ids.len() as u32);

        let mut record = AlbumRecord {
            title: legacy.album_title.unwrap_or_default(),
            total_tracks: total,
            track_ids: legacy.track_ids,
            downloaded_track_ids: downloaded,
            last_updated: timestamp(legacy.last_updated).unwrap_or(now),
            ..Default::default()
        };
        record.refresh_status();

        if let Some(old) = legacy.status.as_deref() {
            let translated = match old {
                "completed" | "complete" => "complete",
                "in_progress" => "in_progress",
                _ => "not_started",
            };
            if translated != record.status.as_str() {
                info!(
                    "Legacy album {} was '{}', re-derived as {}",
                    id, old, record.status
                );
            }
        }

        state.albums.insert(id, record);
    }

    info!(
        "Migrated legacy index: {} tracks, {} albums",
        state.tracks.len(),
        state.albums.len()
    );
    state
}
