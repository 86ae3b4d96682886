//! Album progress tracking.
//!
//! Each album moves `not_started -> in_progress -> complete` as its tracks
//! are recorded. The total is captured when the album is registered and
//! every change is persisted immediately.

use std::collections::HashSet;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::state::{AlbumRecord, AlbumStatus};
use super::store::LibraryStore;
use crate::catalog::{Album, Track};
use crate::error::Result;

impl LibraryStore {
    /// Register an album or refresh its title, total and listing.
    ///
    /// Downloaded ids are kept, minus any that left the listing. A complete
    /// album keeps its total when the refreshed listing is larger.
    pub async fn add_album(&self, album: &Album) -> Result<AlbumRecord> {
        let now = Utc::now();
        let track_ids = album.track_ids();
        let total = album.total_tracks();

        let mut inner = self.lock_loaded().await?;
        let existed = inner.state.albums.contains_key(&album.id);
        let record = inner.state.albums.entry(album.id.clone()).or_default();

        record.title = album.title.clone();
        if !track_ids.is_empty() {
            record
                .downloaded_track_ids
                .retain(|id| track_ids.contains(id));
            record.track_ids = track_ids;
        }
        if !(record.is_complete() && total > record.total_tracks) {
            record.total_tracks = total;
        }
        record.refresh_status();
        record.last_updated = now;

        let snapshot = record.clone();
        if existed {
            info!("Updated album status for '{}' (ID: {})", album.title, album.id);
        } else {
            info!("Added album status for '{}' (ID: {})", album.title, album.id);
        }
        self.persist(&mut inner.state).await?;
        Ok(snapshot)
    }

    /// Record one downloaded track of an album and persist.
    ///
    /// Returns `false` (and changes nothing) for an unknown album, or for a
    /// track outside the album's known listing.
    pub async fn mark_track_downloaded(&self, album_id: &str, track_id: &str) -> Result<bool> {
        let mut inner = self.lock_loaded().await?;
        let Some(record) = inner.state.albums.get_mut(album_id) else {
            warn!("Album {} not found in album status", album_id);
            return Ok(false);
        };
        if !record.track_ids.is_empty() && !record.track_ids.iter().any(|t| t == track_id) {
            warn!("Track {} is not part of album {}", track_id, album_id);
            return Ok(false);
        }

        let was_complete = record.is_complete();
        record.downloaded_track_ids.insert(track_id.to_string());
        record.refresh_status();
        record.last_updated = Utc::now();

        if record.is_complete() && !was_complete {
            info!(
                "Album '{}' (ID: {}) download completed",
                record.title, album_id
            );
        }
        self.persist(&mut inner.state).await?;
        Ok(true)
    }

    pub async fn album(&self, album_id: &str) -> Result<Option<AlbumRecord>> {
        Ok(self.lock_loaded().await?.state.albums.get(album_id).cloned())
    }

    /// Tracks of `album` not yet recorded as downloaded, in listing order.
    pub async fn remaining_tracks(&self, album: &Album) -> Result<Vec<Track>> {
        let inner = self.lock_loaded().await?;
        let done = inner
            .state
            .albums
            .get(&album.id)
            .map(|r| &r.downloaded_track_ids);

        Ok(album
            .tracks
            .iter()
            .filter(|t| done.is_none_or(|d| !d.contains(&t.id)))
            .cloned()
            .collect())
    }

    /// Albums started but not finished, the entry point for resuming.
    pub async fn get_incomplete(&self) -> Result<Vec<(String, AlbumRecord)>> {
        let inner = self.lock_loaded().await?;
        Ok(inner
            .state
            .albums
            .iter()
            .filter(|(_, r)| {
                r.status == AlbumStatus::InProgress && r.downloaded_count() < r.total_tracks
            })
            .map(|(id, r)| (id.clone(), r.clone()))
            .collect())
    }

    pub async fn complete_album_ids(&self) -> Result<HashSet<String>> {
        let inner = self.lock_loaded().await?;
        Ok(inner
            .state
            .albums
            .iter()
            .filter(|(_, r)| r.is_complete())
            .map(|(id, _)| id.clone())
            .collect())
    }

    /// Drop an album record entirely. Returns whether one existed.
    pub async fn remove_album(&self, album_id: &str, reason: &str) -> Result<bool> {
        let mut inner = self.lock_loaded().await?;
        match inner.state.albums.remove(album_id) {
            Some(record) => {
                info!(
                    "Removed album status for '{}' (ID: {}). Reason: {}",
                    record.title, album_id, reason
                );
                self.persist(&mut inner.state).await?;
                Ok(true)
            }
            None => {
                debug!("Album {} not in album status, nothing to remove", album_id);
                Ok(false)
            }
        }
    }

    /// Remove in-progress albums not touched for `max_age`.
    pub async fn prune_stale_albums(&self, max_age: chrono::Duration) -> Result<usize> {
        let cutoff = Utc::now() - max_age;
        let mut inner = self.lock_loaded().await?;

        let stale: Vec<String> = inner
            .state
            .albums
            .iter()
            .filter(|(_, r)| r.status == AlbumStatus::InProgress && r.last_updated < cutoff)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &stale {
            inner.state.albums.remove(id);
            info!("Removed stale album status for album ID: {}", id);
        }
        if !stale.is_empty() {
            self.persist(&mut inner.state).await?;
            info!("Cleaned up {} stale album statuses", stale.len());
        }
        Ok(stale.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::StorePaths;
    use crate::test_utils::{mock_album, temp_store};

    #[tokio::test]
    async fn test_last_track_flips_to_complete() {
        let (store, _dir) = temp_store();
        let album = mock_album("alb", "LP", 3);
        store.add_album(&album).await.unwrap();

        for (i, track) in album.tracks.iter().enumerate() {
            let record = store.album("alb").await.unwrap().unwrap();
            let expected = if i == 0 {
                AlbumStatus::NotStarted
            } else {
                AlbumStatus::InProgress
            };
            assert_eq!(record.status, expected);
            assert!(store.mark_track_downloaded("alb", &track.id).await.unwrap());
        }

        let record = store.album("alb").await.unwrap().unwrap();
        assert_eq!(record.status, AlbumStatus::Complete);
        assert_eq!(record.downloaded_count(), record.total_tracks);
    }

    #[tokio::test]
    async fn test_reregistration_preserves_progress() {
        let (store, _dir) = temp_store();
        let album = mock_album("alb", "LP", 4);
        store.add_album(&album).await.unwrap();
        store.mark_track_downloaded("alb", "alb-1").await.unwrap();

        let renamed = Album {
            title: "LP (Deluxe)".into(),
            ..album.clone()
        };
        let record = store.add_album(&renamed).await.unwrap();
        assert_eq!(record.title, "LP (Deluxe)");
        assert_eq!(record.downloaded_count(), 1);
        assert_eq!(record.status, AlbumStatus::InProgress);
    }

    #[tokio::test]
    async fn test_reregistration_drops_ids_outside_listing() {
        let (store, _dir) = temp_store();
        let album = mock_album("alb", "LP", 3);
        store.add_album(&album).await.unwrap();
        store.mark_track_downloaded("alb", "alb-3").await.unwrap();

        let shorter = mock_album("alb", "LP", 2);
        let record = store.add_album(&shorter).await.unwrap();
        assert_eq!(record.total_tracks, 2);
        assert_eq!(record.downloaded_count(), 0);
    }

    #[tokio::test]
    async fn test_complete_album_keeps_total_when_listing_grows() {
        let (store, _dir) = temp_store();
        let album = mock_album("alb", "LP", 2);
        store.add_album(&album).await.unwrap();
        store.mark_track_downloaded("alb", "alb-1").await.unwrap();
        store.mark_track_downloaded("alb", "alb-2").await.unwrap();

        let record = store.add_album(&mock_album("alb", "LP", 3)).await.unwrap();
        assert_eq!(record.total_tracks, 2);
        assert!(record.is_complete());
    }

    #[tokio::test]
    async fn test_unknown_album_or_track_is_ignored() {
        let (store, _dir) = temp_store();
        assert!(!store.mark_track_downloaded("nope", "t").await.unwrap());

        store.add_album(&mock_album("alb", "LP", 2)).await.unwrap();
        assert!(!store.mark_track_downloaded("alb", "stranger").await.unwrap());
        assert_eq!(store.album("alb").await.unwrap().unwrap().downloaded_count(), 0);
    }

    #[tokio::test]
    async fn test_remaining_and_incomplete() {
        let (store, _dir) = temp_store();
        let album = mock_album("alb", "LP", 5);
        store.add_album(&album).await.unwrap();
        store.add_album(&mock_album("fresh", "Other", 2)).await.unwrap();
        store.mark_track_downloaded("alb", "alb-2").await.unwrap();
        store.mark_track_downloaded("alb", "alb-4").await.unwrap();

        let remaining: Vec<String> = store
            .remaining_tracks(&album)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(remaining, vec!["alb-1", "alb-3", "alb-5"]);

        let incomplete = store.get_incomplete().await.unwrap();
        assert_eq!(incomplete.len(), 1);
        assert_eq!(incomplete[0].0, "alb");
    }

    #[tokio::test]
    async fn test_progress_survives_restart() {
        let (store, dir) = temp_store();
        store.add_album(&mock_album("alb", "LP", 2)).await.unwrap();
        store.mark_track_downloaded("alb", "alb-1").await.unwrap();

        let reopened = LibraryStore::new(StorePaths::in_dir(dir.path()));
        let incomplete = reopened.get_incomplete().await.unwrap();
        assert_eq!(incomplete.len(), 1);
        assert_eq!(incomplete[0].1.downloaded_count(), 1);
    }

    #[tokio::test]
    async fn test_remove_album() {
        let (store, _dir) = temp_store();
        store.add_album(&mock_album("alb", "LP", 2)).await.unwrap();
        assert!(store.remove_album("alb", "removed upstream").await.unwrap());
        assert!(!store.remove_album("alb", "again").await.unwrap());
        assert!(store.album("alb").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_prune_stale_albums() {
        let (store, _dir) = temp_store();
        store.add_album(&mock_album("old", "Old", 2)).await.unwrap();
        store.add_album(&mock_album("new", "New", 2)).await.unwrap();
        store.mark_track_downloaded("old", "old-1").await.unwrap();
        store.mark_track_downloaded("new", "new-1").await.unwrap();

        // Nothing is older than a week yet
        assert_eq!(
            store.prune_stale_albums(chrono::Duration::days(7)).await.unwrap(),
            0
        );
        // Everything in progress is older than "negative one second"
        assert_eq!(
            store
                .prune_stale_albums(chrono::Duration::seconds(-1))
                .await
                .unwrap(),
            2
        );
        assert!(store.get_incomplete().await.unwrap().is_empty());
    }
}
