//! Durable library index.
//!
//! [`LibraryStore`] owns the in-memory [`LibraryState`] behind an async
//! mutex and persists it as one JSON document. Writes go to a temp file
//! that is renamed over the canonical path, so a crash mid-write leaves
//! the previous snapshot intact.
//!
//! The first access in a process loads the snapshot, or migrates the
//! legacy index files when no current-version snapshot exists.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use super::legacy;
use super::resolver::{self, Candidate, MatchMode, MatchTier};
use super::state::{Counts, LibraryState, STATE_VERSION, TrackRecord, VideoRecord, is_blank};
use crate::catalog::{Album, CatalogApi, Track};
use crate::error::{Error, Result, ResultExt};

/// On-disk locations of the unified state and the legacy files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePaths {
    pub state: PathBuf,
    pub legacy_tracks: PathBuf,
    pub legacy_albums: PathBuf,
}

impl StorePaths {
    /// Standard file names inside one directory.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            state: dir.join("library_state.json"),
            legacy_tracks: dir.join("track_index.json"),
            legacy_albums: dir.join("album_status.json"),
        }
    }
}

/// Attributes recorded alongside a committed track
#[derive(Debug, Clone, Default)]
pub struct TrackUpdate {
    pub album_id: Option<String>,
    pub album_title: Option<String>,
    pub artist_names: Option<String>,
    pub title: Option<String>,
    pub isrc: Option<String>,
    pub quality_requested: Option<String>,
    pub quality_actual: Option<String>,
    pub codec: Option<String>,
    pub from_favorites: bool,
    pub playlist: Option<String>,
    pub artist_source: Option<String>,
    /// Accept a path that does not exist (index-only entry)
    pub allow_missing_file: bool,
}

impl TrackUpdate {
    /// Identity and album fields of a catalog track.
    pub fn from_track(track: &Track) -> Self {
        Self {
            album_id: track.album_id().map(str::to_string),
            album_title: track.album_title().map(str::to_string),
            artist_names: Some(track.artist_names()).filter(|s| !s.is_empty()),
            title: Some(track.title.clone()),
            isrc: track.isrc.clone(),
            ..Default::default()
        }
    }
}

/// Result of a wipe
#[derive(Debug, Clone, Default)]
pub struct WipeReport {
    /// Counts before the wipe
    pub previous: Counts,
    pub backups: Vec<PathBuf>,
}

/// How many of a set of remote tracks are not yet in the library
#[derive(Debug, Clone, Default)]
pub struct MissingReport {
    pub total: usize,
    pub missing: usize,
    /// Up to ten of the missing tracks
    pub sample: Vec<Track>,
}

const MISSING_SAMPLE: usize = 10;

#[derive(Debug, Clone)]
pub struct BackfillOptions {
    pub max_items: Option<usize>,
    pub reconcile_favorites: bool,
    /// Pause between catalog calls
    pub rate_limit: Duration,
}

impl Default for BackfillOptions {
    fn default() -> Self {
        Self {
            max_items: None,
            reconcile_favorites: false,
            rate_limit: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataBackfillReport {
    pub total_candidates: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errors: usize,
    pub reconciled_favorites: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DateBackfillReport {
    pub total: usize,
    pub updated: usize,
    pub already_set: usize,
    pub used_current_time: usize,
}

pub(super) struct Inner {
    pub(super) state: LibraryState,
    loaded: bool,
}

/// The library index. Share it behind an `Arc`; every method takes `&self`.
pub struct LibraryStore {
    paths: StorePaths,
    inner: Mutex<Inner>,
}

impl LibraryStore {
    pub fn new(paths: StorePaths) -> Self {
        Self {
            paths,
            inner: Mutex::new(Inner {
                state: LibraryState::default(),
                loaded: false,
            }),
        }
    }

    pub fn paths(&self) -> &StorePaths {
        &self.paths
    }

    /// Load the snapshot (or migrate legacy files). Later calls are no-ops.
    pub async fn load(&self) -> Result<()> {
        self.lock_loaded().await.map(|_| ())
    }

    /// Persist the in-memory snapshot.
    pub async fn save(&self) -> Result<()> {
        let mut inner = self.lock_loaded().await?;
        self.persist(&mut inner.state).await
    }

    /// Lock the state, loading it first if this is the first access.
    pub(super) async fn lock_loaded(&self) -> Result<MutexGuard<'_, Inner>> {
        let mut inner = self.inner.lock().await;
        if !inner.loaded {
            inner.state = self.read_or_migrate().await?;
            inner.loaded = true;
        }
        Ok(inner)
    }

    async fn read_or_migrate(&self) -> Result<LibraryState> {
        let path = &self.paths.state;

        match tokio::fs::read_to_string(path).await {
            Ok(contents) if !contents.trim().is_empty() => {
                let value: serde_json::Value = serde_json::from_str(&contents)
                    .map_err(|e| Error::corrupt_state(path, e.to_string()))?;

                if value.get("version").and_then(|v| v.as_str()) == Some(STATE_VERSION) {
                    let state: LibraryState = serde_json::from_value(value)
                        .map_err(|e| Error::corrupt_state(path, e.to_string()))?;
                    info!(
                        "Loaded library state v{} with {} tracks and {} albums",
                        STATE_VERSION,
                        state.tracks.len(),
                        state.albums.len()
                    );
                    return Ok(state);
                }

                warn!(
                    "{:?} present but not recognized as v{}; attempting migration",
                    path, STATE_VERSION
                );
                let stamp = Utc::now().format("%Y%m%d%H%M%S").to_string();
                let backup = backup_path(path, &stamp);
                tokio::fs::copy(path, &backup)
                    .await
                    .with_context(format!("backing up unrecognized state to {backup:?}"))?;
            }
            Ok(_) => debug!("Library state at {:?} is empty", path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::Io(e).context(format!("reading {path:?}"))),
        }

        let tracks = legacy::read_tracks(&self.paths.legacy_tracks).await;
        let albums = legacy::read_albums(&self.paths.legacy_albums).await;
        let mut state = legacy::migrate(tracks, albums);
        self.persist(&mut state).await?;
        Ok(state)
    }

    /// Stamp and write a snapshot while the caller holds the lock.
    pub(super) async fn persist(&self, state: &mut LibraryState) -> Result<()> {
        state.generated_at = Utc::now();
        let temp = write_snapshot_temp(&self.paths.state, state).await?;
        commit_snapshot(&temp, &self.paths.state).await?;
        info!(
            target: "tidekeeper::store",
            tracks = state.tracks.len(),
            albums = state.albums.len(),
            videos = state.videos.len(),
            "Saved library state to {:?}",
            self.paths.state
        );
        Ok(())
    }

    /// A copy of the current snapshot.
    pub async fn snapshot(&self) -> Result<LibraryState> {
        Ok(self.lock_loaded().await?.state.clone())
    }

    pub async fn counts(&self) -> Result<Counts> {
        Ok(self.lock_loaded().await?.state.counts())
    }

    pub async fn track(&self, id: &str) -> Result<Option<TrackRecord>> {
        Ok(self.lock_loaded().await?.state.tracks.get(id).cloned())
    }

    /// Insert or enrich a track record in memory. Call [`save`](Self::save) to persist.
    ///
    /// Set fields are never overwritten, except the file path, which always
    /// moves to `path` together with the existence flag and timestamps. A nonexistent `path` is rejected unless
    /// `allow_missing_file` is set.
    pub async fn upsert_track(&self, id: &str, path: &Path, update: TrackUpdate) -> Result<()> {
        let path = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        let exists = tokio::fs::try_exists(&path).await.unwrap_or(false);
        if !exists && !update.allow_missing_file {
            warn!("Track file does not exist for {}: {:?}", id, path);
            return Err(Error::not_found(path));
        }

        let now = Utc::now();
        let mut inner = self.lock_loaded().await?;
        let record = inner.state.tracks.entry(id.to_string()).or_default();

        record.file_path = Some(path);
        record.exists_on_disk = exists;
        record.downloaded_at.get_or_insert(now);
        record.last_verified = Some(now);

        fill(&mut record.album_id, update.album_id);
        fill(&mut record.album_title, update.album_title);
        fill(&mut record.artist_names, update.artist_names);
        fill(&mut record.title, update.title);
        fill(&mut record.isrc, update.isrc);
        fill(&mut record.quality.requested, update.quality_requested);
        fill(&mut record.quality.actual, update.quality_actual);
        fill(&mut record.quality.codec, update.codec);

        if update.from_favorites {
            record.sources.favorites = true;
        }
        if let Some(playlist) = update.playlist {
            record.sources.playlists.insert(playlist);
        }
        if let Some(artist) = update.artist_source {
            record.sources.artists.insert(artist);
        }

        debug!("Indexed track {}", id);
        Ok(())
    }

    /// Delete a track record. Returns whether one existed.
    pub async fn remove_track(&self, id: &str) -> Result<bool> {
        let mut inner = self.lock_loaded().await?;
        if inner.state.tracks.remove(id).is_none() {
            return Ok(false);
        }
        self.persist(&mut inner.state).await?;
        Ok(true)
    }

    pub async fn has_video(&self, id: &str) -> Result<bool> {
        Ok(self.lock_loaded().await?.state.videos.contains_key(id))
    }

    /// Record a downloaded video and persist.
    pub async fn add_video(
        &self,
        id: &str,
        path: &Path,
        title: &str,
        artist_names: &str,
        album_id: Option<&str>,
    ) -> Result<()> {
        let path = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        let exists = tokio::fs::try_exists(&path).await.unwrap_or(false);
        let now = Utc::now();

        let mut inner = self.lock_loaded().await?;
        let record = inner.state.videos.entry(id.to_string()).or_default();
        *record = VideoRecord {
            file_path: Some(path),
            exists_on_disk: exists,
            downloaded_at: record.downloaded_at.or(Some(now)),
            last_verified: Some(now),
            artist_names: Some(non_empty_or(artist_names, "Unknown Artist")),
            album_id: album_id.map(str::to_string),
            title: Some(non_empty_or(title, "Unknown Title")),
        };
        self.persist(&mut inner.state).await
    }

    /// Check one remote track against the index.
    pub async fn resolve(&self, track: &Track, mode: MatchMode) -> Result<Option<MatchTier>> {
        let artist = track.artist_names();
        let candidate = Candidate::from_track(track, &artist);
        let inner = self.lock_loaded().await?;
        Ok(resolver::resolve(&inner.state, &candidate, mode))
    }

    pub async fn missing_for_tracks(&self, tracks: &[Track], mode: MatchMode) -> Result<MissingReport> {
        let inner = self.lock_loaded().await?;
        let missing: Vec<&Track> = tracks
            .iter()
            .filter(|t| {
                let artist = t.artist_names();
                resolver::resolve(&inner.state, &Candidate::from_track(t, &artist), mode).is_none()
            })
            .collect();

        Ok(MissingReport {
            total: tracks.len(),
            missing: missing.len(),
            sample: missing.into_iter().take(MISSING_SAMPLE).cloned().collect(),
        })
    }

    pub async fn missing_for_album(&self, album: &Album, mode: MatchMode) -> Result<MissingReport> {
        self.missing_for_tracks(&album.tracks, mode).await
    }

    /// Refresh `last_verified` and the existence flag of a few tracks.
    ///
    /// Returns how many records were refreshed.
    pub async fn quick_verify<I, S>(&self, ids: I) -> Result<usize>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let now = Utc::now();
        let mut inner = self.lock_loaded().await?;
        let mut refreshed = 0;

        for id in ids {
            let Some(record) = inner.state.tracks.get_mut(id.as_ref()) else {
                continue;
            };
            let Some(path) = record.file_path.as_deref() else {
                continue;
            };
            record.exists_on_disk = tokio::fs::try_exists(path).await.unwrap_or(false);
            record.last_verified = Some(now);
            refreshed += 1;
        }

        if refreshed > 0 {
            self.persist(&mut inner.state).await?;
        }
        Ok(refreshed)
    }

    /// Reset every map to empty, optionally backing up the files first.
    pub async fn wipe(&self, backup: bool) -> Result<WipeReport> {
        let mut inner = self.lock_loaded().await?;
        let mut report = WipeReport {
            previous: inner.state.counts(),
            backups: Vec::new(),
        };

        if backup {
            let stamp = Utc::now().format("%Y%m%d%H%M%S").to_string();
            for path in [
                &self.paths.state,
                &self.paths.legacy_tracks,
                &self.paths.legacy_albums,
            ] {
                if !tokio::fs::try_exists(path).await.unwrap_or(false) {
                    continue;
                }
                let target = backup_path(path, &stamp);
                tokio::fs::copy(path, &target)
                    .await
                    .with_context(format!("backing up {path:?}"))?;
                info!("Backed up {:?} to {:?}", path, target);
                report.backups.push(target);
            }
        }

        inner.state.tracks.clear();
        inner.state.albums.clear();
        inner.state.videos.clear();
        self.persist(&mut inner.state).await?;

        info!(
            "Cleared library state ({}); media files unaffected",
            report.previous
        );
        Ok(report)
    }

    /// Fill missing `downloaded_at` from file modification times.
    pub async fn backfill_downloaded_at(&self) -> Result<DateBackfillReport> {
        let now = Utc::now();
        let mut inner = self.lock_loaded().await?;
        let mut report = DateBackfillReport {
            total: inner.state.tracks.len(),
            ..Default::default()
        };

        for record in inner.state.tracks.values_mut() {
            let Some(path) = record.file_path.clone() else {
                continue;
            };
            if record.downloaded_at.is_some() {
                report.already_set += 1;
                continue;
            }

            let modified = match tokio::fs::metadata(&path).await {
                Ok(meta) => meta.modified().ok().map(DateTime::<Utc>::from),
                Err(_) => None,
            };
            match modified {
                Some(when) => {
                    record.downloaded_at = Some(when);
                    record.exists_on_disk = true;
                    report.updated += 1;
                }
                None => {
                    record.downloaded_at = Some(now);
                    record.exists_on_disk = false;
                    report.used_current_time += 1;
                }
            }
            record.last_verified = Some(now);
        }

        self.persist(&mut inner.state).await?;
        Ok(report)
    }

    /// Fill missing artist/album/title fields from the remote catalog.
    ///
    /// The lock is released during catalog calls; only empty fields are written.
    pub async fn backfill_metadata<C: CatalogApi + ?Sized>(
        &self,
        catalog: &C,
        options: &BackfillOptions,
    ) -> Result<MetadataBackfillReport> {
        let mut candidates: Vec<String> = {
            let inner = self.lock_loaded().await?;
            inner
                .state
                .tracks
                .iter()
                .filter(|(_, t)| t.missing_metadata())
                .map(|(id, _)| id.clone())
                .collect()
        };
        if let Some(max) = options.max_items {
            candidates.truncate(max);
        }

        let favorites: BTreeSet<String> = if options.reconcile_favorites {
            match catalog.favorite_tracks().await {
                Ok(tracks) => tracks.into_iter().map(|t| t.id).collect(),
                Err(e) => {
                    warn!("Failed to fetch favorites for reconciliation: {}", e);
                    BTreeSet::new()
                }
            }
        } else {
            BTreeSet::new()
        };

        let mut report = MetadataBackfillReport {
            total_candidates: candidates.len(),
            ..Default::default()
        };

        for (i, id) in candidates.iter().enumerate() {
            if i > 0 && !options.rate_limit.is_zero() {
                tokio::time::sleep(options.rate_limit).await;
            }

            let track = match catalog.get_track(id).await {
                Ok(track) => track,
                Err(e) if e.is_gone() => {
                    debug!("Track {} no longer in catalog: {}", id, e);
                    report.skipped += 1;
                    continue;
                }
                Err(e) => {
                    warn!("Metadata backfill failed for track {}: {}", id, e);
                    report.errors += 1;
                    continue;
                }
            };

            let mut inner = self.lock_loaded().await?;
            let Some(record) = inner.state.tracks.get_mut(id) else {
                report.skipped += 1;
                continue;
            };
            fill_blank(&mut record.artist_names, Some(track.artist_names()));
            fill_blank(&mut record.album_id, track.album_id().map(str::to_string));
            fill_blank(&mut record.album_title, track.album_title().map(str::to_string));
            fill_blank(&mut record.title, Some(track.title.clone()));
            fill_blank(&mut record.isrc, track.isrc.clone());
            report.updated += 1;
        }

        let mut inner = self.lock_loaded().await?;
        for id in &favorites {
            match inner.state.tracks.get_mut(id) {
                Some(record) if !record.sources.favorites => {
                    record.sources.favorites = true;
                    report.reconciled_favorites += 1;
                }
                _ => {}
            }
        }
        self.persist(&mut inner.state).await?;

        info!(
            "Metadata backfill: {} candidates, {} updated, {} skipped, {} errors",
            report.total_candidates, report.updated, report.skipped, report.errors
        );
        Ok(report)
    }
}

/// Set `slot` only if it holds nothing.
fn fill<T>(slot: &mut Option<T>, value: Option<T>) {
    if slot.is_none() {
        *slot = value;
    }
}

/// Like [`fill`], but also replaces blank strings.
fn fill_blank(slot: &mut Option<String>, value: Option<String>) {
    let value = value.filter(|v| !v.trim().is_empty());
    if is_blank(slot) && value.is_some() {
        *slot = value;
    }
}

fn non_empty_or(value: &str, fallback: &str) -> String {
    if value.trim().is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}

/// `library_state.json` -> `library_state.json.bak.20240501100000`
fn backup_path(path: &Path, stamp: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".bak.{stamp}"));
    path.with_file_name(name)
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// First half of an atomic save: serialize to a sibling temp file.
pub(crate) async fn write_snapshot_temp(path: &Path, state: &LibraryState) -> Result<PathBuf> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(format!("creating {dir:?}"))?;
    }

    let bytes = serde_json::to_vec_pretty(state)?;
    let temp = temp_path(path);
    let mut file = tokio::fs::File::create(&temp)
        .await
        .with_context(format!("creating {temp:?}"))?;
    file.write_all(&bytes)
        .await
        .with_context(format!("writing {temp:?}"))?;
    file.sync_all().await?;
    Ok(temp)
}

/// Second half: rename the temp file over the canonical path.
pub(crate) async fn commit_snapshot(temp: &Path, path: &Path) -> Result<()> {
    tokio::fs::rename(temp, path)
        .await
        .with_context(format!("renaming {temp:?} to {path:?}"))
}
