//! Download orchestration.
//!
//! A batch runs strictly one item at a time:
//!
//! 1. snapshot the albums already complete in the index
//! 2. finish interrupted albums, as selected by [`ResumeScope`]
//! 3. for each requested item, in order: skip it if the index already has
//!    it, otherwise negotiate a stream, transfer it, and commit it to the
//!    index (persisted before the item is reported as a success)
//!
//! Every requested item yields exactly one [`Outcome`]. Per-item failures
//! never abort a batch; only index I/O errors do, since carrying on would
//! record downloads that are not durable.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::naming;
use super::negotiator;
use super::progress::{NoopObserver, ProgressEvent, ProgressObserver};
use super::transfer::{self, Transfer};
use crate::catalog::{Album, CatalogApi, CatalogError, Quality, Track};
use crate::config::Config;
use crate::error::Result;
use crate::library::{LibraryStore, MatchMode, MatchTier, TrackUpdate};
use crate::retry::RetryPolicy;

/// Which interrupted albums to finish before a batch
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ResumeScope {
    /// Never resume
    None,
    /// Only albums the batch refers to
    #[default]
    Relevant,
    /// Every incomplete album in the index
    All,
}

/// Settings for one orchestrator
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub download_root: PathBuf,
    pub quality: Quality,
    pub video_quality: String,
    pub track_template: String,
    pub video_template: String,
    /// Also download the owning album of each requested track
    pub full_albums: bool,
    pub resume: ResumeScope,
    pub match_mode: MatchMode,
    pub retry: RetryPolicy,
}

impl DownloadOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            download_root: config.download.download_path.clone(),
            quality: config.download.audio_quality,
            video_quality: config.download.video_quality.clone(),
            track_template: config.download.track_path_format.clone(),
            video_template: config.download.video_path_format.clone(),
            full_albums: config.download.full_albums,
            resume: config.download.resume_albums,
            match_mode: config.library.match_mode,
            retry: config.network.retry_policy(),
        }
    }
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Where a batch of tracks came from, recorded on every commit
#[derive(Debug, Clone, Default)]
pub struct Provenance {
    pub favorites: bool,
    pub playlist: Option<String>,
    pub artist: Option<String>,
}

impl Provenance {
    pub fn favorites() -> Self {
        Self {
            favorites: true,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemKind {
    Track,
    Video,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The index already has the item
    InIndex(MatchTier),
    /// The service cannot play the asset yet
    NotReady,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::InIndex(MatchTier::Id) => f.write_str("already in index"),
            SkipReason::InIndex(MatchTier::Album) => f.write_str("album already downloaded"),
            SkipReason::InIndex(MatchTier::Isrc) => f.write_str("same recording in index (ISRC)"),
            SkipReason::InIndex(MatchTier::Metadata) => {
                f.write_str("same artist and title in index")
            }
            SkipReason::NotReady => f.write_str("not ready for playback yet"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Success { path: PathBuf },
    Skipped { reason: SkipReason },
    Failed { error: String },
}

impl Status {
    pub fn icon(&self) -> &'static str {
        match self {
            Status::Success { .. } => "✓",
            Status::Skipped { .. } => "-",
            Status::Failed { .. } => "✗",
        }
    }

    /// Precedence when one item has several results in a batch
    fn rank(&self) -> u8 {
        match self {
            Status::Skipped { .. } => 0,
            Status::Failed { .. } => 1,
            Status::Success { .. } => 2,
        }
    }
}

/// Result for one requested item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub id: String,
    pub kind: ItemKind,
    pub title: String,
    pub status: Status,
}

impl Outcome {
    fn new(id: &str, kind: ItemKind, title: &str, status: Status) -> Self {
        Self {
            id: id.to_string(),
            kind,
            title: title.to_string(),
            status,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.status {
            Status::Success { path } => Some(path),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, Status::Success { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.status, Status::Skipped { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, Status::Failed { .. })
    }

    /// One-line human description.
    pub fn describe(&self) -> String {
        match &self.status {
            Status::Success { path } => format!("{} -> {}", self.title, path.display()),
            Status::Skipped { reason } => format!("{} (skipped: {})", self.title, reason),
            Status::Failed { error } => format!("{} (failed: {})", self.title, error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlbumResult {
    /// Complete before this batch started; nothing was fetched
    AlreadyComplete,
    Complete,
    Incomplete { remaining: u32 },
    /// Gone upstream; its record was dropped
    Removed { reason: String },
    Failed { error: String },
}

impl fmt::Display for AlbumResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlbumResult::AlreadyComplete => f.write_str("already complete"),
            AlbumResult::Complete => f.write_str("complete"),
            AlbumResult::Incomplete { remaining } => write!(f, "{remaining} tracks still missing"),
            AlbumResult::Removed { reason } => write!(f, "removed ({reason})"),
            AlbumResult::Failed { error } => write!(f, "failed ({error})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlbumOutcome {
    pub album_id: String,
    pub title: String,
    pub status: AlbumResult,
    /// Outcomes of the tracks this album download attempted
    pub tracks: Vec<Outcome>,
}

/// Counts over a batch, album tracks included
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub success: usize,
    pub skipped: usize,
    pub failed: usize,
    pub albums_complete: usize,
    pub albums_incomplete: usize,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Done: {} downloaded, {} skipped, {} failed",
            self.success, self.skipped, self.failed
        )?;
        if self.albums_complete + self.albums_incomplete > 0 {
            write!(
                f,
                " ({} albums complete, {} incomplete)",
                self.albums_complete, self.albums_incomplete
            )?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    /// One per requested item, in request order
    pub outcomes: Vec<Outcome>,
    /// Albums resumed or downloaded during the batch
    pub albums: Vec<AlbumOutcome>,
}

impl BatchReport {
    /// Counts with every item taken once.
    ///
    /// A track can show up both as a requested item and inside an album pass
    /// (full-album mode, resume); it counts as its best result.
    pub fn summary(&self) -> Summary {
        let mut summary = Summary::default();
        let album_tracks = self.albums.iter().flat_map(|a| a.tracks.iter());
        let mut best: HashMap<(ItemKind, &str), &Status> = HashMap::new();
        for outcome in self.outcomes.iter().chain(album_tracks) {
            best.entry((outcome.kind, outcome.id.as_str()))
                .and_modify(|status| {
                    if outcome.status.rank() > status.rank() {
                        *status = &outcome.status;
                    }
                })
                .or_insert(&outcome.status);
        }
        for status in best.into_values() {
            match status {
                Status::Success { .. } => summary.success += 1,
                Status::Skipped { .. } => summary.skipped += 1,
                Status::Failed { .. } => summary.failed += 1,
            }
        }
        for album in &self.albums {
            match album.status {
                AlbumResult::Complete | AlbumResult::AlreadyComplete => {
                    summary.albums_complete += 1
                }
                _ => summary.albums_incomplete += 1,
            }
        }
        summary
    }
}

/// Per-batch bookkeeping
#[derive(Debug, Default)]
struct Session {
    /// Albums complete when the batch started, or completed during it
    complete_albums: HashSet<String>,
    /// Albums already downloaded in this batch
    visited_albums: HashSet<String>,
}

/// Drives batches through index check, negotiation, transfer and commit.
pub struct Orchestrator {
    catalog: Arc<dyn CatalogApi>,
    store: Arc<LibraryStore>,
    transfer: Arc<dyn Transfer>,
    observer: Arc<dyn ProgressObserver>,
    options: DownloadOptions,
    session: Mutex<Session>,
}

impl Orchestrator {
    pub fn new(
        catalog: Arc<dyn CatalogApi>,
        store: Arc<LibraryStore>,
        transfer: Arc<dyn Transfer>,
        options: DownloadOptions,
    ) -> Self {
        Self {
            catalog,
            store,
            transfer,
            observer: Arc::new(NoopObserver),
            options,
            session: Mutex::new(Session::default()),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn options(&self) -> &DownloadOptions {
        &self.options
    }

    /// Download catalog tracks.
    pub async fn download_tracks(
        &self,
        tracks: &[Track],
        provenance: &Provenance,
    ) -> Result<BatchReport> {
        let items = tracks
            .iter()
            .map(|t| (t.id.clone(), Ok(t.clone())))
            .collect();
        self.run_track_batch(items, provenance).await
    }

    /// Download tracks by id. Ids the catalog cannot resolve become failures.
    pub async fn download_track_ids(&self, ids: &[String]) -> Result<BatchReport> {
        let mut items = Vec::with_capacity(ids.len());
        for id in ids {
            items.push((id.clone(), self.catalog.get_track(id).await));
        }
        self.run_track_batch(items, &Provenance::default()).await
    }

    /// Download the user's favorite tracks, tagging each commit as a favorite.
    pub async fn download_favorites(&self) -> Result<BatchReport> {
        let favorites = self.catalog.favorite_tracks().await?;
        info!(
            target: "tidekeeper::orchestrator",
            count = favorites.len(),
            "Fetched favorite tracks"
        );
        self.download_tracks(&favorites, &Provenance::favorites()).await
    }

    /// Download whole albums, resuming interrupted ones first.
    pub async fn download_albums(&self, album_ids: &[String]) -> Result<BatchReport> {
        self.begin_batch().await?;
        let mut report = BatchReport::default();
        self.observer.on_event(&ProgressEvent::BatchStarted {
            total: album_ids.len(),
        });

        let relevant: HashSet<String> = album_ids.iter().cloned().collect();
        self.resume(&relevant, &mut report).await?;

        for album_id in album_ids {
            if self.session.lock().visited_albums.contains(album_id) {
                debug!("Album {} already handled in this batch", album_id);
                continue;
            }
            let outcome = self.download_album(album_id).await?;
            report.albums.push(outcome);
        }

        self.finish_batch(&report);
        Ok(report)
    }

    /// Download videos by id.
    pub async fn download_videos(&self, video_ids: &[String]) -> Result<BatchReport> {
        let mut report = BatchReport::default();
        let total = video_ids.len();
        self.observer.on_event(&ProgressEvent::BatchStarted { total });

        for (index, video_id) in video_ids.iter().enumerate() {
            let outcome = self.process_video(video_id, index + 1, total).await?;
            self.observer
                .on_event(&ProgressEvent::ItemFinished(outcome.clone()));
            report.outcomes.push(outcome);
        }

        self.finish_batch(&report);
        Ok(report)
    }

    async fn run_track_batch(
        &self,
        items: Vec<(String, std::result::Result<Track, CatalogError>)>,
        provenance: &Provenance,
    ) -> Result<BatchReport> {
        self.begin_batch().await?;
        let mut report = BatchReport::default();
        let total = items.len();
        self.observer.on_event(&ProgressEvent::BatchStarted { total });

        let relevant: HashSet<String> = items
            .iter()
            .filter_map(|(_, t)| t.as_ref().ok()?.album_id().map(str::to_string))
            .collect();
        self.resume(&relevant, &mut report).await?;

        for (index, (id, fetched)) in items.into_iter().enumerate() {
            let track = match fetched {
                Ok(track) => track,
                Err(e) => {
                    warn!("Could not fetch track {}: {}", id, e);
                    let outcome = Outcome::new(
                        &id,
                        ItemKind::Track,
                        &id,
                        Status::Failed {
                            error: e.to_string(),
                        },
                    );
                    self.observer
                        .on_event(&ProgressEvent::ItemFinished(outcome.clone()));
                    report.outcomes.push(outcome);
                    continue;
                }
            };

            self.observer.on_event(&ProgressEvent::ItemStarted {
                index: index + 1,
                total,
                id: track.id.clone(),
                title: track.title.clone(),
            });
            let outcome = self.process_track(&track, None, provenance).await?;
            self.observer
                .on_event(&ProgressEvent::ItemFinished(outcome.clone()));
            report.outcomes.push(outcome);

            if self.options.full_albums {
                if let Some(album_id) = track.album_id() {
                    if !self.album_handled(album_id) {
                        let album_outcome = self.download_album(album_id).await?;
                        report.albums.push(album_outcome);
                    }
                }
            }
        }

        self.finish_batch(&report);
        Ok(report)
    }

    async fn begin_batch(&self) -> Result<()> {
        let complete = self.store.complete_album_ids().await?;
        debug!("{} albums already complete at batch start", complete.len());
        *self.session.lock() = Session {
            complete_albums: complete,
            visited_albums: HashSet::new(),
        };
        Ok(())
    }

    fn finish_batch(&self, report: &BatchReport) {
        let summary = report.summary();
        info!(
            target: "tidekeeper::orchestrator",
            success = summary.success,
            skipped = summary.skipped,
            failed = summary.failed,
            "Batch finished"
        );
        self.observer
            .on_event(&ProgressEvent::BatchFinished(summary));
    }

    fn album_handled(&self, album_id: &str) -> bool {
        let session = self.session.lock();
        session.complete_albums.contains(album_id) || session.visited_albums.contains(album_id)
    }

    /// Finish incomplete albums selected by the resume scope.
    async fn resume(&self, relevant: &HashSet<String>, report: &mut BatchReport) -> Result<()> {
        let scope = self.options.resume;
        if scope == ResumeScope::None {
            return Ok(());
        }

        let targets: Vec<String> = self
            .store
            .get_incomplete()
            .await?
            .into_iter()
            .map(|(id, _)| id)
            .filter(|id| scope == ResumeScope::All || relevant.contains(id))
            .collect();
        if targets.is_empty() {
            return Ok(());
        }

        info!(
            target: "tidekeeper::orchestrator",
            count = targets.len(),
            "Resuming incomplete albums"
        );
        for album_id in targets {
            let outcome = self.download_album(&album_id).await?;
            report.albums.push(outcome);
        }
        Ok(())
    }

    /// Download the tracks of one album that are not yet recorded.
    async fn download_album(&self, album_id: &str) -> Result<AlbumOutcome> {
        let already_complete = self.session.lock().complete_albums.contains(album_id);
        if already_complete {
            let title = self
                .store
                .album(album_id)
                .await?
                .map(|r| r.title)
                .unwrap_or_default();
            debug!("Album {} already complete, nothing to do", album_id);
            return Ok(AlbumOutcome {
                album_id: album_id.to_string(),
                title,
                status: AlbumResult::AlreadyComplete,
                tracks: Vec::new(),
            });
        }
        self.session
            .lock()
            .visited_albums
            .insert(album_id.to_string());

        let album = match self.catalog.get_album(album_id).await {
            Ok(album) => album,
            Err(e) if e.is_gone() => {
                let reason = format!("not available upstream: {e}");
                self.store.remove_album(album_id, &reason).await?;
                let outcome = AlbumOutcome {
                    album_id: album_id.to_string(),
                    title: String::new(),
                    status: AlbumResult::Removed { reason },
                    tracks: Vec::new(),
                };
                self.observer
                    .on_event(&ProgressEvent::AlbumFinished(outcome.clone()));
                return Ok(outcome);
            }
            Err(e) => {
                warn!("Could not fetch album {}: {}", album_id, e);
                let outcome = AlbumOutcome {
                    album_id: album_id.to_string(),
                    title: String::new(),
                    status: AlbumResult::Failed {
                        error: e.to_string(),
                    },
                    tracks: Vec::new(),
                };
                self.observer
                    .on_event(&ProgressEvent::AlbumFinished(outcome.clone()));
                return Ok(outcome);
            }
        };

        let record = self.store.add_album(&album).await?;
        let remaining = self.store.remaining_tracks(&album).await?;
        info!(
            target: "tidekeeper::orchestrator",
            album = %album.title,
            remaining = remaining.len(),
            total = record.total_tracks,
            "Downloading album"
        );
        self.observer.on_event(&ProgressEvent::AlbumStarted {
            album_id: album.id.clone(),
            title: album.title.clone(),
            remaining: remaining.len(),
            total: record.total_tracks,
        });

        let mut tracks = Vec::with_capacity(remaining.len());
        for track in &remaining {
            let outcome = self
                .process_track(track, Some(&album), &Provenance::default())
                .await?;
            self.observer
                .on_event(&ProgressEvent::ItemFinished(outcome.clone()));
            tracks.push(outcome);
        }

        let status = match self.store.album(album_id).await? {
            Some(r) if r.is_complete() => AlbumResult::Complete,
            Some(r) => AlbumResult::Incomplete {
                remaining: r.total_tracks.saturating_sub(r.downloaded_count()),
            },
            None => AlbumResult::Incomplete { remaining: 0 },
        };
        if status == AlbumResult::Complete {
            self.session
                .lock()
                .complete_albums
                .insert(album_id.to_string());
        }

        let outcome = AlbumOutcome {
            album_id: album.id.clone(),
            title: album.title.clone(),
            status,
            tracks,
        };
        self.observer
            .on_event(&ProgressEvent::AlbumFinished(outcome.clone()));
        Ok(outcome)
    }

    /// Index check, negotiation, transfer and commit for one track.
    async fn process_track(
        &self,
        track: &Track,
        album: Option<&Album>,
        provenance: &Provenance,
    ) -> Result<Outcome> {
        let outcome = |status| Outcome::new(&track.id, ItemKind::Track, &track.title, status);

        if let Some(tier) = self.store.resolve(track, self.options.match_mode).await? {
            debug!("Track {} already present ({:?} match)", track.id, tier);
            if let Some(album) = album {
                self.store.mark_track_downloaded(&album.id, &track.id).await?;
            }
            return Ok(outcome(Status::Skipped {
                reason: SkipReason::InIndex(tier),
            }));
        }

        let negotiated =
            match negotiator::negotiate(self.catalog.as_ref(), &track.id, self.options.quality)
                .await
            {
                Ok(n) => n,
                Err(e) if e.is_not_ready() => {
                    info!("Track {} is not ready for playback, skipping", track.id);
                    return Ok(outcome(Status::Skipped {
                        reason: SkipReason::NotReady,
                    }));
                }
                Err(e) => {
                    warn!("No stream for track {}: {}", track.id, e);
                    return Ok(outcome(Status::Failed {
                        error: e.to_string(),
                    }));
                }
            };

        self.observer.on_event(&ProgressEvent::StreamSelected {
            id: track.id.clone(),
            quality: negotiated.actual_quality(),
            exact: negotiated.exact,
        });

        if negotiated.stream.is_encrypted() {
            warn!("Track {} is served encrypted, skipping transfer", track.id);
            return Ok(outcome(Status::Failed {
                error: "encrypted streams are not supported".to_string(),
            }));
        }

        let dest = naming::track_path(
            &self.options.download_root,
            &self.options.track_template,
            track,
            album,
            negotiated.stream.codec.as_deref(),
        );

        if let Err(e) = transfer::fetch_with_retry(
            self.transfer.as_ref(),
            &self.options.retry,
            &negotiated.stream.url,
            &dest,
        )
        .await
        {
            warn!("Download of track {} failed: {}", track.id, e);
            return Ok(outcome(Status::Failed {
                error: e.to_string(),
            }));
        }

        let mut update = TrackUpdate::from_track(track);
        if let Some(album) = album {
            update.album_id.get_or_insert_with(|| album.id.clone());
            update.album_title.get_or_insert_with(|| album.title.clone());
        }
        update.quality_requested = Some(self.options.quality.as_str().to_string());
        update.quality_actual = Some(negotiated.actual_quality());
        update.codec = negotiated.stream.codec.clone();
        update.from_favorites = provenance.favorites;
        update.playlist = provenance.playlist.clone();
        update.artist_source = provenance.artist.clone();

        self.store.upsert_track(&track.id, &dest, update).await?;
        self.store.save().await?;

        let album_id = album.map(|a| a.id.as_str()).or_else(|| track.album_id());
        if let Some(album_id) = album_id {
            if self.store.album(album_id).await?.is_some() {
                self.store.mark_track_downloaded(album_id, &track.id).await?;
            }
        }

        info!(
            target: "tidekeeper::orchestrator",
            track = %track.id,
            quality = %negotiated.actual_quality(),
            "Downloaded {}",
            track.title
        );
        Ok(outcome(Status::Success { path: dest }))
    }

    async fn process_video(&self, video_id: &str, index: usize, total: usize) -> Result<Outcome> {
        if self.store.has_video(video_id).await? {
            return Ok(Outcome::new(
                video_id,
                ItemKind::Video,
                video_id,
                Status::Skipped {
                    reason: SkipReason::InIndex(MatchTier::Id),
                },
            ));
        }

        let video = match self.catalog.get_video(video_id).await {
            Ok(video) => video,
            Err(e) => {
                warn!("Could not fetch video {}: {}", video_id, e);
                return Ok(Outcome::new(
                    video_id,
                    ItemKind::Video,
                    video_id,
                    Status::Failed {
                        error: e.to_string(),
                    },
                ));
            }
        };
        let outcome = |status| Outcome::new(&video.id, ItemKind::Video, &video.title, status);

        self.observer.on_event(&ProgressEvent::ItemStarted {
            index,
            total,
            id: video.id.clone(),
            title: video.title.clone(),
        });

        let stream = match negotiator::negotiate_video(
            self.catalog.as_ref(),
            &video.id,
            &self.options.video_quality,
        )
        .await
        {
            Ok(stream) => stream,
            Err(e) if e.is_not_ready() => {
                return Ok(outcome(Status::Skipped {
                    reason: SkipReason::NotReady,
                }));
            }
            Err(e) => {
                warn!("No stream for video {}: {}", video.id, e);
                return Ok(outcome(Status::Failed {
                    error: e.to_string(),
                }));
            }
        };

        let dest = naming::video_path(
            &self.options.download_root,
            &self.options.video_template,
            &video,
        );
        if let Err(e) =
            transfer::fetch_with_retry(self.transfer.as_ref(), &self.options.retry, &stream.url, &dest)
                .await
        {
            warn!("Download of video {} failed: {}", video.id, e);
            return Ok(outcome(Status::Failed {
                error: e.to_string(),
            }));
        }

        self.store
            .add_video(
                &video.id,
                &dest,
                &video.title,
                &video.artist_names(),
                video.album.as_ref().map(|a| a.id.as_str()),
            )
            .await?;

        info!(target: "tidekeeper::orchestrator", video = %video.id, "Downloaded {}", video.title);
        Ok(outcome(Status::Success { path: dest }))
    }
}
