//! Decides whether a remote track is already in the library.
//!
//! Tiers are checked from most to least certain and the first hit wins:
//!
//! 1. exact catalog id
//! 2. owning album is complete, or lists this id as downloaded
//! 3. same ISRC as a stored track
//! 4. same normalized artist + title (+ album when both sides have one)
//!
//! Tier 4 can confuse distinct recordings that share artist and title
//! (covers, re-recordings). [`MatchMode::Id`] turns it off.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::state::LibraryState;
use crate::catalog::Track;

/// How aggressively remote items are matched
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// Identity signals only (tiers 1-3)
    Id,
    /// Also match on normalized metadata
    #[default]
    IdOrMetadata,
}

/// Which tier produced a match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchTier {
    Id,
    Album,
    Isrc,
    Metadata,
}

/// The attributes of a remote track the resolver looks at
#[derive(Debug, Clone, Copy, Default)]
pub struct Candidate<'a> {
    pub id: &'a str,
    pub isrc: Option<&'a str>,
    pub album_id: Option<&'a str>,
    pub album_title: Option<&'a str>,
    pub artist: &'a str,
    pub title: &'a str,
}

impl<'a> Candidate<'a> {
    /// Borrow the identity fields of `track`. `artist` must outlive the candidate.
    pub fn from_track(track: &'a Track, artist: &'a str) -> Self {
        Self {
            id: &track.id,
            isrc: track.isrc.as_deref(),
            album_id: track.album_id(),
            album_title: track.album_title(),
            artist,
            title: &track.title,
        }
    }
}

const STOP_WORDS: &[&str] = &[
    "remaster",
    "remastered",
    "edit",
    "version",
    "mono",
    "stereo",
    "live",
];

static BRACKETED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\([^)]*\)|\[[^\]]*\]|\{[^}]*\}").expect("valid regex"));
static NON_ALNUM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9\s]+").expect("valid regex"));

/// Normalize text for fuzzy comparison.
///
/// Lowercases, drops bracketed qualifiers and release-qualifier words,
/// keeps only ASCII alphanumerics, and collapses whitespace.
pub fn normalize(text: &str) -> String {
    let lower = text.to_lowercase();
    let unbracketed = BRACKETED.replace_all(&lower, " ");
    let cleaned = NON_ALNUM.replace_all(&unbracketed, " ");
    cleaned
        .split_whitespace()
        .filter(|w| !STOP_WORDS.contains(w))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Find the first tier under which `candidate` is already present.
pub fn resolve(state: &LibraryState, candidate: &Candidate<'_>, mode: MatchMode) -> Option<MatchTier> {
    if !candidate.id.is_empty() && state.tracks.contains_key(candidate.id) {
        return Some(MatchTier::Id);
    }

    let album_hit = candidate
        .album_id
        .and_then(|id| state.albums.get(id))
        .is_some_and(|album| {
            album.is_complete() || album.downloaded_track_ids.contains(candidate.id)
        });
    if album_hit {
        return Some(MatchTier::Album);
    }

    let isrc_hit = candidate
        .isrc
        .filter(|s| !s.is_empty())
        .is_some_and(|isrc| state.tracks.values().any(|t| t.isrc.as_deref() == Some(isrc)));
    if isrc_hit {
        return Some(MatchTier::Isrc);
    }

    if mode == MatchMode::IdOrMetadata && metadata_match(state, candidate) {
        return Some(MatchTier::Metadata);
    }

    None
}

fn metadata_match(state: &LibraryState, candidate: &Candidate<'_>) -> bool {
    let artist = normalize(candidate.artist);
    let title = normalize(candidate.title);
    if artist.is_empty() || title.is_empty() {
        return false;
    }
    let album = candidate.album_title.map(normalize).unwrap_or_default();

    state.tracks.values().any(|record| {
        let stored_artist = normalize(record.artist_names.as_deref().unwrap_or_default());
        let stored_title = normalize(record.title.as_deref().unwrap_or_default());
        if stored_artist != artist || stored_title != title {
            return false;
        }
        let stored_album = normalize(record.album_title.as_deref().unwrap_or_default());
        // Album only counts when both sides carry one
        album.is_empty() || stored_album.is_empty() || stored_album == album
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::state::{AlbumRecord, AlbumStatus, TrackRecord};
    use proptest::prelude::*;

    fn stored(artist: &str, title: &str, album: Option<&str>, isrc: Option<&str>) -> TrackRecord {
        TrackRecord {
            artist_names: Some(artist.into()),
            title: Some(title.into()),
            album_title: album.map(Into::into),
            isrc: isrc.map(Into::into),
            ..Default::default()
        }
    }

    fn state_with(id: &str, record: TrackRecord) -> LibraryState {
        let mut state = LibraryState::default();
        state.tracks.insert(id.into(), record);
        state
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("Hello (Remastered 2011)"), "hello");
        assert_eq!(normalize("  The   Wall [Live] {Edit} "), "the wall");
        assert_eq!(normalize("Song - Mono Version"), "song");
        assert_eq!(normalize("AC/DC"), "ac dc");
        // Whole words only
        assert_eq!(normalize("Deliverance"), "deliverance");
        assert_eq!(normalize("Olive"), "olive");
        assert_eq!(normalize("Stereophonic Editor"), "stereophonic editor");
    }

    #[test]
    fn test_exact_id_match() {
        let state = state_with("A", TrackRecord::default());
        let c = Candidate { id: "A", ..Default::default() };
        assert_eq!(resolve(&state, &c, MatchMode::Id), Some(MatchTier::Id));
    }

    #[test]
    fn test_album_tier() {
        let mut state = LibraryState::default();
        state.albums.insert(
            "alb".into(),
            AlbumRecord {
                total_tracks: 3,
                downloaded_track_ids: ["t1".to_string()].into(),
                status: AlbumStatus::InProgress,
                ..Default::default()
            },
        );

        let listed = Candidate { id: "t1", album_id: Some("alb"), ..Default::default() };
        let other = Candidate { id: "t2", album_id: Some("alb"), ..Default::default() };
        assert_eq!(resolve(&state, &listed, MatchMode::Id), Some(MatchTier::Album));
        assert_eq!(resolve(&state, &other, MatchMode::Id), None);

        state.albums.get_mut("alb").unwrap().status = AlbumStatus::Complete;
        assert_eq!(resolve(&state, &other, MatchMode::Id), Some(MatchTier::Album));
    }

    #[test]
    fn test_isrc_tier() {
        let state = state_with("A", stored("X", "Y", None, Some("X123")));
        let c = Candidate { id: "B", isrc: Some("X123"), ..Default::default() };
        assert_eq!(resolve(&state, &c, MatchMode::Id), Some(MatchTier::Isrc));

        let c = Candidate { id: "B", isrc: Some("Z999"), ..Default::default() };
        assert_eq!(resolve(&state, &c, MatchMode::Id), None);
    }

    #[test]
    fn test_metadata_tier_respects_match_mode() {
        let state = state_with("A", stored("Massive Attack", "Teardrop", None, Some("X123")));
        let c = Candidate {
            id: "C",
            isrc: Some("Q456"),
            artist: "massive attack",
            title: "Teardrop (Remastered)",
            ..Default::default()
        };
        assert_eq!(
            resolve(&state, &c, MatchMode::IdOrMetadata),
            Some(MatchTier::Metadata)
        );
        assert_eq!(resolve(&state, &c, MatchMode::Id), None);
    }

    #[test]
    fn test_metadata_tier_requires_album_when_both_sides_have_one() {
        let state = state_with("A", stored("Artist", "Song", Some("First LP"), None));

        let same = Candidate {
            id: "B",
            artist: "Artist",
            title: "Song",
            album_title: Some("First LP (Deluxe)"),
            ..Default::default()
        };
        let different = Candidate { album_title: Some("Greatest Hits"), ..same };
        let no_album = Candidate { album_title: None, ..same };

        let mode = MatchMode::IdOrMetadata;
        assert_eq!(resolve(&state, &same, mode), Some(MatchTier::Metadata));
        assert_eq!(resolve(&state, &different, mode), None);
        assert_eq!(resolve(&state, &no_album, mode), Some(MatchTier::Metadata));
    }

    #[test]
    fn test_empty_metadata_never_matches() {
        let state = state_with("A", TrackRecord::default());
        let c = Candidate { id: "B", ..Default::default() };
        assert_eq!(resolve(&state, &c, MatchMode::IdOrMetadata), None);
    }

    proptest! {
        #[test]
        fn normalize_is_idempotent(s in "\\PC{0,40}") {
            let once = normalize(&s);
            prop_assert_eq!(normalize(&once), once.clone());
        }

        #[test]
        fn normalize_output_is_plain(s in "\\PC{0,40}") {
            let out = normalize(&s);
            prop_assert!(out.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == ' '));
            prop_assert!(!out.contains("  "));
            prop_assert_eq!(out.trim(), out.as_str());
        }

        #[test]
        fn bracketed_suffix_is_ignored(base in "[a-z]{1,10}( [a-z]{1,10}){0,3}", extra in "[A-Za-z0-9 ]{0,15}") {
            let decorated = format!("{base} ({extra})");
            prop_assert_eq!(normalize(&decorated), normalize(&base));
        }
    }
}
