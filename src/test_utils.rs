//! Test utilities and fixtures for tidekeeper tests.
//!
//! # Example
//!
//! ```ignore
//! use crate::test_utils::{temp_store, mock_album};
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let (store, _dir) = temp_store();
//!     store.add_album(&mock_album("a1", "LP", 3)).await.unwrap();
//! }
//! ```

use tempfile::TempDir;

use crate::catalog::{Album, AlbumSummary, Artist, Track, Video};
use crate::library::{LibraryStore, StorePaths};

/// Creates a library store backed by a temporary directory.
///
/// Keep the returned `TempDir` alive for the duration of the test; the
/// state files are deleted when it is dropped.
pub fn temp_store() -> (LibraryStore, TempDir) {
    let dir = tempfile::tempdir().expect("Failed to create temp directory");
    let store = LibraryStore::new(StorePaths::in_dir(dir.path()));
    (store, dir)
}

fn artist(name: &str) -> Artist {
    Artist {
        id: format!("artist-{}", name.to_lowercase().replace(' ', "-")),
        name: name.to_string(),
    }
}

/// A catalog track with no number, ISRC or version.
///
/// `album` is an optional `(id, title)` pair.
pub fn mock_track(id: &str, title: &str, artist_name: &str, album: Option<(&str, &str)>) -> Track {
    Track {
        id: id.to_string(),
        title: title.to_string(),
        track_number: None,
        volume_number: None,
        isrc: None,
        explicit: false,
        version: None,
        artists: vec![artist(artist_name)],
        album: album.map(|(album_id, album_title)| AlbumSummary {
            id: album_id.to_string(),
            title: album_title.to_string(),
            release_date: None,
        }),
    }
}

/// An album with a full listing of `n` tracks, ids `"{id}-1"` to `"{id}-{n}"`.
pub fn mock_album(id: &str, title: &str, n: u32) -> Album {
    let tracks = (1..=n)
        .map(|i| Track {
            track_number: Some(i),
            volume_number: Some(1),
            ..mock_track(
                &format!("{id}-{i}"),
                &format!("Track {i} of {title}"),
                "Album Artist",
                Some((id, title)),
            )
        })
        .collect();

    Album {
        id: id.to_string(),
        title: title.to_string(),
        number_of_tracks: Some(n),
        release_date: None,
        artists: vec![artist("Album Artist")],
        tracks,
    }
}

pub fn mock_video(id: &str, title: &str, artist_name: &str) -> Video {
    Video {
        id: id.to_string(),
        title: title.to_string(),
        artists: vec![artist(artist_name)],
        album: None,
    }
}
