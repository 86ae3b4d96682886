//! Adapter layer: Convert catalog DTOs to domain models
//!
//! This is the ONLY place where DTO types are converted to domain types.
//! Missing required fields become `CatalogError::Malformed`.

use super::domain::{Album, AlbumSummary, Artist, CatalogError, PlaybackInfo, Track, Video};
use super::dto;

fn required<T>(value: Option<T>, entity: &str, field: &str) -> Result<T, CatalogError> {
    value.ok_or_else(|| CatalogError::Malformed(format!("{entity} without {field}")))
}

fn to_artist(artist: dto::ArtistDto) -> Result<Artist, CatalogError> {
    Ok(Artist {
        id: required(artist.id, "artist", "id")?.into_string(),
        name: required(artist.name, "artist", "name")?,
    })
}

/// Prefer the full credit list, fall back to the single main artist.
fn to_artists(
    artists: Vec<dto::ArtistDto>,
    main: Option<dto::ArtistDto>,
) -> Result<Vec<Artist>, CatalogError> {
    if artists.is_empty() {
        main.into_iter().map(to_artist).collect()
    } else {
        artists.into_iter().map(to_artist).collect()
    }
}

fn to_album_summary(album: dto::AlbumDto) -> Result<AlbumSummary, CatalogError> {
    Ok(AlbumSummary {
        id: required(album.id, "album", "id")?.into_string(),
        title: required(album.title, "album", "title")?,
        release_date: album.release_date,
    })
}

pub fn to_track(track: dto::TrackDto) -> Result<Track, CatalogError> {
    Ok(Track {
        id: required(track.id, "track", "id")?.into_string(),
        title: required(track.title, "track", "title")?,
        track_number: track.track_number,
        volume_number: track.volume_number,
        isrc: track.isrc.filter(|s| !s.trim().is_empty()),
        explicit: track.explicit.unwrap_or(false),
        version: track.version.filter(|s| !s.trim().is_empty()),
        artists: to_artists(track.artists, track.artist)?,
        album: track.album.map(to_album_summary).transpose()?,
    })
}

/// Build an album from its metadata and (possibly empty) track listing.
pub fn to_album(album: dto::AlbumDto, tracks: Vec<dto::TrackDto>) -> Result<Album, CatalogError> {
    let id = required(album.id, "album", "id")?.into_string();
    let title = required(album.title, "album", "title")?;

    let tracks = tracks
        .into_iter()
        .map(|t| {
            let mut track = to_track(t)?;
            // Listing endpoints sometimes omit the owning album
            if track.album.is_none() {
                track.album = Some(AlbumSummary {
                    id: id.clone(),
                    title: title.clone(),
                    release_date: album.release_date.clone(),
                });
            }
            Ok(track)
        })
        .collect::<Result<Vec<_>, CatalogError>>()?;

    Ok(Album {
        id,
        title,
        number_of_tracks: album.number_of_tracks,
        release_date: album.release_date,
        artists: album
            .artists
            .into_iter()
            .map(to_artist)
            .collect::<Result<_, _>>()?,
        tracks,
    })
}

pub fn to_video(video: dto::VideoDto) -> Result<Video, CatalogError> {
    Ok(Video {
        id: required(video.id, "video", "id")?.into_string(),
        title: required(video.title, "video", "title")?,
        artists: to_artists(video.artists, video.artist)?,
        album: video.album.map(to_album_summary).transpose()?,
    })
}

pub fn to_playback(info: dto::PlaybackInfoDto) -> Result<PlaybackInfo, CatalogError> {
    let item_id = required(info.track_id.or(info.video_id), "playback info", "item id")?;
    Ok(PlaybackInfo {
        item_id: item_id.into_string(),
        granted_quality: info.audio_quality.or(info.video_quality),
        manifest_mime_type: required(info.manifest_mime_type, "playback info", "manifestMimeType")?,
        manifest: required(info.manifest, "playback info", "manifest")?,
    })
}

/// Map an error status and body to a catalog error.
pub fn to_api_error(http_status: u16, body: &str) -> CatalogError {
    match serde_json::from_str::<dto::ApiErrorDto>(body) {
        Ok(err) => CatalogError::Api {
            status: err.status.unwrap_or(http_status),
            sub_status: err.sub_status,
            message: err.user_message.unwrap_or_else(|| "Unknown error".to_string()),
        },
        Err(_) => CatalogError::Api {
            status: http_status,
            sub_status: None,
            message: body.chars().take(200).collect(),
        },
    }
}
