//! Catalog API Data Transfer Objects
//!
//! These types match what the catalog service returns. Required fields are
//! still `Option` here: the adapter decides what is mandatory and reports
//! a malformed response instead of defaulting silently.
//!
//! DO NOT use these types outside the catalog module - convert to domain types.
//!
//! Example track response:
//! ```json
//! {
//!   "id": 77640617,
//!   "title": "Teardrop",
//!   "trackNumber": 3,
//!   "volumeNumber": 1,
//!   "isrc": "GBAAA9800052",
//!   "artists": [{"id": 3871, "name": "Massive Attack"}],
//!   "album": {"id": 77640614, "title": "Mezzanine"}
//! }
//! ```

use serde::{Deserialize, Serialize};

/// Ids arrive as numbers on most endpoints and as strings on a few.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum IdValue {
    Number(u64),
    Text(String),
}

impl IdValue {
    pub fn into_string(self) -> String {
        match self {
            IdValue::Number(n) => n.to_string(),
            IdValue::Text(s) => s,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ArtistDto {
    pub id: Option<IdValue>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlbumDto {
    pub id: Option<IdValue>,
    pub title: Option<String>,
    pub number_of_tracks: Option<u32>,
    pub release_date: Option<String>,
    #[serde(default)]
    pub artists: Vec<ArtistDto>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackDto {
    pub id: Option<IdValue>,
    pub title: Option<String>,
    pub track_number: Option<u32>,
    pub volume_number: Option<u32>,
    pub isrc: Option<String>,
    pub explicit: Option<bool>,
    pub version: Option<String>,
    /// Main artist; some endpoints only send this
    pub artist: Option<ArtistDto>,
    #[serde(default)]
    pub artists: Vec<ArtistDto>,
    pub album: Option<AlbumDto>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VideoDto {
    pub id: Option<IdValue>,
    pub title: Option<String>,
    pub artist: Option<ArtistDto>,
    #[serde(default)]
    pub artists: Vec<ArtistDto>,
    pub album: Option<AlbumDto>,
}

/// One page of a paginated listing
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageDto<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
    pub total_number_of_items: Option<u32>,
}

/// Favorites wrap each entity with the time it was added
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FavoriteDto<T> {
    pub created: Option<String>,
    pub item: T,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackInfoDto {
    pub track_id: Option<IdValue>,
    pub video_id: Option<IdValue>,
    pub audio_quality: Option<String>,
    pub video_quality: Option<String>,
    pub manifest_mime_type: Option<String>,
    pub manifest: Option<String>,
}

/// Structured error body
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorDto {
    pub status: Option<u16>,
    pub sub_status: Option<u32>,
    pub user_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_accept_numbers_and_strings() {
        let a: ArtistDto = serde_json::from_str(r#"{"id": 42, "name": "X"}"#).unwrap();
        let b: ArtistDto = serde_json::from_str(r#"{"id": "42", "name": "X"}"#).unwrap();
        assert_eq!(a.id.unwrap().into_string(), "42");
        assert_eq!(b.id.unwrap().into_string(), "42");
    }

    #[test]
    fn test_page_without_items_is_empty() {
        let page: PageDto<TrackDto> =
            serde_json::from_str(r#"{"totalNumberOfItems": 0}"#).unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.total_number_of_items, Some(0));
    }

    #[test]
    fn test_error_body_parses() {
        let err: ApiErrorDto = serde_json::from_str(
            r#"{"status": 404, "subStatus": 2001, "userMessage": "Asset is not ready for playback"}"#,
        )
        .unwrap();
        assert_eq!(err.status, Some(404));
        assert_eq!(err.sub_status, Some(2001));
    }
}
