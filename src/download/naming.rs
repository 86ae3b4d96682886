//! Destination paths for downloaded items.
//!
//! Paths come from a template relative to the download root, for example
//! `{artist_name}/{album_name}/{track_number} - {track_title}`.
//!
//! # Placeholders
//! - tracks: `{track_number}` (zero padded), `{track_title}` (with version),
//!   `{artist_name}`, `{album_name}`, `{album_year}`, `{explicit}` (`[E]`)
//! - videos: `{video_title}`, `{artist_name}`, `{album_name}`
//!
//! Unknown placeholders are dropped. Every substituted value is sanitized
//! so it cannot introduce extra directories, and the extension is derived
//! from the negotiated codec.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::catalog::{Album, Track, Video};

const MAX_COMPONENT_LEN: usize = 250;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{[^{}]*\}").expect("valid regex"));

/// File extension (without dot) for an audio codec.
pub fn extension_for_codec(codec: Option<&str>) -> &'static str {
    match codec.map(str::to_ascii_lowercase).as_deref() {
        Some("flac" | "mqa") => "flac",
        _ => "m4a",
    }
}

pub const VIDEO_EXTENSION: &str = "mp4";

/// Destination for a track.
///
/// With album context the album's artists name the directory, so a
/// compilation lands in one folder whatever each track's credits say.
pub fn track_path(
    root: &Path,
    template: &str,
    track: &Track,
    album: Option<&Album>,
    codec: Option<&str>,
) -> PathBuf {
    let album_name = album
        .map(|a| a.title.as_str())
        .or_else(|| track.album_title())
        .filter(|t| !t.trim().is_empty())
        .unwrap_or("Unknown Album");

    let artist = album
        .map(Album::artist_names)
        .filter(|a| !a.is_empty())
        .unwrap_or_else(|| track.artist_names());

    let year = album
        .and_then(Album::year)
        .map(str::to_string)
        .or_else(|| {
            track
                .album
                .as_ref()
                .and_then(|a| a.release_date.as_deref())
                .and_then(|d| d.get(..4))
                .map(str::to_string)
        });

    let values = [
        (
            "track_number",
            Some(format!("{:02}", track.track_number.unwrap_or(0))),
        ),
        ("track_title", Some(formatted_title(track))),
        ("artist_name", Some(artist)),
        ("album_name", Some(album_name.to_string())),
        ("album_year", year),
        ("explicit", track.explicit.then(|| "[E]".to_string())),
    ];

    render(root, template, &values, extension_for_codec(codec))
}

/// Destination for a video.
pub fn video_path(root: &Path, template: &str, video: &Video) -> PathBuf {
    let values = [
        ("video_title", Some(video.title.clone())),
        ("artist_name", Some(video.artist_names())),
        (
            "album_name",
            video.album.as_ref().map(|a| a.title.clone()),
        ),
    ];
    render(root, template, &values, VIDEO_EXTENSION)
}

/// Title with its version suffix, e.g. `Song (Radio Edit)`.
fn formatted_title(track: &Track) -> String {
    match track.version.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() && !track.title.contains(v) => format!("{} ({})", track.title, v),
        _ => track.title.clone(),
    }
}

fn render(root: &Path, template: &str, values: &[(&str, Option<String>)], ext: &str) -> PathBuf {
    let mut components: Vec<String> = template
        .split(['/', '\\'])
        .map(|segment| {
            let out = PLACEHOLDER.replace_all(segment, |caps: &regex::Captures<'_>| {
                let key = caps[0].trim_start_matches('{').trim_end_matches('}');
                values
                    .iter()
                    .find(|(k, _)| *k == key)
                    .and_then(|(_, v)| v.as_deref())
                    .map(sanitize_component)
                    .unwrap_or_default()
            });
            tidy(&out)
        })
        .filter(|c| !c.is_empty())
        .collect();

    if components.is_empty() {
        components.push("unnamed".to_string());
    }

    let mut path = root.to_path_buf();
    let last = components.len() - 1;
    for (i, component) in components.into_iter().enumerate() {
        if i == last {
            path.push(format!("{}.{}", truncate(&component, MAX_COMPONENT_LEN - ext.len() - 1), ext));
        } else {
            path.push(component);
        }
    }
    path
}

/// Make a single value safe as (part of) a path component.
///
/// Reserved characters become `_`, control characters are removed, and the
/// result never starts or ends with a space or dot.
pub fn sanitize_component(name: &str) -> String {
    let replaced: String = name
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            _ => c,
        })
        .collect();

    let trimmed = tidy(&replaced);
    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        truncate(&trimmed, MAX_COMPONENT_LEN)
    }
}

/// Collapse runs of spaces and strip leading/trailing spaces and dots.
fn tidy(s: &str) -> String {
    s.split(' ')
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
        .trim_matches(|c| c == ' ' || c == '.')
        .to_string()
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect::<String>().trim_end_matches([' ', '.']).to_string()
}
