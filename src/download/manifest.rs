//! Playback manifest decoding.
//!
//! The service hands out one of three manifest shapes, told apart by the
//! content type:
//!
//! - `application/vnd.tidal.bts`: base64 JSON `{codecs, keyId?, urls}`
//! - `application/dash+xml`: base64 MPD text; only the `codecs` attribute
//!   and the `<BaseURL>` elements are read, by plain text scanning
//! - `application/vnd.tidal.emu`: base64 JSON `{urls}` for videos, the first
//!   URL being the playlist
//!
//! Anything else is a malformed response.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use tracing::debug;

use crate::catalog::{CatalogError, PlaybackInfo};

/// Where and how to fetch one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDescriptor {
    pub url: String,
    pub alternates: Vec<String>,
    pub codec: Option<String>,
    pub key_id: Option<String>,
    /// Quality as granted by the service
    pub granted_quality: Option<String>,
}

impl StreamDescriptor {
    pub fn is_encrypted(&self) -> bool {
        self.key_id.as_deref().is_some_and(|k| !k.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestKind {
    Bts,
    Dash,
    Emu,
}

impl ManifestKind {
    pub fn from_mime(mime: &str) -> Option<Self> {
        if mime.contains("vnd.tidal.bt") {
            Some(ManifestKind::Bts)
        } else if mime.contains("dash+xml") {
            Some(ManifestKind::Dash)
        } else if mime.contains("vnd.tidal.emu") {
            Some(ManifestKind::Emu)
        } else {
            None
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BtsManifest {
    codecs: Option<String>,
    key_id: Option<String>,
    #[serde(default)]
    urls: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmuManifest {
    #[serde(default)]
    urls: Vec<String>,
}

/// Decode a playback grant into a [`StreamDescriptor`].
pub fn decode(info: &PlaybackInfo) -> Result<StreamDescriptor, CatalogError> {
    let kind = ManifestKind::from_mime(&info.manifest_mime_type).ok_or_else(|| {
        CatalogError::Malformed(format!(
            "unsupported manifest type '{}'",
            info.manifest_mime_type
        ))
    })?;

    let raw = STANDARD
        .decode(info.manifest.trim())
        .map_err(|e| CatalogError::Malformed(format!("manifest is not base64: {e}")))?;

    let (urls, codec, key_id) = match kind {
        ManifestKind::Bts => {
            let doc: BtsManifest = serde_json::from_slice(&raw)
                .map_err(|e| CatalogError::Malformed(format!("bad binary manifest: {e}")))?;
            (doc.urls, doc.codecs, doc.key_id.filter(|k| !k.is_empty()))
        }
        ManifestKind::Dash => {
            let text = String::from_utf8(raw)
                .map_err(|e| CatalogError::Malformed(format!("DASH manifest is not UTF-8: {e}")))?;
            (base_urls(&text), codecs_attribute(&text), None)
        }
        ManifestKind::Emu => {
            let doc: EmuManifest = serde_json::from_slice(&raw)
                .map_err(|e| CatalogError::Malformed(format!("bad video manifest: {e}")))?;
            (doc.urls, None, None)
        }
    };

    let mut urls = urls.into_iter();
    let url = urls.next().ok_or_else(|| {
        CatalogError::Malformed(format!("no URLs in {kind:?} manifest for {}", info.item_id))
    })?;

    debug!(
        "Decoded {:?} manifest for {}: codec={:?}, encrypted={}",
        kind,
        info.item_id,
        codec,
        key_id.is_some()
    );

    Ok(StreamDescriptor {
        url,
        alternates: urls.collect(),
        codec,
        key_id,
        granted_quality: info.granted_quality.clone(),
    })
}

/// Value of the first `codecs="..."` attribute.
fn codecs_attribute(xml: &str) -> Option<String> {
    let (_, rest) = xml.split_once("codecs=\"")?;
    let (value, _) = rest.split_once('"')?;
    Some(value.to_string())
}

/// Contents of every `<BaseURL>...</BaseURL>` element, in document order.
fn base_urls(xml: &str) -> Vec<String> {
    let mut urls = Vec::new();
    let mut rest = xml;
    while let Some((_, after_open)) = rest.split_once("<BaseURL>") {
        let Some((url, after_close)) = after_open.split_once("</BaseURL>") else {
            break;
        };
        let url = url.trim();
        if !url.is_empty() {
            urls.push(url.to_string());
        }
        rest = after_close;
    }
    urls
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(mime: &str, body: &str) -> PlaybackInfo {
        PlaybackInfo {
            item_id: "42".into(),
            granted_quality: Some("LOSSLESS".into()),
            manifest_mime_type: mime.into(),
            manifest: STANDARD.encode(body),
        }
    }

    #[test]
    fn test_decode_bts() {
        let body = r#"{"mimeType":"audio/flac","codecs":"flac","encryptionType":"NONE",
                       "urls":["https://a.test/1","https://b.test/1"]}"#;
        let stream = decode(&info("application/vnd.tidal.bts", body)).unwrap();
        assert_eq!(stream.url, "https://a.test/1");
        assert_eq!(stream.alternates, vec!["https://b.test/1"]);
        assert_eq!(stream.codec.as_deref(), Some("flac"));
        assert!(!stream.is_encrypted());
        assert_eq!(stream.granted_quality.as_deref(), Some("LOSSLESS"));
    }

    #[test]
    fn test_decode_bts_with_key() {
        let body = r#"{"codecs":"mqa","keyId":"abc==","urls":["https://a.test/1"]}"#;
        let stream = decode(&info("application/vnd.tidal.bts", body)).unwrap();
        assert!(stream.is_encrypted());
        assert_eq!(stream.key_id.as_deref(), Some("abc=="));
    }

    #[test]
    fn test_decode_dash() {
        let body = r#"<?xml version="1.0"?>
<MPD><Period><AdaptationSet>
  <Representation id="0" codecs="mp4a.40.2" bandwidth="320000">
    <BaseURL>https://cdn.test/seg/1.mp4</BaseURL>
    <BaseURL>https://cdn.test/seg/2.mp4</BaseURL>
  </Representation>
</AdaptationSet></Period></MPD>"#;
        let stream = decode(&info("application/dash+xml", body)).unwrap();
        assert_eq!(stream.codec.as_deref(), Some("mp4a.40.2"));
        assert_eq!(stream.url, "https://cdn.test/seg/1.mp4");
        assert_eq!(stream.alternates.len(), 1);
    }

    #[test]
    fn test_dash_without_urls_is_malformed() {
        let body = r#"<MPD codecs="flac"><Period/></MPD>"#;
        let err = decode(&info("application/dash+xml", body)).unwrap_err();
        assert!(matches!(err, CatalogError::Malformed(_)));
    }

    #[test]
    fn test_decode_emu_uses_first_url() {
        let body = r#"{"urls":["https://cdn.test/v.m3u8","https://cdn.test/v2.m3u8"]}"#;
        let stream = decode(&info("application/vnd.tidal.emu", body)).unwrap();
        assert_eq!(stream.url, "https://cdn.test/v.m3u8");
        assert!(stream.codec.is_none());
    }

    #[test]
    fn test_unknown_type_is_malformed() {
        let err = decode(&info("application/octet-stream", "{}")).unwrap_err();
        assert!(err.to_string().contains("unsupported manifest type"));
    }

    #[test]
    fn test_invalid_base64_is_malformed() {
        let mut bad = info("application/vnd.tidal.bts", "{}");
        bad.manifest = "%%% not base64 %%%".into();
        assert!(matches!(decode(&bad), Err(CatalogError::Malformed(_))));
    }
}
