//! Stream negotiation with quality fallback.
//!
//! A track is requested at one tier and walked down the ladder
//! (`MAX, HI_RES, LOSSLESS, HIGH, LOW`) only while the service answers
//! "not available at this quality". Any other error stops the walk at once.

use tracing::{debug, info};

use super::manifest::{self, StreamDescriptor};
use crate::catalog::{CatalogApi, CatalogError, Quality};

/// A decoded stream plus how it relates to the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiated {
    pub stream: StreamDescriptor,
    pub requested: Quality,
    /// Tier whose request succeeded
    pub tier: Quality,
    /// False when a lower tier had to be used
    pub exact: bool,
}

impl Negotiated {
    /// Quality the service reported, else the tier we asked for.
    pub fn actual_quality(&self) -> String {
        self.stream
            .granted_quality
            .clone()
            .unwrap_or_else(|| self.tier.wire_value().to_string())
    }
}

/// Get a playable stream for `track_id` at the best tier the service grants.
pub async fn negotiate<C: CatalogApi + ?Sized>(
    catalog: &C,
    track_id: &str,
    requested: Quality,
) -> Result<Negotiated, CatalogError> {
    let ladder = requested.fallback_ladder();
    let mut last_error = None;

    for &tier in ladder {
        debug!("Requesting stream for track {} at {}", track_id, tier);
        match catalog.playback_info(track_id, tier).await {
            Ok(info) => {
                let stream = manifest::decode(&info)?;
                // MAX means "best available", so its first tier counts as exact
                let exact = tier == ladder[0];
                if !exact {
                    info!(
                        "Track {}: {} not available, fell back to {}",
                        track_id, requested, tier
                    );
                }
                return Ok(Negotiated {
                    stream,
                    requested,
                    tier,
                    exact,
                });
            }
            Err(e) if e.is_unavailable() => {
                debug!("Track {} not available at {}: {}", track_id, tier, e);
                last_error = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_error.unwrap_or_else(|| {
        CatalogError::Malformed(format!("no quality tiers to try for track {track_id}"))
    }))
}

/// Get the playlist stream for a video. Videos have no quality ladder.
pub async fn negotiate_video<C: CatalogApi + ?Sized>(
    catalog: &C,
    video_id: &str,
    video_quality: &str,
) -> Result<StreamDescriptor, CatalogError> {
    debug!("Requesting video stream for {} at {}", video_id, video_quality);
    let info = catalog.video_playback_info(video_id, video_quality).await?;
    manifest::decode(&info)
}
