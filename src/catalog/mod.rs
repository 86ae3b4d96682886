//! Remote catalog integration
//!
//! Typed entities ([`Track`], [`Album`], [`Video`]), the HTTP client, and the
//! [`CatalogApi`] seam the rest of the crate depends on.

mod adapter;
mod client;
pub mod credentials;
pub mod domain;
pub mod dto;
pub mod traits;

pub use client::CatalogClient;
pub use credentials::{ClientKey, KeyRing, SessionCredentials};
pub use domain::{Album, AlbumSummary, Artist, CatalogError, PlaybackInfo, Quality, Track, Video};
pub use traits::CatalogApi;
