//! Byte transfer: "fetch this URL into that file".
//!
//! [`HttpTransfer`] streams the body into `<dest>.part` and renames it into
//! place once complete, so a destination path either holds a finished file
//! or nothing. A transfer that receives no bytes for the stall timeout is
//! aborted; there is no limit on total duration.
//!
//! HLS playlists (`.m3u8`, used for videos) are resolved to their highest
//! bandwidth variant and the media segments are concatenated in order.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::retry::{RetryError, RetryPolicy, Retryable, parse_retry_after};

/// Errors from a single transfer attempt
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("Connection failed for {url}: {message}")]
    Connect { url: String, message: String },

    #[error("Download stalled - no data received for {}s from {url}", .after.as_secs())]
    Stalled { url: String, after: Duration },

    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    #[error("Rate limited by {url}")]
    RateLimited {
        url: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid playlist {url}: {message}")]
    Playlist { url: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
}

impl TransferError {
    /// Connection failures, stalls and 5xx are worth another try.
    pub fn is_transient(&self) -> bool {
        match self {
            TransferError::Connect { .. } | TransferError::Stalled { .. } => true,
            TransferError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// How the retry schedule treats this error. Rate limits are retried
    /// without spending the transient budget.
    pub fn retryable(&self) -> Retryable {
        match self {
            TransferError::RateLimited { retry_after, .. } => Retryable::RateLimited(*retry_after),
            e if e.is_transient() => Retryable::Transient,
            _ => Retryable::No,
        }
    }
}

/// Fetch a URL to a local file. Returns the number of bytes written.
#[async_trait]
pub trait Transfer: Send + Sync {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64, TransferError>;
}

/// Run `transfer.fetch` under `policy`, retrying transient failures.
pub async fn fetch_with_retry<T: Transfer + ?Sized>(
    transfer: &T,
    policy: &RetryPolicy,
    url: &str,
    dest: &Path,
) -> Result<u64, TransferError> {
    let label = format!("Download of {}", dest.display());
    policy
        .run(
            &label,
            move |_| transfer.fetch(url, dest),
            TransferError::retryable,
        )
        .await
        .map_err(|e| match e {
            RetryError::Fatal(e) => e,
            RetryError::Exhausted { attempts, last } => TransferError::Exhausted {
                attempts,
                last: last.to_string(),
            },
        })
}

/// HTTP implementation of [`Transfer`]
pub struct HttpTransfer {
    client: reqwest::Client,
    stall_timeout: Duration,
}

impl HttpTransfer {
    /// Create a transfer with a bounded connect timeout and no total timeout.
    pub fn new(connect_timeout: Duration, stall_timeout: Duration) -> Result<Self, TransferError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .user_agent(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            ))
            .build()
            .map_err(|e| TransferError::Connect {
                url: String::new(),
                message: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            stall_timeout,
        })
    }

    async fn send(&self, url: &str) -> Result<reqwest::Response, TransferError> {
        let response = tokio::time::timeout(self.stall_timeout, self.client.get(url).send())
            .await
            .map_err(|_| self.stalled(url))?
            .map_err(|e| TransferError::Connect {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            return Err(TransferError::RateLimited {
                url: url.to_string(),
                retry_after,
            });
        }
        if !status.is_success() {
            return Err(TransferError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response)
    }

    /// Append the body of `url` to `file`.
    async fn stream_into(&self, url: &str, file: &mut tokio::fs::File) -> Result<u64, TransferError> {
        let mut stream = self.send(url).await?.bytes_stream();
        let mut written = 0u64;

        loop {
            let next = tokio::time::timeout(self.stall_timeout, stream.next())
                .await
                .map_err(|_| self.stalled(url))?;
            match next {
                Some(Ok(chunk)) => {
                    file.write_all(&chunk).await?;
                    written += chunk.len() as u64;
                }
                Some(Err(e)) => {
                    return Err(TransferError::Connect {
                        url: url.to_string(),
                        message: e.to_string(),
                    });
                }
                None => break,
            }
        }
        Ok(written)
    }

    async fn get_text(&self, url: &str) -> Result<String, TransferError> {
        let response = self.send(url).await?;
        tokio::time::timeout(self.stall_timeout, response.text())
            .await
            .map_err(|_| self.stalled(url))?
            .map_err(|e| TransferError::Connect {
                url: url.to_string(),
                message: e.to_string(),
            })
    }

    /// Resolve an HLS playlist to the ordered list of segment URLs.
    async fn segment_urls(&self, url: &str) -> Result<Vec<String>, TransferError> {
        let text = self.get_text(url).await?;
        let playlist_url = match best_variant(&text) {
            Some(variant) => resolve(url, &variant)?,
            None => url.to_string(),
        };

        let media = if playlist_url == url {
            text
        } else {
            debug!("Using HLS variant {}", playlist_url);
            self.get_text(&playlist_url).await?
        };

        let segments = media_uris(&media)
            .into_iter()
            .map(|uri| resolve(&playlist_url, &uri))
            .collect::<Result<Vec<_>, _>>()?;
        if segments.is_empty() {
            return Err(TransferError::Playlist {
                url: playlist_url,
                message: "no media segments".to_string(),
            });
        }
        Ok(segments)
    }

    fn stalled(&self, url: &str) -> TransferError {
        TransferError::Stalled {
            url: url.to_string(),
            after: self.stall_timeout,
        }
    }
}

impl HttpTransfer {
    /// Write the whole body of `url` into `part`.
    async fn write_part(&self, url: &str, dest: &Path, part: &Path) -> Result<u64, TransferError> {
        let mut file = tokio::fs::File::create(part).await?;

        let written = if is_playlist(url) {
            let segments = self.segment_urls(url).await?;
            debug!("Fetching {} HLS segments into {:?}", segments.len(), dest);
            let mut total = 0;
            for segment in &segments {
                total += self.stream_into(segment, &mut file).await?;
            }
            total
        } else {
            self.stream_into(url, &mut file).await?
        };

        file.sync_all().await?;
        Ok(written)
    }
}

#[async_trait]
impl Transfer for HttpTransfer {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64, TransferError> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let part = part_path(dest);
        let written = match self.write_part(url, dest, &part).await {
            Ok(written) => written,
            Err(e) => {
                if let Err(rm) = tokio::fs::remove_file(&part).await {
                    if rm.kind() != std::io::ErrorKind::NotFound {
                        warn!("Could not remove partial file {:?}: {}", part, rm);
                    }
                }
                return Err(e);
            }
        };
        tokio::fs::rename(&part, dest).await?;

        info!("Downloaded {} bytes to {:?}", written, dest);
        Ok(written)
    }
}

/// `<dest>.part`, the in-flight name of a transfer.
pub fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(OsString::from).unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

fn is_playlist(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.to_ascii_lowercase().ends_with(".m3u8")
}

fn resolve(base: &str, uri: &str) -> Result<String, TransferError> {
    reqwest::Url::parse(base)
        .and_then(|b| b.join(uri))
        .map(String::from)
        .map_err(|e| TransferError::Playlist {
            url: base.to_string(),
            message: format!("bad URI '{uri}': {e}"),
        })
}

/// URI of the highest-bandwidth variant of a master playlist.
fn best_variant(playlist: &str) -> Option<String> {
    let mut best: Option<(u64, String)> = None;
    let mut pending: Option<u64> = None;

    for line in playlist.lines().map(str::trim) {
        if let Some(attrs) = line.strip_prefix("#EXT-X-STREAM-INF:") {
            pending = Some(bandwidth(attrs));
        } else if !line.is_empty() && !line.starts_with('#') {
            if let Some(bw) = pending.take() {
                if best.as_ref().is_none_or(|(b, _)| bw > *b) {
                    best = Some((bw, line.to_string()));
                }
            }
        }
    }
    best.map(|(_, uri)| uri)
}

fn bandwidth(attrs: &str) -> u64 {
    attrs
        .split(',')
        .filter_map(|kv| kv.split_once('='))
        .find(|(k, _)| k.trim() == "BANDWIDTH")
        .and_then(|(_, v)| v.trim().parse().ok())
        .unwrap_or(0)
}

/// Segment URIs of a media playlist, in order.
fn media_uris(playlist: &str) -> Vec<String> {
    playlist
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(String::from)
        .collect()
}
