//! Application-wide error types.
//!
//! Library modules use specific error types via `thiserror`
//! ([`CatalogError`], [`TransferError`], [`ConfigError`]), while
//! CLI/main uses `anyhow` for convenient error propagation.
//!
//! [`Error`] is what the library store and the orchestrator return: store
//! I/O failures are never swallowed, since losing durability silently would
//! defeat the point of the index.
//!
//! # Example
//!
//! ```ignore
//! use tidekeeper::error::{Error, Result};
//!
//! async fn refresh(store: &LibraryStore) -> Result<()> {
//!     store.load().await?;      // IO / JSON errors auto-convert
//!     store.save().await?;
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;

use crate::catalog::CatalogError;
use crate::config::ConfigError;
use crate::download::TransferError;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level application error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// State (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The state file exists but is not a readable snapshot
    #[error("Corrupt library state at {path}: {message}")]
    CorruptState { path: PathBuf, message: String },

    /// Remote catalog error
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Byte transfer error
    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// File not found
    #[error("File not found: {0}")]
    NotFound(PathBuf),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create a corrupt-state error.
    pub fn corrupt_state(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::CorruptState {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a not found error.
    pub fn not_found(path: impl Into<PathBuf>) -> Self {
        Self::NotFound(path.into())
    }

    /// Add context to an error.
    pub fn context(self, ctx: impl Into<String>) -> Self {
        Self::WithContext {
            context: ctx.into(),
            source: Box::new(self),
        }
    }
}

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Add context to an error result.
    fn with_context(self, ctx: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(ctx))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Io(e).context(ctx))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, serde_json::Error> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Json(e).context(ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::not_found("/music/track.flac");
        assert!(err.to_string().contains("/music/track.flac"));
    }

    #[test]
    fn test_error_with_context() {
        let err = Error::corrupt_state("/data/library_state.json", "unexpected EOF")
            .context("while loading library");
        let msg = err.to_string();
        assert!(msg.contains("while loading library"));
        assert!(msg.contains("unexpected EOF"));
    }

    #[test]
    fn test_catalog_error_converts() {
        let err: Error = CatalogError::Malformed("no manifest".to_string()).into();
        assert!(matches!(err, Error::Catalog(_)));
        assert!(err.to_string().contains("no manifest"));
    }

    #[test]
    fn test_result_ext() {
        let result: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "denied",
        ));
        let with_ctx = result.with_context("writing state");
        assert!(with_ctx.unwrap_err().to_string().contains("writing state"));
    }
}
