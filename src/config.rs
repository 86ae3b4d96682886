//! Configuration system using TOML files.
//!
//! Config is stored in the OS-standard config directory:
//! - Windows: %APPDATA%\tidekeeper\config.toml
//! - macOS: ~/Library/Application Support/tidekeeper/config.toml
//! - Linux: ~/.config/tidekeeper/config.toml
//!
//! The config file is human-readable and editable. Every section falls back
//! to defaults, so a file containing only an access token is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::catalog::Quality;
use crate::download::ResumeScope;
use crate::library::{MatchMode, StorePaths};
use crate::retry::RetryPolicy;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Catalog credentials
    pub credentials: Credentials,

    /// Download behavior
    pub download: DownloadConfig,

    /// Timeouts and retry policy
    pub network: NetworkConfig,

    /// Library index settings
    pub library: LibraryConfig,
}

/// Catalog credentials (obtained by an external login flow)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    /// Bearer token for catalog requests
    pub access_token: Option<String>,

    /// Catalog region, sent with every request
    pub country_code: Option<String>,

    /// Account id, needed for favorites
    pub user_id: Option<String>,

    /// Optional URL of a published client key-ring
    pub keys_url: Option<String>,
}

/// Download settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Root directory for downloaded media
    pub download_path: PathBuf,

    /// Requested audio quality tier
    pub audio_quality: Quality,

    /// Requested video quality (passed through to the catalog)
    pub video_quality: String,

    /// Track path template, relative to `download_path`
    pub track_path_format: String,

    /// Video path template, relative to `download_path`
    pub video_path_format: String,

    /// Download the whole owning album after each requested track
    pub full_albums: bool,

    /// Which interrupted albums to finish before a batch
    pub resume_albums: ResumeScope,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            download_path: dirs::audio_dir()
                .or_else(dirs::home_dir)
                .unwrap_or_else(|| PathBuf::from("."))
                .join("tidekeeper"),
            audio_quality: Quality::High,
            video_quality: "HIGH".to_string(),
            track_path_format: "{artist_name}/{album_name}/{track_number} - {track_title}"
                .to_string(),
            video_path_format: "Videos/{artist_name} - {video_title}".to_string(),
            full_albums: false,
            resume_albums: ResumeScope::Relevant,
        }
    }
}

/// Network settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Seconds allowed to establish a connection
    pub connect_timeout_secs: u64,

    /// Seconds without a single received byte before a transfer counts as stalled
    pub stall_timeout_secs: u64,

    /// Regular backoff attempts before the extended cooldown kicks in
    pub retry_attempts: u32,

    /// Base delay of the exponential backoff
    pub retry_delay_secs: u64,

    /// Attempts made during the extended cooldown before giving up
    pub cooldown_attempts: u32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 30,
            stall_timeout_secs: 60,
            retry_attempts: 3,
            retry_delay_secs: 5,
            cooldown_attempts: 3,
        }
    }
}

impl NetworkConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_secs(self.stall_timeout_secs)
    }

    /// Build the retry policy shared by the catalog client and the transfer.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.retry_attempts,
            base_delay: Duration::from_secs(self.retry_delay_secs),
            cooldown_attempts: self.cooldown_attempts,
            ..RetryPolicy::default()
        }
    }
}

/// Library index settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    /// Override for the unified state file
    pub state_path: Option<PathBuf>,

    /// Directory holding the legacy index files
    pub legacy_dir: Option<PathBuf>,

    /// How aggressively remote items are matched against the index
    pub match_mode: MatchMode,

    /// Delay between catalog calls during metadata backfill
    pub backfill_rate_limit_ms: u64,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            state_path: None,
            legacy_dir: None,
            match_mode: MatchMode::IdOrMetadata,
            backfill_rate_limit_ms: 200,
        }
    }
}

impl LibraryConfig {
    /// Resolve the on-disk locations of the state and legacy files.
    pub fn store_paths(&self) -> StorePaths {
        let data = data_dir().unwrap_or_else(|| PathBuf::from(".data"));
        let legacy_dir = self.legacy_dir.clone().unwrap_or_else(|| data.clone());
        StorePaths {
            state: self
                .state_path
                .clone()
                .unwrap_or_else(|| data.join("library_state.json")),
            legacy_tracks: legacy_dir.join("track_index.json"),
            legacy_albums: legacy_dir.join("album_status.json"),
        }
    }
}

// ============================================================================
// Config File Operations
// ============================================================================

/// Get the config directory path
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("tidekeeper"))
}

/// Get the data directory holding the library state
pub fn data_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join("tidekeeper"))
}

/// Get the full path to the config file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("config.toml"))
}

/// Load configuration from the default location
///
/// Returns default config if file doesn't exist or can't be parsed.
pub fn load() -> Config {
    let Some(path) = config_path() else {
        tracing::warn!("Could not determine config directory, using defaults");
        return Config::default();
    };
    load_from(&path)
}

/// Load configuration from an explicit path
///
/// Logs warnings but doesn't fail - we always return a usable config.
pub fn load_from(path: &Path) -> Config {
    if !path.exists() {
        tracing::info!("No config file found at {:?}, using defaults", path);
        return Config::default();
    }

    match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => {
                tracing::info!("Loaded config from {:?}", path);
                config
            }
            Err(e) => {
                tracing::error!("Failed to parse config file {:?}: {}", path, e);
                tracing::warn!("Using default configuration");
                Config::default()
            }
        },
        Err(e) => {
            tracing::error!("Failed to read config file {:?}: {}", path, e);
            Config::default()
        }
    }
}

/// Apply `edit` to the config file at `path` (default location when `None`)
/// and write it back. Returns the path written.
///
/// Unlike [`load_from`], an unreadable or unparsable file is an error, so a
/// broken config is never replaced by defaults.
pub fn update(
    path: Option<&Path>,
    edit: impl FnOnce(&mut Config),
) -> Result<PathBuf, ConfigError> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => config_path().ok_or(ConfigError::NoConfigDir)?,
    };

    let mut config = match std::fs::read_to_string(&path) {
        Ok(contents) => {
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(path.clone(), e))?
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Config::default(),
        Err(e) => return Err(ConfigError::Read(path, e)),
    };

    edit(&mut config);
    save_to(&config, &path)?;
    Ok(path)
}

/// Save configuration to an explicit path (write to temp, then rename)
pub fn save_to(config: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| ConfigError::CreateDir(dir.to_path_buf(), e))?;
    }

    let contents = toml::to_string_pretty(config).map_err(ConfigError::Serialize)?;

    let temp_path = path.with_extension("toml.tmp");
    std::fs::write(&temp_path, &contents).map_err(|e| ConfigError::Write(temp_path.clone(), e))?;
    std::fs::rename(&temp_path, path)
        .map_err(|e| ConfigError::Rename(temp_path, path.to_path_buf(), e))?;

    tracing::info!("Saved config to {:?}", path);
    Ok(())
}

// ============================================================================
// Error Types
// ============================================================================

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Failed to create config directory {0}: {1}")]
    CreateDir(PathBuf, std::io::Error),

    #[error("Failed to read config {0}: {1}")]
    Read(PathBuf, std::io::Error),

    #[error("Failed to parse config {0}: {1}")]
    Parse(PathBuf, toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),

    #[error("Failed to write config to {0}: {1}")]
    Write(PathBuf, std::io::Error),

    #[error("Failed to rename temp file {0} to {1}: {2}")]
    Rename(PathBuf, PathBuf, std::io::Error),

    #[error("Missing required setting: {0}")]
    Missing(&'static str),
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_serializes() {
        let config = Config::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        assert!(toml.contains("[credentials]"));
        assert!(toml.contains("[download]"));
        assert!(toml.contains("[network]"));
        assert!(toml.contains("[library]"));
    }

    #[test]
    fn test_config_roundtrip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.credentials.access_token = Some("token-123".to_string());
        config.download.audio_quality = Quality::Lossless;
        config.download.full_albums = true;
        config.library.match_mode = MatchMode::Id;

        save_to(&config, &path).unwrap();
        assert!(!path.with_extension("toml.tmp").exists());

        let parsed = load_from(&path);
        assert_eq!(parsed.credentials.access_token.as_deref(), Some("token-123"));
        assert_eq!(parsed.download.audio_quality, Quality::Lossless);
        assert!(parsed.download.full_albums);
        assert_eq!(parsed.library.match_mode, MatchMode::Id);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let toml = r#"
[credentials]
access_token = "abc"

[download]
audio_quality = "HI_RES"
resume_albums = "all"
"#;
        let config: Config = toml::from_str(toml).unwrap();

        assert_eq!(config.credentials.access_token.as_deref(), Some("abc"));
        assert_eq!(config.download.audio_quality, Quality::HiRes);
        assert_eq!(config.download.resume_albums, ResumeScope::All);

        // Other fields use defaults
        assert_eq!(config.network.stall_timeout_secs, 60);
        assert_eq!(config.library.match_mode, MatchMode::IdOrMetadata);
        assert!(!config.download.full_albums);
    }

    #[test]
    fn test_unparseable_config_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "this is [ not toml").unwrap();

        let config = load_from(&path);
        assert!(config.credentials.access_token.is_none());
    }

    #[test]
    fn test_update_keeps_other_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[credentials]\naccess_token = \"from-file\"\n").unwrap();

        let written = update(Some(&path), |c| {
            c.credentials.keys_url = Some("https://keys.test/ring.json".into());
        })
        .unwrap();

        assert_eq!(written, path);
        let parsed = load_from(&path);
        assert_eq!(parsed.credentials.access_token.as_deref(), Some("from-file"));
        assert_eq!(
            parsed.credentials.keys_url.as_deref(),
            Some("https://keys.test/ring.json")
        );
    }

    #[test]
    fn test_update_refuses_to_overwrite_broken_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "this is [ not toml").unwrap();

        let err = update(Some(&path), |c| c.download.full_albums = true).unwrap_err();

        assert!(matches!(err, ConfigError::Parse(..)));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "this is [ not toml");
    }

    #[test]
    fn test_store_paths_honor_overrides() {
        let library = LibraryConfig {
            state_path: Some(PathBuf::from("/tmp/state.json")),
            legacy_dir: Some(PathBuf::from("/tmp/legacy")),
            ..Default::default()
        };
        let paths = library.store_paths();
        assert_eq!(paths.state, PathBuf::from("/tmp/state.json"));
        assert_eq!(paths.legacy_tracks, PathBuf::from("/tmp/legacy/track_index.json"));
        assert_eq!(paths.legacy_albums, PathBuf::from("/tmp/legacy/album_status.json"));
    }

    #[test]
    fn test_retry_policy_from_network_config() {
        let network = NetworkConfig {
            retry_attempts: 5,
            retry_delay_secs: 2,
            ..Default::default()
        };
        let policy = network.retry_policy();
        assert_eq!(policy.attempts, 5);
        assert_eq!(policy.base_delay, Duration::from_secs(2));
    }
}
