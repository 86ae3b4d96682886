//! CLI command definitions and dispatch.
//!
//! Each command group is implemented in its own submodule:
//! - `download`: track, album, favorites and video batches
//! - `library`: index inspection and maintenance
//! - `keys`: client key-ring refresh and inspection

mod download;
mod keys;
mod library;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tokio::runtime::Runtime;

use crate::catalog::{CatalogClient, Quality, SessionCredentials};
use crate::config::{self, Config};
use crate::download::ResumeScope;
use crate::library::LibraryStore;

pub use download::cmd_download;
pub use keys::{cmd_keys_refresh, cmd_keys_show};
pub use library::{
    cmd_backfill_dates, cmd_backfill_metadata, cmd_counts, cmd_incomplete, cmd_prune_albums,
    cmd_verify, cmd_wipe,
};

/// Tidekeeper: keep a local copy of your streaming library in sync
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Access token, overriding the config file
    #[arg(long, global = true, env = "TIDEKEEPER_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Use this config file instead of the default location
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand)]
pub enum Commands {
    /// Download items into the library
    Download {
        #[command(subcommand)]
        target: DownloadTarget,
        #[command(flatten)]
        args: DownloadArgs,
    },
    /// Inspect and maintain the library index
    Library {
        #[command(subcommand)]
        command: LibraryCommand,
    },
    /// Manage client keys
    Keys {
        #[command(subcommand)]
        command: KeysCommand,
    },
}

/// What to download
#[derive(Subcommand)]
pub enum DownloadTarget {
    /// Download tracks by id
    Tracks {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Download whole albums by id
    Albums {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Download your favorite tracks
    Favorites,
    /// Download videos by id
    Videos {
        #[arg(required = true)]
        ids: Vec<String>,
    },
}

/// Options shared by every download target
#[derive(Args, Debug, Clone, Default)]
pub struct DownloadArgs {
    /// Requested audio quality: MAX, HI_RES, LOSSLESS, HIGH or LOW
    #[arg(short, long, global = true)]
    pub quality: Option<Quality>,

    /// Also download the album of every requested track
    #[arg(long, global = true)]
    pub full_albums: bool,

    /// Which interrupted albums to finish first
    #[arg(long, global = true, value_enum)]
    pub resume: Option<ResumeScope>,

    /// Print every item as it starts
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum LibraryCommand {
    /// Show how many tracks, albums and videos are indexed
    Counts,
    /// Reset the index
    Wipe {
        /// Do not keep timestamped copies of the current files
        #[arg(long)]
        no_backup: bool,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// List albums that are only partly downloaded
    Incomplete,
    /// Fill missing artist, album and title fields from the catalog
    BackfillMetadata {
        /// Stop after this many tracks
        #[arg(long)]
        max: Option<usize>,
        /// Also correct the favorites flag against the remote favorites
        #[arg(long)]
        reconcile_favorites: bool,
    },
    /// Fill missing download dates from file modification times
    BackfillDates,
    /// Remove in-progress albums that have not changed for a while
    PruneAlbums {
        /// Maximum age in days
        #[arg(long, default_value = "7")]
        days: i64,
    },
    /// Re-check that indexed files still exist
    Verify {
        #[arg(required = true)]
        ids: Vec<String>,
    },
}

#[derive(Subcommand)]
pub enum KeysCommand {
    /// Download the client key-ring to the config directory
    Refresh {
        /// Key-ring location, overriding `credentials.keys_url`
        #[arg(long)]
        url: Option<String>,
    },
    /// Print the stored client key-ring
    Show,
}

/// Run the specified CLI command.
pub fn run_command(cli: &Cli) -> anyhow::Result<()> {
    let rt = Runtime::new()?;
    let config = load_config(cli);

    match &cli.command {
        Commands::Download { target, args } => cmd_download(&rt, &config, args, target),
        Commands::Library { command } => match command {
            LibraryCommand::Counts => cmd_counts(&rt, &config),
            LibraryCommand::Wipe { no_backup, yes } => cmd_wipe(&rt, &config, !*no_backup, *yes),
            LibraryCommand::Incomplete => cmd_incomplete(&rt, &config),
            LibraryCommand::BackfillMetadata {
                max,
                reconcile_favorites,
            } => cmd_backfill_metadata(&rt, &config, *max, *reconcile_favorites),
            LibraryCommand::BackfillDates => cmd_backfill_dates(&rt, &config),
            LibraryCommand::PruneAlbums { days } => cmd_prune_albums(&rt, &config, *days),
            LibraryCommand::Verify { ids } => cmd_verify(&rt, &config, ids),
        },
        Commands::Keys { command } => match command {
            KeysCommand::Refresh { url } => {
                cmd_keys_refresh(&rt, &config, cli.config.as_deref(), url.as_deref())
            }
            KeysCommand::Show => cmd_keys_show(),
        },
    }
}

// ============================================================================
// Shared helper functions
// ============================================================================

/// Config file plus command-line overrides
fn load_config(cli: &Cli) -> Config {
    let mut config = match &cli.config {
        Some(path) => config::load_from(path),
        None => config::load(),
    };
    if let Some(token) = &cli.token {
        config.credentials.access_token = Some(token.clone());
    }
    config
}

pub(crate) fn open_store(config: &Config) -> Arc<LibraryStore> {
    Arc::new(LibraryStore::new(config.library.store_paths()))
}

pub(crate) fn catalog_client(config: &Config) -> anyhow::Result<CatalogClient> {
    let session = SessionCredentials::from_config(&config.credentials)?;
    let client = CatalogClient::new(
        session,
        config.network.retry_policy(),
        config.network.connect_timeout(),
        config.network.stall_timeout(),
    )?;
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_download_flags_after_target() {
        let cli = Cli::try_parse_from([
            "tidekeeper",
            "download",
            "albums",
            "123",
            "456",
            "--quality",
            "lossless",
            "--resume",
            "all",
        ])
        .unwrap();

        match cli.command {
            Commands::Download {
                target: DownloadTarget::Albums { ids },
                args,
            } => {
                assert_eq!(ids, vec!["123", "456"]);
                assert_eq!(args.quality, Some(Quality::Lossless));
                assert_eq!(args.resume, Some(ResumeScope::All));
                assert!(!args.full_albums);
            }
            _ => panic!("expected an album download"),
        }
    }

    #[test]
    fn test_ids_are_required() {
        assert!(Cli::try_parse_from(["tidekeeper", "download", "tracks"]).is_err());
        assert!(Cli::try_parse_from(["tidekeeper", "library", "verify"]).is_err());
    }

    #[test]
    fn test_bad_quality_is_rejected() {
        let result =
            Cli::try_parse_from(["tidekeeper", "download", "favorites", "--quality", "ultra"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_library_commands() {
        let cli =
            Cli::try_parse_from(["tidekeeper", "library", "wipe", "--no-backup", "--yes"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Library {
                command: LibraryCommand::Wipe {
                    no_backup: true,
                    yes: true
                }
            }
        ));

        let cli = Cli::try_parse_from(["tidekeeper", "library", "prune-albums"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Library {
                command: LibraryCommand::PruneAlbums { days: 7 }
            }
        ));
    }

    #[test]
    fn test_keys_commands() {
        let cli = Cli::try_parse_from([
            "tidekeeper",
            "keys",
            "refresh",
            "--url",
            "https://keys.test/ring.json",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Keys {
                command: KeysCommand::Refresh { url: Some(_) }
            }
        ));

        let cli = Cli::try_parse_from(["tidekeeper", "keys", "show"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Keys {
                command: KeysCommand::Show
            }
        ));
    }

    #[test]
    fn test_token_flag_overrides_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[credentials]\naccess_token = \"from-file\"\n").unwrap();

        let cli = Cli::try_parse_from([
            "tidekeeper",
            "--config",
            path.to_str().unwrap(),
            "--token",
            "from-flag",
            "library",
            "counts",
        ])
        .unwrap();
        let config = load_config(&cli);
        assert_eq!(config.credentials.access_token.as_deref(), Some("from-flag"));
    }
}
