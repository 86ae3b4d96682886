//! Download commands.

use std::sync::Arc;

use tokio::runtime::Runtime;
use tracing::warn;

use super::{DownloadArgs, DownloadTarget, catalog_client, open_store};
use crate::catalog::CatalogApi;
use crate::config::Config;
use crate::download::{
    BatchReport, ConsoleObserver, DownloadOptions, HttpTransfer, Orchestrator, Provenance,
};
use crate::library::{LibraryStore, MatchMode, MissingReport};

/// Run one download batch and print its summary.
pub fn cmd_download(
    rt: &Runtime,
    config: &Config,
    args: &DownloadArgs,
    target: &DownloadTarget,
) -> anyhow::Result<()> {
    let mut options = DownloadOptions::from_config(config);
    if let Some(quality) = args.quality {
        options.quality = quality;
    }
    if args.full_albums {
        options.full_albums = true;
    }
    if let Some(resume) = args.resume {
        options.resume = resume;
    }
    let match_mode = options.match_mode;

    rt.block_on(async {
        let catalog: Arc<dyn CatalogApi> = Arc::new(catalog_client(config)?);
        let store = open_store(config);
        store.load().await?;
        let transfer = Arc::new(HttpTransfer::new(
            config.network.connect_timeout(),
            config.network.stall_timeout(),
        )?);

        println!(
            "Downloading at {} into {}",
            options.quality,
            options.download_root.display()
        );
        let orchestrator = Orchestrator::new(catalog.clone(), store.clone(), transfer, options)
            .with_observer(Arc::new(ConsoleObserver {
                verbose: args.verbose,
            }));

        let report = match target {
            DownloadTarget::Tracks { ids } => orchestrator.download_track_ids(ids).await?,
            DownloadTarget::Albums { ids } => {
                for id in ids {
                    print_album_report(catalog.as_ref(), &store, id, match_mode).await;
                }
                orchestrator.download_albums(ids).await?
            }
            DownloadTarget::Favorites => {
                let favorites = catalog.favorite_tracks().await?;
                let missing = store.missing_for_tracks(&favorites, match_mode).await?;
                print_missing("Favorites", &missing);
                orchestrator
                    .download_tracks(&favorites, &Provenance::favorites())
                    .await?
            }
            DownloadTarget::Videos { ids } => orchestrator.download_videos(ids).await?,
        };

        print_failures(&report);
        Ok(())
    })
}

async fn print_album_report(
    catalog: &dyn CatalogApi,
    store: &LibraryStore,
    album_id: &str,
    match_mode: MatchMode,
) {
    // The orchestrator reports fetch errors per album; this is only a preview
    let album = match catalog.get_album(album_id).await {
        Ok(album) => album,
        Err(e) => {
            warn!("Could not preview album {}: {}", album_id, e);
            return;
        }
    };
    match store.missing_for_album(&album, match_mode).await {
        Ok(missing) => print_missing(&album.title, &missing),
        Err(e) => warn!("Could not check album {} against the index: {}", album_id, e),
    }
}

fn print_missing(label: &str, report: &MissingReport) {
    println!(
        "{}: {} of {} tracks not in the library",
        label, report.missing, report.total
    );
    for track in &report.sample {
        println!("  - {} - {}", track.artist_names(), track.title);
    }
    if report.missing > report.sample.len() {
        println!("  ... and {} more", report.missing - report.sample.len());
    }
}

fn print_failures(report: &BatchReport) {
    let album_tracks = report.albums.iter().flat_map(|a| a.tracks.iter());
    let failed: Vec<_> = report
        .outcomes
        .iter()
        .chain(album_tracks)
        .filter(|o| o.is_failed())
        .collect();
    if failed.is_empty() {
        return;
    }
    eprintln!("\nFailed items:");
    for outcome in failed {
        eprintln!("  {} ({})", outcome.describe(), outcome.id);
    }
}
