//! Library index maintenance commands.

use std::io::{self, BufRead, Write};
use std::time::Duration;

use tokio::runtime::Runtime;

use super::{catalog_client, open_store};
use crate::config::Config;
use crate::library::{AlbumRecord, BackfillOptions};

/// Print index counts
pub fn cmd_counts(rt: &Runtime, config: &Config) -> anyhow::Result<()> {
    rt.block_on(async {
        let store = open_store(config);
        let counts = store.counts().await?;
        println!("Library: {}", store.paths().state.display());
        println!("  Tracks: {}", counts.tracks);
        println!("  Albums: {}", counts.albums);
        println!("  Videos: {}", counts.videos);
        Ok(())
    })
}

/// Reset the index, asking first unless `yes` is set
pub fn cmd_wipe(rt: &Runtime, config: &Config, backup: bool, yes: bool) -> anyhow::Result<()> {
    if !yes && !confirm("This removes every track, album and video record. Continue?")? {
        println!("Aborted.");
        return Ok(());
    }

    rt.block_on(async {
        let store = open_store(config);
        let report = store.wipe(backup).await?;
        println!(
            "Wiped {} tracks, {} albums, {} videos.",
            report.previous.tracks, report.previous.albums, report.previous.videos
        );
        for path in &report.backups {
            println!("  Backup: {}", path.display());
        }
        Ok(())
    })
}

/// List albums that are started but not finished
pub fn cmd_incomplete(rt: &Runtime, config: &Config) -> anyhow::Result<()> {
    rt.block_on(async {
        let store = open_store(config);
        let incomplete = store.get_incomplete().await?;
        if incomplete.is_empty() {
            println!("No incomplete albums.");
            return Ok(());
        }

        println!("{} incomplete albums:", incomplete.len());
        for (id, record) in &incomplete {
            for line in describe_incomplete(id, record) {
                println!("{}", line);
            }
        }
        Ok(())
    })
}

pub fn cmd_backfill_metadata(
    rt: &Runtime,
    config: &Config,
    max_items: Option<usize>,
    reconcile_favorites: bool,
) -> anyhow::Result<()> {
    rt.block_on(async {
        let catalog = catalog_client(config)?;
        let store = open_store(config);
        let options = BackfillOptions {
            max_items,
            reconcile_favorites,
            rate_limit: Duration::from_millis(config.library.backfill_rate_limit_ms),
        };

        let report = store.backfill_metadata(&catalog, &options).await?;
        println!("Metadata backfill:");
        println!("  Candidates: {}", report.total_candidates);
        println!("  Updated:    {}", report.updated);
        println!("  Skipped:    {}", report.skipped);
        println!("  Errors:     {}", report.errors);
        if reconcile_favorites {
            println!("  Favorites reconciled: {}", report.reconciled_favorites);
        }
        Ok(())
    })
}

pub fn cmd_backfill_dates(rt: &Runtime, config: &Config) -> anyhow::Result<()> {
    rt.block_on(async {
        let store = open_store(config);
        let report = store.backfill_downloaded_at().await?;
        println!("Download-date backfill:");
        println!("  Tracks:      {}", report.total);
        println!("  Already set: {}", report.already_set);
        println!("  Updated:     {}", report.updated);
        if report.used_current_time > 0 {
            println!(
                "  {} files were missing; their date is the current time",
                report.used_current_time
            );
        }
        Ok(())
    })
}

pub fn cmd_prune_albums(rt: &Runtime, config: &Config, days: i64) -> anyhow::Result<()> {
    rt.block_on(async {
        let store = open_store(config);
        let removed = store
            .prune_stale_albums(chrono::Duration::days(days))
            .await?;
        println!(
            "Removed {} in-progress albums older than {} days.",
            removed, days
        );
        Ok(())
    })
}

pub fn cmd_verify(rt: &Runtime, config: &Config, ids: &[String]) -> anyhow::Result<()> {
    rt.block_on(async {
        let store = open_store(config);
        let refreshed = store.quick_verify(ids).await?;
        for id in ids {
            match store.track(id).await? {
                Some(record) => {
                    let icon = if record.exists_on_disk { "✓" } else { "✗" };
                    let path = record
                        .file_path
                        .as_deref()
                        .map(|p| p.display().to_string())
                        .unwrap_or_default();
                    println!("  {} {} {}", icon, id, path);
                }
                None => println!("  ? {} not in index", id),
            }
        }
        println!("Verified {} of {} tracks.", refreshed, ids.len());
        Ok(())
    })
}

/// Summary line of an unfinished album plus the track ids still to fetch.
fn describe_incomplete(id: &str, record: &AlbumRecord) -> Vec<String> {
    let mut lines = vec![format!(
        "  {} [{}]: {}/{} tracks, last updated {}",
        record.title,
        id,
        record.downloaded_count(),
        record.total_tracks,
        record.last_updated.format("%Y-%m-%d %H:%M")
    )];
    let remaining = record.remaining_tracks();
    if !remaining.is_empty() {
        lines.push(format!("    missing: {}", remaining.join(", ")));
    }
    lines
}

fn confirm(prompt: &str) -> io::Result<bool> {
    print!("{} [y/N] ", prompt);
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incomplete_album_lists_missing_tracks() {
        let record = AlbumRecord {
            title: "LP".into(),
            total_tracks: 3,
            track_ids: vec!["a".into(), "b".into(), "c".into()],
            downloaded_track_ids: ["b".to_string()].into_iter().collect(),
            ..Default::default()
        };

        let lines = describe_incomplete("42", &record);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("LP [42]: 1/3 tracks"));
        assert_eq!(lines[1], "    missing: a, c");
    }

    #[test]
    fn test_unknown_listing_prints_summary_only() {
        let record = AlbumRecord {
            title: "LP".into(),
            total_tracks: 3,
            downloaded_track_ids: ["b".to_string()].into_iter().collect(),
            ..Default::default()
        };
        assert_eq!(describe_incomplete("42", &record).len(), 1);
    }
}
