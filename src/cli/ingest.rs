//! Ingest command implementation

use anyhow::{bail, Result};
use std::path::{Path, PathBuf};
use tracing::{error, warn};
use walkdir::WalkDir;

use crate::config::Config;
use crate::ingest::{CancelFlag, IngestOptions, StreamingIngestor};
use crate::model::RunSummary;
use crate::store::Store;

pub fn run(
    store: &mut dyn Store,
    config: &Config,
    paths: &[PathBuf],
    max_games: Option<u64>,
) -> Result<()> {
    let sources = expand_sources(paths);
    if sources.is_empty() {
        println!("No PGN files found.");
        return Ok(());
    }

    let cancel = CancelFlag::new();
    listen_for_interrupt(cancel.clone());

    let mut options = IngestOptions::from_config(&config.ingest);
    options.max_games = max_games;

    let mut failed = 0;
    for source in &sources {
        if cancel.is_cancelled() {
            break;
        }
        if options.max_games == Some(0) {
            break;
        }

        println!("📥 {}", source.display());
        let result = StreamingIngestor::new(store.as_backend(), options.clone())
            .with_cancel(cancel.clone())
            .ingest_path(source);

        match result {
            Ok(summary) => {
                print_summary(&summary);
                if let Some(max) = options.max_games {
                    options.max_games = Some(max.saturating_sub(summary.processed));
                }
            }
            Err(e) => {
                error!(source = %source.display(), error = %e, "ingest aborted");
                println!("   ❌ {}\n", e);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        bail!("{} of {} sources could not be ingested", failed, sources.len());
    }
    println!("✅ Ingestion complete!");
    Ok(())
}

/// Files to ingest: plain paths as given, directories expanded to their
/// `.pgn` and `.pgn.zst` files in name order
pub fn expand_sources(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut sources = vec![];
    for path in paths {
        if !path.is_dir() {
            sources.push(path.clone());
            continue;
        }
        let files = WalkDir::new(path)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(error = %e, "skipping unreadable entry");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file() && is_pgn(entry.path()))
            .map(|entry| entry.into_path());
        sources.extend(files);
    }
    sources
}

fn is_pgn(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    name.ends_with(".pgn") || name.ends_with(".pgn.zst")
}

/// Raise `cancel` on Ctrl-C. The listener runs on its own thread so the
/// ingest loop stays synchronous. A second Ctrl-C exits the process without
/// waiting for the current batch.
fn listen_for_interrupt(cancel: CancelFlag) {
    std::thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!(error = %e, "Ctrl-C handling unavailable");
                return;
            }
        };
        runtime.block_on(async {
            while tokio::signal::ctrl_c().await.is_ok() {
                if on_interrupt(&cancel) == Interrupt::ForceExit {
                    std::process::exit(130);
                }
            }
        });
    });
}

#[derive(Debug, PartialEq, Eq)]
enum Interrupt {
    Graceful,
    ForceExit,
}

fn on_interrupt(cancel: &CancelFlag) -> Interrupt {
    if cancel.is_cancelled() {
        error!("second interrupt, exiting without final flush");
        return Interrupt::ForceExit;
    }
    warn!("interrupt received, finishing current batch (Ctrl-C again to force quit)");
    cancel.cancel();
    Interrupt::Graceful
}

fn print_summary(summary: &RunSummary) {
    println!(
        "   {} games ingested, {} persisted, {} rejected in {:.1}s ({:.0} games/s)",
        summary.processed,
        summary.persisted,
        summary.errors,
        summary.duration.as_secs_f64(),
        summary.rate()
    );
    if summary.storage_errors > 0 {
        println!("   ⚠️  {} storage errors", summary.storage_errors);
    }
    if summary.interrupted {
        println!("   ⏸  interrupted, checkpoint recorded");
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{GameQueries, SqliteStore};

    #[test]
    fn test_expand_sources() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("2024");
        std::fs::create_dir_all(&nested).unwrap();
        for name in ["b.pgn", "a.PGN", "notes.txt", "dump.pgn.zst"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        std::fs::write(nested.join("c.pgn"), b"").unwrap();
        let explicit = PathBuf::from("/does/not/exist.pgn");

        let sources = expand_sources(&[dir.path().to_path_buf(), explicit.clone()]);

        let names: Vec<_> = sources
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, ["c.pgn", "a.PGN", "b.pgn", "dump.pgn.zst", "exist.pgn"]);
        assert_eq!(sources.last(), Some(&explicit));
    }

    #[test]
    fn test_run_ingests_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("one.pgn"),
            "[Site \"https://lichess.org/x1\"]\n[White \"Alice\"]\n[Black \"Bob\"]\n\n1. e4 e5 1-0\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("two.pgn"),
            "[Site \"https://lichess.org/x2\"]\n[White \"Bob\"]\n[Black \"Alice\"]\n\n1. d4 d5 0-1\n",
        )
        .unwrap();

        let mut store = SqliteStore::open_in_memory().unwrap();
        run(&mut store, &Config::default(), &[dir.path().to_path_buf()], None).unwrap();
        assert_eq!(store.stats().unwrap().games, 2);
        assert_eq!(store.list_checkpoints(10).unwrap().len(), 2);
    }

    #[test]
    fn test_run_reports_unreadable_source() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SqliteStore::open_in_memory().unwrap();
        let missing = dir.path().join("missing.pgn");

        assert!(run(&mut store, &Config::default(), &[missing], None).is_err());
    }

    #[test]
    fn test_second_interrupt_forces_exit() {
        let cancel = CancelFlag::new();
        assert_eq!(on_interrupt(&cancel), Interrupt::Graceful);
        assert!(cancel.is_cancelled());
        assert_eq!(on_interrupt(&cancel), Interrupt::ForceExit);
    }
}
