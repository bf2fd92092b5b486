//! Checkpoints command implementation

use anyhow::Result;

use super::truncate;
use crate::store::Store;

pub fn run(store: &dyn Store, limit: usize) -> Result<()> {
    let checkpoints = store.list_checkpoints(limit)?;

    if checkpoints.is_empty() {
        println!("No ingestion runs recorded yet.");
        return Ok(());
    }

    println!(
        "{:<17} {:>10} {:>8} {:>10} {:<6} {}",
        "Started", "Games", "Errors", "Duration", "State", "Source"
    );
    println!("{}", "-".repeat(100));

    for checkpoint in checkpoints {
        println!(
            "{:<17} {:>10} {:>8} {:>9.1}s {:<6} {}",
            checkpoint.started_at.format("%Y-%m-%d %H:%M"),
            checkpoint.games_ingested,
            checkpoint.parse_errors,
            checkpoint.duration_secs,
            if checkpoint.interrupted { "partial" } else { "done" },
            truncate(&checkpoint.source, 45),
        );
    }

    Ok(())
}
