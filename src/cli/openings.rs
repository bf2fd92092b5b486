//! Opening commands implementation

use anyhow::Result;

use super::{percent, truncate};
use crate::store::Store;

pub fn list(store: &dyn Store, min_games: i64, limit: usize) -> Result<()> {
    let openings = store.opening_stats(min_games, limit)?;

    if openings.is_empty() {
        println!("No openings found. Run 'pgnstore ingest' first.");
        return Ok(());
    }

    println!(
        "{:<6} {:<32} {:>8} {:>8} {:>8} {:>8} {:>8}",
        "ECO", "Name", "Games", "White", "Draw", "Black", "Avg Elo"
    );
    println!("{}", "-".repeat(86));

    for opening in openings {
        println!(
            "{:<6} {:<32} {:>8} {:>8} {:>8} {:>8} {:>8.0}",
            opening.opening_code,
            truncate(&opening.opening_name, 32),
            opening.total_games,
            percent(opening.white_win_rate()),
            percent(opening.draw_rate()),
            percent(opening.black_win_rate()),
            opening.average_rating(),
        );
    }

    Ok(())
}

/// One opening's totals and its most recent games
pub fn show(store: &dyn Store, opening_code: &str, limit: usize) -> Result<()> {
    let Some(opening) = store.get_opening(opening_code)? else {
        println!("Opening not found: {}", opening_code);
        return Ok(());
    };

    println!("📖 {} {}", opening.opening_code, opening.opening_name);
    println!("   Games:   {}", opening.total_games);
    println!(
        "   Results: {} white / {} draw / {} black",
        percent(opening.white_win_rate()),
        percent(opening.draw_rate()),
        percent(opening.black_win_rate())
    );
    println!("   Avg Elo: {:.0}", opening.average_rating());
    println!();

    let games = store.load_opening_games(opening_code, limit)?;
    super::games::print_table(&games);
    Ok(())
}
