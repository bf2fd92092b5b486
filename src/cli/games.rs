//! Games command implementation

use anyhow::Result;

use super::truncate;
use crate::model::GameRecord;
use crate::store::Store;

pub fn run(store: &dyn Store, username: &str, limit: usize) -> Result<()> {
    let games = store.load_games(username, limit)?;

    if games.is_empty() {
        println!("No games found for {}.", username);
        return Ok(());
    }

    print_table(&games);
    Ok(())
}

pub(crate) fn print_table(games: &[GameRecord]) {
    println!(
        "{:<10} {:<12} {:<22} {:<22} {:<8} {:<5} {:<10} {}",
        "Date", "ID", "White", "Black", "Result", "ECO", "Speed", "Moves"
    );
    println!("{}", "-".repeat(100));

    for game in games {
        let date = game
            .date
            .map(|d| d.to_string())
            .unwrap_or_else(|| "-".to_string());

        println!(
            "{:<10} {:<12} {:<22} {:<22} {:<8} {:<5} {:<10} {}",
            date,
            truncate(&game.external_id, 12),
            truncate(&format!("{} ({})", game.white_username, game.white_rating), 22),
            truncate(&format!("{} ({})", game.black_username, game.black_rating), 22),
            game.result.as_pgn(),
            game.opening_code,
            game.time_control.as_str(),
            game.ply_count(),
        );
    }
}
