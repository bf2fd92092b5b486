//! Player commands implementation

use anyhow::Result;

use crate::store::Store;

pub fn list(store: &dyn Store, limit: usize) -> Result<()> {
    let players = store.top_players(limit)?;

    if players.is_empty() {
        println!("No players found. Run 'pgnstore ingest' first.");
        return Ok(());
    }

    println!(
        "{:<5} {:<24} {:<6} {:>8} {:>8} {:>8}",
        "#", "Username", "Title", "Rating", "Peak", "Games"
    );
    println!("{}", "-".repeat(64));

    for (rank, player) in players.iter().enumerate() {
        println!(
            "{:<5} {:<24} {:<6} {:>8} {:>8} {:>8}",
            rank + 1,
            player.username,
            player.title.as_deref().unwrap_or("-"),
            player.current_rating,
            player.peak_rating,
            player.games_played,
        );
    }

    Ok(())
}

/// Identity details plus rating history
pub fn show(store: &dyn Store, username: &str) -> Result<()> {
    let Some(player) = store.get_player(username)? else {
        println!("Player not found: {}", username);
        return Ok(());
    };

    match &player.title {
        Some(title) => println!("👤 {} ({})", player.username, title),
        None => println!("👤 {}", player.username),
    }
    println!("   Rating: {}", player.current_rating);
    println!("   Peak:   {}", player.peak_rating);
    println!("   Games:  {}", player.games_played);

    let history = store.rating_history(username)?;
    if !history.is_empty() {
        println!("\n   Rating history:");
        for sample in history {
            println!("   {}  {}", sample.bucket.format("%Y-%m-%d %H:00"), sample.rating);
        }
    }

    Ok(())
}
