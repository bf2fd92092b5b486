//! Stats command implementation

use anyhow::Result;

use super::percent;
use crate::store::Store;

pub fn run(store: &dyn Store) -> Result<()> {
    let stats = store.stats()?;

    println!("📊 {} store", store.name());
    println!("   Games:       {}", stats.games);
    println!("   Players:     {}", stats.players);
    println!("   Openings:    {}", stats.openings);
    println!("   Checkpoints: {}", stats.checkpoints);

    let by_speed = store.performance_by_time_control()?;
    if by_speed.is_empty() {
        return Ok(());
    }

    println!();
    println!(
        "{:<10} {:>8} {:>8} {:>8} {:>8}",
        "Speed", "Games", "White", "Draw", "Black"
    );
    println!("{}", "-".repeat(46));
    for row in by_speed {
        let rate = |count: i64| percent(count as f64 / row.games.max(1) as f64);
        println!(
            "{:<10} {:>8} {:>8} {:>8} {:>8}",
            row.time_control.map(|t| t.as_str()).unwrap_or("-"),
            row.games,
            rate(row.white_wins),
            rate(row.draws),
            rate(row.black_wins),
        );
    }

    Ok(())
}
