//! Command implementations for the `pgnstore` binary

pub mod annotate;
pub mod checkpoints;
pub mod games;
pub mod ingest;
pub mod openings;
pub mod players;
pub mod stats;

/// Shorten `text` to `max` characters, marking the cut with "..."
pub(crate) fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        let kept: String = text.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    } else {
        text.to_string()
    }
}

pub(crate) fn percent(rate: f64) -> String {
    format!("{:.1}%", rate * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("Scandinavian", 20), "Scandinavian");
        assert_eq!(truncate("Sicilian Defense: Najdorf", 12), "Sicilian ...");
        assert_eq!(truncate("Réti Opening", 6), "Rét...");
    }

    #[test]
    fn test_percent() {
        assert_eq!(percent(0.5), "50.0%");
        assert_eq!(percent(1.0 / 3.0), "33.3%");
    }
}
