//! Header value helpers: titles, dates, time controls

use chrono::NaiveDate;

use crate::model::TimeControl;

const TITLES: [&str; 8] = ["GM", "IM", "FM", "CM", "WGM", "WIM", "WFM", "WCM"];

/// Extract a chess title embedded in a username (`GM_Carlsen`, `Carlsen-IM`)
pub fn extract_title(username: &str) -> Option<&'static str> {
    let upper = username.to_uppercase();
    TITLES.iter().copied().find(|title| {
        [format!("{}_", title), format!("{}-", title)]
            .iter()
            .any(|prefix| upper.starts_with(prefix.as_str()))
            || [format!("_{}", title), format!("-{}", title)]
                .iter()
                .any(|suffix| upper.ends_with(suffix.as_str()))
    })
}

/// Parse a `YYYY.MM.DD` header value.
///
/// Unknown components (`?`) are replaced with `01`; anything unparsable
/// yields `None` since the date is advisory.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    if value.is_empty() || value == "????.??.??" {
        return None;
    }

    let cleaned = value.replace('?', "01");
    let parts: Vec<&str> = cleaned.split('.').collect();
    if parts.len() != 3 {
        return None;
    }

    let year = parts[0].parse::<i32>().ok()?;
    let month = parts[1].parse::<u32>().ok()?;
    let day = parts[2].parse::<u32>().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Categorize a `base+increment` time control by estimated game length
/// (`base + 40 * increment` seconds)
pub fn categorize_time_control(value: &str) -> TimeControl {
    if value.is_empty() || value == "-" {
        return TimeControl::Unknown;
    }

    let total_seconds = match value.split_once('+') {
        Some((base, increment)) => match (base.parse::<i64>(), increment.parse::<i64>()) {
            (Ok(base), Ok(increment)) => base + 40 * increment,
            _ => return TimeControl::Unknown,
        },
        None => match value.parse::<i64>() {
            Ok(base) => base,
            Err(_) => return TimeControl::Unknown,
        },
    };

    if total_seconds < 180 {
        TimeControl::Bullet
    } else if total_seconds < 600 {
        TimeControl::Blitz
    } else if total_seconds < 1500 {
        TimeControl::Rapid
    } else {
        TimeControl::Classical
    }
}
