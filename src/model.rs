//! Normalized entities shared by the parser, the ingestor and both stores

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lowest accepted rating
pub const MIN_RATING: i32 = 0;
/// Highest accepted rating
pub const MAX_RATING: i32 = 3500;
/// Rating assumed when a header omits it
pub const DEFAULT_RATING: i32 = 1500;
/// Opening code assumed when the `ECO` header is absent
pub const DEFAULT_OPENING_CODE: &str = "A00";

/// Opaque player reference handed out by a store.
///
/// The relational store uses its integer row id, the document store a UUID.
/// Callers must treat the value as a foreign key and never interpret it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(String);

impl PlayerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Game outcome as recorded in the `Result` header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GameResult {
    WhiteWin,
    BlackWin,
    Draw,
    Unknown,
}

impl GameResult {
    pub fn from_pgn(value: &str) -> Self {
        match value {
            "1-0" => GameResult::WhiteWin,
            "0-1" => GameResult::BlackWin,
            "1/2-1/2" => GameResult::Draw,
            _ => GameResult::Unknown,
        }
    }

    pub fn as_pgn(&self) -> &'static str {
        match self {
            GameResult::WhiteWin => "1-0",
            GameResult::BlackWin => "0-1",
            GameResult::Draw => "1/2-1/2",
            GameResult::Unknown => "*",
        }
    }

    pub const ALL: [GameResult; 4] = [
        GameResult::WhiteWin,
        GameResult::BlackWin,
        GameResult::Draw,
        GameResult::Unknown,
    ];
}

/// Time-control category derived from the `TimeControl` header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeControl {
    Bullet,
    Blitz,
    Rapid,
    Classical,
    Unknown,
}

impl TimeControl {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeControl::Bullet => "bullet",
            TimeControl::Blitz => "blitz",
            TimeControl::Rapid => "rapid",
            TimeControl::Classical => "classical",
            TimeControl::Unknown => "unknown",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "bullet" => TimeControl::Bullet,
            "blitz" => TimeControl::Blitz,
            "rapid" => TimeControl::Rapid,
            "classical" => TimeControl::Classical,
            _ => TimeControl::Unknown,
        }
    }
}

/// Downstream annotation attached after ingestion (engine accuracy etc.)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GameAnnotation {
    #[serde(default)]
    pub white_accuracy: Option<f64>,
    #[serde(default)]
    pub black_accuracy: Option<f64>,
    #[serde(default)]
    pub acpl: Option<i32>,
}

impl GameAnnotation {
    pub fn is_empty(&self) -> bool {
        self.white_accuracy.is_none() && self.black_accuracy.is_none() && self.acpl.is_none()
    }

    /// Overlay the fields that `patch` sets, leaving the others untouched
    pub fn apply(&mut self, patch: &GameAnnotation) {
        if patch.white_accuracy.is_some() {
            self.white_accuracy = patch.white_accuracy;
        }
        if patch.black_accuracy.is_some() {
            self.black_accuracy = patch.black_accuracy;
        }
        if patch.acpl.is_some() {
            self.acpl = patch.acpl;
        }
    }
}

/// One played game, normalized and bound to resolved player identities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameRecord {
    pub external_id: String,
    pub white_player_id: PlayerId,
    pub black_player_id: PlayerId,
    pub white_username: String,
    pub black_username: String,
    pub white_rating: i32,
    pub black_rating: i32,
    pub result: GameResult,
    pub date: Option<NaiveDate>,
    pub opening_code: String,
    pub opening_name: String,
    pub time_control: TimeControl,
    pub moves: Vec<String>,
    pub event: String,
    pub site: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub annotation: GameAnnotation,
}

impl GameRecord {
    /// Approximate heap + inline footprint, used for the flush threshold
    pub fn estimated_size(&self) -> usize {
        let strings = self.external_id.len()
            + self.white_player_id.as_str().len()
            + self.black_player_id.as_str().len()
            + self.white_username.len()
            + self.black_username.len()
            + self.opening_code.len()
            + self.opening_name.len()
            + self.event.len()
            + self.site.len();
        let moves: usize = self
            .moves
            .iter()
            .map(|m| m.len() + std::mem::size_of::<String>())
            .sum();
        std::mem::size_of::<GameRecord>() + strings + moves
    }

    pub fn ply_count(&self) -> usize {
        self.moves.len()
    }
}

/// Identity observation passed to `resolve_player`
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerObservation {
    pub username: String,
    pub rating: i32,
    pub title: Option<String>,
    /// Game date, used to timestamp the rating-history sample
    pub observed_on: Option<NaiveDate>,
}

/// One player's rolling statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerIdentity {
    pub id: PlayerId,
    pub username: String,
    pub title: Option<String>,
    pub current_rating: i32,
    pub peak_rating: i32,
    pub games_played: i64,
}

/// Rating observation bucketed to the hour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingSample {
    pub username: String,
    pub bucket: DateTime<Utc>,
    pub rating: i32,
}

/// Additive per-opening increment produced by one or more games
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpeningDelta {
    /// First name seen for the code; `None` until a game is folded in
    pub opening_name: Option<String>,
    pub total_games: i64,
    pub white_wins: i64,
    pub black_wins: i64,
    pub draws: i64,
    pub white_rating_sum: i64,
    pub black_rating_sum: i64,
}

impl OpeningDelta {
    /// Delta contributed by a single game
    pub fn for_game(opening_name: &str, result: GameResult, white_rating: i32, black_rating: i32) -> Self {
        Self {
            opening_name: Some(opening_name.to_string()),
            total_games: 1,
            white_wins: (result == GameResult::WhiteWin) as i64,
            black_wins: (result == GameResult::BlackWin) as i64,
            draws: (result == GameResult::Draw) as i64,
            white_rating_sum: white_rating as i64,
            black_rating_sum: black_rating as i64,
        }
    }

    pub fn name(&self) -> &str {
        self.opening_name.as_deref().unwrap_or_default()
    }

    /// Fold `other` into `self`. The name already held wins.
    pub fn merge(&mut self, other: &OpeningDelta) {
        if self.opening_name.is_none() {
            self.opening_name = other.opening_name.clone();
        }
        self.total_games += other.total_games;
        self.white_wins += other.white_wins;
        self.black_wins += other.black_wins;
        self.draws += other.draws;
        self.white_rating_sum += other.white_rating_sum;
        self.black_rating_sum += other.black_rating_sum;
    }
}

/// Persisted per-opening rollup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpeningAggregate {
    pub opening_code: String,
    pub opening_name: String,
    pub total_games: i64,
    pub white_wins: i64,
    pub black_wins: i64,
    pub draws: i64,
    pub white_rating_sum: i64,
    pub black_rating_sum: i64,
}

impl OpeningAggregate {
    /// Row created by the first upsert for `code`
    pub fn from_delta(code: &str, delta: &OpeningDelta) -> Self {
        Self {
            opening_code: code.to_string(),
            opening_name: delta.name().to_string(),
            total_games: delta.total_games,
            white_wins: delta.white_wins,
            black_wins: delta.black_wins,
            draws: delta.draws,
            white_rating_sum: delta.white_rating_sum,
            black_rating_sum: delta.black_rating_sum,
        }
    }

    /// Additive increment; the name is never overwritten
    pub fn increment(&mut self, delta: &OpeningDelta) {
        self.total_games += delta.total_games;
        self.white_wins += delta.white_wins;
        self.black_wins += delta.black_wins;
        self.draws += delta.draws;
        self.white_rating_sum += delta.white_rating_sum;
        self.black_rating_sum += delta.black_rating_sum;
    }

    fn ratio(count: i64, total: i64) -> f64 {
        if total == 0 {
            0.0
        } else {
            count as f64 / total as f64
        }
    }

    pub fn white_win_rate(&self) -> f64 {
        Self::ratio(self.white_wins, self.total_games)
    }

    pub fn black_win_rate(&self) -> f64 {
        Self::ratio(self.black_wins, self.total_games)
    }

    pub fn draw_rate(&self) -> f64 {
        Self::ratio(self.draws, self.total_games)
    }

    pub fn average_rating(&self) -> f64 {
        Self::ratio(self.white_rating_sum + self.black_rating_sum, self.total_games * 2)
    }
}

/// Audit row written once per ingestion run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportCheckpoint {
    pub source: String,
    pub started_at: DateTime<Utc>,
    pub games_ingested: u64,
    pub parse_errors: u64,
    pub duration_secs: f64,
    pub interrupted: bool,
}

/// Outcome of one ingestion run
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub source: String,
    pub started_at: DateTime<Utc>,
    /// Records that parsed and resolved
    pub processed: u64,
    /// Records the store acknowledged
    pub persisted: u64,
    /// Rejected blocks
    pub errors: u64,
    pub storage_errors: u64,
    pub flushes: u64,
    pub duration: std::time::Duration,
    pub interrupted: bool,
}

impl RunSummary {
    pub fn checkpoint(&self) -> ImportCheckpoint {
        ImportCheckpoint {
            source: self.source.clone(),
            started_at: self.started_at,
            games_ingested: self.persisted,
            parse_errors: self.errors,
            duration_secs: self.duration.as_secs_f64(),
            interrupted: self.interrupted,
        }
    }

    /// Accepted records per second
    pub fn rate(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.processed as f64 / secs
        } else {
            0.0
        }
    }
}

/// Outcome counts for one time-control category
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimeControlStats {
    pub time_control: Option<TimeControl>,
    pub games: i64,
    pub white_wins: i64,
    pub black_wins: i64,
    pub draws: i64,
}

/// Row counts per persisted collection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabaseStats {
    pub games: i64,
    pub players: i64,
    pub openings: i64,
    pub checkpoints: i64,
}
