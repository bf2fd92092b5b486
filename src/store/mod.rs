//! Persistence layer
//!
//! Two interchangeable stores sit behind the same traits:
//! - `SqliteStore`: relational schema with declarative uniqueness and foreign keys
//! - `DocumentStore`: journaled JSON collections with in-memory secondary indexes
//!
//! Writes go through `StorageBackend`, reads through `GameQueries`. Every
//! aggregate write is an additive increment keyed by opening code, so the
//! persisted totals do not depend on how the input was split into flushes.

mod document;
mod sqlite;

pub use document::DocumentStore;
pub use sqlite::SqliteStore;

use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;
use tracing::info;

use crate::config::{BackendKind, Config};
use crate::model::{
    DatabaseStats, GameAnnotation, GameRecord, ImportCheckpoint, OpeningAggregate, OpeningDelta,
    PlayerId, PlayerIdentity, PlayerObservation, RatingSample, TimeControlStats,
};

#[derive(Debug, Error)]
pub enum StoreError {
    /// No session could be established; the run must not start
    #[error("storage unavailable at {}: {reason}", .path.display())]
    Unavailable { path: PathBuf, reason: String },
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
    #[error("invalid player id: {0}")]
    InvalidPlayerId(PlayerId),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Write operations used by the ingestor
pub trait StorageBackend: Send {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Look up or create a player and fold in one rating observation.
    ///
    /// New players start at `current = peak = rating, games_played = 1`;
    /// known players get `current = rating`, `peak = max(peak, rating)` and
    /// `games_played + 1`.
    fn resolve_player(&mut self, observation: &PlayerObservation) -> StoreResult<PlayerId>;

    /// Best-effort bulk insert. Records that collide on `external_id` or fail
    /// individually are skipped; the rest are kept. Returns how many landed.
    fn bulk_insert_records(&mut self, records: &[GameRecord]) -> StoreResult<usize>;

    /// Increment each opening's counters by its delta, creating rows as
    /// needed. The opening name is only written on creation.
    fn upsert_aggregates(&mut self, deltas: &BTreeMap<String, OpeningDelta>) -> StoreResult<usize>;

    /// Append one audit row
    fn record_checkpoint(&mut self, checkpoint: &ImportCheckpoint) -> StoreResult<()>;

    /// Patch annotation fields of a stored game. Returns false if no game matched.
    fn apply_update(&mut self, external_id: &str, annotation: &GameAnnotation) -> StoreResult<bool>;
}

/// Read-only queries over the persisted shape
pub trait GameQueries {
    fn load_game(&self, external_id: &str) -> StoreResult<Option<GameRecord>>;

    /// Games where `username` played either colour, newest first
    fn load_games(&self, username: &str, limit: usize) -> StoreResult<Vec<GameRecord>>;

    /// Games in one opening, newest first
    fn load_opening_games(&self, opening_code: &str, limit: usize) -> StoreResult<Vec<GameRecord>>;

    fn get_player(&self, username: &str) -> StoreResult<Option<PlayerIdentity>>;

    /// Players ordered by current rating
    fn top_players(&self, limit: usize) -> StoreResult<Vec<PlayerIdentity>>;

    fn get_opening(&self, opening_code: &str) -> StoreResult<Option<OpeningAggregate>>;

    /// Openings with at least `min_games`, most played first
    fn opening_stats(&self, min_games: i64, limit: usize) -> StoreResult<Vec<OpeningAggregate>>;

    /// Outcome counts per time-control category
    fn performance_by_time_control(&self) -> StoreResult<Vec<TimeControlStats>>;

    fn rating_history(&self, username: &str) -> StoreResult<Vec<RatingSample>>;

    /// Most recent checkpoints first
    fn list_checkpoints(&self, limit: usize) -> StoreResult<Vec<ImportCheckpoint>>;

    fn stats(&self) -> StoreResult<DatabaseStats>;
}

/// A store usable for both ingestion and queries
pub trait Store: StorageBackend + GameQueries {
    fn as_backend(&mut self) -> &mut dyn StorageBackend;
}

impl<T: StorageBackend + GameQueries> Store for T {
    fn as_backend(&mut self) -> &mut dyn StorageBackend {
        self
    }
}

/// Open the store selected in the configuration
pub fn open_store(config: &Config) -> StoreResult<Box<dyn Store>> {
    let store: Box<dyn Store> = match config.storage.backend {
        BackendKind::Relational => {
            let path = config.sqlite_path();
            info!(path = %path.display(), "opening relational store");
            Box::new(SqliteStore::open(&path)?)
        }
        BackendKind::Document => {
            let dir = config.document_dir();
            info!(path = %dir.display(), "opening document store");
            Box::new(DocumentStore::open(&dir)?)
        }
    };
    Ok(store)
}

/// Start of the hour containing the observation, used for rating-history buckets
pub(crate) fn rating_bucket(observed_on: Option<chrono::NaiveDate>) -> chrono::DateTime<chrono::Utc> {
    use chrono::{TimeZone, Timelike, Utc};

    if let Some(date) = observed_on {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Utc.from_utc_datetime(&midnight);
        }
    }
    let now = Utc::now();
    now.with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now)
}
