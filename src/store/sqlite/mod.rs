//! Relational store on SQLite
//!
//! Players are select-or-insert, games insert-if-absent on `game_id`, and
//! openings update-or-insert with additive counters.

mod schema;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

use super::{rating_bucket, GameQueries, StorageBackend, StoreError, StoreResult};
use crate::model::{
    DatabaseStats, GameAnnotation, GameRecord, GameResult, ImportCheckpoint, OpeningAggregate,
    OpeningDelta, PlayerId, PlayerIdentity, PlayerObservation, RatingSample, TimeControl,
    TimeControlStats,
};

pub use schema::SCHEMA;

const GAME_COLUMNS: &str = "game_id, white_player_id, black_player_id, white_user, black_user,
    white_rating, black_rating, result, date, eco, opening_name, time_control, moves,
    event, site, white_accuracy, black_accuracy, acpl, created_at";

const OPENING_COLUMNS: &str = "eco_code, opening_name, total_games, white_wins, black_wins,
    draws, total_white_elo, total_black_elo";

const PLAYER_COLUMNS: &str = "id, username, title, current_rating, peak_rating, games_played";

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> StoreResult<Self> {
        let unavailable = |reason: String| StoreError::Unavailable {
            path: path.to_path_buf(),
            reason,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| unavailable(e.to_string()))?;
        }

        let conn = Connection::open(path).map_err(|e| unavailable(e.to_string()))?;
        let store = Self { conn };
        store
            .init_schema()
            .map_err(|e| unavailable(e.to_string()))?;
        Ok(store)
    }

    /// Private in-memory database, used by tests
    pub fn open_in_memory() -> StoreResult<Self> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> StoreResult<()> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    fn row_id(id: &PlayerId) -> StoreResult<i64> {
        id.as_str()
            .parse::<i64>()
            .map_err(|_| StoreError::InvalidPlayerId(id.clone()))
    }

    fn insert_game(conn: &Connection, record: &GameRecord) -> StoreResult<bool> {
        let changed = conn.execute(
            &format!(
                "INSERT OR IGNORE INTO games ({}, ply_count)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                GAME_COLUMNS
            ),
            params![
                record.external_id,
                Self::row_id(&record.white_player_id)?,
                Self::row_id(&record.black_player_id)?,
                record.white_username,
                record.black_username,
                record.white_rating,
                record.black_rating,
                record.result.as_pgn(),
                record.date.map(|d| d.to_string()),
                record.opening_code,
                record.opening_name,
                record.time_control.as_str(),
                record.moves.join(" "),
                record.event,
                record.site,
                record.annotation.white_accuracy,
                record.annotation.black_accuracy,
                record.annotation.acpl,
                record.created_at.to_rfc3339(),
                record.ply_count() as i64,
            ],
        )?;
        Ok(changed == 1)
    }

    fn map_game(row: &Row) -> rusqlite::Result<GameRecord> {
        let white_id: i64 = row.get(1)?;
        let black_id: i64 = row.get(2)?;
        let result: String = row.get(7)?;
        let date: Option<String> = row.get(8)?;
        let time_control: String = row.get(11)?;
        let moves: String = row.get(12)?;
        let created_at: String = row.get(18)?;

        Ok(GameRecord {
            external_id: row.get(0)?,
            white_player_id: PlayerId::new(white_id.to_string()),
            black_player_id: PlayerId::new(black_id.to_string()),
            white_username: row.get(3)?,
            black_username: row.get(4)?,
            white_rating: row.get(5)?,
            black_rating: row.get(6)?,
            result: GameResult::from_pgn(&result),
            date: date.and_then(|d| d.parse::<NaiveDate>().ok()),
            opening_code: row.get(9)?,
            opening_name: row.get(10)?,
            time_control: TimeControl::parse(&time_control),
            moves: moves.split_whitespace().map(str::to_string).collect(),
            event: row.get(13)?,
            site: row.get(14)?,
            created_at: DateTime::parse_from_rfc3339(&created_at)
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_default(),
            annotation: GameAnnotation {
                white_accuracy: row.get(15)?,
                black_accuracy: row.get(16)?,
                acpl: row.get(17)?,
            },
        })
    }

    fn map_player(row: &Row) -> rusqlite::Result<PlayerIdentity> {
        let id: i64 = row.get(0)?;
        Ok(PlayerIdentity {
            id: PlayerId::new(id.to_string()),
            username: row.get(1)?,
            title: row.get(2)?,
            current_rating: row.get(3)?,
            peak_rating: row.get(4)?,
            games_played: row.get(5)?,
        })
    }

    fn map_opening(row: &Row) -> rusqlite::Result<OpeningAggregate> {
        Ok(OpeningAggregate {
            opening_code: row.get(0)?,
            opening_name: row.get(1)?,
            total_games: row.get(2)?,
            white_wins: row.get(3)?,
            black_wins: row.get(4)?,
            draws: row.get(5)?,
            white_rating_sum: row.get(6)?,
            black_rating_sum: row.get(7)?,
        })
    }

    fn count(&self, table: &str) -> StoreResult<i64> {
        let count = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
        Ok(count)
    }
}

impl StorageBackend for SqliteStore {
    fn name(&self) -> &'static str {
        "relational"
    }

    fn resolve_player(&mut self, observation: &PlayerObservation) -> StoreResult<PlayerId> {
        let tx = self.conn.transaction()?;

        let existing: Option<(i64, i32)> = tx
            .query_row(
                "SELECT id, current_rating FROM players WHERE username = ?",
                params![observation.username],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let (player_id, rating_changed) = match existing {
            Some((id, current)) => {
                tx.execute(
                    "UPDATE players
                     SET current_rating = ?1,
                         peak_rating = MAX(peak_rating, ?1),
                         games_played = games_played + 1,
                         title = COALESCE(title, ?2),
                         updated_at = datetime('now')
                     WHERE id = ?3",
                    params![observation.rating, observation.title, id],
                )?;
                (id, current != observation.rating)
            }
            None => {
                let id: i64 = tx.query_row(
                    "INSERT INTO players (username, title, current_rating, peak_rating, games_played, updated_at)
                     VALUES (?1, ?2, ?3, ?3, 1, datetime('now'))
                     RETURNING id",
                    params![observation.username, observation.title, observation.rating],
                    |row| row.get(0),
                )?;
                (id, true)
            }
        };

        if rating_changed {
            tx.execute(
                "INSERT INTO rating_history (player_id, bucket, rating) VALUES (?, ?, ?)",
                params![
                    player_id,
                    rating_bucket(observation.observed_on).to_rfc3339(),
                    observation.rating
                ],
            )?;
        }

        tx.commit()?;
        Ok(PlayerId::new(player_id.to_string()))
    }

    fn bulk_insert_records(&mut self, records: &[GameRecord]) -> StoreResult<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.transaction()?;
        let mut inserted = 0;

        for record in records {
            // A failing row is rolled back on its own; the transaction survives
            match Self::insert_game(&tx, record) {
                Ok(true) => inserted += 1,
                Ok(false) => debug!(game = %record.external_id, "duplicate game skipped"),
                Err(e) => warn!(game = %record.external_id, error = %e, "game insert failed"),
            }
        }

        tx.commit()?;
        Ok(inserted)
    }

    fn upsert_aggregates(&mut self, deltas: &BTreeMap<String, OpeningDelta>) -> StoreResult<usize> {
        if deltas.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO openings
                    (eco_code, opening_name, total_games, white_wins, black_wins, draws,
                     total_white_elo, total_black_elo, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))
                 ON CONFLICT(eco_code) DO UPDATE SET
                     total_games = total_games + excluded.total_games,
                     white_wins = white_wins + excluded.white_wins,
                     black_wins = black_wins + excluded.black_wins,
                     draws = draws + excluded.draws,
                     total_white_elo = total_white_elo + excluded.total_white_elo,
                     total_black_elo = total_black_elo + excluded.total_black_elo,
                     updated_at = excluded.updated_at",
            )?;

            for (code, delta) in deltas {
                stmt.execute(params![
                    code,
                    delta.name(),
                    delta.total_games,
                    delta.white_wins,
                    delta.black_wins,
                    delta.draws,
                    delta.white_rating_sum,
                    delta.black_rating_sum,
                ])?;
            }
        }
        tx.commit()?;
        Ok(deltas.len())
    }

    fn record_checkpoint(&mut self, checkpoint: &ImportCheckpoint) -> StoreResult<()> {
        self.conn.execute(
            "INSERT INTO import_checkpoints
                (file_source, import_date, games_imported, parse_errors, import_duration_seconds, interrupted)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                checkpoint.source,
                checkpoint.started_at.to_rfc3339(),
                checkpoint.games_ingested as i64,
                checkpoint.parse_errors as i64,
                checkpoint.duration_secs,
                checkpoint.interrupted,
            ],
        )?;
        Ok(())
    }

    fn apply_update(&mut self, external_id: &str, annotation: &GameAnnotation) -> StoreResult<bool> {
        let changed = self.conn.execute(
            "UPDATE games SET
                 white_accuracy = COALESCE(?1, white_accuracy),
                 black_accuracy = COALESCE(?2, black_accuracy),
                 acpl = COALESCE(?3, acpl)
             WHERE game_id = ?4",
            params![
                annotation.white_accuracy,
                annotation.black_accuracy,
                annotation.acpl,
                external_id
            ],
        )?;
        Ok(changed > 0)
    }
}

impl GameQueries for SqliteStore {
    fn load_game(&self, external_id: &str) -> StoreResult<Option<GameRecord>> {
        let game = self
            .conn
            .query_row(
                &format!("SELECT {} FROM games WHERE game_id = ?", GAME_COLUMNS),
                params![external_id],
                Self::map_game,
            )
            .optional()?;
        Ok(game)
    }

    fn load_games(&self, username: &str, limit: usize) -> StoreResult<Vec<GameRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM games
             WHERE white_user = ?1 OR black_user = ?1
             ORDER BY date DESC, id DESC
             LIMIT ?2",
            GAME_COLUMNS
        ))?;
        let rows = stmt.query_map(params![username, limit as i64], Self::map_game)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    fn load_opening_games(&self, opening_code: &str, limit: usize) -> StoreResult<Vec<GameRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM games WHERE eco = ? ORDER BY date DESC, id DESC LIMIT ?",
            GAME_COLUMNS
        ))?;
        let rows = stmt.query_map(params![opening_code, limit as i64], Self::map_game)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    fn get_player(&self, username: &str) -> StoreResult<Option<PlayerIdentity>> {
        let player = self
            .conn
            .query_row(
                &format!("SELECT {} FROM players WHERE username = ?", PLAYER_COLUMNS),
                params![username],
                Self::map_player,
            )
            .optional()?;
        Ok(player)
    }

    fn top_players(&self, limit: usize) -> StoreResult<Vec<PlayerIdentity>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM players ORDER BY current_rating DESC, username ASC LIMIT ?",
            PLAYER_COLUMNS
        ))?;
        let rows = stmt.query_map(params![limit as i64], Self::map_player)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    fn get_opening(&self, opening_code: &str) -> StoreResult<Option<OpeningAggregate>> {
        let opening = self
            .conn
            .query_row(
                &format!("SELECT {} FROM openings WHERE eco_code = ?", OPENING_COLUMNS),
                params![opening_code],
                Self::map_opening,
            )
            .optional()?;
        Ok(opening)
    }

    fn opening_stats(&self, min_games: i64, limit: usize) -> StoreResult<Vec<OpeningAggregate>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM openings
             WHERE total_games >= ?
             ORDER BY total_games DESC, eco_code ASC
             LIMIT ?",
            OPENING_COLUMNS
        ))?;
        let rows = stmt.query_map(params![min_games, limit as i64], Self::map_opening)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    fn performance_by_time_control(&self) -> StoreResult<Vec<TimeControlStats>> {
        let mut stmt = self.conn.prepare(
            "SELECT time_control,
                    COUNT(*),
                    SUM(CASE WHEN result = '1-0' THEN 1 ELSE 0 END),
                    SUM(CASE WHEN result = '0-1' THEN 1 ELSE 0 END),
                    SUM(CASE WHEN result = '1/2-1/2' THEN 1 ELSE 0 END)
             FROM games
             GROUP BY time_control
             ORDER BY COUNT(*) DESC, time_control ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            let time_control: String = row.get(0)?;
            Ok(TimeControlStats {
                time_control: Some(TimeControl::parse(&time_control)),
                games: row.get(1)?,
                white_wins: row.get(2)?,
                black_wins: row.get(3)?,
                draws: row.get(4)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    fn rating_history(&self, username: &str) -> StoreResult<Vec<RatingSample>> {
        let mut stmt = self.conn.prepare(
            "SELECT p.username, h.bucket, h.rating
             FROM rating_history h
             JOIN players p ON p.id = h.player_id
             WHERE p.username = ?
             ORDER BY h.bucket ASC, h.id ASC",
        )?;
        let rows = stmt.query_map(params![username], |row| {
            let bucket: String = row.get(1)?;
            Ok(RatingSample {
                username: row.get(0)?,
                bucket: DateTime::parse_from_rfc3339(&bucket)
                    .map(|t| t.with_timezone(&Utc))
                    .unwrap_or_default(),
                rating: row.get(2)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    fn list_checkpoints(&self, limit: usize) -> StoreResult<Vec<ImportCheckpoint>> {
        let mut stmt = self.conn.prepare(
            "SELECT file_source, import_date, games_imported, parse_errors,
                    import_duration_seconds, interrupted
             FROM import_checkpoints
             ORDER BY id DESC
             LIMIT ?",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            let started_at: String = row.get(1)?;
            let games: i64 = row.get(2)?;
            let errors: i64 = row.get(3)?;
            Ok(ImportCheckpoint {
                source: row.get(0)?,
                started_at: DateTime::parse_from_rfc3339(&started_at)
                    .map(|t| t.with_timezone(&Utc))
                    .unwrap_or_default(),
                games_ingested: games as u64,
                parse_errors: errors as u64,
                duration_secs: row.get(4)?,
                interrupted: row.get(5)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    fn stats(&self) -> StoreResult<DatabaseStats> {
        Ok(DatabaseStats {
            games: self.count("games")?,
            players: self.count("players")?,
            openings: self.count("openings")?,
            checkpoints: self.count("import_checkpoints")?,
        })
    }
}
