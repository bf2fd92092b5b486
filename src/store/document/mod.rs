//! Embedded document store
//!
//! Layout under the store directory:
//! - `games.jsonl`: journal of game inserts and annotation patches
//! - `players.json`: player collection snapshot
//! - `openings.json`: opening aggregate snapshot
//! - `rating_history.jsonl`: hour-bucketed rating samples
//! - `import_checkpoints.jsonl`: audit log
//!
//! Game bodies stay on disk; memory holds only their offsets plus the
//! secondary indexes (player+date, opening+date, time control, result).
//! Player changes are made durable together with the next batch write.

mod journal;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};
use uuid::Uuid;

use journal::{read_snapshot, write_snapshot, Journal};

use super::{rating_bucket, GameQueries, StorageBackend, StoreError, StoreResult};
use crate::model::{
    DatabaseStats, GameAnnotation, GameRecord, GameResult, ImportCheckpoint, OpeningAggregate,
    OpeningDelta, PlayerId, PlayerIdentity, PlayerObservation, RatingSample, TimeControl,
    TimeControlStats,
};

const GAMES: &str = "games.jsonl";
const PLAYERS: &str = "players.json";
const OPENINGS: &str = "openings.json";
const RATING_HISTORY: &str = "rating_history.jsonl";
const CHECKPOINTS: &str = "import_checkpoints.jsonl";

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum GameOp<'a> {
    Insert {
        record: Cow<'a, GameRecord>,
    },
    Annotate {
        external_id: Cow<'a, str>,
        annotation: Cow<'a, GameAnnotation>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RatingDoc {
    player_id: PlayerId,
    bucket: DateTime<Utc>,
    rating: i32,
}

/// In-memory handle to a stored game
struct GameEntry {
    offset: u64,
    annotation: GameAnnotation,
}

#[derive(Default)]
struct GameIndexes {
    by_external_id: HashMap<String, usize>,
    by_player_date: BTreeSet<(PlayerId, Option<NaiveDate>, usize)>,
    by_opening_date: BTreeSet<(String, Option<NaiveDate>, usize)>,
    by_time_control: HashMap<TimeControl, BTreeSet<usize>>,
    by_result: HashMap<GameResult, BTreeSet<usize>>,
}

impl GameIndexes {
    fn insert(&mut self, seq: usize, record: &GameRecord) {
        self.by_external_id.insert(record.external_id.clone(), seq);
        self.by_player_date
            .insert((record.white_player_id.clone(), record.date, seq));
        self.by_player_date
            .insert((record.black_player_id.clone(), record.date, seq));
        self.by_opening_date
            .insert((record.opening_code.clone(), record.date, seq));
        self.by_time_control
            .entry(record.time_control)
            .or_default()
            .insert(seq);
        self.by_result.entry(record.result).or_default().insert(seq);
    }
}

pub struct DocumentStore {
    dir: PathBuf,
    games: Journal,
    entries: Vec<GameEntry>,
    indexes: GameIndexes,
    players: Vec<PlayerIdentity>,
    players_by_username: HashMap<String, usize>,
    players_by_id: HashMap<PlayerId, usize>,
    players_dirty: bool,
    history_journal: Journal,
    history: HashMap<PlayerId, Vec<(DateTime<Utc>, i32)>>,
    pending_history: Vec<RatingDoc>,
    openings: BTreeMap<String, OpeningAggregate>,
    checkpoint_journal: Journal,
    checkpoints: Vec<ImportCheckpoint>,
}

impl DocumentStore {
    pub fn open(dir: &Path) -> StoreResult<Self> {
        Self::load(dir).map_err(|e| match e {
            StoreError::Unavailable { .. } => e,
            other => StoreError::Unavailable {
                path: dir.to_path_buf(),
                reason: other.to_string(),
            },
        })
    }

    fn load(dir: &Path) -> StoreResult<Self> {
        std::fs::create_dir_all(dir)?;

        let players: Vec<PlayerIdentity> = read_snapshot(&dir.join(PLAYERS))?;
        let openings: Vec<OpeningAggregate> = read_snapshot(&dir.join(OPENINGS))?;
        let (games, game_ops) = Journal::open::<GameOp<'static>>(&dir.join(GAMES))?;
        let (history_journal, samples) = Journal::open::<RatingDoc>(&dir.join(RATING_HISTORY))?;
        let (checkpoint_journal, checkpoints) =
            Journal::open::<ImportCheckpoint>(&dir.join(CHECKPOINTS))?;

        let mut store = Self {
            dir: dir.to_path_buf(),
            games,
            entries: vec![],
            indexes: GameIndexes::default(),
            players_by_username: HashMap::new(),
            players_by_id: HashMap::new(),
            players: vec![],
            players_dirty: false,
            history_journal,
            history: HashMap::new(),
            pending_history: vec![],
            openings: openings
                .into_iter()
                .map(|o| (o.opening_code.clone(), o))
                .collect(),
            checkpoint_journal,
            checkpoints: checkpoints.into_iter().map(|(_, c)| c).collect(),
        };

        for player in players {
            store.index_player(player);
        }
        for (_, sample) in samples {
            store
                .history
                .entry(sample.player_id)
                .or_default()
                .push((sample.bucket, sample.rating));
        }
        for (offset, op) in game_ops {
            match op {
                GameOp::Insert { record } => store.index_game(offset, &record),
                GameOp::Annotate {
                    external_id,
                    annotation,
                } => {
                    if let Some(&seq) = store.indexes.by_external_id.get(external_id.as_ref()) {
                        store.entries[seq].annotation.apply(&annotation);
                    }
                }
            }
        }

        Ok(store)
    }

    fn index_player(&mut self, player: PlayerIdentity) {
        let idx = self.players.len();
        self.players_by_username.insert(player.username.clone(), idx);
        self.players_by_id.insert(player.id.clone(), idx);
        self.players.push(player);
    }

    fn index_game(&mut self, offset: u64, record: &GameRecord) {
        let seq = self.entries.len();
        self.entries.push(GameEntry {
            offset,
            annotation: record.annotation.clone(),
        });
        self.indexes.insert(seq, record);
    }

    /// Persist player changes and their rating samples
    fn sync_players(&mut self) -> StoreResult<()> {
        if !self.players_dirty {
            return Ok(());
        }
        for sample in self.pending_history.drain(..) {
            self.history_journal.append(&sample)?;
        }
        self.history_journal.flush()?;
        write_snapshot(&self.dir.join(PLAYERS), &self.players)?;
        self.players_dirty = false;
        Ok(())
    }

    fn read_game(&self, seq: usize) -> StoreResult<GameRecord> {
        let entry = &self.entries[seq];
        match self.games.read_at::<GameOp<'static>>(entry.offset)? {
            GameOp::Insert { record } => {
                let mut record = record.into_owned();
                record.annotation = entry.annotation.clone();
                Ok(record)
            }
            GameOp::Annotate { .. } => Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "game offset points at an annotation entry",
            ))),
        }
    }

    /// Newest-first walk over one prefix of a (key, date, seq) index
    fn newest_first<K: Ord + Clone>(
        index: &BTreeSet<(K, Option<NaiveDate>, usize)>,
        key: &K,
        limit: usize,
    ) -> Vec<usize> {
        let range = (key.clone(), None, 0)..=(key.clone(), Some(NaiveDate::MAX), usize::MAX);
        let mut seen = BTreeSet::new();
        index
            .range(range)
            .rev()
            .map(|(_, _, seq)| *seq)
            .filter(|seq| seen.insert(*seq))
            .take(limit)
            .collect()
    }
}

impl Drop for DocumentStore {
    fn drop(&mut self) {
        if let Err(e) = self.sync_players() {
            error!(error = %e, "failed to persist players on close");
        }
    }
}

impl StorageBackend for DocumentStore {
    fn name(&self) -> &'static str {
        "document"
    }

    fn resolve_player(&mut self, observation: &PlayerObservation) -> StoreResult<PlayerId> {
        let (id, rating_changed) = match self.players_by_username.get(&observation.username) {
            Some(&idx) => {
                let player = &mut self.players[idx];
                let changed = player.current_rating != observation.rating;
                player.current_rating = observation.rating;
                player.peak_rating = player.peak_rating.max(observation.rating);
                player.games_played += 1;
                if player.title.is_none() {
                    player.title = observation.title.clone();
                }
                (player.id.clone(), changed)
            }
            None => {
                let player = PlayerIdentity {
                    id: PlayerId::new(Uuid::new_v4().to_string()),
                    username: observation.username.clone(),
                    title: observation.title.clone(),
                    current_rating: observation.rating,
                    peak_rating: observation.rating,
                    games_played: 1,
                };
                let id = player.id.clone();
                self.index_player(player);
                (id, true)
            }
        };

        if rating_changed {
            let bucket = rating_bucket(observation.observed_on);
            self.history
                .entry(id.clone())
                .or_default()
                .push((bucket, observation.rating));
            self.pending_history.push(RatingDoc {
                player_id: id.clone(),
                bucket,
                rating: observation.rating,
            });
        }

        self.players_dirty = true;
        Ok(id)
    }

    fn bulk_insert_records(&mut self, records: &[GameRecord]) -> StoreResult<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        // Referenced players must be durable before the games pointing at them
        self.sync_players()?;

        let mut inserted = 0;
        for record in records {
            if self.indexes.by_external_id.contains_key(&record.external_id) {
                debug!(game = %record.external_id, "duplicate game skipped");
                continue;
            }
            let missing = [&record.white_player_id, &record.black_player_id]
                .into_iter()
                .find(|id| !self.players_by_id.contains_key(*id));
            if let Some(id) = missing {
                warn!(game = %record.external_id, player = %id, "game references unknown player");
                continue;
            }

            let op = GameOp::Insert {
                record: Cow::Borrowed(record),
            };
            match self.games.append(&op) {
                Ok(offset) => {
                    self.index_game(offset, record);
                    inserted += 1;
                }
                Err(StoreError::Serde(e)) => {
                    warn!(game = %record.external_id, error = %e, "game insert failed")
                }
                Err(e) => {
                    self.games.flush()?;
                    return Err(e);
                }
            }
        }

        self.games.flush()?;
        Ok(inserted)
    }

    fn upsert_aggregates(&mut self, deltas: &BTreeMap<String, OpeningDelta>) -> StoreResult<usize> {
        if deltas.is_empty() {
            return Ok(0);
        }

        for (code, delta) in deltas {
            self.openings
                .entry(code.clone())
                .and_modify(|agg| agg.increment(delta))
                .or_insert_with(|| OpeningAggregate::from_delta(code, delta));
        }

        let snapshot: Vec<&OpeningAggregate> = self.openings.values().collect();
        write_snapshot(&self.dir.join(OPENINGS), &snapshot)?;
        self.sync_players()?;
        Ok(deltas.len())
    }

    fn record_checkpoint(&mut self, checkpoint: &ImportCheckpoint) -> StoreResult<()> {
        self.sync_players()?;
        self.checkpoint_journal.append(checkpoint)?;
        self.checkpoint_journal.flush()?;
        self.checkpoints.push(checkpoint.clone());
        Ok(())
    }

    fn apply_update(&mut self, external_id: &str, annotation: &GameAnnotation) -> StoreResult<bool> {
        let Some(&seq) = self.indexes.by_external_id.get(external_id) else {
            return Ok(false);
        };
        let op = GameOp::Annotate {
            external_id: Cow::Borrowed(external_id),
            annotation: Cow::Borrowed(annotation),
        };
        self.games.append(&op)?;
        self.games.flush()?;
        self.entries[seq].annotation.apply(annotation);
        Ok(true)
    }
}

impl GameQueries for DocumentStore {
    fn load_game(&self, external_id: &str) -> StoreResult<Option<GameRecord>> {
        self.indexes
            .by_external_id
            .get(external_id)
            .map(|&seq| self.read_game(seq))
            .transpose()
    }

    fn load_games(&self, username: &str, limit: usize) -> StoreResult<Vec<GameRecord>> {
        let Some(&idx) = self.players_by_username.get(username) else {
            return Ok(vec![]);
        };
        Self::newest_first(&self.indexes.by_player_date, &self.players[idx].id, limit)
            .into_iter()
            .map(|seq| self.read_game(seq))
            .collect()
    }

    fn load_opening_games(&self, opening_code: &str, limit: usize) -> StoreResult<Vec<GameRecord>> {
        Self::newest_first(&self.indexes.by_opening_date, &opening_code.to_string(), limit)
            .into_iter()
            .map(|seq| self.read_game(seq))
            .collect()
    }

    fn get_player(&self, username: &str) -> StoreResult<Option<PlayerIdentity>> {
        Ok(self
            .players_by_username
            .get(username)
            .map(|&idx| self.players[idx].clone()))
    }

    fn top_players(&self, limit: usize) -> StoreResult<Vec<PlayerIdentity>> {
        let mut players: Vec<&PlayerIdentity> = self.players.iter().collect();
        players.sort_by(|a, b| {
            b.current_rating
                .cmp(&a.current_rating)
                .then_with(|| a.username.cmp(&b.username))
        });
        Ok(players.into_iter().take(limit).cloned().collect())
    }

    fn get_opening(&self, opening_code: &str) -> StoreResult<Option<OpeningAggregate>> {
        Ok(self.openings.get(opening_code).cloned())
    }

    fn opening_stats(&self, min_games: i64, limit: usize) -> StoreResult<Vec<OpeningAggregate>> {
        let mut openings: Vec<&OpeningAggregate> = self
            .openings
            .values()
            .filter(|o| o.total_games >= min_games)
            .collect();
        // BTreeMap order already breaks ties by code
        openings.sort_by(|a, b| b.total_games.cmp(&a.total_games));
        Ok(openings.into_iter().take(limit).cloned().collect())
    }

    fn performance_by_time_control(&self) -> StoreResult<Vec<TimeControlStats>> {
        let empty = BTreeSet::new();
        let outcome = |games: &BTreeSet<usize>, result: GameResult| {
            let with_result = self.indexes.by_result.get(&result).unwrap_or(&empty);
            games.intersection(with_result).count() as i64
        };

        let mut stats: Vec<TimeControlStats> = self
            .indexes
            .by_time_control
            .iter()
            .filter(|(_, games)| !games.is_empty())
            .map(|(tc, games)| TimeControlStats {
                time_control: Some(*tc),
                games: games.len() as i64,
                white_wins: outcome(games, GameResult::WhiteWin),
                black_wins: outcome(games, GameResult::BlackWin),
                draws: outcome(games, GameResult::Draw),
            })
            .collect();
        stats.sort_by(|a, b| {
            b.games.cmp(&a.games).then_with(|| {
                let name = |s: &TimeControlStats| s.time_control.map(|t| t.as_str()).unwrap_or("");
                name(a).cmp(name(b))
            })
        });
        Ok(stats)
    }

    fn rating_history(&self, username: &str) -> StoreResult<Vec<RatingSample>> {
        let Some(&idx) = self.players_by_username.get(username) else {
            return Ok(vec![]);
        };
        let mut samples: Vec<RatingSample> = self
            .history
            .get(&self.players[idx].id)
            .map(|s| {
                s.iter()
                    .map(|(bucket, rating)| RatingSample {
                        username: username.to_string(),
                        bucket: *bucket,
                        rating: *rating,
                    })
                    .collect()
            })
            .unwrap_or_default();
        samples.sort_by_key(|s| s.bucket);
        Ok(samples)
    }

    fn list_checkpoints(&self, limit: usize) -> StoreResult<Vec<ImportCheckpoint>> {
        Ok(self.checkpoints.iter().rev().take(limit).cloned().collect())
    }

    fn stats(&self) -> StoreResult<DatabaseStats> {
        Ok(DatabaseStats {
            games: self.entries.len() as i64,
            players: self.players.len() as i64,
            openings: self.openings.len() as i64,
            checkpoints: self.checkpoints.len() as i64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pgn::parse_block;

    fn ingest(store: &mut DocumentStore, text: &str) -> GameRecord {
        let game = parse_block(text).unwrap();
        let [white, black] = game.observations();
        let white = store.resolve_player(&white).unwrap();
        let black = store.resolve_player(&black).unwrap();
        game.into_record(white, black)
    }

    #[test]
    fn test_reopen_restores_collections() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut store = DocumentStore::open(dir.path()).unwrap();
            let game = ingest(
                &mut store,
                "[Site \"https://lichess.org/g1\"]\n[White \"Alice\"]\n[ECO \"C20\"]\n\ne4 e5 Nf3",
            );
            let delta = BTreeMap::from([("C20".to_string(), OpeningDelta::for_game("KP", game.result, 1500, 1500))]);
            store.bulk_insert_records(&[game]).unwrap();
            store.upsert_aggregates(&delta).unwrap();
            store
                .apply_update(
                    "g1",
                    &GameAnnotation {
                        black_accuracy: Some(77.0),
                        ..Default::default()
                    },
                )
                .unwrap();
        }

        let store = DocumentStore::open(dir.path()).unwrap();
        let stats = store.stats().unwrap();
        assert_eq!(stats.games, 1);
        assert_eq!(stats.players, 2);
        assert_eq!(stats.openings, 1);
        let game = store.load_game("g1").unwrap().unwrap();
        assert_eq!(game.moves.len(), 3);
        assert_eq!(game.annotation.black_accuracy, Some(77.0));
        assert_eq!(store.load_opening_games("C20", 10).unwrap().len(), 1);
        assert_eq!(store.rating_history("Alice").unwrap().len(), 1);
    }

    #[test]
    fn test_players_synced_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut store = DocumentStore::open(dir.path()).unwrap();
            ingest(&mut store, "[White \"Alice\"]\n[Black \"Bob\"]\n\ne4 e5");
        }
        let store = DocumentStore::open(dir.path()).unwrap();
        assert_eq!(store.get_player("Bob").unwrap().unwrap().games_played, 1);
    }

    #[test]
    fn test_game_played_against_self_listed_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = DocumentStore::open(dir.path()).unwrap();
        let game = ingest(&mut store, "[White \"Alice\"]\n[Black \"Alice\"]\n\ne4 e5");
        store.bulk_insert_records(&[game]).unwrap();
        assert_eq!(store.load_games("Alice", 10).unwrap().len(), 1);
    }

    #[test]
    fn test_corrupt_snapshot_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(PLAYERS), b"{not json").unwrap();
        assert!(matches!(
            DocumentStore::open(dir.path()),
            Err(StoreError::Unavailable { .. })
        ));
    }
}
