use super::*;
use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;

use crate::model::{
    GameAnnotation, GameRecord, ImportCheckpoint, OpeningDelta, PlayerId, PlayerObservation,
};
use crate::store::{DocumentStore, GameQueries, SqliteStore, Store, StoreResult};

/// Records every call instead of persisting
#[derive(Default)]
struct SpyBackend {
    observed: HashMap<String, usize>,
    inserts: Vec<Vec<String>>,
    upserts: Vec<BTreeMap<String, OpeningDelta>>,
    checkpoints: Vec<ImportCheckpoint>,
    fail_inserts: bool,
    fail_player: Option<String>,
}

impl StorageBackend for SpyBackend {
    fn name(&self) -> &'static str {
        "spy"
    }

    fn resolve_player(&mut self, observation: &PlayerObservation) -> StoreResult<PlayerId> {
        if self.fail_player.as_deref() == Some(observation.username.as_str()) {
            return Err(StoreError::InvalidPlayerId(PlayerId::new(&observation.username)));
        }
        *self.observed.entry(observation.username.clone()).or_default() += 1;
        Ok(PlayerId::new(&observation.username))
    }

    fn bulk_insert_records(&mut self, records: &[GameRecord]) -> StoreResult<usize> {
        if self.fail_inserts {
            return Err(StoreError::Io(io::Error::new(io::ErrorKind::Other, "disk gone")));
        }
        self.inserts
            .push(records.iter().map(|r| r.external_id.clone()).collect());
        Ok(records.len())
    }

    fn upsert_aggregates(&mut self, deltas: &BTreeMap<String, OpeningDelta>) -> StoreResult<usize> {
        self.upserts.push(deltas.clone());
        Ok(deltas.len())
    }

    fn record_checkpoint(&mut self, checkpoint: &ImportCheckpoint) -> StoreResult<()> {
        self.checkpoints.push(checkpoint.clone());
        Ok(())
    }

    fn apply_update(&mut self, _external_id: &str, _annotation: &GameAnnotation) -> StoreResult<bool> {
        Ok(false)
    }
}

fn game(id: &str, white: &str, black: &str, ratings: (i32, i32), result: &str, eco: &str, moves: &str) -> String {
    format!(
        "[Site \"https://lichess.org/{id}\"]\n\
         [White \"{white}\"]\n\
         [Black \"{black}\"]\n\
         [WhiteElo \"{}\"]\n\
         [BlackElo \"{}\"]\n\
         [Result \"{result}\"]\n\
         [ECO \"{eco}\"]\n\
         \n\
         {moves} {result}",
        ratings.0, ratings.1
    )
}

fn simple(id: &str) -> String {
    game(id, "Alice", "Bob", (1500, 1600), "1-0", "C20", "1. e4 e5 2. Nf3 Nc6")
}

fn stream(blocks: &[String]) -> Vec<io::Result<String>> {
    blocks.iter().cloned().map(Ok).collect()
}

fn options(max_batch_records: usize) -> IngestOptions {
    IngestOptions {
        max_batch_records,
        max_batch_bytes: usize::MAX,
        progress_interval: 1,
        max_games: None,
    }
}

fn alice_bob_carol() -> Vec<String> {
    vec![
        game(
            "g1",
            "Alice",
            "Bob",
            (1500, 1600),
            "1-0",
            "B01",
            "1. e4 d5 2. exd5 Qxd5 3. Nc3 Qa5 4. d4 Nf6 5. Nf3 c6",
        ),
        game(
            "g2",
            "Carol",
            "Alice",
            (1800, 1520),
            "1/2-1/2",
            "B01",
            "1. e4 d5 2. exd5 Qxd5 3. Nc3 Qd6",
        ),
    ]
}

#[test]
fn test_flush_at_record_threshold() {
    let mut backend = SpyBackend::default();
    let blocks: Vec<String> = (1..=5).map(|i| simple(&format!("g{i}"))).collect();

    let summary = StreamingIngestor::new(&mut backend, options(2))
        .ingest_blocks("mem", stream(&blocks))
        .unwrap();

    let sizes: Vec<usize> = backend.inserts.iter().map(Vec::len).collect();
    assert_eq!(sizes, [2, 2, 1]);
    assert_eq!(backend.upserts.len(), 3);
    assert_eq!(backend.upserts[0]["C20"].total_games, 2);
    assert_eq!(summary.flushes, 3);
    assert_eq!(summary.processed, 5);
    assert_eq!(summary.persisted, 5);
}

#[test]
fn test_flush_at_byte_threshold() {
    let mut backend = SpyBackend::default();
    let blocks: Vec<String> = (1..=3).map(|i| simple(&format!("g{i}"))).collect();
    let opts = IngestOptions {
        max_batch_bytes: 1,
        ..options(100)
    };

    let summary = StreamingIngestor::new(&mut backend, opts)
        .ingest_blocks("mem", stream(&blocks))
        .unwrap();

    assert_eq!(backend.inserts.len(), 3);
    assert!(backend.inserts.iter().all(|batch| batch.len() == 1));
    assert_eq!(summary.flushes, 3);
}

#[test]
fn test_no_flush_below_threshold() {
    let mut backend = SpyBackend::default();
    let blocks: Vec<String> = (1..=3).map(|i| simple(&format!("g{i}"))).collect();

    StreamingIngestor::new(&mut backend, options(10))
        .ingest_blocks("mem", stream(&blocks))
        .unwrap();

    // Only the end-of-stream flush
    assert_eq!(backend.inserts.len(), 1);
    assert_eq!(backend.inserts[0], ["g1", "g2", "g3"]);
    assert_eq!(backend.checkpoints.len(), 1);
}

#[test]
fn test_rejections_are_counted_without_side_effects() {
    let mut backend = SpyBackend::default();
    let blocks = vec![
        simple("g1"),
        game("bad1", "Ghost", "Bob", (1500, 1500), "1-0", "A00", "1. e4"),
        game("bad2", "Ghost", "Bob", (4000, 1500), "1-0", "A00", "1. e4 e5"),
        "[White \"Ghost\"]\n[WhiteElo \"?\"]\n\n1. e4 e5".to_string(),
        "[White Ghost]\n\n1. e4 e5".to_string(),
        simple("g2"),
    ];

    let summary = StreamingIngestor::new(&mut backend, options(10))
        .ingest_blocks("mem", stream(&blocks))
        .unwrap();

    assert_eq!(summary.processed, 2);
    assert_eq!(summary.errors, 4);
    assert!(!backend.observed.contains_key("Ghost"));
    assert_eq!(backend.observed["Bob"], 2);
    assert_eq!(backend.upserts[0].len(), 1);
    assert_eq!(backend.checkpoints[0].parse_errors, 4);
}

#[test]
fn test_cancel_still_flushes_and_checkpoints() {
    let mut backend = SpyBackend::default();
    let cancel = CancelFlag::new();
    let trigger = cancel.clone();
    let blocks: Vec<String> = (1..=6).map(|i| simple(&format!("g{i}"))).collect();
    // The flag is raised while the third block is being read
    let blocks = blocks.into_iter().enumerate().map(move |(i, block)| {
        if i == 2 {
            trigger.cancel();
        }
        Ok::<_, io::Error>(block)
    });

    let summary = StreamingIngestor::new(&mut backend, options(100))
        .with_cancel(cancel)
        .ingest_blocks("mem", blocks)
        .unwrap();

    assert!(summary.interrupted);
    assert_eq!(summary.processed, 2);
    assert_eq!(backend.inserts, [["g1", "g2"]]);
    assert_eq!(backend.checkpoints.len(), 1);
    assert!(backend.checkpoints[0].interrupted);
    assert_eq!(backend.checkpoints[0].games_ingested, 2);
}

#[test]
fn test_max_games_stops_early() {
    let mut backend = SpyBackend::default();
    let blocks: Vec<String> = (1..=5).map(|i| simple(&format!("g{i}"))).collect();
    let opts = IngestOptions {
        max_games: Some(3),
        ..options(2)
    };

    let summary = StreamingIngestor::new(&mut backend, opts)
        .ingest_blocks("mem", stream(&blocks))
        .unwrap();

    assert_eq!(summary.processed, 3);
    assert!(!summary.interrupted);
    assert_eq!(backend.inserts, vec![vec!["g1", "g2"], vec!["g3"]]);
    assert_eq!(backend.checkpoints.len(), 1);
}

#[test]
fn test_read_error_mid_stream_ends_run() {
    let mut backend = SpyBackend::default();
    let blocks = vec![
        Ok(simple("g1")),
        Err(io::Error::new(io::ErrorKind::InvalidData, "truncated")),
        Ok(simple("g2")),
    ];

    let summary = StreamingIngestor::new(&mut backend, options(10))
        .ingest_blocks("mem", blocks)
        .unwrap();

    assert!(summary.interrupted);
    assert_eq!(summary.persisted, 1);
    assert_eq!(backend.checkpoints.len(), 1);
}

#[test]
fn test_unreadable_source_writes_no_checkpoint() {
    let mut backend = SpyBackend::default();
    let blocks = vec![Err(io::Error::new(io::ErrorKind::InvalidData, "not pgn"))];

    let err = StreamingIngestor::new(&mut backend, options(10))
        .ingest_blocks("mem", blocks)
        .unwrap_err();

    assert!(matches!(err, IngestError::SourceUnavailable { .. }));
    assert!(backend.checkpoints.is_empty());
}

/// Fails on the first read
struct Unreadable;

impl io::Read for Unreadable {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::PermissionDenied, "no access"))
    }
}

#[test]
fn test_reader_failing_before_any_bytes_is_source_unavailable() {
    let mut backend = SpyBackend::default();

    let err = StreamingIngestor::new(&mut backend, options(10))
        .ingest_reader("mem", io::BufReader::new(Unreadable))
        .unwrap_err();

    assert!(matches!(err, IngestError::SourceUnavailable { .. }));
    assert!(backend.checkpoints.is_empty());
}

/// Join blocks into one stream, turning every `#` into an invalid UTF-8 byte
fn raw_stream(blocks: &[String]) -> Vec<u8> {
    (blocks.join("\n\n") + "\n")
        .bytes()
        .map(|b| if b == b'#' { 0xff } else { b })
        .collect()
}

#[test]
fn test_invalid_utf8_block_does_not_stop_the_run() {
    let mut backend = SpyBackend::default();
    let text = raw_stream(&[
        simple("g1"),
        game("g2", "Bad#", "Bob", (1500, 1600), "1-0", "C20", "1. e4 e5 2. Nf3 Nc6"),
        simple("g3"),
        simple("g4"),
    ]);

    let summary = StreamingIngestor::new(&mut backend, options(10))
        .ingest_reader("mem", Cursor::new(text))
        .unwrap();

    assert!(!summary.interrupted);
    assert_eq!(summary.processed, 4);
    assert_eq!(backend.inserts, [["g1", "g2", "g3", "g4"]]);
    assert!(backend.observed.contains_key("Bad\u{fffd}"));
    assert_eq!(backend.checkpoints.len(), 1);
}

#[test]
fn test_invalid_first_block_is_rejected_not_fatal() {
    let mut backend = SpyBackend::default();
    let text = raw_stream(&["[Event \"x#\"]".to_string(), simple("g2")]);

    let summary = StreamingIngestor::new(&mut backend, options(10))
        .ingest_reader("mem", Cursor::new(text))
        .unwrap();

    assert_eq!(summary.errors, 1);
    assert_eq!(summary.processed, 1);
    assert_eq!(backend.inserts, [["g2"]]);
    assert_eq!(backend.checkpoints.len(), 1);
    assert_eq!(backend.checkpoints[0].parse_errors, 1);
}

#[test]
fn test_headers_without_moves_do_not_leak_into_next_game() {
    let mut backend = SpyBackend::default();
    let text = "[White \"Ghost\"]\n\
                [WhiteElo \"2900\"]\n\
                [ECO \"Z99\"]\n\
                \n\
                [Site \"https://lichess.org/g1\"]\n\
                [White \"Alice\"]\n\
                [Black \"Bob\"]\n\
                [BlackElo \"1600\"]\n\
                [Result \"1-0\"]\n\
                \n\
                1. e4 e5 2. Nf3 Nc6 1-0\n";

    let summary = StreamingIngestor::new(&mut backend, options(10))
        .ingest_reader("mem", Cursor::new(text))
        .unwrap();

    assert_eq!(summary.errors, 1);
    assert_eq!(summary.processed, 1);
    assert!(!backend.observed.contains_key("Ghost"));
    assert!(!backend.upserts[0].contains_key("Z99"));
    let delta = backend.upserts[0].values().next().unwrap();
    assert_eq!(delta.white_rating_sum, 1500);
    assert_eq!(delta.black_rating_sum, 1600);
}

#[test]
fn test_missing_file_is_source_unavailable() {
    let mut backend = SpyBackend::default();
    let dir = tempfile::tempdir().unwrap();

    let err = StreamingIngestor::new(&mut backend, options(10))
        .ingest_path(&dir.path().join("missing.pgn"))
        .unwrap_err();

    assert!(matches!(err, IngestError::SourceUnavailable { .. }));
    assert!(backend.checkpoints.is_empty());
}

#[test]
fn test_storage_failures_are_counted() {
    let mut backend = SpyBackend {
        fail_inserts: true,
        fail_player: Some("Mallory".to_string()),
        ..Default::default()
    };
    let blocks = vec![
        simple("g1"),
        game("g2", "Mallory", "Bob", (1500, 1500), "0-1", "C20", "1. d4 d5"),
        simple("g3"),
    ];

    let summary = StreamingIngestor::new(&mut backend, options(10))
        .ingest_blocks("mem", stream(&blocks))
        .unwrap();

    assert_eq!(summary.processed, 2);
    assert_eq!(summary.persisted, 0);
    assert_eq!(summary.storage_errors, 3);
    assert_eq!(backend.upserts.len(), 1);
    assert_eq!(backend.checkpoints.len(), 1);
    assert_eq!(backend.checkpoints[0].games_ingested, 0);
}

fn assert_scenario(store: &dyn Store) {
    let players: Vec<_> = ["Alice", "Bob", "Carol"]
        .iter()
        .map(|name| {
            let p = store.get_player(name).unwrap().unwrap();
            (p.current_rating, p.peak_rating, p.games_played)
        })
        .collect();
    assert_eq!(players, [(1520, 1520, 2), (1600, 1600, 1), (1800, 1800, 1)]);

    let b01 = store.get_opening("B01").unwrap().unwrap();
    assert_eq!(
        (b01.total_games, b01.white_wins, b01.draws, b01.black_wins),
        (2, 1, 1, 0)
    );

    let stats = store.stats().unwrap();
    assert_eq!(stats.games, 2);
    assert_eq!(stats.checkpoints, 1);

    let first = store.load_game("g1").unwrap().unwrap();
    assert_eq!(first.moves.len(), 10);
    assert_eq!(first.opening_code, "B01");
    assert_eq!(store.load_game("g2").unwrap().unwrap().moves.len(), 6);
}

#[test]
fn test_end_to_end_relational() {
    let mut store = SqliteStore::open_in_memory().unwrap();

    let summary = StreamingIngestor::new(&mut store, options(10))
        .ingest_blocks("scenario", stream(&alice_bob_carol()))
        .unwrap();

    assert_eq!(summary.persisted, 2);
    assert_scenario(&store);
}

#[test]
fn test_end_to_end_document() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = DocumentStore::open(dir.path()).unwrap();

    let summary = StreamingIngestor::new(&mut store, options(10))
        .ingest_blocks("scenario", stream(&alice_bob_carol()))
        .unwrap();

    assert_eq!(summary.persisted, 2);
    assert_scenario(&store);
}

#[test]
fn test_batch_size_does_not_change_aggregates() {
    let mut blocks = alice_bob_carol();
    blocks.push(game("g3", "Bob", "Carol", (1610, 1790), "0-1", "C20", "1. e4 e5 2. Nf3 Nc6"));
    blocks.push(game("g4", "Dave", "Alice", (1400, 1530), "1-0", "B01", "1. e4 d5 2. e5 c5"));

    let mut results = vec![];
    for batch in [1, 2, 3, 100] {
        let mut store = SqliteStore::open_in_memory().unwrap();
        StreamingIngestor::new(&mut store, options(batch))
            .ingest_blocks("mem", stream(&blocks))
            .unwrap();
        results.push(store.opening_stats(1, 10).unwrap());
    }

    assert!(results.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(results[0][0].opening_code, "B01");
    assert_eq!(results[0][0].total_games, 3);
}

#[test]
fn test_reader_and_compressed_file() {
    let text = alice_bob_carol().join("\n\n") + "\n";

    let mut store = SqliteStore::open_in_memory().unwrap();
    let summary = StreamingIngestor::new(&mut store, options(10))
        .ingest_reader("inline", Cursor::new(text.clone()))
        .unwrap();
    assert_eq!(summary.processed, 2);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("games.pgn.zst");
    std::fs::write(&path, zstd::encode_all(text.as_bytes(), 0).unwrap()).unwrap();

    let mut store = SqliteStore::open_in_memory().unwrap();
    let summary = StreamingIngestor::new(&mut store, options(10))
        .ingest_path(&path)
        .unwrap();
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.source, path.display().to_string());
    assert_scenario(&store);
}
