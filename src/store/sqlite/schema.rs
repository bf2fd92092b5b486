//! SQLite schema definition
//!
//! - players: one row per username, rolling rating statistics
//! - games: one row per ingested game, unique on external game id
//! - openings: additive rollups keyed by opening code
//! - rating_history: hour-bucketed rating samples
//! - import_checkpoints: append-only audit log

pub const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;

-- ============================================
-- PLAYERS
-- ============================================

CREATE TABLE IF NOT EXISTS players (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT NOT NULL UNIQUE,         -- case-sensitive, as observed
    title TEXT,                            -- 'GM', 'IM', ... (from username)
    current_rating INTEGER NOT NULL,
    peak_rating INTEGER NOT NULL,          -- never decreases
    games_played INTEGER NOT NULL DEFAULT 0,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    updated_at DATETIME
);

-- ============================================
-- GAMES
-- ============================================

CREATE TABLE IF NOT EXISTS games (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    game_id TEXT NOT NULL UNIQUE,          -- Site URL id or content hash
    white_player_id INTEGER NOT NULL,
    black_player_id INTEGER NOT NULL,
    white_user TEXT NOT NULL,
    black_user TEXT NOT NULL,
    white_rating INTEGER NOT NULL,
    black_rating INTEGER NOT NULL,
    result TEXT NOT NULL,                  -- '1-0', '0-1', '1/2-1/2', '*'
    date TEXT,                             -- 'YYYY-MM-DD', NULL when unknown
    eco TEXT NOT NULL,
    opening_name TEXT NOT NULL,
    time_control TEXT NOT NULL,            -- bullet | blitz | rapid | classical | unknown
    moves TEXT NOT NULL,                   -- space-delimited SAN
    ply_count INTEGER NOT NULL,
    event TEXT NOT NULL DEFAULT '',
    site TEXT NOT NULL DEFAULT '',
    white_accuracy REAL,
    black_accuracy REAL,
    acpl INTEGER,
    created_at DATETIME NOT NULL,
    FOREIGN KEY(white_player_id) REFERENCES players(id),
    FOREIGN KEY(black_player_id) REFERENCES players(id)
);

-- ============================================
-- OPENINGS
-- ============================================

-- Sums rather than averages so increments recombine exactly
CREATE TABLE IF NOT EXISTS openings (
    eco_code TEXT PRIMARY KEY,
    opening_name TEXT NOT NULL,            -- first seen wins
    total_games INTEGER NOT NULL DEFAULT 0,
    white_wins INTEGER NOT NULL DEFAULT 0,
    black_wins INTEGER NOT NULL DEFAULT 0,
    draws INTEGER NOT NULL DEFAULT 0,
    total_white_elo INTEGER NOT NULL DEFAULT 0,
    total_black_elo INTEGER NOT NULL DEFAULT 0,
    updated_at DATETIME
);

-- ============================================
-- RATING HISTORY
-- ============================================

CREATE TABLE IF NOT EXISTS rating_history (
    id INTEGER PRIMARY KEY,
    player_id INTEGER NOT NULL,
    bucket DATETIME NOT NULL,              -- start of hour, RFC 3339
    rating INTEGER NOT NULL,
    FOREIGN KEY(player_id) REFERENCES players(id)
);

-- ============================================
-- IMPORT CHECKPOINTS
-- ============================================

CREATE TABLE IF NOT EXISTS import_checkpoints (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_source TEXT NOT NULL,
    import_date DATETIME NOT NULL,
    games_imported INTEGER NOT NULL,
    parse_errors INTEGER NOT NULL,
    import_duration_seconds REAL NOT NULL,
    interrupted BOOLEAN NOT NULL DEFAULT FALSE
);

-- ============================================
-- INDEXES
-- ============================================

CREATE INDEX IF NOT EXISTS idx_players_rating ON players(current_rating DESC);

CREATE INDEX IF NOT EXISTS idx_games_white_date ON games(white_player_id, date DESC);
CREATE INDEX IF NOT EXISTS idx_games_black_date ON games(black_player_id, date DESC);
CREATE INDEX IF NOT EXISTS idx_games_eco_date ON games(eco, date DESC);
CREATE INDEX IF NOT EXISTS idx_games_time_control ON games(time_control);
CREATE INDEX IF NOT EXISTS idx_games_result ON games(result);

CREATE INDEX IF NOT EXISTS idx_openings_total ON openings(total_games DESC);

CREATE INDEX IF NOT EXISTS idx_rating_history_player ON rating_history(player_id, bucket);
"#;
