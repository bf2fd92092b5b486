//! PGN block parsing
//!
//! `parse_block` is a pure function: it either returns a fully validated
//! `ParsedGame` or a `Rejection`, and never touches storage. Identity
//! resolution happens afterwards in the ingestor, which turns the parsed game
//! into a `GameRecord` via `ParsedGame::into_record`.

mod header;
mod reader;

pub use header::{categorize_time_control, extract_title, parse_date};
pub use reader::BlockReader;

use chrono::{NaiveDate, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

use crate::model::{
    GameAnnotation, GameRecord, GameResult, OpeningDelta, PlayerId, PlayerObservation,
    TimeControl, DEFAULT_OPENING_CODE, DEFAULT_RATING, MAX_RATING, MIN_RATING,
};

/// Fewest moves a game may have
pub const MIN_MOVES: usize = 2;
/// Most moves a game may have
pub const MAX_MOVES: usize = 500;

const UNKNOWN: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    White,
    Black,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::White => f.write_str("white"),
            Side::Black => f.write_str("black"),
        }
    }
}

/// Why a block was not turned into a game
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("empty block")]
    Empty,
    #[error("malformed header line: {0}")]
    MalformedHeader(String),
    #[error("{side} rating is not a number: {value}")]
    MalformedRating { side: Side, value: String },
    #[error("move count {0} outside [{}, {}]", MIN_MOVES, MAX_MOVES)]
    MoveCount(usize),
    #[error("{side} rating {rating} outside [{}, {}]", MIN_RATING, MAX_RATING)]
    RatingOutOfRange { side: Side, rating: i64 },
}

/// One side of a parsed game, before identity resolution
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerSide {
    pub username: String,
    pub rating: i32,
    pub title: Option<String>,
}

/// A validated game whose players are still usernames
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedGame {
    pub external_id: String,
    pub white: PlayerSide,
    pub black: PlayerSide,
    pub result: GameResult,
    pub date: Option<NaiveDate>,
    pub opening_code: String,
    pub opening_name: String,
    pub time_control: TimeControl,
    pub moves: Vec<String>,
    pub event: String,
    pub site: String,
}

impl ParsedGame {
    /// Observations to feed `resolve_player`, white first
    pub fn observations(&self) -> [PlayerObservation; 2] {
        [&self.white, &self.black].map(|side| PlayerObservation {
            username: side.username.clone(),
            rating: side.rating,
            title: side.title.clone(),
            observed_on: self.date,
        })
    }

    /// Contribution of this game to its opening's aggregate
    pub fn opening_delta(&self) -> OpeningDelta {
        OpeningDelta::for_game(
            &self.opening_name,
            self.result,
            self.white.rating,
            self.black.rating,
        )
    }

    pub fn into_record(self, white_player_id: PlayerId, black_player_id: PlayerId) -> GameRecord {
        GameRecord {
            external_id: self.external_id,
            white_player_id,
            black_player_id,
            white_username: self.white.username,
            black_username: self.black.username,
            white_rating: self.white.rating,
            black_rating: self.black.rating,
            result: self.result,
            date: self.date,
            opening_code: self.opening_code,
            opening_name: self.opening_name,
            time_control: self.time_control,
            moves: self.moves,
            event: self.event,
            site: self.site,
            created_at: Utc::now(),
            annotation: GameAnnotation::default(),
        }
    }
}

/// Parse and validate one block
pub fn parse_block(block: &str) -> Result<ParsedGame, Rejection> {
    let block = block.trim();
    if block.is_empty() {
        return Err(Rejection::Empty);
    }

    let mut headers: HashMap<&str, String> = HashMap::new();
    let mut move_text = String::new();

    for line in block.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if line.starts_with('[') {
            let (key, value) =
                parse_header(line).ok_or_else(|| Rejection::MalformedHeader(line.to_string()))?;
            headers.insert(key, value);
        } else {
            if !move_text.is_empty() {
                move_text.push(' ');
            }
            move_text.push_str(line);
        }
    }

    let header = |key: &str| headers.get(key).map(String::as_str);

    let white_rating = parse_rating(header("WhiteElo"), Side::White)?;
    let black_rating = parse_rating(header("BlackElo"), Side::Black)?;

    let moves = extract_moves(&move_text);
    if moves.len() < MIN_MOVES || moves.len() > MAX_MOVES {
        return Err(Rejection::MoveCount(moves.len()));
    }

    let white_rating = check_rating(white_rating, Side::White)?;
    let black_rating = check_rating(black_rating, Side::Black)?;

    let site = header("Site").unwrap_or_default().to_string();

    Ok(ParsedGame {
        external_id: external_id(&site, block),
        white: player_side(header("White"), white_rating),
        black: player_side(header("Black"), black_rating),
        result: GameResult::from_pgn(header("Result").unwrap_or("*")),
        date: parse_date(header("Date").unwrap_or_default()),
        opening_code: header("ECO").unwrap_or(DEFAULT_OPENING_CODE).to_string(),
        opening_name: header("Opening").unwrap_or(UNKNOWN).to_string(),
        time_control: categorize_time_control(header("TimeControl").unwrap_or_default()),
        moves,
        event: header("Event").unwrap_or_default().to_string(),
        site,
    })
}

fn parse_header(line: &str) -> Option<(&str, String)> {
    let inner = line.strip_prefix('[')?.strip_suffix(']')?;
    let (key, value) = inner.split_once(char::is_whitespace)?;
    let value = value.trim().strip_prefix('"')?.strip_suffix('"')?;
    Some((key, value.replace("\\\"", "\"")))
}

fn parse_rating(value: Option<&str>, side: Side) -> Result<i64, Rejection> {
    match value {
        None => Ok(DEFAULT_RATING as i64),
        Some(v) => v.trim().parse::<i64>().map_err(|_| Rejection::MalformedRating {
            side,
            value: v.to_string(),
        }),
    }
}

fn check_rating(rating: i64, side: Side) -> Result<i32, Rejection> {
    if rating < MIN_RATING as i64 || rating > MAX_RATING as i64 {
        return Err(Rejection::RatingOutOfRange { side, rating });
    }
    Ok(rating as i32)
}

fn player_side(username: Option<&str>, rating: i32) -> PlayerSide {
    let username = username.unwrap_or(UNKNOWN).to_string();
    PlayerSide {
        title: extract_title(&username).map(str::to_string),
        username,
        rating,
    }
}

/// Move tokens from move text, dropping move numbers, result markers,
/// NAGs, `{}` comments and `()` variations
fn extract_moves(text: &str) -> Vec<String> {
    let mut cleaned = String::with_capacity(text.len());
    let mut in_comment = false;
    let mut depth = 0usize;
    for c in text.chars() {
        match c {
            '{' if !in_comment => in_comment = true,
            '}' if in_comment => in_comment = false,
            '(' if !in_comment => depth += 1,
            ')' if !in_comment && depth > 0 => depth -= 1,
            _ if in_comment || depth > 0 => {}
            _ => cleaned.push(c),
        }
    }

    cleaned
        .split_whitespace()
        .filter(|t| !matches!(*t, "1-0" | "0-1" | "1/2-1/2" | "*"))
        .filter(|t| !t.starts_with('$'))
        .filter_map(|t| {
            // Move numbers are digits followed by dots: `12.`, `12...Nf6`
            let rest = t.trim_start_matches(|c: char| c.is_ascii_digit());
            let token = if rest.starts_with('.') {
                rest.trim_start_matches('.')
            } else if rest.is_empty() {
                rest
            } else {
                t
            };
            (!token.is_empty()).then(|| token.to_string())
        })
        .collect()
}

/// Game id from a `Site` URL (`https://lichess.org/abcd1234`), otherwise a
/// content hash of the block
fn external_id(site: &str, block: &str) -> String {
    if let Some((_, rest)) = site.split_once("://") {
        if let Some((_, id)) = rest.rsplit_once('/') {
            if !id.is_empty() {
                return id.to_string();
            }
        }
    }
    hex::encode(Sha256::digest(block.as_bytes()))
}
