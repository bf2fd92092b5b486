//! Splits a PGN text stream into game blocks
//!
//! A block is a run of `[Key "Value"]` header lines, a blank line, move text
//! (one or more lines), then a blank line. Only one block is held in memory
//! at a time.
//!
//! Lines are decoded lossily, so a stray non-UTF-8 byte stays inside its own
//! block and is left to the parser. A header section followed by a blank line
//! and another header line is emitted on its own as a block without moves.

use std::io::{self, BufRead};

pub struct BlockReader<R> {
    reader: R,
    line: Vec<u8>,
    block: Vec<String>,
    has_moves: bool,
    /// Blank line seen after headers, before any move text
    after_headers: bool,
    /// Read failure held back until the partial block is emitted
    failed: Option<io::Error>,
    done: bool,
}

impl<R: BufRead> BlockReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: Vec::new(),
            block: vec![],
            has_moves: false,
            after_headers: false,
            failed: None,
            done: false,
        }
    }

    fn take_block(&mut self) -> String {
        self.has_moves = false;
        self.after_headers = false;
        let block = self.block.join("\n");
        self.block.clear();
        block
    }
}

impl<R: BufRead> Iterator for BlockReader<R> {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(e) = self.failed.take() {
            self.done = true;
            return Some(Err(e));
        }
        if self.done {
            return None;
        }

        loop {
            self.line.clear();
            let read = match self.reader.read_until(b'\n', &mut self.line) {
                Ok(n) => n,
                Err(e) if self.block.is_empty() => {
                    self.done = true;
                    return Some(Err(e));
                }
                Err(e) => {
                    self.failed = Some(e);
                    return Some(Ok(self.take_block()));
                }
            };

            if read == 0 {
                self.done = true;
                if self.block.is_empty() {
                    return None;
                }
                return Some(Ok(self.take_block()));
            }

            let line = String::from_utf8_lossy(&self.line).trim().to_string();

            if line.is_empty() {
                // Blank line between headers and move text does not end the block
                if self.has_moves {
                    return Some(Ok(self.take_block()));
                }
                self.after_headers = !self.block.is_empty();
                continue;
            }

            if line.starts_with('[') && (self.has_moves || self.after_headers) {
                // Next game started: either no blank line after the moves,
                // or the previous headers never got any moves
                let block = self.take_block();
                self.block.push(line);
                return Some(Ok(block));
            }

            if !line.starts_with('[') {
                self.has_moves = true;
            }
            self.block.push(line);
        }
    }
}
