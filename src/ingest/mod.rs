//! Streaming ingestion
//!
//! `StreamingIngestor` pulls one block at a time, parses it, resolves both
//! players, buffers the record and folds its opening delta into the
//! accumulator. When either flush threshold is reached the buffered records
//! are bulk-inserted and the drained deltas upserted. End of stream,
//! cancellation and mid-stream read failures all end the same way: a final
//! flush, then one checkpoint.

mod accumulator;
mod buffer;
mod checkpoint;

pub use accumulator::AggregationAccumulator;
pub use buffer::RecordBuffer;
pub use checkpoint::CheckpointRecorder;

use chrono::Utc;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::IngestConfig;
use crate::model::RunSummary;
use crate::pgn::{parse_block, BlockReader};
use crate::store::{StorageBackend, StoreError};

#[derive(Debug, Error)]
pub enum IngestError {
    /// The source could not be opened or yielded nothing readable
    #[error("cannot read {}: {source}", .path.display())]
    SourceUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Storage(#[from] StoreError),
}

/// Shared stop request, checked between blocks
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub max_batch_records: usize,
    /// Flush once the estimated size of pending state reaches this
    pub max_batch_bytes: usize,
    pub progress_interval: u64,
    /// Stop after this many accepted records
    pub max_games: Option<u64>,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self::from_config(&IngestConfig::default())
    }
}

impl IngestOptions {
    pub fn from_config(config: &IngestConfig) -> Self {
        Self {
            max_batch_records: config.max_batch_records.max(1),
            max_batch_bytes: config.max_batch_bytes.max(1),
            progress_interval: config.progress_interval.max(1),
            max_games: None,
        }
    }
}

/// Drives one run at a time against a borrowed backend
pub struct StreamingIngestor<'a> {
    backend: &'a mut dyn StorageBackend,
    options: IngestOptions,
    cancel: CancelFlag,
}

impl<'a> StreamingIngestor<'a> {
    pub fn new(backend: &'a mut dyn StorageBackend, options: IngestOptions) -> Self {
        Self {
            backend,
            options,
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Ingest a `.pgn` file, or a `.zst`-compressed one
    pub fn ingest_path(&mut self, path: &Path) -> Result<RunSummary, IngestError> {
        let unavailable = |source: io::Error| IngestError::SourceUnavailable {
            path: path.to_path_buf(),
            source,
        };

        let file = File::open(path).map_err(unavailable)?;
        let reader: Box<dyn Read> = if path.extension().is_some_and(|ext| ext == "zst") {
            Box::new(zstd::stream::read::Decoder::new(file).map_err(unavailable)?)
        } else {
            Box::new(file)
        };

        self.ingest_reader(&path.display().to_string(), BufReader::new(reader))
            .map_err(|e| match e {
                IngestError::SourceUnavailable { source, .. } => unavailable(source),
                other => other,
            })
    }

    pub fn ingest_reader<R: BufRead>(
        &mut self,
        source: &str,
        reader: R,
    ) -> Result<RunSummary, IngestError> {
        self.ingest_blocks(source, BlockReader::new(reader))
    }

    /// Run over an already-split block stream.
    ///
    /// Only a source that fails before yielding its first block is an error;
    /// everything after that ends in a summary and a checkpoint. Blocks from
    /// `BlockReader` fail only on real read errors, never on bad encoding.
    pub fn ingest_blocks<I>(&mut self, source: &str, blocks: I) -> Result<RunSummary, IngestError>
    where
        I: IntoIterator<Item = io::Result<String>>,
    {
        let started = Instant::now();
        let mut run = Run::new(source, &self.options);

        info!(source, backend = self.backend.name(), "ingest started");

        for (index, block) in blocks.into_iter().enumerate() {
            if self.cancel.is_cancelled() {
                warn!(source, processed = run.summary.processed, "ingest interrupted");
                run.summary.interrupted = true;
                break;
            }

            let block = match block {
                Ok(block) => block,
                Err(e) if index == 0 => {
                    return Err(IngestError::SourceUnavailable {
                        path: PathBuf::from(source),
                        source: e,
                    });
                }
                Err(e) => {
                    warn!(source, error = %e, "read failed, stopping early");
                    run.summary.interrupted = true;
                    break;
                }
            };

            if !run.accept(self.backend, &block) {
                continue;
            }

            if run.summary.processed % self.options.progress_interval == 0 {
                info!(
                    source,
                    processed = run.summary.processed,
                    errors = run.summary.errors,
                    elapsed_secs = started.elapsed().as_secs(),
                    "progress"
                );
            }

            if run.should_flush() {
                run.flush(self.backend);
            }

            if matches!(self.options.max_games, Some(max) if run.summary.processed >= max) {
                info!(source, max_games = run.summary.processed, "game limit reached");
                break;
            }
        }

        run.flush(self.backend);
        run.summary.duration = started.elapsed();
        let summary = run.summary;

        if let Err(e) = CheckpointRecorder::record(self.backend, &summary) {
            error!(source, error = %e, "failed to record checkpoint");
        }

        info!(
            source,
            processed = summary.processed,
            persisted = summary.persisted,
            errors = summary.errors,
            storage_errors = summary.storage_errors,
            duration_secs = summary.duration.as_secs_f64(),
            rate = summary.rate(),
            "ingest finished"
        );
        Ok(summary)
    }
}

/// Pending state and counters for a single run
struct Run {
    buffer: RecordBuffer,
    accumulator: AggregationAccumulator,
    summary: RunSummary,
}

impl Run {
    fn new(source: &str, options: &IngestOptions) -> Self {
        Self {
            buffer: RecordBuffer::new(options.max_batch_records, options.max_batch_bytes),
            accumulator: AggregationAccumulator::new(),
            summary: RunSummary {
                source: source.to_string(),
                started_at: Utc::now(),
                processed: 0,
                persisted: 0,
                errors: 0,
                storage_errors: 0,
                flushes: 0,
                duration: Default::default(),
                interrupted: false,
            },
        }
    }

    /// Parse and resolve one block. Returns whether it was buffered.
    fn accept(&mut self, backend: &mut dyn StorageBackend, block: &str) -> bool {
        let game = match parse_block(block) {
            Ok(game) => game,
            Err(rejection) => {
                debug!(reason = %rejection, "block rejected");
                self.summary.errors += 1;
                return false;
            }
        };

        let [white, black] = game.observations();
        let resolved = backend
            .resolve_player(&white)
            .and_then(|w| backend.resolve_player(&black).map(|b| (w, b)));
        let (white_id, black_id) = match resolved {
            Ok(ids) => ids,
            Err(e) => {
                error!(game = %game.external_id, error = %e, "player resolution failed");
                self.summary.storage_errors += 1;
                return false;
            }
        };

        self.accumulator
            .merge(&game.opening_code, &game.opening_delta());
        self.buffer.push(game.into_record(white_id, black_id));
        self.summary.processed += 1;
        true
    }

    fn should_flush(&self) -> bool {
        self.buffer.should_flush(self.accumulator.estimated_bytes())
    }

    fn flush(&mut self, backend: &mut dyn StorageBackend) {
        if self.buffer.is_empty() && self.accumulator.is_empty() {
            return;
        }

        let started = Instant::now();
        let records = self.buffer.len();
        let persisted = match backend.bulk_insert_records(self.buffer.records()) {
            Ok(n) => n,
            Err(e) => {
                error!(records, error = %e, "bulk insert failed");
                self.summary.storage_errors += records as u64;
                0
            }
        };
        self.summary.persisted += persisted as u64;
        self.buffer.clear();

        let deltas = self.accumulator.drain();
        if let Err(e) = backend.upsert_aggregates(&deltas) {
            error!(openings = deltas.len(), error = %e, "aggregate upsert failed");
            self.summary.storage_errors += 1;
        }

        self.summary.flushes += 1;
        info!(
            records,
            persisted,
            openings = deltas.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "batch flushed"
        );
    }
}

#[cfg(test)]
mod tests;
