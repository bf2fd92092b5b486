//! Per-run audit rows

use tracing::info;

use crate::model::{ImportCheckpoint, RunSummary};
use crate::store::{StorageBackend, StoreResult};

/// Writes one `ImportCheckpoint` per finished or interrupted run
pub struct CheckpointRecorder;

impl CheckpointRecorder {
    pub fn record(
        backend: &mut dyn StorageBackend,
        summary: &RunSummary,
    ) -> StoreResult<ImportCheckpoint> {
        let checkpoint = summary.checkpoint();
        backend.record_checkpoint(&checkpoint)?;
        info!(
            source = %checkpoint.source,
            games = checkpoint.games_ingested,
            errors = checkpoint.parse_errors,
            interrupted = checkpoint.interrupted,
            "checkpoint recorded"
        );
        Ok(checkpoint)
    }
}
