pub mod cli;
pub mod config;
pub mod ingest;
pub mod model;
pub mod pgn;
pub mod store;

pub use config::Config;
pub use ingest::{IngestOptions, StreamingIngestor};
pub use store::{open_store, StorageBackend, Store};
