//! Configuration management with YAML support

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub ingest: IngestConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which persistent store to use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Relational,
    Document,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: BackendKind,

    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,

    #[serde(default = "default_document_dir")]
    pub document_dir: String,
}

/// Flush thresholds and progress reporting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_max_batch_records")]
    pub max_batch_records: usize,

    #[serde(default = "default_max_batch_bytes")]
    pub max_batch_bytes: usize,

    /// Accepted records between progress log lines
    #[serde(default = "default_progress_interval")]
    pub progress_interval: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter; RUST_LOG wins when set
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_sqlite_path() -> String {
    "~/.local/share/pgnstore/pgnstore.db".to_string()
}

fn default_document_dir() -> String {
    "~/.local/share/pgnstore/documents".to_string()
}

fn default_max_batch_records() -> usize {
    1000
}

fn default_max_batch_bytes() -> usize {
    500 * 1024 * 1024
}

fn default_progress_interval() -> u64 {
    10_000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            sqlite_path: default_sqlite_path(),
            document_dir: default_document_dir(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_batch_records: default_max_batch_records(),
            max_batch_bytes: default_max_batch_bytes(),
            progress_interval: default_progress_interval(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    /// Searches in order:
    /// 1. Provided path
    /// 2. ./pgnstore.yaml (current directory)
    /// 3. ~/.config/pgnstore/pgnstore.yaml
    pub fn load(path: &str) -> Result<Self> {
        let search_paths = vec![
            shellexpand::tilde(path).to_string(),
            "pgnstore.yaml".to_string(),
            shellexpand::tilde("~/.config/pgnstore/pgnstore.yaml").to_string(),
        ];

        for search_path in &search_paths {
            if std::path::Path::new(search_path).exists() {
                let content = std::fs::read_to_string(search_path)?;
                let config: Config = serde_yaml::from_str(&content)?;
                config.validate()?;
                return Ok(config);
            }
        }

        // No config file found, use defaults
        Ok(Config::default())
    }

    /// Reject settings the ingestor cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.ingest.max_batch_records == 0 {
            bail!("ingest.max_batch_records must be at least 1");
        }
        if self.ingest.max_batch_bytes == 0 {
            bail!("ingest.max_batch_bytes must be at least 1");
        }
        if self.ingest.progress_interval == 0 {
            bail!("ingest.progress_interval must be at least 1");
        }
        Ok(())
    }

    /// Get the SQLite database path, expanding ~ to home directory
    pub fn sqlite_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.storage.sqlite_path).to_string())
    }

    /// Get the document store directory, expanding ~ to home directory
    pub fn document_dir(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.storage.document_dir).to_string())
    }
}
