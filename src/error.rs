//! Error types shared by the store, the aggregator and the sync engine.

use std::path::PathBuf;
use thiserror::Error;

/// Anything that can go wrong while reading or writing the index.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not a YYYY-MM-DD date: {0}")]
    InvalidDate(String),

    #[error("background task failed: {0}")]
    Task(String),
}

/// Errors raised while loading the TOML config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("could not determine the user data directory")]
    NoDataDir,
}

pub type Result<T, E = IndexError> = std::result::Result<T, E>;
