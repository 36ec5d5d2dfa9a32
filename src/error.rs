use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A tensor container could not be decoded. Per-file: the scan skips the file
/// and the refiner keeps it in its current subgroup.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("unable to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("malformed tensor container {}: {reason}", path.display())]
    Format { path: PathBuf, reason: String },
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("Checkpoint write failed for {}: {reason}", path.display())]
    Persistence { path: PathBuf, reason: String },

    #[error("Checkpoint {} is corrupt: {reason}", path.display())]
    CorruptCheckpoint { path: PathBuf, reason: String },

    #[error("{0}")]
    Other(String),
}
