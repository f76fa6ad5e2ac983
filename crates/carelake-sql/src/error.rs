use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while reading or rewriting view SQL files.
#[derive(Debug, Error)]
pub enum SqlError {
    #[error("failed to read '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write '{path}': {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}
