//! Grant election error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ElectionError {
    #[error("Missing block at height {0}")]
    MissingBlock(u64),

    #[error("Snapshot parse error: {0}")]
    Snapshot(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ElectionError>;
