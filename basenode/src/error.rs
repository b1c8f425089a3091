//! Basenode error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BasenodeError {
    #[error("Basenode not found: {0}")]
    NotFound(String),

    #[error("Basenode already registered: {0}")]
    AlreadyRegistered(String),

    #[error("Basenode is not in a running status")]
    NotRunning,

    #[error("Sign message failed: {0}")]
    SignFailed(String),

    #[error("Verify message failed: {0}")]
    VerifyFailed(String),

    #[error("No operating key configured")]
    NoOperatingKey,

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error at line {line}: {message}")]
    ConfigParse { line: usize, message: String },
}

pub type Result<T> = std::result::Result<T, BasenodeError>;
