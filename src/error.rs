//! Error types for Coalescer.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Store error: {0}")]
    Store(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    #[error("Processor error: {0}")]
    Processor(String),

    #[error("Web error: {0}")]
    Web(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Wrap a SQLite failure with the operation that produced it.
    pub fn store(op: &str, err: rusqlite::Error) -> Self {
        Error::Store(format!("sqlite {}: {}", op, err))
    }
}
