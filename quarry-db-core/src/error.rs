//! Error types for quarry-db-core

use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid options detected at start-up
    #[error("Config error: {0}")]
    Config(String),

    /// Malformed input edge or record
    #[error("Parse error: {0}")]
    Parse(String),

    /// Value cannot be converted to the declared schema type, or an
    /// illegal schema transition was requested
    #[error("Schema error: {0}")]
    Schema(String),

    /// A subject or object resolved to the reserved UID 0
    #[error("Invalid UID with value 0 for {0}")]
    InvalidUid(String),

    /// Transient condition surfaced by the posting-list layer; callers
    /// retry with backoff
    #[error("Temporary error, retry")]
    RetryTransient,

    /// The read timestamp precedes a pruned version
    #[error("Read timestamp {read_ts} is older than the pruned watermark {pruned}")]
    ReadTsTooOld { read_ts: u64, pruned: u64 },

    /// Operation was cancelled by the caller
    #[error("Operation cancelled")]
    Canceled,

    /// Storage-related errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Malformed key bytes
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a parse error
    pub fn parse(msg: impl Into<String>) -> Self {
        Error::Parse(msg.into())
    }

    /// Create a schema error
    pub fn schema(msg: impl Into<String>) -> Self {
        Error::Schema(msg.into())
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Error::Storage(msg.into())
    }

    /// Create an invalid key error
    pub fn invalid_key(msg: impl Into<String>) -> Self {
        Error::InvalidKey(msg.into())
    }

    /// True if the error is the transient retry signal.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::RetryTransient)
    }
}
