//! Error types for the loader

use thiserror::Error;

/// Result type for loader operations
pub type Result<T> = std::result::Result<T, LoaderError>;

/// Loader errors
#[derive(Error, Debug)]
pub enum LoaderError {
    /// Error from quarry-db-core
    #[error("Core error: {0}")]
    Core(#[from] quarry_db_core::Error),

    /// Invalid loader options
    #[error("Config error: {0}")]
    Config(String),

    /// Malformed edge; fatal unless `ignore_errors` is set
    #[error("Parse error: {0}")]
    Parse(String),

    /// A subject or object resolved to the reserved UID 0
    #[error("Invalid UID with value 0 for {0}")]
    InvalidUid(String),

    /// Map shard file I/O failure; fatal during loading
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A spill worker died
    #[error("Shard {shard} spill failed: {message}")]
    SpillFailed { shard: usize, message: String },
}

impl LoaderError {
    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        LoaderError::Config(msg.into())
    }

    /// Create a parse error
    pub fn parse(msg: impl Into<String>) -> Self {
        LoaderError::Parse(msg.into())
    }

    /// True when `ignore_errors` may swallow this error instead of
    /// aborting the load.
    pub fn is_ignorable(&self) -> bool {
        matches!(
            self,
            LoaderError::Parse(_)
                | LoaderError::InvalidUid(_)
                | LoaderError::Core(quarry_db_core::Error::Parse(_))
                | LoaderError::Core(quarry_db_core::Error::Schema(_))
        )
    }
}
