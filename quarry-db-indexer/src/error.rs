//! Error types for the indexer

use thiserror::Error;

/// Result type for indexer operations
pub type Result<T> = std::result::Result<T, IndexerError>;

/// Indexer errors
#[derive(Error, Debug)]
pub enum IndexerError {
    /// Error from quarry-db-core
    #[error("Core error: {0}")]
    Core(#[from] quarry_db_core::Error),

    /// Temp directory / staging I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The rebuild was cancelled before committing
    #[error("Rebuild cancelled")]
    Canceled,

    /// A stream worker died
    #[error("Stream worker panicked")]
    WorkerPanic,

    /// Transient retries did not converge
    #[error("Retries exhausted after {attempts} attempts")]
    RetryExhausted { attempts: u32 },
}

impl IndexerError {
    /// True when the rebuild stopped because the caller cancelled it.
    pub fn is_canceled(&self) -> bool {
        matches!(
            self,
            IndexerError::Canceled | IndexerError::Core(quarry_db_core::Error::Canceled)
        )
    }
}
