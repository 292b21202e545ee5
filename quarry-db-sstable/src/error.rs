//! Error types for the table builder

use thiserror::Error;

/// Result type for table operations
pub type Result<T> = std::result::Result<T, TableError>;

/// Table build/read errors
#[derive(Error, Debug)]
pub enum TableError {
    /// The record does not fit in the remaining table capacity. Recovered
    /// locally: the caller rotates to a fresh builder.
    #[error("record exceeds remaining table capacity")]
    TableFull,

    /// Record fields exceed the 16-bit header encoding.
    #[error("record too large: {0}")]
    RecordTooLarge(String),

    /// Keys must be fed in non-decreasing order.
    #[error("keys out of order: {0}")]
    KeyOrder(String),

    /// The empty key is only legal for the end-of-stream terminator.
    #[error("empty key is reserved for the terminator record")]
    EmptyKey,

    /// Malformed table bytes encountered while reading back.
    #[error("corrupt table: {0}")]
    Corrupt(String),
}
