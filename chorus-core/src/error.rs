//! Error types for the chorus core library.

use thiserror::Error;

/// Top-level error type for clock, directive, memory and storage operations.
#[derive(Error, Debug)]
pub enum ChorusError {
    /// A time-of-day or day value outside the narrative calendar.
    #[error("Invalid time value: {0} (expected day >= 1 and one of early_morning, morning, afternoon, evening, night)")]
    InvalidTimeValue(String),

    /// An embedded directive that could not be resolved.
    #[error("Unknown directive: {0}")]
    UnknownDirective(String),

    /// The long-term semantic index rejected an operation.
    #[error("Semantic index error: {0}")]
    Index(String),

    /// Serialization or deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// SQLite persistence error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// `PRAGMA integrity_check` reported a corrupt database.
    #[error("Snapshot store failed integrity check: {0}")]
    Integrity(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, ChorusError>;
