//! Error types for decay clock persistence.

use thiserror::Error;

/// Result type alias for decay clock operations.
pub type PersistResult<T> = Result<T, PersistError>;

/// Errors that can occur while writing the decay clock.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("failed to write clock file: {0}")]
    Write(String),

    #[error("failed to swap clock file into place: {0}")]
    Swap(String),
}
