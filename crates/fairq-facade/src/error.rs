//! Error types for the priority facade.

use thiserror::Error;

/// Result type alias for facade operations.
pub type FacadeResult<T> = Result<T, FacadeError>;

/// Errors that can occur while initializing or dispatching.
#[derive(Debug, Error)]
pub enum FacadeError {
    #[error("init failed: {0}")]
    Init(String),

    #[error("state store error: {0}")]
    Store(#[from] fairq_state::StoreError),

    #[error("association error: {0}")]
    Assoc(#[from] fairq_assoc::AssocError),
}
