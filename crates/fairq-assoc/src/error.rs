//! Error types for the share hierarchy.

use thiserror::Error;

/// Result type alias for association tree operations.
pub type AssocResult<T> = Result<T, AssocError>;

/// Errors that can occur while maintaining the association tree.
#[derive(Debug, Error)]
pub enum AssocError {
    #[error("decay factor of 0 would erase all usage history")]
    ZeroDecayFactor,

    #[error("fairshare is disabled, refusing to touch usage")]
    FairshareDisabled,

    #[error("unknown association: {0}")]
    Unknown(u32),

    #[error("association already present: {0}")]
    Duplicate(u32),

    #[error("association {id} references missing parent {parent_id}")]
    MissingParent { id: u32, parent_id: u32 },

    #[error("association {0} still has children")]
    HasChildren(u32),

    #[error("unknown QOS: {0}")]
    UnknownQos(u32),
}
