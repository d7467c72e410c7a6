//! Error types for tilldb-core.
//!
//! Minimal error taxonomy without server or client dependencies (no axum, no
//! rocksdb, no reqwest). Both sides map their backend failures onto it.

use thiserror::Error;

/// Store error type shared by the local store, the remote store and the
/// sync coordinator.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Document '{0}' not found")]
    NotFound(String),

    #[error("Storage full: {0}")]
    StorageFull(String),

    #[error("Remote unavailable: {0}")]
    Unavailable(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("Medium error: {0}")]
    Medium(String),
}

impl StoreError {
    /// Errors worth retrying on a later sync pass.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Unavailable(_) | StoreError::StorageFull(_) | StoreError::Medium(_)
        )
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

impl serde::Serialize for StoreError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}
