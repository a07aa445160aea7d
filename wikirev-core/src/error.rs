//! Errors surfaced by the wiki page operations

use crate::storage::StorageError;

/// Result type for wiki page operations
pub type Result<T> = std::result::Result<T, WikiError>;

/// Failures a caller has to handle.
///
/// Transient conflicts (a concurrent writer, an edit started before the
/// current revision) are not errors; operations report them through their
/// `None`/`false` return values.
#[derive(Debug, thiserror::Error)]
pub enum WikiError {
    /// The caller broke a contract: unknown author, empty page name
    #[error("Integrity violation: {0}")]
    Integrity(String),

    /// A move target is already taken by another page
    #[error("Page already exists: {0}")]
    DestinationExists(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(StorageError),
}

impl From<StorageError> for WikiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Integrity(msg) => WikiError::Integrity(msg),
            other => WikiError::Storage(other),
        }
    }
}
