use thiserror::Error;

/// Errors that can occur in storage operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Iterator error: {0}")]
    Iterator(String),

    #[error("Corrupt record: {0}")]
    CorruptRecord(String),
}

impl From<veridian_types::TypesError> for StorageError {
    fn from(e: veridian_types::TypesError) -> Self {
        StorageError::CorruptRecord(e.to_string())
    }
}
