//! Storage error types
//!
//! Error codes:
//! - AERO_STORAGE_WRITE_CONFLICT (ERROR severity, retried via yield)
//! - AERO_STORAGE_RECORD_NOT_FOUND (ERROR severity)
//! - AERO_STORAGE_LOCK_POISONED (FATAL severity)

use thiserror::Error;

use super::record::RecordId;

/// Storage errors surfaced by cursors and record stores.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// A concurrent operation holds the data; the caller must yield and retry.
    #[error("write conflict: {0}")]
    WriteConflict(String),

    /// The referenced record no longer exists.
    #[error("record {0} not found")]
    RecordNotFound(RecordId),

    /// A lock protecting storage state was poisoned by a panicking writer.
    #[error("storage lock poisoned: {0}")]
    LockPoisoned(String),
}

impl StorageError {
    /// Create a write conflict error
    pub fn write_conflict(context: impl Into<String>) -> Self {
        StorageError::WriteConflict(context.into())
    }

    /// Returns the string code for this error
    pub fn code(&self) -> &'static str {
        match self {
            StorageError::WriteConflict(_) => "AERO_STORAGE_WRITE_CONFLICT",
            StorageError::RecordNotFound(_) => "AERO_STORAGE_RECORD_NOT_FOUND",
            StorageError::LockPoisoned(_) => "AERO_STORAGE_LOCK_POISONED",
        }
    }

    /// Returns true for the conflict signal that calls for a yield-and-retry
    pub fn is_write_conflict(&self) -> bool {
        matches!(self, StorageError::WriteConflict(_))
    }

    /// Returns true if the process cannot safely continue
    pub fn is_fatal(&self) -> bool {
        matches!(self, StorageError::LockPoisoned(_))
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
