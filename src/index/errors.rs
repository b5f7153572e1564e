//! Index error types
//!
//! Error codes:
//! - AERO_INDEX_PARALLEL_ARRAYS (ERROR)
//! - AERO_INDEX_KEY_PATTERN (ERROR)
//! - AERO_INDEX_BUILD_FAILED (FATAL)

use thiserror::Error;

/// Errors raised while generating keys or maintaining an index
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndexError {
    /// Two indexed fields of the same document both traverse arrays.
    #[error("cannot index parallel arrays [{first}] [{second}]")]
    ParallelArrays { first: String, second: String },

    /// The key pattern is unusable (empty, or a field path is empty).
    #[error("invalid key pattern: {0}")]
    InvalidKeyPattern(String),

    /// The index could not be updated.
    #[error("index build failed: {0}")]
    BuildFailed(String),
}

impl IndexError {
    /// Returns the string code for this error
    pub fn code(&self) -> &'static str {
        match self {
            IndexError::ParallelArrays { .. } => "AERO_INDEX_PARALLEL_ARRAYS",
            IndexError::InvalidKeyPattern(_) => "AERO_INDEX_KEY_PATTERN",
            IndexError::BuildFailed(_) => "AERO_INDEX_BUILD_FAILED",
        }
    }

    /// Returns whether this is a fatal error
    pub fn is_fatal(&self) -> bool {
        matches!(self, IndexError::BuildFailed(_))
    }
}

/// Result type for index operations
pub type IndexResult<T> = Result<T, IndexError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = IndexError::ParallelArrays {
            first: "a".into(),
            second: "b".into(),
        };
        assert_eq!(err.code(), "AERO_INDEX_PARALLEL_ARRAYS");
        assert!(!err.is_fatal());
        assert!(IndexError::BuildFailed("lock".into()).is_fatal());
    }

    #[test]
    fn test_error_display() {
        let err = IndexError::ParallelArrays {
            first: "a".into(),
            second: "b".into(),
        };
        assert_eq!(err.to_string(), "cannot index parallel arrays [a] [b]");
    }
}
