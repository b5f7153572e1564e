//! Execution error types
//!
//! Error codes:
//! - AERO_EXEC_INVARIANT (FATAL)
//! - AERO_EXEC_STAGE_FAILURE (ERROR)
//! - AERO_EXEC_INTERRUPTED (ERROR)
//! - AERO_EXEC_DEADLINE (ERROR)
//! - AERO_EXEC_STORAGE (ERROR)

use std::fmt;

use crate::storage::StorageError;

/// Severity levels for execution errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The query failed but the process is healthy
    Error,
    /// A core-logic bug; the plan must not continue
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Execution error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecErrorCode {
    /// Programming or state machine invariant violated
    AeroExecInvariant,
    /// A stage reported FAILURE
    AeroExecStageFailure,
    /// The operation was killed
    AeroExecInterrupted,
    /// The operation ran past its deadline
    AeroExecDeadline,
    /// A storage error other than a write conflict
    AeroExecStorage,
}

impl ExecErrorCode {
    /// Returns the string code
    pub fn code(&self) -> &'static str {
        match self {
            ExecErrorCode::AeroExecInvariant => "AERO_EXEC_INVARIANT",
            ExecErrorCode::AeroExecStageFailure => "AERO_EXEC_STAGE_FAILURE",
            ExecErrorCode::AeroExecInterrupted => "AERO_EXEC_INTERRUPTED",
            ExecErrorCode::AeroExecDeadline => "AERO_EXEC_DEADLINE",
            ExecErrorCode::AeroExecStorage => "AERO_EXEC_STORAGE",
        }
    }

    /// Returns the severity level for this error
    pub fn severity(&self) -> Severity {
        match self {
            ExecErrorCode::AeroExecInvariant => Severity::Fatal,
            _ => Severity::Error,
        }
    }
}

impl fmt::Display for ExecErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Execution error with context
#[derive(Debug, Clone)]
pub struct ExecError {
    code: ExecErrorCode,
    message: String,
    stage: Option<&'static str>,
}

impl ExecError {
    /// Create an invariant violation error (FATAL)
    pub fn invariant(reason: impl Into<String>) -> Self {
        Self {
            code: ExecErrorCode::AeroExecInvariant,
            message: reason.into(),
            stage: None,
        }
    }

    /// Create a stage failure error
    pub fn stage_failure(stage: &'static str, reason: impl Into<String>) -> Self {
        Self {
            code: ExecErrorCode::AeroExecStageFailure,
            message: reason.into(),
            stage: Some(stage),
        }
    }

    /// Create an interruption error
    pub fn interrupted(reason: impl Into<String>) -> Self {
        Self {
            code: ExecErrorCode::AeroExecInterrupted,
            message: reason.into(),
            stage: None,
        }
    }

    /// Create a deadline error
    pub fn deadline_exceeded(reason: impl Into<String>) -> Self {
        Self {
            code: ExecErrorCode::AeroExecDeadline,
            message: reason.into(),
            stage: None,
        }
    }

    /// Returns the error code
    pub fn code(&self) -> ExecErrorCode {
        self.code
    }

    /// Returns the severity level
    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    /// Returns the error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Stage that reported the failure, if any
    pub fn stage(&self) -> Option<&'static str> {
        self.stage
    }

    /// Returns whether this is a fatal error
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: ", self.code.severity(), self.code.code())?;
        if let Some(stage) = self.stage {
            write!(f, "{}: ", stage)?;
        }
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ExecError {}

impl From<StorageError> for ExecError {
    fn from(err: StorageError) -> Self {
        let code = if err.is_fatal() {
            ExecErrorCode::AeroExecInvariant
        } else {
            ExecErrorCode::AeroExecStorage
        };
        Self {
            code,
            message: format!("{} ({})", err, err.code()),
            stage: None,
        }
    }
}

/// Result type for execution operations
pub type ExecResult<T> = Result<T, ExecError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(ExecErrorCode::AeroExecInvariant.code(), "AERO_EXEC_INVARIANT");
        assert_eq!(ExecErrorCode::AeroExecStageFailure.code(), "AERO_EXEC_STAGE_FAILURE");
        assert_eq!(ExecErrorCode::AeroExecInterrupted.code(), "AERO_EXEC_INTERRUPTED");
        assert_eq!(ExecErrorCode::AeroExecDeadline.code(), "AERO_EXEC_DEADLINE");
        assert_eq!(ExecErrorCode::AeroExecStorage.code(), "AERO_EXEC_STORAGE");
    }

    #[test]
    fn test_only_invariants_are_fatal() {
        assert!(ExecError::invariant("freed id").is_fatal());
        assert!(!ExecError::stage_failure("SORT", "memory").is_fatal());
        assert!(!ExecError::interrupted("killed").is_fatal());
    }

    #[test]
    fn test_error_display() {
        let err = ExecError::stage_failure("SORT", "memory limit exceeded");
        assert_eq!(
            err.to_string(),
            "[ERROR] AERO_EXEC_STAGE_FAILURE: SORT: memory limit exceeded"
        );
    }

    #[test]
    fn test_storage_conversion() {
        let err: ExecError = StorageError::LockPoisoned("idx".into()).into();
        assert!(err.is_fatal());
        let err: ExecError = StorageError::RecordNotFound(crate::storage::RecordId::new(1)).into();
        assert_eq!(err.code(), ExecErrorCode::AeroExecStorage);
    }
}
