use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure classification shared across the engine.
///
/// Component errors map into one of these kinds before they reach a caller;
/// the unified handler serializes the kind into its error envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    AuthFailed,
    PermissionDenied,
    RateLimited,
    QuotaExceeded,
    Saturated,
    Timeout,
    DependencyUnavailable,
    ValidationFailed,
    SandboxViolation,
    ExecutionFailed,
    NotFound,
    Cancelled,
    Internal,
}

impl ErrorKind {
    /// Whether a caller may reasonably retry the same request.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimited
                | ErrorKind::QuotaExceeded
                | ErrorKind::Saturated
                | ErrorKind::Timeout
                | ErrorKind::DependencyUnavailable
        )
    }
}

#[derive(Error, Debug, Clone)]
#[error("{kind:?}: {message}")]
pub struct CoreError {
    pub kind: ErrorKind,
    pub message: String,
}

impl CoreError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds() {
        assert!(ErrorKind::RateLimited.is_retryable());
        assert!(ErrorKind::Timeout.is_retryable());
        assert!(!ErrorKind::PermissionDenied.is_retryable());
        assert!(!ErrorKind::SandboxViolation.is_retryable());
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::SandboxViolation).unwrap();
        assert_eq!(json, "\"sandbox_violation\"");
    }
}
