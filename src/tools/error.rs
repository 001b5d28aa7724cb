use thiserror::Error;

use crate::error::ErrorKind;

/// Internal tool failures. These never cross the registry boundary as
/// errors — the registry folds them into a failed [`super::ToolExecutionResult`].
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool '{0}' is currently disabled")]
    Disabled(String),

    #[error("Insufficient permissions to use tool '{tool}'. Required: {required:?}")]
    PermissionDenied { tool: String, required: Vec<String> },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Sandbox violation: {0}")]
    Sandbox(String),

    #[error("Tool execution failed: {0}")]
    Execution(String),

    #[error("Tool workers saturated")]
    Saturated,

    #[error("Tool execution timed out")]
    Timeout,

    #[error("Tool execution cancelled")]
    Cancelled,

    #[error("Dependency unavailable: {0}")]
    Unavailable(String),
}

impl ToolError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ToolError::NotFound(_) => ErrorKind::NotFound,
            ToolError::Disabled(_) => ErrorKind::NotFound,
            ToolError::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            ToolError::Validation(_) => ErrorKind::ValidationFailed,
            ToolError::Sandbox(_) => ErrorKind::SandboxViolation,
            ToolError::Execution(_) => ErrorKind::ExecutionFailed,
            ToolError::Saturated => ErrorKind::Saturated,
            ToolError::Timeout => ErrorKind::Timeout,
            ToolError::Cancelled => ErrorKind::Cancelled,
            ToolError::Unavailable(_) => ErrorKind::DependencyUnavailable,
        }
    }

    pub fn execution(error: impl std::fmt::Display) -> Self {
        ToolError::Execution(error.to_string())
    }
}
