use thiserror::Error;

use crate::error::ErrorKind;

use super::WorkflowState;

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("Workflow session not found: {0}")]
    SessionNotFound(String),

    #[error("Invalid transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: WorkflowState,
        to: WorkflowState,
    },

    #[error("Session is not awaiting {0}")]
    NotAwaitingApproval(&'static str),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Backup error: {0}")]
    Backup(String),

    #[error("Execution timed out")]
    Timeout,

    #[error("Workflow cancelled")]
    Cancelled,
}

impl WorkflowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkflowError::SessionNotFound(_) => ErrorKind::NotFound,
            WorkflowError::InvalidTransition { .. } => ErrorKind::InvalidInput,
            WorkflowError::NotAwaitingApproval(_) => ErrorKind::InvalidInput,
            WorkflowError::Store(_) => ErrorKind::Internal,
            WorkflowError::Backup(_) => ErrorKind::ExecutionFailed,
            WorkflowError::Timeout => ErrorKind::Timeout,
            WorkflowError::Cancelled => ErrorKind::Cancelled,
        }
    }
}
