use thiserror::Error;

use crate::error::ErrorKind;
use crate::inference::InferenceError;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("No models available for this principal")]
    NoModels,

    #[error("All fallback attempts exhausted")]
    FallbacksExhausted,

    #[error("Inference error: {0}")]
    Inference(#[from] InferenceError),

    #[error("Execution cancelled")]
    Cancelled,
}

impl OrchestratorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrchestratorError::NoModels => ErrorKind::DependencyUnavailable,
            OrchestratorError::FallbacksExhausted => ErrorKind::ExecutionFailed,
            OrchestratorError::Inference(e) => e.kind(),
            OrchestratorError::Cancelled => ErrorKind::Cancelled,
        }
    }
}
