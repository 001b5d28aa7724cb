use reqwest::Error as ReqwestError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;
use tokio::time::error::Elapsed;

use crate::error::ErrorKind;

/// Vendor and transport failures classified per the gateway contract.
#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Inference call timed out")]
    Timeout(#[from] Elapsed),

    #[error("Model not available: {0}")]
    ModelNotFound(String),

    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("Network request failed: {0}")]
    Request(#[from] ReqwestError),

    #[error("JSON serialization/deserialization error: {0}")]
    Serde(#[from] SerdeJsonError),

    #[error("Inference cancelled")]
    Cancelled,

    #[error("Error: {0}")]
    Other(String),
}

impl InferenceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            InferenceError::Auth(_) => ErrorKind::AuthFailed,
            InferenceError::RateLimited(_) => ErrorKind::RateLimited,
            InferenceError::QuotaExceeded(_) => ErrorKind::QuotaExceeded,
            InferenceError::Timeout(_) => ErrorKind::Timeout,
            InferenceError::ModelNotFound(_) => ErrorKind::NotFound,
            InferenceError::Unavailable(_) => ErrorKind::DependencyUnavailable,
            InferenceError::Cancelled => ErrorKind::Cancelled,
            InferenceError::Request(_)
            | InferenceError::Serde(_)
            | InferenceError::Other(_) => ErrorKind::DependencyUnavailable,
        }
    }
}
