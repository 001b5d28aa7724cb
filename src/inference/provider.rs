use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use secrecy::SecretString;

use super::{CallOptions, InferenceError};

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<String, InferenceError>> + Send>>;

/// A concrete inference backend (remote vendor or local runtime).
///
/// Providers expose raw completion only; retry policy, fallback and scoring
/// live above the gateway.
#[async_trait]
pub trait InferenceProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Models this provider can serve right now.
    fn models(&self) -> Vec<String>;

    fn is_available(&self) -> bool;

    /// Whether this provider needs a per-principal credential before its
    /// models count as available.
    fn requires_credentials(&self) -> bool {
        false
    }

    /// Check a credential against the live backend. Providers without
    /// credentials (local runtimes) accept anything.
    async fn validate_credentials(&self, _api_key: Option<&SecretString>) -> bool {
        true
    }

    async fn generate(
        &self,
        prompt: &str,
        model: &str,
        options: &CallOptions,
    ) -> Result<String, InferenceError>;

    async fn stream(
        &self,
        prompt: &str,
        model: &str,
        options: &CallOptions,
    ) -> Result<ChunkStream, InferenceError>;
}
