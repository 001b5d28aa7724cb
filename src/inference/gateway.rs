use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::schemas::Principal;

use super::{CallOptions, ChunkStream, InferenceError, InferenceProvider};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Uniform generate/stream surface over every configured provider.
///
/// The gateway owns the per-principal model map and the call timeout; it
/// never retries — retry policy belongs to the fallback chain above it.
pub struct InferenceGateway {
    providers: Vec<Arc<dyn InferenceProvider>>,
    principal_models: RwLock<HashMap<String, Vec<String>>>,
    timeout: Duration,
}

impl InferenceGateway {
    pub fn new(providers: Vec<Arc<dyn InferenceProvider>>) -> Self {
        Self {
            providers,
            principal_models: RwLock::new(HashMap::new()),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Models the principal may call right now: credential-less providers
    /// (local runtimes) whenever their artifacts are present, plus whatever
    /// the principal's validated credentials unlocked.
    pub async fn available_models(&self, principal: &Principal) -> Vec<String> {
        let mut models = Vec::new();
        for provider in &self.providers {
            if !provider.requires_credentials() && provider.is_available() {
                models.extend(provider.models());
            }
        }

        let principal_models = self.principal_models.read().await;
        if let Some(extra) = principal_models.get(&principal.user_id) {
            for model in extra {
                if !models.contains(model) {
                    models.push(model.clone());
                }
            }
        }
        models
    }

    /// Rebuild the principal's model map from their stored credentials.
    ///
    /// Called on credential mutation. Each credentialed provider is checked
    /// live; providers whose key fails validation contribute nothing, so
    /// previously available models drop out.
    pub async fn refresh_principal(
        &self,
        principal: &Principal,
        credentials: &HashMap<String, SecretString>,
    ) {
        let mut validated = Vec::new();
        for provider in &self.providers {
            if !provider.requires_credentials() {
                continue;
            }
            let key = credentials.get(provider.name());
            if provider.validate_credentials(key).await {
                validated.extend(provider.models());
            } else if key.is_some() {
                log::warn!(
                    "Credential validation failed for provider {} (user {})",
                    provider.name(),
                    principal.user_id
                );
            }
        }

        let mut principal_models = self.principal_models.write().await;
        principal_models.insert(principal.user_id.clone(), validated);
    }

    fn provider_for(&self, model: &str) -> Result<&Arc<dyn InferenceProvider>, InferenceError> {
        self.providers
            .iter()
            .find(|p| p.models().iter().any(|m| m == model))
            .ok_or_else(|| InferenceError::ModelNotFound(model.to_string()))
    }

    pub async fn generate(
        &self,
        prompt: &str,
        model: &str,
        options: &CallOptions,
        cancel: &CancellationToken,
    ) -> Result<String, InferenceError> {
        let provider = self.provider_for(model)?;
        let timeout = options.timeout.unwrap_or(self.timeout);

        tokio::select! {
            _ = cancel.cancelled() => Err(InferenceError::Cancelled),
            result = tokio::time::timeout(timeout, provider.generate(prompt, model, options)) => {
                result?
            }
        }
    }

    pub async fn stream(
        &self,
        prompt: &str,
        model: &str,
        options: &CallOptions,
        cancel: &CancellationToken,
    ) -> Result<ChunkStream, InferenceError> {
        let provider = self.provider_for(model)?;
        let timeout = options.timeout.unwrap_or(self.timeout);

        tokio::select! {
            _ = cancel.cancelled() => Err(InferenceError::Cancelled),
            result = tokio::time::timeout(timeout, provider.stream(prompt, model, options)) => {
                result?
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use crate::inference::LocalProvider;

    use super::*;

    struct NeverProvider;

    #[async_trait]
    impl InferenceProvider for NeverProvider {
        fn name(&self) -> &str {
            "never"
        }

        fn models(&self) -> Vec<String> {
            vec!["slow-model".to_string()]
        }

        fn is_available(&self) -> bool {
            true
        }

        async fn generate(
            &self,
            _prompt: &str,
            _model: &str,
            _options: &CallOptions,
        ) -> Result<String, InferenceError> {
            futures::future::pending().await
        }

        async fn stream(
            &self,
            _prompt: &str,
            _model: &str,
            _options: &CallOptions,
        ) -> Result<ChunkStream, InferenceError> {
            futures::future::pending().await
        }
    }

    fn gateway_with_fake() -> InferenceGateway {
        let (provider, _) = LocalProvider::fake(["tinyllama"]);
        InferenceGateway::new(vec![Arc::new(provider)])
    }

    #[tokio::test]
    async fn local_models_always_available() {
        let gateway = gateway_with_fake();
        let principal = Principal::new("u1", []);
        assert_eq!(
            gateway.available_models(&principal).await,
            vec!["tinyllama"]
        );
    }

    #[tokio::test]
    async fn unknown_model_yields_not_found() {
        let gateway = gateway_with_fake();
        let err = gateway
            .generate(
                "hi",
                "missing",
                &CallOptions::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, InferenceError::ModelNotFound(_)));
    }

    #[tokio::test]
    async fn timeout_is_enforced() {
        let gateway = InferenceGateway::new(vec![Arc::new(NeverProvider)])
            .with_timeout(Duration::from_millis(10));
        let err = gateway
            .generate(
                "hi",
                "slow-model",
                &CallOptions::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, InferenceError::Timeout(_)));
    }

    #[tokio::test]
    async fn cancellation_interrupts_in_flight_call() {
        let gateway = InferenceGateway::new(vec![Arc::new(NeverProvider)]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = gateway
            .generate("hi", "slow-model", &CallOptions::default(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, InferenceError::Cancelled));
    }
}
