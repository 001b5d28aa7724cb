use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{CoreError, ErrorKind};
use crate::schemas::Principal;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretMetadata {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Consumed credential store. Plaintext leaves the provider only through
/// an explicit `get`; listing returns metadata alone.
#[async_trait]
pub trait SecretsProvider: Send + Sync {
    async fn get(
        &self,
        name: &str,
        principal: Option<&Principal>,
    ) -> Result<Option<SecretString>, CoreError>;

    async fn set(
        &self,
        name: &str,
        value: SecretString,
        principal: Option<&Principal>,
    ) -> Result<SecretMetadata, CoreError>;

    async fn list(&self, principal: Option<&Principal>) -> Result<Vec<SecretMetadata>, CoreError>;

    async fn delete(&self, name: &str, principal: Option<&Principal>) -> Result<bool, CoreError>;
}

struct StoredSecret {
    value: SecretString,
    metadata: SecretMetadata,
}

/// In-memory provider, scoped per principal with a shared global scope.
pub struct InMemorySecretsProvider {
    // Held so the construction contract matches production providers; the
    // in-memory store has nothing to encrypt with it.
    _encryption_key: SecretString,
    secrets: RwLock<HashMap<String, HashMap<String, StoredSecret>>>,
}

const GLOBAL_SCOPE: &str = "__global__";

impl InMemorySecretsProvider {
    /// Fails without an encryption key, matching the startup contract of
    /// the real store.
    pub fn new(encryption_key: Option<SecretString>) -> Result<Self, CoreError> {
        let encryption_key = encryption_key.ok_or_else(|| {
            CoreError::new(ErrorKind::InvalidInput, "ENCRYPTION_KEY is required")
        })?;
        Ok(Self {
            _encryption_key: encryption_key,
            secrets: RwLock::new(HashMap::new()),
        })
    }

    fn scope(principal: Option<&Principal>) -> String {
        principal
            .map(|p| p.user_id.clone())
            .unwrap_or_else(|| GLOBAL_SCOPE.to_string())
    }
}

#[async_trait]
impl SecretsProvider for InMemorySecretsProvider {
    async fn get(
        &self,
        name: &str,
        principal: Option<&Principal>,
    ) -> Result<Option<SecretString>, CoreError> {
        let secrets = self.secrets.read().await;
        Ok(secrets
            .get(&Self::scope(principal))
            .and_then(|scope| scope.get(name))
            .map(|stored| stored.value.clone()))
    }

    async fn set(
        &self,
        name: &str,
        value: SecretString,
        principal: Option<&Principal>,
    ) -> Result<SecretMetadata, CoreError> {
        let mut secrets = self.secrets.write().await;
        let scope = secrets.entry(Self::scope(principal)).or_default();
        let now = Utc::now();

        let metadata = match scope.get(name) {
            Some(existing) => SecretMetadata {
                name: name.to_string(),
                created_at: existing.metadata.created_at,
                updated_at: now,
            },
            None => SecretMetadata {
                name: name.to_string(),
                created_at: now,
                updated_at: now,
            },
        };

        scope.insert(
            name.to_string(),
            StoredSecret {
                value,
                metadata: metadata.clone(),
            },
        );
        Ok(metadata)
    }

    async fn list(&self, principal: Option<&Principal>) -> Result<Vec<SecretMetadata>, CoreError> {
        let secrets = self.secrets.read().await;
        let mut listed: Vec<SecretMetadata> = secrets
            .get(&Self::scope(principal))
            .map(|scope| scope.values().map(|s| s.metadata.clone()).collect())
            .unwrap_or_default();
        listed.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(listed)
    }

    async fn delete(&self, name: &str, principal: Option<&Principal>) -> Result<bool, CoreError> {
        let mut secrets = self.secrets.write().await;
        Ok(secrets
            .get_mut(&Self::scope(principal))
            .and_then(|scope| scope.remove(name))
            .is_some())
    }
}
