use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{CoreError, ErrorKind};
use crate::orchestrator::FallbackAttempt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// Persisted row for one inbound request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestRecord {
    pub id: String,
    pub user_id: String,
    pub model: String,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    pub status: RequestStatus,
    pub tokens_used: u64,
    pub cost: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub fallback_attempts: Vec<FallbackAttempt>,
}

impl RequestRecord {
    pub fn new(user_id: &str, model: &str, prompt: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            model: model.to_string(),
            prompt: prompt.to_string(),
            response: None,
            status: RequestStatus::Pending,
            tokens_used: 0,
            cost: 0.0,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
            fallback_attempts: Vec::new(),
        }
    }
}

/// Request-row persistence. `save` replaces the row atomically.
#[async_trait]
pub trait RequestStore: Send + Sync {
    async fn save(&self, record: &RequestRecord) -> Result<(), CoreError>;

    async fn load(&self, id: &str) -> Result<RequestRecord, CoreError>;
}

#[derive(Default)]
pub struct InMemoryRequestStore {
    records: RwLock<HashMap<String, RequestRecord>>,
}

impl InMemoryRequestStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RequestStore for InMemoryRequestStore {
    async fn save(&self, record: &RequestRecord) -> Result<(), CoreError> {
        let mut records = self.records.write().await;
        records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<RequestRecord, CoreError> {
        let records = self.records.read().await;
        records
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::new(ErrorKind::NotFound, format!("Request {id} not found")))
    }
}
