use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use async_trait::async_trait;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    pub details: Value,
}

impl AuditRecord {
    pub fn new(action: impl Into<String>, user_id: Option<String>, details: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            user_id,
            action: action.into(),
            resource: None,
            details,
        }
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }
}

/// Append-only compliance trail. Records are never mutated or removed.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, record: AuditRecord);
}

#[derive(Default)]
pub struct InMemoryAuditLog {
    records: RwLock<Vec<AuditRecord>>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<AuditRecord> {
        self.records.read().await.clone()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditLog {
    async fn append(&self, record: AuditRecord) {
        self.records.write().await.push(record);
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn records_accumulate_in_order() {
        let log = InMemoryAuditLog::new();
        log.append(AuditRecord::new("first", Some("u1".into()), json!({}))).await;
        log.append(AuditRecord::new("second", None, json!({"n": 2}))).await;

        let records = log.records().await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].action, "first");
        assert_eq!(records[1].details["n"], 2);
    }
}
