use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{WorkflowError, WorkflowSession};

/// Durable session storage. `save` replaces the whole session atomically:
/// readers observe either the previous or the new session, never a partial
/// write.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn save(&self, session: &WorkflowSession) -> Result<(), WorkflowError>;

    async fn load(&self, session_id: &str) -> Result<WorkflowSession, WorkflowError>;
}

#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, WorkflowSession>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn save(&self, session: &WorkflowSession) -> Result<(), WorkflowError> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.session_id.clone(), session.clone());
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<WorkflowSession, WorkflowError> {
        let sessions = self.sessions.read().await;
        sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| WorkflowError::SessionNotFound(session_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use crate::workflow::WorkflowState;

    use super::*;

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let store = InMemorySessionStore::new();
        let mut session = WorkflowSession::new("u1", "request");
        store.save(&session).await.unwrap();

        session.transition(WorkflowState::Planning).unwrap();
        store.save(&session).await.unwrap();

        let loaded = store.load(&session.session_id).await.unwrap();
        assert_eq!(loaded.state, WorkflowState::Planning);
        assert_eq!(loaded.state_history.len(), 2);
    }

    #[tokio::test]
    async fn missing_session_is_not_found() {
        let store = InMemorySessionStore::new();
        let err = store.load("nope").await.unwrap_err();
        assert!(matches!(err, WorkflowError::SessionNotFound(_)));
    }
}
