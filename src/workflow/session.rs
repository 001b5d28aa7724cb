use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::planning::Plan;

use super::{WorkflowError, WorkflowState};

/// Three-valued approval gate (`0` pending, `1` approved, `-1` rejected).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Approval {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl Approval {
    pub fn as_flag(self) -> i8 {
        match self {
            Approval::Pending => 0,
            Approval::Approved => 1,
            Approval::Rejected => -1,
        }
    }
}

/// Human input recorded at an approval gate. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackEvent {
    pub id: String,
    pub session_id: String,
    pub user_id: String,
    pub step: String,
    pub feedback_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl FeedbackEvent {
    pub fn new(
        session_id: &str,
        user_id: &str,
        step: &str,
        feedback_type: &str,
        feedback_value: Option<String>,
        rating: Option<f64>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            step: step.to_string(),
            feedback_type: feedback_type.to_string(),
            feedback_value,
            rating,
            created_at: Utc::now(),
        }
    }
}

/// Result of one executed plan step inside a workflow session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecution {
    pub step_id: u32,
    pub tool: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub backup_id: String,
    pub backup_restored: bool,
    pub verification_passed: bool,
    pub execution_time_ms: u64,
}

/// Durable record of one human-in-the-loop workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSession {
    pub session_id: String,
    pub user_id: String,
    pub original_request: String,
    pub state: WorkflowState,
    /// Every state this session has been persisted in, oldest first.
    pub state_history: Vec<WorkflowState>,

    pub interpreted_intent: Option<String>,
    pub interpretation_confidence: Option<f64>,
    pub interpretation_approved: Approval,

    pub plan: Option<Plan>,
    pub plan_confidence: Option<f64>,
    pub plan_approved: Approval,

    pub backup_id: Option<String>,
    pub execution_results: Vec<StepExecution>,
    pub execution_success: Option<bool>,

    pub review_approved: Approval,
    pub review_feedback: Option<String>,
    pub final_feedback: Option<String>,
    pub success_rating: Option<f64>,
    pub committed_to_memory: bool,

    pub feedback_history: Vec<FeedbackEvent>,
    pub error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowSession {
    pub fn new(user_id: &str, original_request: &str) -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            original_request: original_request.to_string(),
            state: WorkflowState::Interpreting,
            state_history: vec![WorkflowState::Interpreting],
            interpreted_intent: None,
            interpretation_confidence: None,
            interpretation_approved: Approval::Pending,
            plan: None,
            plan_confidence: None,
            plan_approved: Approval::Pending,
            backup_id: None,
            execution_results: Vec::new(),
            execution_success: None,
            review_approved: Approval::Pending,
            review_feedback: None,
            final_feedback: None,
            success_rating: None,
            committed_to_memory: false,
            feedback_history: Vec::new(),
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Move to `next`, enforcing the lifecycle graph.
    pub fn transition(&mut self, next: WorkflowState) -> Result<(), WorkflowError> {
        if !self.state.can_transition(next) {
            return Err(WorkflowError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        self.state_history.push(next);
        self.updated_at = Utc::now();
        if next == WorkflowState::Completed {
            self.completed_at = Some(self.updated_at);
        }
        Ok(())
    }

    pub fn record_feedback(&mut self, event: FeedbackEvent) {
        self.feedback_history.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approval_flags_match_wire_values() {
        assert_eq!(Approval::Pending.as_flag(), 0);
        assert_eq!(Approval::Approved.as_flag(), 1);
        assert_eq!(Approval::Rejected.as_flag(), -1);
    }

    #[test]
    fn transition_appends_history() {
        let mut session = WorkflowSession::new("u1", "do the thing");
        session.transition(WorkflowState::Planning).unwrap();
        session.transition(WorkflowState::Planning).unwrap();
        session.transition(WorkflowState::BackupVerify).unwrap();
        assert_eq!(
            session.state_history,
            vec![
                WorkflowState::Interpreting,
                WorkflowState::Planning,
                WorkflowState::Planning,
                WorkflowState::BackupVerify,
            ]
        );
    }

    #[test]
    fn invalid_transition_is_refused() {
        let mut session = WorkflowSession::new("u1", "do the thing");
        let err = session.transition(WorkflowState::Executing).unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidTransition { .. }));
        assert_eq!(session.state, WorkflowState::Interpreting);
    }

    #[test]
    fn completion_stamps_completed_at() {
        let mut session = WorkflowSession::new("u1", "r");
        for state in [
            WorkflowState::Planning,
            WorkflowState::BackupVerify,
            WorkflowState::Executing,
            WorkflowState::Reviewing,
            WorkflowState::Finalizing,
            WorkflowState::Completed,
        ] {
            session.transition(state).unwrap();
        }
        assert!(session.completed_at.is_some());
        assert!(session.transition(WorkflowState::Error).is_err());
    }

    #[test]
    fn session_round_trips_through_serde() {
        let mut session = WorkflowSession::new("u1", "r");
        session.transition(WorkflowState::Planning).unwrap();
        let json = serde_json::to_string(&session).unwrap();
        let restored: WorkflowSession = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.state, WorkflowState::Planning);
        assert_eq!(restored.state_history, session.state_history);
        assert_eq!(restored.session_id, session.session_id);
    }
}
