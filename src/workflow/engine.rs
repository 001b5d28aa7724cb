use std::sync::Arc;
use std::time::Duration;

use indoc::formatdoc;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::inference::{CallOptions, InferenceGateway};
use crate::planning::ActionPlanner;
use crate::schemas::Principal;
use crate::scoring::{ConfidenceScorer, ScoreContext};
use crate::utils::truncate_chars;
use crate::vectorstore::VectorStore;

use super::{
    Approval, FeedbackEvent, SessionStore, WorkflowError, WorkflowExecutor, WorkflowSession,
    WorkflowState,
};

const INTERPRETATION_AUTO_APPROVE: f64 = 0.75;
const PLAN_AUTO_APPROVE: f64 = 0.85;
const DEFAULT_EXECUTION_TIMEOUT: Duration = Duration::from_secs(300);

/// Drives the five-step human-in-the-loop lifecycle: interpret → plan →
/// backup/execute → review → commit.
///
/// Every transition loads the session, runs the next-state action, and
/// persists state plus payload before returning; approval gates
/// short-circuit when the producing step's confidence clears its
/// threshold.
pub struct WorkflowEngine {
    gateway: Arc<InferenceGateway>,
    scorer: Arc<ConfidenceScorer>,
    planner: Arc<ActionPlanner>,
    executor: WorkflowExecutor,
    store: Arc<dyn SessionStore>,
    plan_memory: Option<Arc<dyn VectorStore>>,
    interpret_model: String,
    auto_approve: bool,
    execution_timeout: Duration,
}

impl WorkflowEngine {
    pub fn new(
        gateway: Arc<InferenceGateway>,
        scorer: Arc<ConfidenceScorer>,
        planner: Arc<ActionPlanner>,
        executor: WorkflowExecutor,
        store: Arc<dyn SessionStore>,
        interpret_model: impl Into<String>,
    ) -> Self {
        Self {
            gateway,
            scorer,
            planner,
            executor,
            store,
            plan_memory: None,
            interpret_model: interpret_model.into(),
            auto_approve: false,
            execution_timeout: DEFAULT_EXECUTION_TIMEOUT,
        }
    }

    /// Force every approval gate open (the `AUTO_APPROVE` setting).
    pub fn with_auto_approve(mut self, auto_approve: bool) -> Self {
        self.auto_approve = auto_approve;
        self
    }

    /// Committed plans are added here so future planning retrieves them.
    pub fn with_plan_memory(mut self, memory: Arc<dyn VectorStore>) -> Self {
        self.plan_memory = Some(memory);
        self
    }

    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = timeout;
        self
    }

    pub async fn start_workflow(
        &self,
        user_request: &str,
        principal: &Principal,
        cancel: &CancellationToken,
    ) -> Result<WorkflowSession, WorkflowError> {
        let mut session = WorkflowSession::new(&principal.user_id, user_request);
        log::info!(
            "Starting workflow {} for user {}",
            session.session_id,
            principal.user_id
        );
        self.store.save(&session).await?;

        self.run_interpretation(&mut session, principal, None, cancel)
            .await?;
        self.store.load(&session.session_id).await
    }

    pub async fn get_status(&self, session_id: &str) -> Result<WorkflowSession, WorkflowError> {
        self.store.load(session_id).await
    }

    /// Approve (optionally with clarifying feedback) a pending
    /// interpretation.
    pub async fn approve_interpretation(
        &self,
        session_id: &str,
        principal: &Principal,
        feedback: Option<&str>,
    ) -> Result<WorkflowSession, WorkflowError> {
        let mut session = self.store.load(session_id).await?;
        if session.state != WorkflowState::Interpreting
            || session.interpretation_approved != Approval::Pending
        {
            return Err(WorkflowError::NotAwaitingApproval("interpretation"));
        }

        if let Some(feedback) = feedback {
            // Clarification reruns the interpretation pass with the
            // feedback folded in.
            session.transition(WorkflowState::Interpreting)?;
            self.interpret(&mut session, Some(feedback), cancel_noop()).await;
        }

        session.interpretation_approved = Approval::Approved;
        session.record_feedback(FeedbackEvent::new(
            session_id,
            &principal.user_id,
            "interpretation",
            "approve",
            feedback.map(str::to_string),
            None,
        ));
        session.transition(WorkflowState::Planning)?;
        self.store.save(&session).await?;

        self.run_planning(&mut session, principal, &CancellationToken::new())
            .await?;
        self.store.load(session_id).await
    }

    pub async fn approve_plan(
        &self,
        session_id: &str,
        principal: &Principal,
        feedback: Option<&str>,
    ) -> Result<WorkflowSession, WorkflowError> {
        let mut session = self.store.load(session_id).await?;
        if session.state != WorkflowState::Planning || session.plan_approved != Approval::Pending {
            return Err(WorkflowError::NotAwaitingApproval("plan"));
        }

        session.plan_approved = Approval::Approved;
        session.record_feedback(FeedbackEvent::new(
            session_id,
            &principal.user_id,
            "planning",
            "approve",
            feedback.map(str::to_string),
            None,
        ));
        session.transition(WorkflowState::BackupVerify)?;
        self.store.save(&session).await?;

        self.run_execution(&mut session, principal, &CancellationToken::new())
            .await?;
        self.store.load(session_id).await
    }

    /// Reject the pending plan; the session re-plans with the feedback.
    pub async fn reject_plan(
        &self,
        session_id: &str,
        principal: &Principal,
        feedback: &str,
    ) -> Result<WorkflowSession, WorkflowError> {
        let mut session = self.store.load(session_id).await?;
        if session.state != WorkflowState::Planning || session.plan_approved != Approval::Pending {
            return Err(WorkflowError::NotAwaitingApproval("plan"));
        }

        session.plan_approved = Approval::Rejected;
        session.record_feedback(FeedbackEvent::new(
            session_id,
            &principal.user_id,
            "planning",
            "reject",
            Some(feedback.to_string()),
            None,
        ));
        session.transition(WorkflowState::Planning)?;
        session.plan_approved = Approval::Pending;

        let amended_intent = format!(
            "{}\n\nReviewer feedback on the previous plan: {feedback}",
            session
                .interpreted_intent
                .clone()
                .unwrap_or_else(|| session.original_request.clone())
        );
        session.interpreted_intent = Some(amended_intent);
        self.store.save(&session).await?;

        self.run_planning(&mut session, principal, &CancellationToken::new())
            .await?;
        self.store.load(session_id).await
    }

    /// Approve the reviewed results: record the rating, commit to memory
    /// and complete the session.
    pub async fn approve_results(
        &self,
        session_id: &str,
        principal: &Principal,
        rating: Option<f64>,
        feedback: Option<&str>,
    ) -> Result<WorkflowSession, WorkflowError> {
        let mut session = self.store.load(session_id).await?;
        if session.state != WorkflowState::Reviewing
            || session.review_approved != Approval::Pending
        {
            return Err(WorkflowError::NotAwaitingApproval("review"));
        }

        session.review_approved = Approval::Approved;
        session.final_feedback = feedback.map(str::to_string);
        session.success_rating = rating;
        session.record_feedback(FeedbackEvent::new(
            session_id,
            &principal.user_id,
            "review",
            "approve",
            feedback.map(str::to_string),
            rating,
        ));
        session.transition(WorkflowState::Finalizing)?;
        self.store.save(&session).await?;

        self.commit_to_memory(&mut session).await?;
        self.store.load(session_id).await
    }

    /// Reject reviewed results: back to planning with the feedback.
    pub async fn reject_results(
        &self,
        session_id: &str,
        principal: &Principal,
        feedback: &str,
    ) -> Result<WorkflowSession, WorkflowError> {
        let mut session = self.store.load(session_id).await?;
        if session.state != WorkflowState::Reviewing
            || session.review_approved != Approval::Pending
        {
            return Err(WorkflowError::NotAwaitingApproval("review"));
        }

        session.review_approved = Approval::Rejected;
        session.review_feedback = Some(feedback.to_string());
        session.record_feedback(FeedbackEvent::new(
            session_id,
            &principal.user_id,
            "review",
            "reject",
            Some(feedback.to_string()),
            None,
        ));
        session.transition(WorkflowState::Planning)?;
        session.plan_approved = Approval::Pending;
        session.review_approved = Approval::Pending;
        session.execution_results.clear();
        session.execution_success = None;
        self.store.save(&session).await?;

        self.run_planning(&mut session, principal, &CancellationToken::new())
            .await?;
        self.store.load(session_id).await
    }

    async fn run_interpretation(
        &self,
        session: &mut WorkflowSession,
        principal: &Principal,
        feedback: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<(), WorkflowError> {
        log::info!("Running interpretation for workflow {}", session.session_id);
        self.interpret(session, feedback, cancel).await;

        let confidence = session.interpretation_confidence.unwrap_or(0.0);
        if self.auto_approve || confidence >= INTERPRETATION_AUTO_APPROVE {
            session.interpretation_approved = Approval::Approved;
            session.transition(WorkflowState::Planning)?;
            self.store.save(session).await?;
            return self.run_planning(session, principal, cancel).await;
        }

        log::info!("Interpretation requires clarification");
        self.store.save(session).await
    }

    async fn interpret(
        &self,
        session: &mut WorkflowSession,
        feedback: Option<&str>,
        cancel: &CancellationToken,
    ) {
        let feedback_block = feedback
            .map(|f| format!("\nClarification from the user: {f}"))
            .unwrap_or_default();
        let prompt = formatdoc! {"
            Restate the user's request as a single, precise statement of intent.
            State exactly what they want accomplished, including implied constraints.

            Request: {request}{feedback_block}

            Intent:",
            request = session.original_request,
        };

        let options = CallOptions::new().with_max_tokens(256).with_temperature(0.3);
        let intent = match self
            .gateway
            .generate(&prompt, &self.interpret_model, &options, cancel)
            .await
        {
            Ok(intent) => intent.trim().to_string(),
            Err(e) => {
                log::warn!("Interpretation model failed: {e}");
                session.original_request.clone()
            }
        };

        let ctx = ScoreContext {
            model_used: Some(&self.interpret_model),
            ..Default::default()
        };
        let score = self
            .scorer
            .score(&intent, &session.original_request, ctx, cancel)
            .await;

        log::info!(
            "Interpretation complete, confidence {:.2}",
            score.overall
        );
        session.interpreted_intent = Some(intent);
        session.interpretation_confidence = Some(score.overall);
    }

    async fn run_planning(
        &self,
        session: &mut WorkflowSession,
        principal: &Principal,
        cancel: &CancellationToken,
    ) -> Result<(), WorkflowError> {
        log::info!("Running planning for workflow {}", session.session_id);
        let intent = session
            .interpreted_intent
            .clone()
            .unwrap_or_else(|| session.original_request.clone());

        let plan = self.planner.create_plan(&intent, cancel).await;
        session.plan_confidence = Some(plan.confidence);
        session.plan = Some(plan.clone());

        if self.auto_approve || plan.confidence >= PLAN_AUTO_APPROVE {
            log::info!("Plan auto-approved, moving to execution");
            session.plan_approved = Approval::Approved;
            session.transition(WorkflowState::BackupVerify)?;
            self.store.save(session).await?;
            return self.run_execution(session, principal, cancel).await;
        }

        log::info!("Plan requires human approval");
        session.plan_approved = Approval::Pending;
        self.store.save(session).await
    }

    async fn run_execution(
        &self,
        session: &mut WorkflowSession,
        principal: &Principal,
        cancel: &CancellationToken,
    ) -> Result<(), WorkflowError> {
        // BackupVerify: capture the session-level snapshot before anything
        // mutates.
        let backup_id = match self.executor.backups().snapshot(&session.session_id).await {
            Ok(backup_id) => backup_id,
            Err(e) => {
                session.error = Some(e.to_string());
                session.transition(WorkflowState::Error)?;
                self.store.save(session).await?;
                return Ok(());
            }
        };
        session.backup_id = Some(backup_id);
        session.transition(WorkflowState::Executing)?;
        self.store.save(session).await?;

        let plan = session.plan.clone().unwrap_or_else(|| crate::planning::Plan {
            steps: vec![],
            confidence: 0.0,
            iterations: 0,
            critiques: vec![],
            retrieved_examples: vec![],
            source_intent: session.original_request.clone(),
        });

        let run = tokio::time::timeout(
            self.execution_timeout,
            self.executor
                .execute_plan(&plan, &session.session_id, principal, cancel),
        )
        .await;

        let outcome = match run {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                session.error = Some(e.to_string());
                session.transition(WorkflowState::Error)?;
                self.store.save(session).await?;
                return Ok(());
            }
            Err(_) => {
                session.error = Some(WorkflowError::Timeout.to_string());
                session.transition(WorkflowState::Error)?;
                self.store.save(session).await?;
                return Ok(());
            }
        };

        let all_success = !outcome.results.is_empty() && outcome.results.iter().all(|r| r.success);
        session.execution_results = outcome.results;
        session.execution_success = Some(all_success);
        log::info!(
            "Execution {}",
            if all_success { "succeeded" } else { "failed" }
        );

        if outcome.fatal {
            session.error = Some("Backup restoration failed during execution".into());
            session.transition(WorkflowState::Error)?;
        } else {
            session.transition(WorkflowState::Reviewing)?;
        }
        self.store.save(session).await
    }

    async fn commit_to_memory(&self, session: &mut WorkflowSession) -> Result<(), WorkflowError> {
        log::info!(
            "Committing workflow {} to permanent memory",
            session.session_id
        );

        if let (Some(memory), Some(plan)) = (&self.plan_memory, &session.plan) {
            let document = plan
                .steps
                .iter()
                .map(|s| format!("{}. {}", s.id, s.action))
                .collect::<Vec<_>>()
                .join("\n");
            let mut metadata = serde_json::Map::new();
            metadata.insert("kind".into(), json!("plan"));
            metadata.insert("intent".into(), json!(truncate_chars(&plan.source_intent, 200)));
            metadata.insert(
                "rating".into(),
                json!(session.success_rating.unwrap_or_default()),
            );

            if let Err(e) = memory
                .add_documents(
                    &[document],
                    &[format!("plan-{}", session.session_id)],
                    &[metadata],
                )
                .await
            {
                log::warn!("Failed to store plan in memory: {e}");
            }
        }

        session.committed_to_memory = true;
        session.transition(WorkflowState::Completed)?;
        self.store.save(session).await
    }
}

fn cancel_noop() -> &'static CancellationToken {
    static TOKEN: std::sync::OnceLock<CancellationToken> = std::sync::OnceLock::new();
    TOKEN.get_or_init(CancellationToken::new)
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map, Value};

    use crate::inference::{FakeLocalBackend, InferenceGateway, LocalProvider};
    use crate::tools::{
        ParameterKind, Tool, ToolCategory, ToolDefinition, ToolError, ToolParameter, ToolRegistry,
    };
    use crate::workflow::{InMemorySessionStore, RecordingBackupStore};

    use super::*;

    const MODEL: &str = "liquid-tool";
    const SCORER_MODEL: &str = "qwen-0.5b";

    struct FlakyTool;

    #[async_trait::async_trait]
    impl Tool for FlakyTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition::new("web_search", "Echo or fail", ToolCategory::Network)
                .with_parameters([
                    ToolParameter::new("query", ParameterKind::String).description("query")
                ])
        }

        async fn run(&self, args: &Map<String, Value>) -> Result<Value, ToolError> {
            let query = args["query"].as_str().unwrap_or("");
            if query.contains("fail") {
                Err(ToolError::Execution("simulated failure".into()))
            } else {
                Ok(json!(query.to_uppercase()))
            }
        }
    }

    struct Harness {
        engine: WorkflowEngine,
        backend: Arc<FakeLocalBackend>,
        backups: Arc<RecordingBackupStore>,
    }

    fn harness(auto_approve: bool, failing_restores: bool) -> Harness {
        let (provider, backend) = LocalProvider::fake([MODEL, SCORER_MODEL]);
        let gateway = Arc::new(InferenceGateway::new(vec![Arc::new(provider)]));
        let scorer = Arc::new(ConfidenceScorer::new(gateway.clone(), SCORER_MODEL));
        let planner = Arc::new(ActionPlanner::new(gateway.clone(), MODEL));

        let mut registry = ToolRegistry::new(4);
        registry.register(Arc::new(FlakyTool), ["web_access"]).unwrap();

        let backups = if failing_restores {
            Arc::new(RecordingBackupStore::new().failing_restores())
        } else {
            Arc::new(RecordingBackupStore::new())
        };
        let executor = WorkflowExecutor::new(Arc::new(registry), backups.clone());
        let store = Arc::new(InMemorySessionStore::new());

        let engine = WorkflowEngine::new(gateway, scorer, planner, executor, store, MODEL)
            .with_auto_approve(auto_approve);
        Harness {
            engine,
            backend,
            backups,
        }
    }

    fn score_json(value: f64) -> String {
        json!({
            "factual": value,
            "consistent": value,
            "complete": value,
            "grounded": value,
            "issues": [],
            "reasoning": "scripted"
        })
        .to_string()
    }

    fn plan_json(actions: &[&str]) -> String {
        let steps: Vec<Value> = actions
            .iter()
            .enumerate()
            .map(|(i, action)| {
                json!({
                    "id": i as u32 + 1,
                    "action": action,
                    "tool": "web_search",
                    "expected_outcome": "non-empty output",
                    "dependencies": [],
                    "parallelizable": false
                })
            })
            .collect();
        json!({ "steps": steps }).to_string()
    }

    fn critique_json(confidence: f64) -> String {
        json!({ "confidence": confidence, "critique": "fine", "suggestions": [] }).to_string()
    }

    fn principal() -> Principal {
        Principal::new("u1", ["web_access"])
    }

    #[tokio::test]
    async fn happy_path_with_one_human_approval() {
        let h = harness(false, false);

        // Interpretation: scripted intent, scored 0.7 (below the 0.75
        // auto-approve gate).
        h.backend.push_response(MODEL, "The user wants a market summary.");
        h.backend.push_response(SCORER_MODEL, score_json(0.7));

        let cancel = CancellationToken::new();
        let session = h
            .engine
            .start_workflow("summarize the market", &principal(), &cancel)
            .await
            .unwrap();
        assert_eq!(session.state, WorkflowState::Interpreting);
        assert_eq!(session.interpretation_approved, Approval::Pending);

        // Plan generation: confidence 0.9 auto-approves the plan, so the
        // session executes and lands in review.
        h.backend.push_response(MODEL, plan_json(&["look up market data"]));
        h.backend.push_response(MODEL, critique_json(0.9));

        let session = h
            .engine
            .approve_interpretation(&session.session_id, &principal(), None)
            .await
            .unwrap();
        assert_eq!(session.state, WorkflowState::Reviewing);
        assert_eq!(session.plan_approved, Approval::Approved);
        assert_eq!(session.execution_success, Some(true));

        let session = h
            .engine
            .approve_results(&session.session_id, &principal(), Some(0.9), Some("great"))
            .await
            .unwrap();
        assert_eq!(session.state, WorkflowState::Completed);
        assert!(session.committed_to_memory);
        assert_eq!(session.success_rating, Some(0.9));

        // Exactly one feedback event per human gate: interpretation and
        // review, none for the auto-approved plan.
        let steps: Vec<&str> = session
            .feedback_history
            .iter()
            .map(|e| e.step.as_str())
            .collect();
        assert_eq!(steps, vec!["interpretation", "review"]);

        // Persisted state sequence is a valid path through the graph.
        for pair in session.state_history.windows(2) {
            assert!(pair[0].can_transition(pair[1]), "{pair:?}");
        }
        assert_eq!(
            session.state_history.iter().filter(|s| **s == WorkflowState::Completed).count(),
            1
        );
    }

    #[tokio::test]
    async fn failed_step_with_restored_backup_still_reaches_review() {
        let h = harness(true, false);

        h.backend.push_response(MODEL, "intent");
        h.backend.push_response(MODEL, plan_json(&["this will fail", "second lookup"]));
        h.backend.push_response(MODEL, critique_json(0.9));

        let session = h
            .engine
            .start_workflow("do two things", &principal(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(session.state, WorkflowState::Reviewing);
        assert_eq!(session.execution_success, Some(false));
        assert_eq!(session.execution_results.len(), 2);
        assert!(!session.execution_results[0].success);
        assert!(session.execution_results[0].backup_restored);
        assert!(session.execution_results[1].success);
        // Session-level snapshot plus one per step.
        assert_eq!(h.backups.snapshots.lock().await.len(), 3);
    }

    #[tokio::test]
    async fn failed_restore_terminates_in_error() {
        let h = harness(true, true);

        h.backend.push_response(MODEL, "intent");
        h.backend.push_response(MODEL, plan_json(&["this will fail"]));
        h.backend.push_response(MODEL, critique_json(0.9));

        let session = h
            .engine
            .start_workflow("doomed request", &principal(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(session.state, WorkflowState::Error);
        assert!(session.error.as_deref().unwrap().contains("Backup restoration failed"));
    }

    #[tokio::test]
    async fn plan_rejection_replans_with_feedback() {
        let h = harness(false, false);

        // High interpretation confidence moves straight to planning; low
        // plan confidence waits for a human.
        h.backend.push_response(MODEL, "clear intent");
        h.backend.push_response(SCORER_MODEL, score_json(0.9));
        h.backend.push_response(MODEL, plan_json(&["vague step"]));
        h.backend.push_response(MODEL, critique_json(0.5));
        h.backend.push_response(MODEL, plan_json(&["vague step"]));
        h.backend.push_response(MODEL, critique_json(0.4));

        let session = h
            .engine
            .start_workflow("plan something", &principal(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(session.state, WorkflowState::Planning);
        assert_eq!(session.plan_approved, Approval::Pending);

        // Rejection replans; the new plan auto-approves and executes.
        h.backend.push_response(MODEL, plan_json(&["specific lookup"]));
        h.backend.push_response(MODEL, critique_json(0.9));

        let session = h
            .engine
            .reject_plan(&session.session_id, &principal(), "be more specific")
            .await
            .unwrap();
        assert_eq!(session.state, WorkflowState::Reviewing);
        assert!(session
            .plan
            .as_ref()
            .unwrap()
            .steps
            .iter()
            .any(|s| s.action == "specific lookup"));
        assert_eq!(session.feedback_history.len(), 1);
        assert_eq!(session.feedback_history[0].feedback_type, "reject");
    }

    #[tokio::test]
    async fn approvals_require_the_matching_state() {
        let h = harness(false, false);
        h.backend.push_response(MODEL, "intent");
        h.backend.push_response(SCORER_MODEL, score_json(0.2));

        let session = h
            .engine
            .start_workflow("anything", &principal(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(session.state, WorkflowState::Interpreting);

        let err = h
            .engine
            .approve_plan(&session.session_id, &principal(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::NotAwaitingApproval("plan")));

        let err = h
            .engine
            .approve_results(&session.session_id, &principal(), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::NotAwaitingApproval("review")));
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let h = harness(false, false);
        let err = h.engine.get_status("missing").await.unwrap_err();
        assert!(matches!(err, WorkflowError::SessionNotFound(_)));
    }
}
