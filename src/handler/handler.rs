use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::audit::{AuditRecord, AuditSink};
use crate::error::ErrorKind;
use crate::orchestrator::{ExecutionOutcome, FallbackAttempt, Orchestrator};
use crate::routing::{Path, Router, RoutingDecision};
use crate::schemas::Principal;
use crate::scoring::ConfidenceScore;
use crate::utils::{estimate_cost, estimate_tokens, truncate_chars};

use super::{RequestRecord, RequestStatus, RequestStore};

const DEFAULT_MAX_INFLIGHT: usize = 8;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub execution_time_ms: u64,
    pub user_id: String,
    pub fallback_attempts: Vec<FallbackAttempt>,
    pub steps_completed: usize,
    pub tokens_used: u64,
    pub cost: f64,
}

/// Envelope returned for every request, success or failure. Failures carry
/// the error kind and a terse message, never provider internals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerResponse {
    pub request_id: String,
    pub response: String,
    pub models: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<Path>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub routing_decision: Option<RoutingDecision>,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_details: Option<ConfidenceScore>,
    pub status: RequestStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorEnvelope>,
    pub metadata: ResponseMetadata,
}

/// Top-level entry point: route → execute → score → record.
pub struct UnifiedHandler {
    router: Arc<Router>,
    orchestrator: Arc<Orchestrator>,
    store: Arc<dyn RequestStore>,
    audit: Arc<dyn AuditSink>,
    inflight: Mutex<HashMap<String, usize>>,
    max_inflight_per_principal: usize,
}

struct InflightGuard<'a> {
    handler: &'a UnifiedHandler,
    user_id: String,
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        let mut inflight = self
            .handler
            .inflight
            .lock()
            .expect("inflight map poisoned");
        if let Some(count) = inflight.get_mut(&self.user_id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                inflight.remove(&self.user_id);
            }
        }
    }
}

impl UnifiedHandler {
    pub fn new(
        router: Arc<Router>,
        orchestrator: Arc<Orchestrator>,
        store: Arc<dyn RequestStore>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            router,
            orchestrator,
            store,
            audit,
            inflight: Mutex::new(HashMap::new()),
            max_inflight_per_principal: DEFAULT_MAX_INFLIGHT,
        }
    }

    pub fn with_max_inflight(mut self, max_inflight: usize) -> Self {
        self.max_inflight_per_principal = max_inflight;
        self
    }

    /// Process one request end to end. Never fails: every outcome is an
    /// envelope, with failures flagged by `status` and `error`.
    ///
    /// `stream` is accepted for interface parity; responses are currently
    /// assembled in full before returning (chunk streaming lives on the
    /// inference gateway).
    pub async fn handle_request(
        &self,
        request_text: &str,
        principal: &Principal,
        available_models: &[String],
        context: Option<&Value>,
        stream: bool,
        cancel: &CancellationToken,
    ) -> HandlerResponse {
        let started = Instant::now();
        if stream {
            log::debug!("Streaming requested; falling back to buffered response");
        }
        log::info!(
            "Handling request for user {}: {}",
            principal.user_id,
            truncate_chars(request_text, 100)
        );

        let fallback_model = available_models
            .first()
            .map(String::as_str)
            .unwrap_or("unknown");

        if request_text.trim().is_empty() {
            let mut record = RequestRecord::new(&principal.user_id, fallback_model, request_text);
            record.status = RequestStatus::Failed;
            record.error = Some("Empty request".into());
            record.completed_at = Some(chrono::Utc::now());
            self.persist(&record).await;
            return self.error_response(
                record.id,
                principal,
                None,
                ErrorKind::InvalidInput,
                "Empty request",
                started,
            );
        }

        let _guard = match self.acquire_inflight(&principal.user_id) {
            Some(guard) => guard,
            None => {
                let mut record =
                    RequestRecord::new(&principal.user_id, fallback_model, request_text);
                record.status = RequestStatus::Failed;
                record.error = Some("Too many in-flight requests".into());
                record.completed_at = Some(chrono::Utc::now());
                self.persist(&record).await;
                return self.error_response(
                    record.id,
                    principal,
                    None,
                    ErrorKind::RateLimited,
                    "Too many in-flight requests",
                    started,
                );
            }
        };

        let decision = self.router.route(request_text, context, cancel).await;
        log::info!(
            "Routing decision: path={:?}, complexity={:.2}, confidence={:.2}",
            decision.path,
            decision.complexity,
            decision.confidence
        );

        let mut record = RequestRecord::new(
            &principal.user_id,
            if decision.recommended_model.is_empty() {
                fallback_model
            } else {
                &decision.recommended_model
            },
            request_text,
        );
        record.status = RequestStatus::Processing;
        self.persist(&record).await;

        let outcome = self
            .orchestrator
            .execute(request_text, &decision, principal, available_models, cancel)
            .await;

        match outcome {
            Ok(outcome) => {
                self.finalize_success(record, principal, decision, outcome, started)
                    .await
            }
            Err(e) => {
                log::error!("Request execution failed: {e}");
                record.status = RequestStatus::Failed;
                record.error = Some(e.to_string());
                record.completed_at = Some(chrono::Utc::now());
                self.persist(&record).await;
                self.error_response(
                    record.id,
                    principal,
                    Some(decision),
                    e.kind(),
                    &e.to_string(),
                    started,
                )
            }
        }
    }

    async fn finalize_success(
        &self,
        mut record: RequestRecord,
        principal: &Principal,
        decision: RoutingDecision,
        outcome: ExecutionOutcome,
        started: Instant,
    ) -> HandlerResponse {
        let execution_time_ms = started.elapsed().as_millis() as u64;
        let tokens_used = estimate_tokens(&outcome.response);
        let cost = estimate_cost(tokens_used);

        record.status = RequestStatus::Completed;
        record.response = Some(outcome.response.clone());
        record.tokens_used = tokens_used;
        record.cost = cost;
        record.completed_at = Some(chrono::Utc::now());
        record.fallback_attempts = outcome.fallback_attempts.clone();
        self.persist(&record).await;

        // Attempts live inline on the row for response assembly and in the
        // audit log for the compliance trail.
        if !outcome.fallback_attempts.is_empty() {
            self.audit
                .append(
                    AuditRecord::new(
                        "request.fallback_attempts",
                        Some(principal.user_id.clone()),
                        json!({ "attempts": &outcome.fallback_attempts }),
                    )
                    .with_resource(record.id.clone()),
                )
                .await;
        }

        log::info!(
            "Request completed: path={:?}, confidence={:.2}, time={execution_time_ms}ms",
            decision.path,
            outcome.confidence
        );

        HandlerResponse {
            request_id: record.id,
            response: outcome.response,
            models: outcome.models_used,
            path: Some(decision.path),
            routing_decision: Some(decision),
            confidence: outcome.confidence,
            confidence_details: Some(outcome.confidence_details),
            status: RequestStatus::Completed,
            error: None,
            metadata: ResponseMetadata {
                execution_time_ms,
                user_id: principal.user_id.clone(),
                fallback_attempts: outcome.fallback_attempts,
                steps_completed: outcome.steps_completed,
                tokens_used,
                cost,
            },
        }
    }

    fn error_response(
        &self,
        request_id: String,
        principal: &Principal,
        decision: Option<RoutingDecision>,
        kind: ErrorKind,
        message: &str,
        started: Instant,
    ) -> HandlerResponse {
        HandlerResponse {
            request_id,
            response: String::new(),
            models: vec![],
            path: decision.as_ref().map(|d| d.path),
            routing_decision: decision,
            confidence: 0.0,
            confidence_details: None,
            status: RequestStatus::Failed,
            error: Some(ErrorEnvelope {
                kind,
                message: message.to_string(),
            }),
            metadata: ResponseMetadata {
                execution_time_ms: started.elapsed().as_millis() as u64,
                user_id: principal.user_id.clone(),
                fallback_attempts: vec![],
                steps_completed: 0,
                tokens_used: 0,
                cost: 0.0,
            },
        }
    }

    fn acquire_inflight(&self, user_id: &str) -> Option<InflightGuard<'_>> {
        let mut inflight = self.inflight.lock().expect("inflight map poisoned");
        let count = inflight.entry(user_id.to_string()).or_insert(0);
        if *count >= self.max_inflight_per_principal {
            return None;
        }
        *count += 1;
        Some(InflightGuard {
            handler: self,
            user_id: user_id.to_string(),
        })
    }

    /// Persistence failures are logged, never surfaced; losing a row must
    /// not fail the request.
    async fn persist(&self, record: &RequestRecord) {
        if let Err(e) = self.store.save(record).await {
            log::warn!("Failed to persist request row: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::audit::InMemoryAuditLog;
    use crate::handler::InMemoryRequestStore;
    use crate::inference::{FakeLocalBackend, InferenceGateway, LocalProvider};
    use crate::planning::ActionPlanner;
    use crate::scoring::{ConfidenceScorer, Recommendation};
    use crate::tools::ToolRegistry;

    use super::*;

    const ROUTER_MODEL: &str = "liquid-tool";
    const SCORER_MODEL: &str = "qwen-0.5b";

    struct Harness {
        handler: UnifiedHandler,
        backend: Arc<FakeLocalBackend>,
        store: Arc<InMemoryRequestStore>,
        audit: Arc<InMemoryAuditLog>,
    }

    fn harness() -> Harness {
        let (provider, backend) = LocalProvider::fake([
            ROUTER_MODEL,
            SCORER_MODEL,
            "tinyllama",
            "qwen-7b",
        ]);
        let gateway = Arc::new(InferenceGateway::new(vec![Arc::new(provider)]));
        let scorer = Arc::new(ConfidenceScorer::new(gateway.clone(), SCORER_MODEL));
        let planner = Arc::new(ActionPlanner::new(gateway.clone(), ROUTER_MODEL));
        let registry = Arc::new(ToolRegistry::new(4));
        let router = Arc::new(Router::new(gateway.clone(), ROUTER_MODEL));
        let orchestrator = Arc::new(Orchestrator::new(gateway, scorer, planner, registry));
        let store = Arc::new(InMemoryRequestStore::new());
        let audit = Arc::new(InMemoryAuditLog::new());

        let handler = UnifiedHandler::new(router, orchestrator, store.clone(), audit.clone());
        Harness {
            handler,
            backend,
            store,
            audit,
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

    fn principal() -> Principal {
        Principal::new("u1", ["web_access"])
    }

    fn models() -> Vec<String> {
        vec!["tinyllama".to_string(), "qwen-7b".to_string()]
    }

    #[tokio::test]
    async fn trivial_math_short_circuits_and_completes() {
        let h = harness();
        h.backend.push_response("tinyllama", "2 + 2 = 4");
        h.backend.push_response(SCORER_MODEL, score_json(0.9));

        let response = h
            .handler
            .handle_request(
                "what is 2 + 2?",
                &principal(),
                &models(),
                None,
                false,
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(response.status, RequestStatus::Completed);
        assert_eq!(response.path, Some(Path::Simple));
        let decision = response.routing_decision.as_ref().unwrap();
        assert_eq!(decision.complexity, 0.1);
        assert_eq!(decision.confidence, 0.95);
        assert_eq!(response.response, "2 + 2 = 4");
        assert!(response.metadata.fallback_attempts.len() <= 1);

        let record = h.store.load(&response.request_id).await.unwrap();
        assert_eq!(record.status, RequestStatus::Completed);
        assert_eq!(record.response.as_deref(), Some("2 + 2 = 4"));
        assert!(record.tokens_used > 0);
    }

    #[tokio::test]
    async fn complex_request_plans_and_aggregates_steps() {
        let h = harness();
        // Router classifies as complex.
        h.backend.push_response(
            ROUTER_MODEL,
            json!({
                "complexity": 0.85,
                "confidence": 0.8,
                "path": "complex",
                "reasoning": "multi-step design work",
                "recommended_model": "tinyllama",
                "requires_tools": false,
                "requires_workflow": true
            })
            .to_string(),
        );
        // Planner: two reasoning steps, accepted on the first critique.
        h.backend.push_response(
            ROUTER_MODEL,
            json!({
                "steps": [
                    {"id": 1, "action": "outline the services", "tool": "none"},
                    {"id": 2, "action": "describe the architecture", "tool": "none", "dependencies": [1]}
                ]
            })
            .to_string(),
        );
        h.backend.push_response(
            ROUTER_MODEL,
            json!({"confidence": 0.9, "critique": "solid", "suggestions": []}).to_string(),
        );
        // Step executions and the final score.
        h.backend.push_response("tinyllama", "service outline");
        h.backend.push_response("tinyllama", "final architecture description");
        h.backend.push_response(SCORER_MODEL, score_json(0.85));

        let response = h
            .handler
            .handle_request(
                "design a microservices architecture for a fintech platform",
                &principal(),
                &models(),
                None,
                false,
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(response.status, RequestStatus::Completed);
        assert_eq!(response.path, Some(Path::Complex));
        assert_eq!(response.response, "final architecture description");
        assert_eq!(response.metadata.steps_completed, 2);
        assert!(response.confidence >= 0.6);
    }

    #[tokio::test]
    async fn hedging_output_triggers_fallback_and_audit_mirror() {
        let h = harness();
        h.backend.push_response("tinyllama", "I don't know.");
        h.backend.push_response(SCORER_MODEL, score_json(0.5));
        h.backend.push_response("qwen-7b", "The answer is 4.");
        h.backend.push_response(SCORER_MODEL, score_json(0.9));

        let response = h
            .handler
            .handle_request(
                "what is 2 + 2?",
                &principal(),
                &models(),
                None,
                false,
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(response.response, "The answer is 4.");
        assert_eq!(response.models, vec!["qwen-7b"]);
        let attempts = &response.metadata.fallback_attempts;
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].model, "tinyllama");
        assert!(attempts[0].confidence < 0.6);

        // Row and audit log carry the same attempts.
        let record = h.store.load(&response.request_id).await.unwrap();
        assert_eq!(record.fallback_attempts.len(), 2);

        let audit = h.audit.records().await;
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].action, "request.fallback_attempts");
        assert_eq!(audit[0].resource.as_deref(), Some(record.id.as_str()));
        assert_eq!(
            audit[0].details["attempts"],
            serde_json::to_value(&record.fallback_attempts).unwrap()
        );
    }

    #[tokio::test]
    async fn empty_request_fails_with_invalid_input() {
        let h = harness();
        let response = h
            .handler
            .handle_request("   ", &principal(), &models(), None, false, &CancellationToken::new())
            .await;

        assert_eq!(response.status, RequestStatus::Failed);
        let error = response.error.as_ref().unwrap();
        assert_eq!(error.kind, ErrorKind::InvalidInput);
        assert!(response.routing_decision.is_none());

        let record = h.store.load(&response.request_id).await.unwrap();
        assert_eq!(record.status, RequestStatus::Failed);
        assert!(record.response.is_none());
    }

    #[tokio::test]
    async fn over_limit_requests_fail_fast() {
        let h = harness();
        let handler = h.handler.with_max_inflight(0);

        let response = handler
            .handle_request(
                "anything at all",
                &principal(),
                &models(),
                None,
                false,
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(response.status, RequestStatus::Failed);
        assert_eq!(response.error.as_ref().unwrap().kind, ErrorKind::RateLimited);
    }

    #[tokio::test]
    async fn cancellation_yields_cancelled_failure() {
        let h = harness();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let response = h
            .handler
            .handle_request("what is 2 + 2?", &principal(), &models(), None, false, &cancel)
            .await;

        assert_eq!(response.status, RequestStatus::Failed);
        assert_eq!(response.error.as_ref().unwrap().kind, ErrorKind::Cancelled);
        // The router short-circuit still produced a decision to attach.
        assert_eq!(response.path, Some(Path::Simple));

        let record = h.store.load(&response.request_id).await.unwrap();
        assert_eq!(record.status, RequestStatus::Failed);
    }

    #[tokio::test]
    async fn low_confidence_accept_carries_recommendation() {
        let h = harness();
        h.backend.push_response("tinyllama", "A short answer.");
        // Both models emit mid-band scores, so the chain exhausts and the
        // best retry-band output is returned.
        h.backend.push_response(SCORER_MODEL, score_json(0.7));
        h.backend.push_response("qwen-7b", "Another short answer.");
        h.backend.push_response(SCORER_MODEL, score_json(0.65));

        let response = h
            .handler
            .handle_request(
                "what is 2 + 2?",
                &principal(),
                &models(),
                None,
                false,
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(response.status, RequestStatus::Completed);
        let details = response.confidence_details.as_ref().unwrap();
        assert_eq!(details.recommendation, Recommendation::Retry);
        assert_eq!(response.response, "A short answer.");
    }
}
