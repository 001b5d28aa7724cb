use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Map, Value};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::inference::{CallOptions, InferenceError, InferenceGateway};
use crate::planning::{ActionPlanner, Plan, Step};
use crate::routing::{Path, RoutingDecision};
use crate::schemas::Principal;
use crate::scoring::{ConfidenceScore, ConfidenceScorer, Recommendation, ScoreContext};
use crate::tools::ToolRegistry;
use crate::utils::truncate_chars;

use super::{ExecutionOutcome, FallbackAttempt, OrchestratorError, StepRecord};

const STEP_CONTEXT_EXCERPT: usize = 200;
const ATTEMPT_EXCERPT: usize = 120;
const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(120);

/// Executes routed requests: direct calls with a model fallback chain,
/// specialized delegation, and planned multi-step workflows.
pub struct Orchestrator {
    gateway: Arc<InferenceGateway>,
    scorer: Arc<ConfidenceScorer>,
    planner: Arc<ActionPlanner>,
    registry: Arc<ToolRegistry>,
    max_fallback_attempts: usize,
    step_concurrency: usize,
    step_timeout: Duration,
}

enum StepOutcome {
    Completed { output: String, via: String },
    Failed(String),
}

impl Orchestrator {
    pub fn new(
        gateway: Arc<InferenceGateway>,
        scorer: Arc<ConfidenceScorer>,
        planner: Arc<ActionPlanner>,
        registry: Arc<ToolRegistry>,
    ) -> Self {
        Self {
            gateway,
            scorer,
            planner,
            registry,
            max_fallback_attempts: 3,
            step_concurrency: 4,
            step_timeout: DEFAULT_STEP_TIMEOUT,
        }
    }

    pub fn with_max_fallback_attempts(mut self, attempts: usize) -> Self {
        self.max_fallback_attempts = attempts.max(1);
        self
    }

    pub fn with_step_concurrency(mut self, concurrency: usize) -> Self {
        self.step_concurrency = concurrency.max(1);
        self
    }

    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    pub async fn execute(
        &self,
        request: &str,
        decision: &RoutingDecision,
        principal: &Principal,
        available_models: &[String],
        cancel: &CancellationToken,
    ) -> Result<ExecutionOutcome, OrchestratorError> {
        match decision.path {
            Path::Simple => {
                self.execute_simple(request, decision, available_models, cancel)
                    .await
            }
            Path::Complex => {
                self.execute_complex(request, decision, principal, available_models, cancel)
                    .await
            }
            Path::Specialized => {
                self.execute_specialized(request, decision, principal, available_models, cancel)
                    .await
            }
        }
    }

    /// Recommended model first, then the remaining available models in
    /// their listed order.
    fn fallback_order(&self, recommended: &str, available: &[String]) -> Vec<String> {
        let mut order = Vec::new();
        if available.iter().any(|m| m == recommended) {
            order.push(recommended.to_string());
        }
        for model in available {
            if !order.contains(model) {
                order.push(model.clone());
            }
        }
        order
    }

    async fn execute_simple(
        &self,
        request: &str,
        decision: &RoutingDecision,
        available_models: &[String],
        cancel: &CancellationToken,
    ) -> Result<ExecutionOutcome, OrchestratorError> {
        let order = self.fallback_order(&decision.recommended_model, available_models);
        if order.is_empty() {
            return Err(OrchestratorError::NoModels);
        }

        let options = CallOptions::new().with_max_tokens(512).with_temperature(0.7);
        let mut attempts: Vec<FallbackAttempt> = Vec::new();
        let mut best: Option<(String, String, ConfidenceScore)> = None;

        for model in order.iter().take(self.max_fallback_attempts) {
            let output = match self.gateway.generate(request, model, &options, cancel).await {
                Ok(output) => output,
                Err(InferenceError::Cancelled) => return Err(OrchestratorError::Cancelled),
                Err(e) => {
                    log::warn!("Model {model} failed: {e}");
                    attempts.push(FallbackAttempt {
                        model: model.clone(),
                        confidence: 0.0,
                        reason: format!("inference failed: {e}"),
                        output_excerpt: String::new(),
                        timestamp: Utc::now(),
                    });
                    continue;
                }
            };

            let ctx = ScoreContext {
                model_used: Some(model),
                ..Default::default()
            };
            let score = self.scorer.score(&output, request, ctx, cancel).await;

            attempts.push(FallbackAttempt {
                model: model.clone(),
                confidence: score.overall,
                reason: format!("recommendation: {:?}", score.recommendation),
                output_excerpt: truncate_chars(&output, ATTEMPT_EXCERPT).to_string(),
                timestamp: Utc::now(),
            });

            let improves = best
                .as_ref()
                .is_none_or(|(_, _, current)| score.overall > current.overall);
            if improves {
                best = Some((output, model.clone(), score.clone()));
            }

            // Retry and escalate walk the chain; anything else stops it.
            if !matches!(
                score.recommendation,
                Recommendation::Retry | Recommendation::Escalate
            ) {
                break;
            }
        }

        let (response, model, score) = best.ok_or(OrchestratorError::FallbacksExhausted)?;
        Ok(ExecutionOutcome {
            response,
            models_used: vec![model],
            confidence: score.overall,
            confidence_details: score,
            fallback_attempts: attempts,
            steps_completed: 0,
            step_records: vec![],
        })
    }

    /// A specialized request with an attached plan or multiple required
    /// models needs coordination; everything else is a pinned simple call.
    async fn execute_specialized(
        &self,
        request: &str,
        decision: &RoutingDecision,
        principal: &Principal,
        available_models: &[String],
        cancel: &CancellationToken,
    ) -> Result<ExecutionOutcome, OrchestratorError> {
        if !decision.action_plan.is_empty() || decision.required_models.len() > 1 {
            log::info!("Specialized request requires orchestration; delegating to complex path");
            return self
                .execute_complex(request, decision, principal, available_models, cancel)
                .await;
        }
        self.execute_simple(request, decision, available_models, cancel)
            .await
    }

    async fn execute_complex(
        &self,
        request: &str,
        decision: &RoutingDecision,
        principal: &Principal,
        available_models: &[String],
        cancel: &CancellationToken,
    ) -> Result<ExecutionOutcome, OrchestratorError> {
        let plan = if decision.action_plan.is_empty() {
            self.planner.create_plan(request, cancel).await
        } else {
            Plan {
                steps: decision.action_plan.clone(),
                confidence: decision.confidence,
                iterations: 0,
                critiques: vec![],
                retrieved_examples: vec![],
                source_intent: request.to_string(),
            }
        };
        log::info!("Executing plan with {} steps", plan.steps.len());

        let order = self.fallback_order(&decision.recommended_model, available_models);
        let model = order.first().ok_or(OrchestratorError::NoModels)?.clone();

        let execution = self
            .run_plan(&plan, request, &model, principal, cancel)
            .await?;

        let response = execution
            .completed
            .last()
            .and_then(|id| execution.outputs.get(id))
            .cloned()
            .unwrap_or_default();

        let ctx = ScoreContext {
            model_used: Some(&model),
            ..Default::default()
        };
        let score = self.scorer.score(&response, request, ctx, cancel).await;

        let mut models_used = execution.models_used;
        if models_used.is_empty() {
            models_used.push(model);
        }

        Ok(ExecutionOutcome {
            response,
            models_used,
            confidence: score.overall,
            confidence_details: score,
            fallback_attempts: vec![],
            steps_completed: execution.completed.len(),
            step_records: execution.records,
        })
    }

    async fn run_plan(
        &self,
        plan: &Plan,
        request: &str,
        model: &str,
        principal: &Principal,
        cancel: &CancellationToken,
    ) -> Result<PlanExecution, OrchestratorError> {
        let mut remaining = plan.execution_order();
        let mut outputs: HashMap<u32, String> = HashMap::new();
        let mut completed: Vec<u32> = Vec::new();
        let mut failed: HashSet<u32> = HashSet::new();
        let mut records: Vec<StepRecord> = Vec::new();
        let mut models_used: Vec<String> = Vec::new();

        let semaphore = Arc::new(Semaphore::new(self.step_concurrency));

        while !remaining.is_empty() {
            if cancel.is_cancelled() {
                return Err(OrchestratorError::Cancelled);
            }

            // Cascade: a step whose dependency failed (or was skipped) is
            // skipped without execution.
            let mut cascaded = false;
            let mut still_remaining = Vec::new();
            for id in remaining.drain(..) {
                let step = plan.step(id).expect("ordered step exists");
                if step.dependencies.iter().any(|dep| failed.contains(dep)) {
                    log::warn!("Step {id} dependencies not met, skipping");
                    failed.insert(id);
                    cascaded = true;
                    records.push(StepRecord {
                        id,
                        action: step.action.clone(),
                        tool: None,
                        model: None,
                        output: None,
                        error: Some("Skipped: dependency failed".into()),
                        skipped: true,
                    });
                } else {
                    still_remaining.push(id);
                }
            }
            remaining = still_remaining;

            let eligible: Vec<u32> = remaining
                .iter()
                .copied()
                .filter(|id| {
                    let step = plan.step(*id).expect("ordered step exists");
                    step.dependencies
                        .iter()
                        .all(|dep| completed.contains(dep) || plan.step(*dep).is_none())
                })
                .collect();

            if eligible.is_empty() {
                if cascaded {
                    continue;
                }
                // Whatever is left waits on dependencies that can never
                // complete; skip it rather than spin.
                for id in remaining.drain(..) {
                    let step = plan.step(id).expect("ordered step exists");
                    failed.insert(id);
                    records.push(StepRecord {
                        id,
                        action: step.action.clone(),
                        tool: None,
                        model: None,
                        output: None,
                        error: Some("Skipped: dependencies unsatisfiable".into()),
                        skipped: true,
                    });
                }
                break;
            }

            // One non-parallelizable step at a time; a leading group of
            // parallelizable steps runs as one bounded wave.
            let wave: Vec<u32> = if plan
                .step(eligible[0])
                .map(|s| s.parallelizable)
                .unwrap_or(false)
            {
                eligible
                    .iter()
                    .copied()
                    .filter(|id| plan.step(*id).map(|s| s.parallelizable).unwrap_or(false))
                    .collect()
            } else {
                vec![eligible[0]]
            };

            let context = Self::build_step_context(request, &completed, &outputs);
            let wave_futures = wave.iter().map(|id| {
                let step = plan.step(*id).expect("ordered step exists").clone();
                let context = context.clone();
                let semaphore = semaphore.clone();
                let id = *id;
                async move {
                    let _permit = semaphore.acquire().await.expect("semaphore closed");
                    log::info!("Executing step {id}: {}", truncate_chars(&step.action, 100));
                    let outcome = self
                        .execute_step(&step, &context, model, principal, cancel)
                        .await;
                    (id, step, outcome)
                }
            });

            for (id, step, outcome) in futures::future::join_all(wave_futures).await {
                match outcome {
                    StepOutcome::Completed { output, via } => {
                        if step.tool == "none" && !models_used.contains(&via) {
                            models_used.push(via.clone());
                        }
                        records.push(StepRecord {
                            id,
                            action: step.action.clone(),
                            tool: (step.tool != "none").then(|| via.clone()),
                            model: (step.tool == "none").then(|| via.clone()),
                            output: Some(truncate_chars(&output, STEP_CONTEXT_EXCERPT).to_string()),
                            error: None,
                            skipped: false,
                        });
                        outputs.insert(id, output);
                        completed.push(id);
                    }
                    StepOutcome::Failed(error) => {
                        log::error!("Step {id} failed: {error}");
                        failed.insert(id);
                        records.push(StepRecord {
                            id,
                            action: step.action.clone(),
                            tool: None,
                            model: None,
                            output: None,
                            error: Some(error),
                            skipped: false,
                        });
                    }
                }
            }

            remaining.retain(|id| !wave.contains(id));
        }

        Ok(PlanExecution {
            outputs,
            completed,
            records,
            models_used,
        })
    }

    async fn execute_step(
        &self,
        step: &Step,
        context: &str,
        model: &str,
        principal: &Principal,
        cancel: &CancellationToken,
    ) -> StepOutcome {
        if step.tool == "none" {
            let prompt = format!("{context}\n\nRequest: {}", step.action);
            let options = CallOptions::new()
                .with_max_tokens(512)
                .with_temperature(0.7)
                .with_timeout(self.step_timeout);
            return match self.gateway.generate(&prompt, model, &options, cancel).await {
                Ok(output) => StepOutcome::Completed {
                    output,
                    via: model.to_string(),
                },
                Err(e) => StepOutcome::Failed(e.to_string()),
            };
        }

        let tool_name = if step.tool == "auto" {
            determine_tool(&step.action).to_string()
        } else {
            step.tool.clone()
        };
        let args = build_tool_args(&tool_name, &step.action);

        let result = match tokio::time::timeout(
            self.step_timeout,
            self.registry.execute_tool(&tool_name, principal, args, cancel),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => return StepOutcome::Failed("Timeout".into()),
        };

        if result.success {
            let output = match &result.output {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            StepOutcome::Completed {
                output,
                via: tool_name,
            }
        } else {
            StepOutcome::Failed(
                result
                    .error
                    .unwrap_or_else(|| "Tool execution failed".into()),
            )
        }
    }

    /// `"Original request: …\nPrevious steps:\nStep k: <truncated output>"`,
    /// in completion order.
    fn build_step_context(
        request: &str,
        completed: &[u32],
        outputs: &HashMap<u32, String>,
    ) -> String {
        if completed.is_empty() {
            return format!("Original request: {request}");
        }

        let mut parts = vec![format!("Original request: {request}"), "\nPrevious steps:".into()];
        for id in completed {
            if let Some(output) = outputs.get(id) {
                parts.push(format!(
                    "Step {id}: {}",
                    truncate_chars(output, STEP_CONTEXT_EXCERPT)
                ));
            }
        }
        parts.join("\n")
    }

}

/// Keyword resolution for steps that left tool selection to execution
/// time.
pub(crate) fn determine_tool(action: &str) -> &'static str {
    let lowered = action.to_lowercase();
    let matches_any = |words: &[&str]| words.iter().any(|w| lowered.contains(w));

    if matches_any(&["search", "find", "look up", "web"]) {
        "web_search"
    } else if matches_any(&["query", "database", "sql"]) {
        "database_query"
    } else if matches_any(&["code", "execute", "run", "python", "script"]) {
        "code_executor"
    } else if matches_any(&["file", "read", "write", "save", "load"]) {
        "file_operations"
    } else if matches_any(&["api", "http", "request", "call"]) {
        "api_call"
    } else if matches_any(&["document", "retrieve", "knowledge", "rag"]) {
        "rag_query"
    } else {
        "web_search"
    }
}

/// Minimal argument shapes for auto-resolved tools; tools whose arguments
/// cannot be derived from an action description fail validation, which
/// surfaces as a captured step failure.
pub(crate) fn build_tool_args(tool_name: &str, action: &str) -> Map<String, Value> {
    let mut args = Map::new();
    match tool_name {
        "web_search" => {
            args.insert("query".into(), json!(action));
        }
        "rag_query" => {
            args.insert("action".into(), json!("query"));
            args.insert("query".into(), json!(action));
        }
        "database_query" => {
            args.insert("sql".into(), json!(action));
        }
        _ => {
            args.insert("query".into(), json!(action));
        }
    }
    args
}

struct PlanExecution {
    outputs: HashMap<u32, String>,
    completed: Vec<u32>,
    records: Vec<StepRecord>,
    models_used: Vec<String>,
}
