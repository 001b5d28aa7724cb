use std::sync::Arc;

use indoc::formatdoc;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::inference::{CallOptions, InferenceGateway};
use crate::utils::parse_json_response;
use crate::vectorstore::VectorStore;

use super::{Plan, Step};

const CONFIDENCE_THRESHOLD: f64 = 0.8;
const RETRIEVED_EXAMPLES: usize = 3;

struct Critique {
    confidence: f64,
    text: String,
}

/// Produces action plans through generate → critique → refine rounds.
///
/// The loop stops when the critique confidence reaches the threshold, when
/// a refinement stops improving (the prior best plan wins), or after
/// `max_iterations` rounds. Planning never fails: unparsable model output
/// degrades to a singleton zero-confidence plan.
pub struct ActionPlanner {
    gateway: Arc<InferenceGateway>,
    model: String,
    plan_memory: Option<Arc<dyn VectorStore>>,
    max_iterations: u32,
}

impl ActionPlanner {
    pub fn new(gateway: Arc<InferenceGateway>, model: impl Into<String>) -> Self {
        Self {
            gateway,
            model: model.into(),
            plan_memory: None,
            max_iterations: 3,
        }
    }

    /// Attach a store of previously successful plans; similar plans are
    /// retrieved as examples for the initial generation.
    pub fn with_plan_memory(mut self, memory: Arc<dyn VectorStore>) -> Self {
        self.plan_memory = Some(memory);
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub async fn create_plan(&self, intent: &str, cancel: &CancellationToken) -> Plan {
        log::info!("Creating action plan for: {}", crate::utils::truncate_chars(intent, 100));

        let retrieved_examples = self.retrieve_examples(intent).await;

        let mut critiques: Vec<String> = Vec::new();
        let mut best_confidence = 0.0_f64;
        let mut best_steps: Option<Vec<Step>> = None;
        let mut current_steps: Option<Vec<Step>> = None;
        let mut iterations = 0;

        for iteration in 0..self.max_iterations {
            iterations = iteration + 1;
            log::info!("Plan iteration {iterations}/{}", self.max_iterations);

            let steps = if iteration == 0 {
                match self.generate_initial(intent, &retrieved_examples, cancel).await {
                    Some(steps) => steps,
                    // Nothing parseable to critique or refine; degrade
                    // instead of propagating the parse failure.
                    None => {
                        return Plan {
                            steps: vec![Self::degraded_step()],
                            confidence: 0.0,
                            iterations,
                            critiques,
                            retrieved_examples,
                            source_intent: intent.to_string(),
                        }
                    }
                }
            } else {
                let prior = current_steps.clone().unwrap_or_default();
                let last_critique = critiques.last().cloned().unwrap_or_default();
                self.refine(intent, &prior, &last_critique, cancel)
                    .await
                    .unwrap_or(prior)
            };

            let critique = self.critique(intent, &steps, cancel).await;
            critiques.push(critique.text);
            log::info!("Plan confidence: {:.2}", critique.confidence);

            current_steps = Some(steps.clone());

            if critique.confidence >= CONFIDENCE_THRESHOLD {
                best_confidence = critique.confidence;
                best_steps = Some(steps);
                break;
            }
            if critique.confidence <= best_confidence {
                // Not improving; keep the prior best.
                log::info!("Plan quality not improving, stopping iterations");
                break;
            }
            best_confidence = critique.confidence;
            best_steps = Some(steps);
        }

        Plan {
            steps: best_steps.unwrap_or_else(|| vec![Self::degraded_step()]),
            confidence: best_confidence,
            iterations,
            critiques,
            retrieved_examples,
            source_intent: intent.to_string(),
        }
    }

    async fn retrieve_examples(&self, intent: &str) -> Vec<Value> {
        let Some(memory) = &self.plan_memory else {
            return Vec::new();
        };
        match memory.query(intent, RETRIEVED_EXAMPLES, None).await {
            Ok(result) => result
                .documents
                .iter()
                .zip(&result.distances)
                .map(|(document, distance)| json!({ "plan": document, "distance": distance }))
                .collect(),
            Err(e) => {
                log::warn!("Plan memory unavailable: {e}");
                Vec::new()
            }
        }
    }

    async fn generate_initial(
        &self,
        intent: &str,
        examples: &[Value],
        cancel: &CancellationToken,
    ) -> Option<Vec<Step>> {
        let examples_text = if examples.is_empty() {
            "None".to_string()
        } else {
            serde_json::to_string_pretty(examples).unwrap_or_else(|_| "None".to_string())
        };

        let prompt = formatdoc! {r#"
            Create a detailed action plan to accomplish this goal:

            {intent}

            Similar plans that worked before:
            {examples_text}

            Break down the task into clear, executable steps. For each step, specify:
            1. The action to take
            2. The tool to use ("auto" to pick at execution time, "none" for pure reasoning)
            3. Expected outcome
            4. Dependencies on earlier steps (by id) and whether it can run in parallel

            Format as JSON:
            {{
                "steps": [
                    {{"id": 1, "action": "...", "tool": "...", "expected_outcome": "...", "dependencies": [], "parallelizable": false}}
                ]
            }}

            Provide ONLY the JSON, no other text."#};

        self.generate_steps(&prompt, cancel).await
    }

    async fn refine(
        &self,
        intent: &str,
        current: &[Step],
        critique: &str,
        cancel: &CancellationToken,
    ) -> Option<Vec<Step>> {
        let current_json =
            serde_json::to_string_pretty(current).unwrap_or_else(|_| "[]".to_string());

        let prompt = formatdoc! {r#"
            Improve this action plan based on the critique provided.

            Original Goal: {intent}

            Current Plan:
            {current_json}

            Critique:
            {critique}

            Create an improved plan addressing the critique, in the same JSON schema:
            {{
                "steps": [
                    {{"id": 1, "action": "...", "tool": "...", "expected_outcome": "...", "dependencies": [], "parallelizable": false}}
                ]
            }}

            Provide ONLY the JSON, no other text."#};

        self.generate_steps(&prompt, cancel).await
    }

    async fn generate_steps(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Option<Vec<Step>> {
        let options = CallOptions::new().with_max_tokens(1000).with_temperature(0.5);
        let raw = match self
            .gateway
            .generate(prompt, &self.model, &options, cancel)
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                log::warn!("Plan generation failed: {e}");
                return None;
            }
        };

        let parsed = match parse_json_response(&raw) {
            Ok(parsed) => parsed,
            Err(e) => {
                log::warn!("Plan did not parse as JSON: {e}");
                return None;
            }
        };

        let steps: Vec<Step> =
            serde_json::from_value(parsed["steps"].clone()).unwrap_or_default();
        if steps.is_empty() {
            None
        } else {
            Some(steps)
        }
    }

    async fn critique(
        &self,
        intent: &str,
        steps: &[Step],
        cancel: &CancellationToken,
    ) -> Critique {
        let plan_json = serde_json::to_string_pretty(steps).unwrap_or_else(|_| "[]".to_string());

        let prompt = formatdoc! {r#"
            Critique this action plan for accomplishing the given goal.

            Goal: {intent}

            Plan:
            {plan_json}

            Evaluate the plan and provide:
            1. Confidence score (0.0-1.0) that this plan will succeed
            2. Specific critique and suggestions for improvement

            Format as JSON:
            {{
                "confidence": 0.8,
                "critique": "detailed critique",
                "suggestions": ["suggestion 1"]
            }}

            Provide ONLY the JSON, no other text."#};

        let options = CallOptions::new().with_max_tokens(500).with_temperature(0.3);
        let raw = match self
            .gateway
            .generate(&prompt, &self.model, &options, cancel)
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                return Critique {
                    confidence: 0.5,
                    text: format!("Critique failed: {e}"),
                }
            }
        };

        match parse_json_response(&raw) {
            Ok(parsed) => Critique {
                confidence: parsed["confidence"].as_f64().unwrap_or(0.5).clamp(0.0, 1.0),
                text: parsed["critique"].as_str().unwrap_or("").to_string(),
            },
            Err(e) => Critique {
                confidence: 0.5,
                text: format!("Critique failed: {e}"),
            },
        }
    }

    fn degraded_step() -> Step {
        Step::new(1, "Unable to generate plan")
            .with_tool("none")
            .with_expected_outcome("error")
    }
}
