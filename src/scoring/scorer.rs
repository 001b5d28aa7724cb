use std::sync::Arc;

use indoc::formatdoc;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::inference::{CallOptions, InferenceGateway};
use crate::utils::parse_json_response;

use super::ConfidenceScore;

const HEDGING_PHRASES: &[&str] = &["as an ai", "i don't know", "i cannot", "i'm not sure"];

/// Inputs the scorer may take beyond the output/request pair.
#[derive(Debug, Clone, Default)]
pub struct ScoreContext<'a> {
    pub sources: &'a [String],
    pub context: Option<&'a Value>,
    pub model_used: Option<&'a str>,
}

/// A scored candidate from [`ConfidenceScorer::validate_multi_output`].
#[derive(Debug, Clone)]
pub struct ScoredOutput {
    pub output: String,
    pub model: String,
    pub score: ConfidenceScore,
}

/// Scores outputs against the fixed four-dimension rubric.
///
/// Scoring never fails: the model path degrades to deterministic heuristics
/// whenever the scoring model is unavailable or returns unparsable output.
pub struct ConfidenceScorer {
    gateway: Arc<InferenceGateway>,
    model: String,
}

impl ConfidenceScorer {
    pub fn new(gateway: Arc<InferenceGateway>, model: impl Into<String>) -> Self {
        Self {
            gateway,
            model: model.into(),
        }
    }

    pub async fn score(
        &self,
        output: &str,
        request: &str,
        ctx: ScoreContext<'_>,
        cancel: &CancellationToken,
    ) -> ConfidenceScore {
        let prompt = self.scoring_prompt(output, request, &ctx);
        let options = CallOptions::new()
            .with_max_tokens(256)
            .with_temperature(0.2)
            .with_stop(["<|user|>", "\n\n\n"]);

        let raw = match self
            .gateway
            .generate(&prompt, &self.model, &options, cancel)
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                log::warn!("Confidence model unavailable, using heuristics: {e}");
                return Self::heuristic_score(output, request);
            }
        };

        match parse_json_response(&raw) {
            Ok(parsed) => Self::from_model_response(&parsed),
            Err(e) => {
                log::warn!("Failed to parse confidence scores: {e}");
                Self::heuristic_score(output, request)
            }
        }
    }

    /// Score each candidate and return them ranked, best first.
    pub async fn validate_multi_output(
        &self,
        outputs: &[(String, String)],
        request: &str,
        cancel: &CancellationToken,
    ) -> Vec<ScoredOutput> {
        let mut scored = Vec::with_capacity(outputs.len());
        for (output, model) in outputs {
            let ctx = ScoreContext {
                model_used: Some(model),
                ..Default::default()
            };
            let score = self.score(output, request, ctx, cancel).await;
            scored.push(ScoredOutput {
                output: output.clone(),
                model: model.clone(),
                score,
            });
        }
        scored.sort_by(|a, b| {
            b.score
                .overall
                .partial_cmp(&a.score.overall)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored
    }

    fn from_model_response(parsed: &Value) -> ConfidenceScore {
        let dim = |name: &str| parsed[name].as_f64().unwrap_or(0.7);
        let issues = parsed["issues"]
            .as_array()
            .map(|issues| {
                issues
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let reasoning = parsed["reasoning"]
            .as_str()
            .unwrap_or("Automated scoring")
            .to_string();

        ConfidenceScore::from_dimensions(
            dim("factual"),
            dim("consistent"),
            dim("complete"),
            dim("grounded"),
            issues,
            reasoning,
        )
    }

    /// Deterministic fallback rubric. Same input, same score, bitwise.
    pub fn heuristic_score(output: &str, _request: &str) -> ConfidenceScore {
        let output_len = output.len();

        let complete = if output_len < 20 {
            0.3
        } else if output_len < 50 {
            0.6
        } else {
            0.8
        };

        // Walls of text without structure correlate with hallucination.
        let factual = if output_len > 2000 && output.matches('\n').count() < 3 {
            0.6
        } else {
            0.7
        };

        let lowered = output.to_lowercase();
        let grounded = if HEDGING_PHRASES.iter().any(|p| lowered.contains(p)) {
            0.6
        } else {
            0.8
        };

        let consistent = 0.75;

        ConfidenceScore::from_dimensions(
            factual,
            consistent,
            complete,
            grounded,
            vec!["Heuristic scoring (model unavailable)".to_string()],
            "Fallback heuristic analysis",
        )
    }

    fn scoring_prompt(&self, output: &str, request: &str, ctx: &ScoreContext<'_>) -> String {
        let sources = if ctx.sources.is_empty() {
            "None provided".to_string()
        } else {
            ctx.sources.join("\n")
        };
        let context = ctx
            .context
            .map(|c| c.to_string())
            .unwrap_or_else(|| "None".to_string());

        formatdoc! {r#"
            <|system|>
            You are a quality validator. Evaluate the AI-generated output for quality and accuracy.

            Score each criterion (0-1 scale):
            1. factual: Is the output accurate and truthful?
            2. consistent: Is it internally consistent, free of contradictions?
            3. complete: Does it fully answer the request?
            4. grounded: Is it supported by the provided context/sources?

            Respond ONLY with valid JSON:
            {{
              "factual": 0.9,
              "consistent": 0.85,
              "complete": 0.95,
              "grounded": 0.8,
              "issues": ["List any specific issues found"],
              "reasoning": "Brief explanation of scores"
            }}
            <|user|>
            Original Request: {request}

            Generated Output: {output}

            Sources: {sources}

            Context: {context}

            Model Used: {model}
            <|assistant|>
        "#,
            model = ctx.model_used.unwrap_or("Unknown"),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::inference::{InferenceGateway, LocalProvider};
    use crate::scoring::Recommendation;

    use super::*;

    fn scorer_with_backend() -> (ConfidenceScorer, Arc<crate::inference::FakeLocalBackend>) {
        let (provider, backend) = LocalProvider::fake(["qwen-0.5b"]);
        let gateway = Arc::new(InferenceGateway::new(vec![Arc::new(provider)]));
        (ConfidenceScorer::new(gateway, "qwen-0.5b"), backend)
    }

    #[tokio::test]
    async fn model_scores_are_parsed_and_weighted() {
        let (scorer, backend) = scorer_with_backend();
        backend.push_response(
            "qwen-0.5b",
            r#"{"factual": 1.0, "consistent": 1.0, "complete": 1.0, "grounded": 1.0, "issues": [], "reasoning": "solid"}"#,
        );

        let score = scorer
            .score(
                "The capital of France is Paris.",
                "capital of France?",
                ScoreContext::default(),
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(score.overall, 1.0);
        assert_eq!(score.recommendation, Recommendation::Accept);
    }

    #[tokio::test]
    async fn fenced_model_output_is_accepted() {
        let (scorer, backend) = scorer_with_backend();
        backend.push_response(
            "qwen-0.5b",
            "```json\n{\"factual\": 0.9, \"consistent\": 0.9, \"complete\": 0.9, \"grounded\": 0.9}\n```",
        );

        let score = scorer
            .score("answer", "question", ScoreContext::default(), &CancellationToken::new())
            .await;
        assert!((score.overall - 0.9).abs() < 1e-9);
    }

    #[tokio::test]
    async fn unparsable_model_output_falls_back_to_heuristics() {
        let (scorer, backend) = scorer_with_backend();
        backend.push_response("qwen-0.5b", "I rate this a solid 7/10");

        let score = scorer
            .score(
                "A long and structured answer that goes into sufficient depth.",
                "question",
                ScoreContext::default(),
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(score.issues, vec!["Heuristic scoring (model unavailable)"]);
    }

    #[test]
    fn heuristic_scoring_is_deterministic() {
        let a = ConfidenceScorer::heuristic_score("I don't know.", "q");
        let b = ConfidenceScorer::heuristic_score("I don't know.", "q");
        assert_eq!(a.overall.to_bits(), b.overall.to_bits());
        assert_eq!(a.grounded, 0.6);
        assert_eq!(a.complete, 0.3);
    }

    #[test]
    fn hedging_lowers_grounded_long_unstructured_lowers_factual() {
        let hedged = ConfidenceScorer::heuristic_score(
            "I cannot answer that question for you right now, sorry about it.",
            "q",
        );
        assert_eq!(hedged.grounded, 0.6);

        let wall = "word ".repeat(500);
        let unstructured = ConfidenceScorer::heuristic_score(&wall, "q");
        assert_eq!(unstructured.factual, 0.6);

        let fine = ConfidenceScorer::heuristic_score("A concise, structured answer with enough detail.", "q");
        assert_eq!(fine.factual, 0.7);
        assert_eq!(fine.grounded, 0.8);
    }

    #[tokio::test]
    async fn multi_output_returns_best_first() {
        let (scorer, backend) = scorer_with_backend();
        backend.push_response(
            "qwen-0.5b",
            r#"{"factual": 0.2, "consistent": 0.2, "complete": 0.2, "grounded": 0.2}"#,
        );
        backend.push_response(
            "qwen-0.5b",
            r#"{"factual": 0.9, "consistent": 0.9, "complete": 0.9, "grounded": 0.9}"#,
        );

        let outputs = vec![
            ("weak answer".to_string(), "tinyllama".to_string()),
            ("strong answer".to_string(), "qwen-7b".to_string()),
        ];
        let ranked = scorer
            .validate_multi_output(&outputs, "question", &CancellationToken::new())
            .await;
        assert_eq!(ranked[0].model, "qwen-7b");
        assert!(ranked[0].score.overall > ranked[1].score.overall);
    }
}
