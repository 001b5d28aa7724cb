use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scoring::ConfidenceScore;

/// One entry in the simple path's model fallback audit. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackAttempt {
    pub model: String,
    pub confidence: f64,
    pub reason: String,
    pub output_excerpt: String,
    pub timestamp: DateTime<Utc>,
}

/// Per-step record surfaced in the execution outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub id: u32,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub skipped: bool,
}

/// What an execution strategy hands back to the unified handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub response: String,
    pub models_used: Vec<String>,
    pub confidence: f64,
    pub confidence_details: ConfidenceScore,
    pub fallback_attempts: Vec<FallbackAttempt>,
    pub steps_completed: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub step_records: Vec<StepRecord>,
}
