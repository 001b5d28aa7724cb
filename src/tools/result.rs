use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::ToolError;

/// Envelope returned by every tool invocation. Failures are values, never
/// errors, so callers can always inspect timing and metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolExecutionResult {
    pub success: bool,
    pub output: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_time_ms: u64,
    pub tokens_used: u64,
    pub cost: f64,
    pub metadata: Map<String, Value>,
}

impl ToolExecutionResult {
    pub fn ok(output: Value) -> Self {
        Self {
            success: true,
            output,
            error: None,
            execution_time_ms: 0,
            tokens_used: 0,
            cost: 0.0,
            metadata: Map::new(),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: Value::Null,
            error: Some(error.into()),
            execution_time_ms: 0,
            tokens_used: 0,
            cost: 0.0,
            metadata: Map::new(),
        }
    }

    pub fn with_execution_time(mut self, millis: u64) -> Self {
        self.execution_time_ms = millis;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_usage(mut self, tokens: u64, cost: f64) -> Self {
        self.tokens_used = tokens;
        self.cost = cost;
        self
    }
}

impl From<ToolError> for ToolExecutionResult {
    fn from(error: ToolError) -> Self {
        ToolExecutionResult::failure(error.to_string())
            .with_metadata("error_kind", json!(error.kind()))
    }
}

#[cfg(test)]
mod tests {
    use crate::error::ErrorKind;

    use super::*;

    #[test]
    fn tool_error_folds_into_failed_result() {
        let result: ToolExecutionResult = ToolError::Sandbox("path escape".into()).into();
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("path escape"));
        assert_eq!(
            result.metadata["error_kind"],
            serde_json::to_value(ErrorKind::SandboxViolation).unwrap()
        );
    }
}
