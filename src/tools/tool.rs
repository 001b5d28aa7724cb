use async_trait::async_trait;
use serde_json::{Map, Value};

use super::{ToolDefinition, ToolError, ToolExecutionResult};

/// A capability-bounded tool.
///
/// `run` is the tool's inner logic and may fail with a [`ToolError`]; the
/// blanket `execute` folds every failure into a `ToolExecutionResult`, so
/// nothing tool-internal ever crosses the registry boundary as an error.
#[async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    async fn run(&self, args: &Map<String, Value>) -> Result<Value, ToolError>;

    async fn execute(&self, args: &Map<String, Value>) -> ToolExecutionResult {
        match self.run(args).await {
            Ok(output) => ToolExecutionResult::ok(output),
            Err(error) => error.into(),
        }
    }
}

/// Argument accessors shared by the tool implementations.
pub(crate) fn required_str<'a>(
    args: &'a Map<String, Value>,
    name: &str,
) -> Result<&'a str, ToolError> {
    args.get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::Validation(format!("Missing required parameter: {name}")))
}

pub(crate) fn optional_str<'a>(args: &'a Map<String, Value>, name: &str) -> Option<&'a str> {
    args.get(name).and_then(Value::as_str)
}

pub(crate) fn optional_u64(args: &Map<String, Value>, name: &str) -> Option<u64> {
    args.get(name).and_then(Value::as_u64)
}

pub(crate) fn optional_str_array(args: &Map<String, Value>, name: &str) -> Vec<String> {
    args.get(name)
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
