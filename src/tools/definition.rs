use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::ToolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterKind {
    String,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParameterKind {
    fn as_str(self) -> &'static str {
        match self {
            ParameterKind::String => "string",
            ParameterKind::Number => "number",
            ParameterKind::Boolean => "boolean",
            ParameterKind::Array => "array",
            ParameterKind::Object => "object",
        }
    }

    fn matches(self, value: &Value) -> bool {
        match self {
            ParameterKind::String => value.is_string(),
            ParameterKind::Number => value.is_number(),
            ParameterKind::Boolean => value.is_boolean(),
            ParameterKind::Array => value.is_array(),
            ParameterKind::Object => value.is_object(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    pub kind: ParameterKind,
    pub description: String,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
}

impl ToolParameter {
    pub fn new(name: impl Into<String>, kind: ParameterKind) -> Self {
        Self {
            name: name.into(),
            kind,
            description: String::new(),
            required: true,
            default: None,
            enum_values: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn default_value(mut self, default: Value) -> Self {
        self.default = Some(default);
        self.required = false;
        self
    }

    pub fn one_of(mut self, values: impl IntoIterator<Item = Value>) -> Self {
        self.enum_values = Some(values.into_iter().collect());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCategory {
    Network,
    Filesystem,
    Database,
    Image,
    Code,
    Rag,
}

/// Registered interface of a tool. Immutable once registered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub category: ToolCategory,
    pub parameters: Vec<ToolParameter>,
    pub returns: Value,
    pub requires_approval: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_estimate: Option<f64>,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        category: ToolCategory,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            category,
            parameters: Vec::new(),
            returns: Value::Null,
            requires_approval: false,
            cost_estimate: None,
        }
    }

    pub fn with_parameters(mut self, parameters: impl IntoIterator<Item = ToolParameter>) -> Self {
        self.parameters = parameters.into_iter().collect();
        self
    }

    pub fn with_returns(mut self, returns: Value) -> Self {
        self.returns = returns;
        self
    }

    pub fn with_approval_required(mut self) -> Self {
        self.requires_approval = true;
        self
    }

    pub fn with_cost_estimate(mut self, cost: f64) -> Self {
        self.cost_estimate = Some(cost);
        self
    }

    /// Validate call arguments against the declared parameters: required
    /// presence, kind, enum membership, and no undeclared arguments.
    pub fn validate_args(&self, args: &Map<String, Value>) -> Result<(), ToolError> {
        for param in &self.parameters {
            let Some(value) = args.get(&param.name) else {
                if param.required {
                    return Err(ToolError::Validation(format!(
                        "Missing required parameter: {}",
                        param.name
                    )));
                }
                continue;
            };

            if value.is_null() && !param.required {
                continue;
            }
            if !param.kind.matches(value) {
                return Err(ToolError::Validation(format!(
                    "Parameter {} must be a {}",
                    param.name,
                    param.kind.as_str()
                )));
            }
            if let Some(allowed) = &param.enum_values {
                if !allowed.contains(value) {
                    return Err(ToolError::Validation(format!(
                        "Parameter {} must be one of {allowed:?}",
                        param.name
                    )));
                }
            }
        }

        for key in args.keys() {
            if !self.parameters.iter().any(|p| &p.name == key) {
                return Err(ToolError::Validation(format!(
                    "Unknown parameter: {key}"
                )));
            }
        }
        Ok(())
    }

    /// OpenAI-style function schema for model-facing tool advertising.
    pub fn function_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();

        for param in &self.parameters {
            let mut schema = Map::new();
            schema.insert("type".into(), json!(param.kind.as_str()));
            schema.insert("description".into(), json!(param.description));
            if let Some(allowed) = &param.enum_values {
                schema.insert("enum".into(), json!(allowed));
            }
            if let Some(default) = &param.default {
                schema.insert("default".into(), default.clone());
            }
            properties.insert(param.name.clone(), Value::Object(schema));
            if param.required {
                required.push(param.name.clone());
            }
        }

        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": {
                    "type": "object",
                    "properties": properties,
                    "required": required,
                },
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition() -> ToolDefinition {
        ToolDefinition::new("sample", "A sample tool", ToolCategory::Network).with_parameters([
            ToolParameter::new("query", ParameterKind::String).description("Search query"),
            ToolParameter::new("depth", ParameterKind::String)
                .one_of([json!("basic"), json!("advanced")])
                .optional(),
            ToolParameter::new("limit", ParameterKind::Number).optional(),
        ])
    }

    #[test]
    fn missing_required_parameter_fails() {
        let args = Map::new();
        let err = definition().validate_args(&args).unwrap_err();
        assert!(matches!(err, ToolError::Validation(_)));
    }

    #[test]
    fn type_mismatch_fails() {
        let mut args = Map::new();
        args.insert("query".into(), json!(42));
        assert!(definition().validate_args(&args).is_err());
    }

    #[test]
    fn enum_constraint_enforced() {
        let mut args = Map::new();
        args.insert("query".into(), json!("rust"));
        args.insert("depth".into(), json!("exhaustive"));
        assert!(definition().validate_args(&args).is_err());

        args.insert("depth".into(), json!("basic"));
        definition().validate_args(&args).unwrap();
    }

    #[test]
    fn unknown_argument_rejected() {
        let mut args = Map::new();
        args.insert("query".into(), json!("rust"));
        args.insert("verbose".into(), json!(true));
        assert!(definition().validate_args(&args).is_err());
    }

    #[test]
    fn function_schema_lists_required_fields() {
        let schema = definition().function_schema();
        assert_eq!(schema["function"]["name"], "sample");
        assert_eq!(
            schema["function"]["parameters"]["required"],
            json!(["query"])
        );
        assert_eq!(
            schema["function"]["parameters"]["properties"]["depth"]["enum"],
            json!(["basic", "advanced"])
        );
    }
}
