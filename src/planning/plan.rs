use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One unit of work in a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    #[serde(alias = "step")]
    pub id: u32,
    pub action: String,
    #[serde(default = "default_tool")]
    pub tool: String,
    #[serde(default)]
    pub expected_outcome: String,
    #[serde(default)]
    pub dependencies: Vec<u32>,
    #[serde(default, alias = "parallel")]
    pub parallelizable: bool,
}

fn default_tool() -> String {
    "auto".into()
}

impl Step {
    pub fn new(id: u32, action: impl Into<String>) -> Self {
        Self {
            id,
            action: action.into(),
            tool: default_tool(),
            expected_outcome: String::new(),
            dependencies: Vec::new(),
            parallelizable: false,
        }
    }

    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = tool.into();
        self
    }

    pub fn with_expected_outcome(mut self, expected_outcome: impl Into<String>) -> Self {
        self.expected_outcome = expected_outcome.into();
        self
    }

    pub fn with_dependencies(mut self, dependencies: impl IntoIterator<Item = u32>) -> Self {
        self.dependencies = dependencies.into_iter().collect();
        self
    }

    pub fn parallelizable(mut self) -> Self {
        self.parallelizable = true;
        self
    }
}

/// Ordered step list produced by the planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub steps: Vec<Step>,
    pub confidence: f64,
    pub iterations: u32,
    pub critiques: Vec<String>,
    #[serde(default)]
    pub retrieved_examples: Vec<Value>,
    pub source_intent: String,
}

impl Plan {
    /// Dependency-respecting execution order.
    ///
    /// Depth-first over declared dependencies: already-visited steps are
    /// skipped (which drops back-edges, so cycles cannot wedge the order)
    /// and unknown dependency ids are ignored.
    pub fn execution_order(&self) -> Vec<u32> {
        fn visit(id: u32, plan: &Plan, visited: &mut Vec<u32>, order: &mut Vec<u32>) {
            if visited.contains(&id) {
                return;
            }
            visited.push(id);
            if let Some(step) = plan.steps.iter().find(|s| s.id == id) {
                for dep in &step.dependencies {
                    if plan.steps.iter().any(|s| s.id == *dep) {
                        visit(*dep, plan, visited, order);
                    }
                }
            }
            order.push(id);
        }

        let mut visited = Vec::new();
        let mut order = Vec::new();
        for step in &self.steps {
            visit(step.id, self, &mut visited, &mut order);
        }
        order
    }

    pub fn step(&self, id: u32) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }
}
