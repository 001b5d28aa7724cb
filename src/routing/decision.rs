use serde::{Deserialize, Serialize};

use crate::planning::Step;

/// Execution strategy chosen by the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Path {
    #[default]
    Simple,
    Complex,
    Specialized,
}

/// Immutable classification of one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub path: Path,
    pub complexity: f64,
    pub confidence: f64,
    pub reasoning: String,
    pub recommended_model: String,
    pub requires_tools: bool,
    pub requires_workflow: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub action_plan: Vec<Step>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_models: Vec<String>,
}

impl RoutingDecision {
    /// Clamp scalars and re-derive the path from the routing invariants:
    /// high complexity forces the complex path, low complexity with high
    /// confidence forces simple.
    pub fn normalized(mut self) -> Self {
        self.complexity = self.complexity.clamp(0.0, 1.0);
        self.confidence = self.confidence.clamp(0.0, 1.0);

        if self.complexity > 0.7 {
            self.path = Path::Complex;
        } else if self.complexity < 0.3 && self.confidence > 0.8 {
            self.path = Path::Simple;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decision(path: Path, complexity: f64, confidence: f64) -> RoutingDecision {
        RoutingDecision {
            path,
            complexity,
            confidence,
            reasoning: String::new(),
            recommended_model: "tinyllama".into(),
            requires_tools: false,
            requires_workflow: false,
            action_plan: vec![],
            required_models: vec![],
        }
    }

    #[test]
    fn high_complexity_forces_complex_path() {
        let normalized = decision(Path::Simple, 0.9, 0.5).normalized();
        assert_eq!(normalized.path, Path::Complex);
    }

    #[test]
    fn low_complexity_high_confidence_forces_simple() {
        let normalized = decision(Path::Specialized, 0.2, 0.9).normalized();
        assert_eq!(normalized.path, Path::Simple);
    }

    #[test]
    fn middle_band_keeps_declared_path() {
        let normalized = decision(Path::Specialized, 0.5, 0.7).normalized();
        assert_eq!(normalized.path, Path::Specialized);
    }

    #[test]
    fn scalars_are_clamped() {
        let normalized = decision(Path::Simple, 3.0, -1.0).normalized();
        assert_eq!(normalized.complexity, 1.0);
        assert_eq!(normalized.confidence, 0.0);
        assert_eq!(normalized.path, Path::Complex);
    }

    #[test]
    fn unknown_path_string_coerces_to_simple() {
        let parsed: Path = serde_json::from_str("\"weird\"").unwrap_or_default();
        assert_eq!(parsed, Path::Simple);
    }
}
