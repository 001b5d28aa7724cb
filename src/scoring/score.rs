use serde::{Deserialize, Serialize};

pub const WEIGHT_FACTUAL: f64 = 0.4;
pub const WEIGHT_CONSISTENT: f64 = 0.3;
pub const WEIGHT_COMPLETE: f64 = 0.2;
pub const WEIGHT_GROUNDED: f64 = 0.1;

const THRESHOLD_ACCEPT: f64 = 0.8;
const THRESHOLD_RETRY: f64 = 0.6;
const THRESHOLD_ESCALATE: f64 = 0.4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Accept,
    Retry,
    Escalate,
    HumanReview,
}

impl Recommendation {
    pub fn from_overall(overall: f64) -> Self {
        if overall >= THRESHOLD_ACCEPT {
            Recommendation::Accept
        } else if overall >= THRESHOLD_RETRY {
            Recommendation::Retry
        } else if overall >= THRESHOLD_ESCALATE {
            Recommendation::Escalate
        } else {
            Recommendation::HumanReview
        }
    }
}

/// Four-dimension quality rubric with a weighted overall and a discrete
/// recommendation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceScore {
    pub factual: f64,
    pub consistent: f64,
    pub complete: f64,
    pub grounded: f64,
    pub overall: f64,
    pub issues: Vec<String>,
    pub recommendation: Recommendation,
    pub reasoning: String,
}

fn clamp01(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}

impl ConfidenceScore {
    /// Build a score from raw dimensions: clamp each to [0,1], derive the
    /// weighted overall and map it onto a recommendation.
    pub fn from_dimensions(
        factual: f64,
        consistent: f64,
        complete: f64,
        grounded: f64,
        issues: Vec<String>,
        reasoning: impl Into<String>,
    ) -> Self {
        let factual = clamp01(factual);
        let consistent = clamp01(consistent);
        let complete = clamp01(complete);
        let grounded = clamp01(grounded);

        let overall = clamp01(
            factual * WEIGHT_FACTUAL
                + consistent * WEIGHT_CONSISTENT
                + complete * WEIGHT_COMPLETE
                + grounded * WEIGHT_GROUNDED,
        );

        Self {
            factual,
            consistent,
            complete,
            grounded,
            overall,
            issues,
            recommendation: Recommendation::from_overall(overall),
            reasoning: reasoning.into(),
        }
    }

    /// Lowest-confidence score used when scoring itself failed.
    pub fn degraded(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self::from_dimensions(0.0, 0.0, 0.0, 0.0, vec![reason.clone()], reason)
    }

    pub fn should_retry(&self) -> bool {
        self.overall < THRESHOLD_RETRY
    }

    pub fn needs_human_review(&self) -> bool {
        self.overall < THRESHOLD_ESCALATE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overall_is_the_weighted_sum() {
        let score = ConfidenceScore::from_dimensions(0.9, 0.8, 0.7, 0.6, vec![], "test");
        let expected = 0.9 * 0.4 + 0.8 * 0.3 + 0.7 * 0.2 + 0.6 * 0.1;
        assert!((score.overall - expected).abs() < f64::EPSILON);
    }

    #[test]
    fn dimensions_are_clamped() {
        let score = ConfidenceScore::from_dimensions(1.7, -0.2, 0.5, 0.5, vec![], "test");
        assert_eq!(score.factual, 1.0);
        assert_eq!(score.consistent, 0.0);
    }

    #[test]
    fn recommendation_thresholds() {
        assert_eq!(Recommendation::from_overall(0.8), Recommendation::Accept);
        assert_eq!(Recommendation::from_overall(0.79), Recommendation::Retry);
        assert_eq!(Recommendation::from_overall(0.6), Recommendation::Retry);
        assert_eq!(Recommendation::from_overall(0.59), Recommendation::Escalate);
        assert_eq!(Recommendation::from_overall(0.4), Recommendation::Escalate);
        assert_eq!(
            Recommendation::from_overall(0.39),
            Recommendation::HumanReview
        );
    }

    #[test]
    fn degraded_score_demands_review() {
        let score = ConfidenceScore::degraded("scorer offline");
        assert_eq!(score.overall, 0.0);
        assert_eq!(score.recommendation, Recommendation::HumanReview);
    }
}
