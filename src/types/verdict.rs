//! Scoring and explanation responses

use serde::{Deserialize, Serialize};

/// Binary classification outcome for one transaction.
///
/// `confidence` is the probability the classifier assigned to the returned
/// class, not a calibrated fraud probability: a confident "not fraud" verdict
/// carries a high confidence too.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub is_fraud: bool,
    pub confidence: f64,
}

impl Verdict {
    /// Derive a verdict from the fraud-class probability.
    ///
    /// Ties resolve to "not fraud", matching an argmax over `[p0, p1]`.
    pub fn from_fraud_probability(p_fraud: f64) -> Self {
        let p_fraud = if p_fraud.is_finite() {
            p_fraud.clamp(0.0, 1.0)
        } else {
            0.5
        };
        let is_fraud = p_fraud > 0.5;
        let confidence = if is_fraud { p_fraud } else { 1.0 - p_fraud };

        Self {
            is_fraud,
            confidence: round4(confidence),
        }
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// One feature's contribution to a local explanation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplanationEntry {
    /// Model feature name
    pub feature_name: String,
    /// Discretized condition the weight applies to, e.g. `aon <= 246.00`
    pub condition: String,
    /// Signed weight; positive increases fraud risk
    pub weight: f64,
}

impl ExplanationEntry {
    pub fn increases_risk(&self) -> bool {
        self.weight > 0.0
    }

    /// Human-readable direction of the contribution
    pub fn direction(&self) -> &'static str {
        if self.increases_risk() {
            "Increases fraud risk"
        } else {
            "Decreases fraud risk"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_fraud() {
        let verdict = Verdict::from_fraud_probability(0.87654);
        assert!(verdict.is_fraud);
        assert_eq!(verdict.confidence, 0.8765);
    }

    #[test]
    fn test_verdict_not_fraud_reports_own_class() {
        let verdict = Verdict::from_fraud_probability(0.1);
        assert!(!verdict.is_fraud);
        assert_eq!(verdict.confidence, 0.9);
    }

    #[test]
    fn test_verdict_tie_is_not_fraud() {
        let verdict = Verdict::from_fraud_probability(0.5);
        assert!(!verdict.is_fraud);
        assert_eq!(verdict.confidence, 0.5);
    }

    #[test]
    fn test_verdict_nan_is_valid() {
        let verdict = Verdict::from_fraud_probability(f64::NAN);
        assert!((0.0..=1.0).contains(&verdict.confidence));
    }

    #[test]
    fn test_entry_direction_follows_weight_sign() {
        let mut entry = ExplanationEntry {
            feature_name: "aon".to_string(),
            condition: "aon <= 246.00".to_string(),
            weight: 0.12,
        };
        assert!(entry.increases_risk());
        assert_eq!(entry.direction(), "Increases fraud risk");

        entry.weight = -0.3;
        assert!(!entry.increases_risk());
        assert_eq!(entry.direction(), "Decreases fraud risk");

        entry.weight = 0.0;
        assert_eq!(entry.direction(), "Decreases fraud risk");
    }
}
