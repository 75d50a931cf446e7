//! The frozen scale-then-classify unit shared by scoring and explanation

use crate::error::{BuildError, InputShapeError};
use crate::models::gbdt::GradientBoostingClassifier;
use crate::models::scaler::StandardScaler;
use crate::types::transaction::{FeatureVector, FEATURE_COUNT, FEATURE_NAMES};
use crate::types::verdict::Verdict;
use ndarray::{Array1, ArrayView2};

/// Anything that maps a raw (unscaled) feature row to a fraud probability.
pub trait ProbabilityModel: Send + Sync {
    /// Probability of the fraud class for one raw row.
    fn fraud_probability(&self, row: &[f64]) -> Result<f64, InputShapeError>;

    /// Fraud probability for every row.
    fn fraud_probabilities(&self, rows: ArrayView2<f64>) -> Result<Array1<f64>, InputShapeError> {
        rows.outer_iter()
            .map(|row| match row.as_slice() {
                Some(slice) => self.fraud_probability(slice),
                None => self.fraud_probability(&row.to_vec()),
            })
            .collect()
    }
}

/// Frozen scaler plus classifier over [`FEATURE_NAMES`]. Immutable after
/// construction.
#[derive(Debug, Clone)]
pub struct ScaledModel {
    scaler: StandardScaler,
    classifier: GradientBoostingClassifier,
}

impl ScaledModel {
    /// Both parts must have been fit on exactly [`FEATURE_COUNT`] columns.
    pub fn new(
        scaler: StandardScaler,
        classifier: GradientBoostingClassifier,
    ) -> Result<Self, BuildError> {
        if scaler.n_features() != FEATURE_COUNT || classifier.n_features() != FEATURE_COUNT {
            return Err(BuildError::Training(format!(
                "scaler has {} features and classifier {}, expected {}",
                scaler.n_features(),
                classifier.n_features(),
                FEATURE_COUNT
            )));
        }
        Ok(Self { scaler, classifier })
    }

    /// `[P(not fraud), P(fraud)]` for a validated transaction.
    pub fn predict_proba(&self, vector: &FeatureVector) -> [f64; 2] {
        let p = self.probability(vector.as_slice());
        [1.0 - p, p]
    }

    /// Verdict for a validated transaction.
    pub fn verdict(&self, vector: &FeatureVector) -> Verdict {
        Verdict::from_fraud_probability(self.probability(vector.as_slice()))
    }

    pub fn scaler(&self) -> &StandardScaler {
        &self.scaler
    }

    pub fn classifier(&self) -> &GradientBoostingClassifier {
        &self.classifier
    }

    pub fn feature_names(&self) -> &'static [&'static str] {
        &FEATURE_NAMES
    }

    /// Arity was checked in `new`.
    fn probability(&self, row: &[f64]) -> f64 {
        let scaled = self.scaler.transform_row_unchecked(row);
        self.classifier.predict_proba_unchecked(&scaled)
    }
}

impl ProbabilityModel for ScaledModel {
    fn fraud_probability(&self, row: &[f64]) -> Result<f64, InputShapeError> {
        if row.len() != FEATURE_COUNT {
            return Err(InputShapeError::Arity {
                expected: FEATURE_COUNT,
                found: row.len(),
            });
        }
        Ok(self.probability(row))
    }
}
