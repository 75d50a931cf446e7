//! Scoring service: verdicts and local explanations over the frozen model.
//!
//! The service holds only shared, read-only artifacts, so it is cheap to
//! clone and safe to call from any number of tasks at once.

use crate::error::ScoringError;
use crate::models::builder::BuiltModel;
use crate::models::explainer::{ExplainerInstabilityWarning, Explanation, LimeExplainer};
use crate::models::inference::ScaledModel;
use crate::types::transaction::FeatureVector;
use crate::types::verdict::{ExplanationEntry, Verdict};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Default number of contributions returned by `explain`.
pub const DEFAULT_TOP_K: usize = 10;

#[derive(Debug, Clone)]
pub struct ScoringService {
    model: Arc<ScaledModel>,
    explainer: Arc<LimeExplainer>,
}

impl ScoringService {
    pub fn new(model: Arc<ScaledModel>, explainer: Arc<LimeExplainer>) -> Self {
        Self { model, explainer }
    }

    pub fn from_built(built: &BuiltModel) -> Self {
        Self::new(built.model.clone(), built.explainer.clone())
    }

    pub fn model(&self) -> &ScaledModel {
        &self.model
    }

    /// Classify a validated transaction.
    pub fn score(&self, vector: &FeatureVector) -> Verdict {
        self.model.verdict(vector)
    }

    /// Classify a JSON request keyed by feature name.
    pub fn score_json(&self, request: &Value) -> Result<Verdict, ScoringError> {
        let vector = FeatureVector::from_json(request)?;
        Ok(self.score(&vector))
    }

    /// Top `top_k` feature contributions toward the fraud class, largest
    /// magnitude first.
    pub fn explain(
        &self,
        vector: &FeatureVector,
        top_k: usize,
    ) -> Result<Vec<ExplanationEntry>, ScoringError> {
        Ok(self.explain_detailed(vector, top_k)?.entries)
    }

    /// Explanation with surrogate diagnostics.
    pub fn explain_detailed(
        &self,
        vector: &FeatureVector,
        top_k: usize,
    ) -> Result<Explanation, ScoringError> {
        let explanation = self.explainer.explain(vector, top_k)?;
        debug!(
            top_k,
            surrogate_score = explanation.score,
            model_prediction = explanation.model_prediction,
            "Explanation generated"
        );
        Ok(explanation)
    }

    /// Explain a JSON request keyed by feature name.
    pub fn explain_json(
        &self,
        request: &Value,
        top_k: usize,
    ) -> Result<Vec<ExplanationEntry>, ScoringError> {
        let vector = FeatureVector::from_json(request)?;
        self.explain(&vector, top_k)
    }

    /// Explain repeatedly and report disagreement between runs.
    pub fn explain_checked(
        &self,
        vector: &FeatureVector,
        top_k: usize,
        runs: usize,
        tolerance: f64,
    ) -> Result<(Vec<ExplanationEntry>, Option<ExplainerInstabilityWarning>), ScoringError> {
        let (explanation, warning) =
            self.explainer
                .explain_with_stability(vector, top_k, runs, tolerance)?;
        Ok((explanation.entries, warning))
    }

    /// Explain on a blocking worker, giving up after `timeout`.
    ///
    /// The worker is not interrupted on timeout; its result is discarded.
    pub async fn explain_with_timeout(
        &self,
        vector: FeatureVector,
        top_k: usize,
        timeout: Duration,
    ) -> Result<Vec<ExplanationEntry>, ScoringError> {
        self.explain_within(vector, top_k, Some(timeout)).await
    }

    /// Explain on a blocking worker, bounded by `timeout` when one is given.
    pub async fn explain_within(
        &self,
        vector: FeatureVector,
        top_k: usize,
        timeout: Option<Duration>,
    ) -> Result<Vec<ExplanationEntry>, ScoringError> {
        self.run_blocking(timeout, move |service| service.explain(&vector, top_k))
            .await
    }

    /// [`Self::explain_checked`] on a blocking worker; the deadline covers
    /// every run.
    pub async fn explain_checked_within(
        &self,
        vector: FeatureVector,
        top_k: usize,
        runs: usize,
        tolerance: f64,
        timeout: Option<Duration>,
    ) -> Result<(Vec<ExplanationEntry>, Option<ExplainerInstabilityWarning>), ScoringError> {
        self.run_blocking(timeout, move |service| {
            service.explain_checked(&vector, top_k, runs, tolerance)
        })
        .await
    }

    async fn run_blocking<T, F>(&self, timeout: Option<Duration>, work: F) -> Result<T, ScoringError>
    where
        T: Send + 'static,
        F: FnOnce(&ScoringService) -> Result<T, ScoringError> + Send + 'static,
    {
        let service = self.clone();
        let task = tokio::task::spawn_blocking(move || work(&service));

        let joined = match timeout {
            Some(limit) => match tokio::time::timeout(limit, task).await {
                Ok(joined) => joined,
                Err(_) => return Err(ScoringError::Timeout(limit)),
            },
            None => task.await,
        };
        joined.map_err(|e| ScoringError::Worker(e.to_string()))?
    }
}
