//! Model builder: corpus preparation, rebalancing, scaling, boosting and
//! explainer construction, run once before any scoring.

use crate::config::AppConfig;
use crate::dataset::{Corpus, Dataset};
use crate::error::BuildError;
use crate::models::explainer::{ExplainerParams, LimeExplainer};
use crate::models::gbdt::{BoostingParams, GradientBoostingClassifier};
use crate::models::inference::{ProbabilityModel, ScaledModel};
use crate::models::scaler::StandardScaler;
use crate::models::smote::Smote;
use crate::types::transaction::FEATURE_NAMES;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

/// Everything a successful build produces.
#[derive(Debug)]
pub struct BuiltModel {
    /// Frozen scale-then-classify unit
    pub model: Arc<ScaledModel>,
    /// Explainer bound to `model` and the rebalanced distribution
    pub explainer: Arc<LimeExplainer>,
    /// Imputed corpus before rebalancing (the replay source)
    pub corpus: Corpus,
    /// Rebalanced, unscaled training data
    pub resampled: Corpus,
    pub report: BuildReport,
}

/// Summary of a build
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub original_rows: usize,
    pub resampled_rows: usize,
    /// `(not fraud, fraud)` before rebalancing
    pub class_counts_before: (usize, usize),
    /// `(not fraud, fraud)` after rebalancing
    pub class_counts_after: (usize, usize),
    pub n_trees: usize,
    pub elapsed: Duration,
}

/// Builds the scoring artifacts from a raw dataset
#[derive(Debug, Clone)]
pub struct ModelBuilder {
    label_column: String,
    k_neighbors: usize,
    resample_seed: u64,
    boosting: BoostingParams,
    explainer: ExplainerParams,
}

impl ModelBuilder {
    /// Create a builder from configuration
    pub fn new(config: &AppConfig) -> Self {
        Self {
            label_column: config.dataset.label_column.clone(),
            k_neighbors: config.resampling.k_neighbors,
            resample_seed: config.resampling.seed,
            boosting: config.model.boosting_params(),
            explainer: config.explainer.explainer_params(),
        }
    }

    /// Override the label column name
    pub fn with_label_column(mut self, label_column: &str) -> Self {
        self.label_column = label_column.to_string();
        self
    }

    /// Override the boosting parameters
    pub fn with_boosting(mut self, boosting: BoostingParams) -> Self {
        self.boosting = boosting;
        self
    }

    /// Override the explainer parameters
    pub fn with_explainer(mut self, explainer: ExplainerParams) -> Self {
        self.explainer = explainer;
        self
    }

    /// Run the full build. Any failure aborts with no partial model.
    pub fn build(&self, dataset: &Dataset) -> Result<BuiltModel, BuildError> {
        let started = Instant::now();

        let corpus = Corpus::from_dataset(dataset, &self.label_column)?;
        let class_counts_before = corpus.class_counts();
        info!(
            rows = corpus.len(),
            legit = class_counts_before.0,
            fraud = class_counts_before.1,
            "Corpus validated"
        );

        let (features, labels) = Smote::new(self.k_neighbors, self.resample_seed)
            .fit_resample(corpus.features(), corpus.labels())?;
        let resampled = Corpus::new(features, labels)?;
        let class_counts_after = resampled.class_counts();
        info!(
            rows = resampled.len(),
            per_class = class_counts_after.0,
            "Classes rebalanced"
        );

        let scaler = StandardScaler::fit(resampled.features());
        let scaled = scaler
            .transform(resampled.features())
            .map_err(|e| BuildError::Training(format!("scaling training data: {}", e)))?;

        info!(
            trees = self.boosting.n_estimators,
            max_depth = self.boosting.max_depth,
            "Training gradient boosting classifier"
        );
        let classifier =
            GradientBoostingClassifier::fit(&scaled, resampled.labels(), &self.boosting)?;
        let n_trees = classifier.n_trees();
        let model = Arc::new(ScaledModel::new(scaler, classifier)?);

        let bound: Arc<dyn ProbabilityModel> = model.clone();
        let explainer = Arc::new(LimeExplainer::fit(
            resampled.features(),
            &FEATURE_NAMES,
            bound,
            self.explainer.clone(),
        )?);

        let report = BuildReport {
            original_rows: corpus.len(),
            resampled_rows: resampled.len(),
            class_counts_before,
            class_counts_after,
            n_trees,
            elapsed: started.elapsed(),
        };
        info!(
            elapsed_ms = report.elapsed.as_millis() as u64,
            trees = n_trees,
            "Model training and explainer setup complete"
        );

        Ok(BuiltModel {
            model,
            explainer,
            corpus,
            resampled,
            report,
        })
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// Label plus all model features; feature 0 carries `signal`.
    pub(crate) fn tiny_dataset(rows: &[(bool, f64)]) -> Dataset {
        let mut headers = vec!["label".to_string()];
        headers.extend(FEATURE_NAMES.iter().map(|n| n.to_string()));
        let records = rows
            .iter()
            .enumerate()
            .map(|(i, &(fraud, signal))| {
                let mut row = vec![if fraud { "1" } else { "0" }.to_string()];
                for j in 0..FEATURE_NAMES.len() {
                    let v = if j == 0 { signal } else { ((i + j) % 4) as f64 };
                    row.push(v.to_string());
                }
                row
            })
            .collect();
        Dataset::from_records(headers, records)
    }

    /// 40 rows, the first 6 fraud with a large first feature.
    pub(crate) fn skewed_rows() -> Vec<(bool, f64)> {
        (0..40)
            .map(|i| (i < 6, if i < 6 { 100.0 + i as f64 } else { i as f64 }))
            .collect()
    }

    pub(crate) fn quick_builder() -> ModelBuilder {
        ModelBuilder::new(&AppConfig::default())
            .with_boosting(BoostingParams {
                n_estimators: 10,
                max_depth: 3,
                ..BoostingParams::default()
            })
            .with_explainer(ExplainerParams {
                num_samples: 200,
                kernel_width: None,
                seed: Some(1),
            })
    }
}
