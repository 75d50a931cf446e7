//! Local explanations (LIME) for tabular fraud scores.
//!
//! Each feature is discretized into quartile bins of the training data. To
//! explain one transaction the explainer draws perturbed neighbours by
//! resampling every feature's bin from its training frequency and then a
//! value inside that bin, scores the neighbours with the bound model, and
//! fits a kernel-weighted ridge surrogate on "same bin as the instance"
//! indicators. Surrogate coefficients are the feature contributions.

use crate::error::{BuildError, InputShapeError};
use crate::models::inference::ProbabilityModel;
use crate::models::ridge::{self, RidgeFit};
use crate::types::transaction::FeatureVector;
use crate::types::verdict::ExplanationEntry;
use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use statrs::distribution::{ContinuousCDF, Normal};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Features at or below this count are chosen by forward selection; above
/// it by the largest coefficients of a full ridge fit.
const FORWARD_SELECTION_LIMIT: usize = 6;
const SELECTION_ALPHA: f64 = 0.01;
const SURROGATE_ALPHA: f64 = 1.0;
const STD_FLOOR: f64 = 1e-11;

/// Explainer settings
#[derive(Debug, Clone, PartialEq)]
pub struct ExplainerParams {
    /// Perturbed neighbours per explanation (including the instance itself)
    pub num_samples: usize,
    /// Kernel width; defaults to `0.75 * sqrt(n_features)`
    pub kernel_width: Option<f64>,
    /// Fixed seed makes every explanation of the same input identical
    pub seed: Option<u64>,
}

impl Default for ExplainerParams {
    fn default() -> Self {
        Self {
            num_samples: 5000,
            kernel_width: None,
            seed: None,
        }
    }
}

/// Full result of one explanation.
#[derive(Debug, Clone, Serialize)]
pub struct Explanation {
    /// Top contributions ordered by absolute weight, largest first
    pub entries: Vec<ExplanationEntry>,
    /// Surrogate intercept
    pub intercept: f64,
    /// Weighted R² of the surrogate on the neighbourhood
    pub score: f64,
    /// Surrogate prediction for the instance
    pub local_prediction: f64,
    /// Model fraud probability for the instance
    pub model_prediction: f64,
}

/// Repeated explanations of the same input disagreed beyond the tolerance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExplainerInstabilityWarning {
    pub runs: usize,
    pub tolerance: f64,
    pub max_deviation: f64,
    pub unstable_features: Vec<String>,
}

impl fmt::Display for ExplainerInstabilityWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "explanation weights varied by up to {:.4} across {} runs (tolerance {:.4}): {}",
            self.max_deviation,
            self.runs,
            self.tolerance,
            self.unstable_features.join(", ")
        )
    }
}

/// Quartile bins with per-bin statistics of the training data.
#[derive(Debug, Clone)]
struct QuartileDiscretizer {
    cuts: Vec<Vec<f64>>,
    means: Vec<Vec<f64>>,
    stds: Vec<Vec<f64>>,
    mins: Vec<Vec<f64>>,
    maxs: Vec<Vec<f64>>,
    conditions: Vec<Vec<String>>,
    frequencies: Vec<Vec<f64>>,
    standard: Normal,
}

fn percentile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

impl QuartileDiscretizer {
    fn fit(data: &Array2<f64>, names: &[String], standard: Normal) -> Self {
        let n_features = data.ncols();
        let mut out = Self {
            cuts: Vec::with_capacity(n_features),
            means: Vec::with_capacity(n_features),
            stds: Vec::with_capacity(n_features),
            mins: Vec::with_capacity(n_features),
            maxs: Vec::with_capacity(n_features),
            conditions: Vec::with_capacity(n_features),
            frequencies: Vec::with_capacity(n_features),
            standard,
        };

        for (f, col) in data.columns().into_iter().enumerate() {
            let mut sorted: Vec<f64> = col.iter().copied().collect();
            sorted.sort_by(f64::total_cmp);

            let mut cuts: Vec<f64> = [0.25, 0.5, 0.75]
                .iter()
                .map(|&q| percentile(&sorted, q))
                .collect();
            cuts.dedup();
            let n_bins = cuts.len() + 1;

            let mut sums = vec![0.0; n_bins];
            let mut sq_sums = vec![0.0; n_bins];
            let mut counts = vec![0usize; n_bins];
            for &v in col.iter() {
                let b = cuts.partition_point(|&c| c < v);
                sums[b] += v;
                sq_sums[b] += v * v;
                counts[b] += 1;
            }

            let mut means = Vec::with_capacity(n_bins);
            let mut stds = Vec::with_capacity(n_bins);
            for b in 0..n_bins {
                if counts[b] == 0 {
                    means.push(0.0);
                    stds.push(STD_FLOOR);
                } else {
                    let n = counts[b] as f64;
                    let mean = sums[b] / n;
                    let var = (sq_sums[b] / n - mean * mean).max(0.0);
                    means.push(mean);
                    stds.push(var.sqrt() + STD_FLOOR);
                }
            }

            let lo = sorted.first().copied().unwrap_or_default();
            let hi = sorted.last().copied().unwrap_or_default();
            let mut mins = vec![lo];
            mins.extend_from_slice(&cuts);
            let mut maxs = cuts.clone();
            maxs.push(hi);

            let name = &names[f];
            let last = cuts.len();
            let conditions = (0..n_bins)
                .map(|b| {
                    if last == 0 {
                        name.clone()
                    } else if b == 0 {
                        format!("{} <= {:.2}", name, cuts[0])
                    } else if b == last {
                        format!("{} > {:.2}", name, cuts[last - 1])
                    } else {
                        format!("{:.2} < {} <= {:.2}", cuts[b - 1], name, cuts[b])
                    }
                })
                .collect();

            let total = col.len().max(1) as f64;
            let frequencies = counts.iter().map(|&c| c as f64 / total).collect();

            out.cuts.push(cuts);
            out.means.push(means);
            out.stds.push(stds);
            out.mins.push(mins);
            out.maxs.push(maxs);
            out.conditions.push(conditions);
            out.frequencies.push(frequencies);
        }
        out
    }

    fn bin(&self, feature: usize, value: f64) -> usize {
        self.cuts[feature].partition_point(|&c| c < value)
    }

    /// Draw a value inside `bin` from a normal truncated to the bin bounds,
    /// by inverting the CDF over the bin's probability mass.
    fn sample_value<R: Rng>(&self, feature: usize, bin: usize, rng: &mut R) -> f64 {
        let mean = self.means[feature][bin];
        let std = self.stds[feature][bin];
        let lo = self.mins[feature][bin];
        let hi = self.maxs[feature][bin];

        if hi <= lo {
            return lo;
        }
        let a = (lo - mean) / std;
        let b = (hi - mean) / std;
        // Work in the lower tail, where the CDF keeps its precision.
        let (a, b, sign) = if a > 0.0 { (-b, -a, -1.0) } else { (a, b, 1.0) };

        let pa = self.standard.cdf(a);
        let pb = self.standard.cdf(b);
        let z = if pb > pa {
            let u: f64 = rng.gen();
            self.standard.inverse_cdf(pa + u * (pb - pa)).clamp(a, b)
        } else {
            // No representable mass between the bounds: take the one nearest the mean.
            b
        };
        (mean + sign * z * std).clamp(lo, hi)
    }
}

/// LIME explainer bound to a training distribution and a scoring model.
pub struct LimeExplainer {
    model: Arc<dyn ProbabilityModel>,
    feature_names: Vec<String>,
    discretizer: QuartileDiscretizer,
    bin_samplers: Vec<WeightedIndex<f64>>,
    params: ExplainerParams,
}

impl fmt::Debug for LimeExplainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LimeExplainer")
            .field("feature_names", &self.feature_names)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl LimeExplainer {
    /// Bind to unscaled training rows, their feature names and the model.
    pub fn fit<S: AsRef<str>>(
        training: &Array2<f64>,
        feature_names: &[S],
        model: Arc<dyn ProbabilityModel>,
        params: ExplainerParams,
    ) -> Result<Self, BuildError> {
        if training.nrows() == 0 {
            return Err(BuildError::Training(
                "explainer needs at least one training row".to_string(),
            ));
        }
        if training.ncols() != feature_names.len() {
            return Err(BuildError::Training(format!(
                "explainer got {} columns for {} feature names",
                training.ncols(),
                feature_names.len()
            )));
        }

        let feature_names: Vec<String> =
            feature_names.iter().map(|n| n.as_ref().to_string()).collect();
        let standard = Normal::new(0.0, 1.0)
            .map_err(|e| BuildError::Training(format!("standard normal: {}", e)))?;
        let discretizer = QuartileDiscretizer::fit(training, &feature_names, standard);
        let bin_samplers = discretizer
            .frequencies
            .iter()
            .zip(&feature_names)
            .map(|(freqs, name)| {
                WeightedIndex::new(freqs).map_err(|e| {
                    BuildError::Training(format!("bin frequencies for `{}`: {}", name, e))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            features = feature_names.len(),
            rows = training.nrows(),
            num_samples = params.num_samples,
            seeded = params.seed.is_some(),
            "Explainer fitted"
        );

        Ok(Self {
            model,
            feature_names,
            discretizer,
            bin_samplers,
            params,
        })
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn params(&self) -> &ExplainerParams {
        &self.params
    }

    fn rng(&self) -> StdRng {
        match self.params.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }

    fn kernel_width(&self) -> f64 {
        self.params
            .kernel_width
            .unwrap_or_else(|| 0.75 * (self.feature_names.len() as f64).sqrt())
    }

    /// Explain a validated transaction.
    pub fn explain(
        &self,
        vector: &FeatureVector,
        top_k: usize,
    ) -> Result<Explanation, InputShapeError> {
        self.explain_row(vector.as_slice(), top_k)
    }

    /// Explain a raw row in feature order.
    pub fn explain_row(&self, row: &[f64], top_k: usize) -> Result<Explanation, InputShapeError> {
        if row.len() != self.feature_names.len() {
            return Err(InputShapeError::Arity {
                expected: self.feature_names.len(),
                found: row.len(),
            });
        }
        let mut rng = self.rng();
        let d = row.len();
        let n = self.params.num_samples.max(2);

        let first_bins: Vec<usize> = row
            .iter()
            .enumerate()
            .map(|(f, &v)| self.discretizer.bin(f, v))
            .collect();

        // `data` holds "same bin as the instance" indicators, `inverse` the
        // perturbed raw values the model actually scores.
        let mut data = Array2::<f64>::ones((n, d));
        let mut inverse = Array2::<f64>::zeros((n, d));
        inverse.row_mut(0).assign(&ArrayView1::from(row));
        for i in 1..n {
            for f in 0..d {
                let bin = self.bin_samplers[f].sample(&mut rng);
                data[[i, f]] = if bin == first_bins[f] { 1.0 } else { 0.0 };
                inverse[[i, f]] = self.discretizer.sample_value(f, bin, &mut rng);
            }
        }

        let width = self.kernel_width();
        let weights: Array1<f64> = data
            .outer_iter()
            .map(|r| {
                let dist_sq = r.iter().filter(|&&v| v == 0.0).count() as f64;
                (-dist_sq / (width * width)).exp().sqrt()
            })
            .collect();
        let labels = self.model.fraud_probabilities(inverse.view())?;
        let model_prediction = labels[0];

        if top_k == 0 {
            return Ok(Explanation {
                entries: Vec::new(),
                intercept: model_prediction,
                score: 0.0,
                local_prediction: model_prediction,
                model_prediction,
            });
        }

        let used = if top_k >= d {
            (0..d).collect()
        } else if top_k <= FORWARD_SELECTION_LIMIT {
            forward_selection(&data, &labels, &weights, top_k)
        } else {
            highest_weights(&data, &labels, &weights, top_k)
        };

        let selected = data.select(Axis(1), &used);
        let fit = ridge::fit_weighted(selected.view(), labels.view(), weights.view(), SURROGATE_ALPHA);
        let score = fit.score(selected.view(), labels.view(), weights.view());
        let local_prediction = fit.predict(selected.row(0));

        let mut entries: Vec<ExplanationEntry> = used
            .iter()
            .zip(fit.coef.iter())
            .map(|(&f, &w)| ExplanationEntry {
                feature_name: self.feature_names[f].clone(),
                condition: self.discretizer.conditions[f][first_bins[f]].clone(),
                weight: w,
            })
            .collect();
        entries.sort_by(|a, b| b.weight.abs().total_cmp(&a.weight.abs()));
        entries.truncate(top_k);

        Ok(Explanation {
            entries,
            intercept: fit.intercept,
            score,
            local_prediction,
            model_prediction,
        })
    }

    /// Explain `runs` times and compare weights. Returns the first
    /// explanation and a warning when any feature's weight range exceeds
    /// `tolerance`.
    pub fn explain_with_stability(
        &self,
        vector: &FeatureVector,
        top_k: usize,
        runs: usize,
        tolerance: f64,
    ) -> Result<(Explanation, Option<ExplainerInstabilityWarning>), InputShapeError> {
        let runs = runs.max(2);
        let mut explanations = Vec::with_capacity(runs);
        for _ in 0..runs {
            explanations.push(self.explain(vector, top_k)?);
        }

        // A feature missing from a run contributed weight 0 in that run.
        let mut ranges: BTreeMap<&str, (f64, f64)> = BTreeMap::new();
        for explanation in &explanations {
            for entry in &explanation.entries {
                ranges.insert(entry.feature_name.as_str(), (f64::INFINITY, f64::NEG_INFINITY));
            }
        }
        for explanation in &explanations {
            for (name, range) in ranges.iter_mut() {
                let weight = explanation
                    .entries
                    .iter()
                    .find(|e| e.feature_name == *name)
                    .map_or(0.0, |e| e.weight);
                range.0 = range.0.min(weight);
                range.1 = range.1.max(weight);
            }
        }

        let max_deviation = ranges
            .values()
            .map(|(lo, hi)| hi - lo)
            .fold(0.0, f64::max);
        let unstable_features: Vec<String> = ranges
            .iter()
            .filter(|(_, (lo, hi))| hi - lo > tolerance)
            .map(|(name, _)| name.to_string())
            .collect();

        let warning = if unstable_features.is_empty() {
            None
        } else {
            let warning = ExplainerInstabilityWarning {
                runs,
                tolerance,
                max_deviation,
                unstable_features,
            };
            warn!(%warning, "Unstable explanation");
            Some(warning)
        };

        let first = match explanations.into_iter().next() {
            Some(first) => first,
            None => self.explain(vector, top_k)?,
        };
        Ok((first, warning))
    }
}

fn forward_selection(
    data: &Array2<f64>,
    labels: &Array1<f64>,
    weights: &Array1<f64>,
    k: usize,
) -> Vec<usize> {
    let d = data.ncols();
    let mut used: Vec<usize> = Vec::with_capacity(k);
    for _ in 0..k.min(d) {
        let mut best: Option<(usize, f64)> = None;
        for f in (0..d).filter(|f| !used.contains(f)) {
            let mut cols = used.clone();
            cols.push(f);
            let x = data.select(Axis(1), &cols);
            let fit: RidgeFit = ridge::fit_weighted(x.view(), labels.view(), weights.view(), 0.0);
            let score = fit.score(x.view(), labels.view(), weights.view());
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((f, score));
            }
        }
        match best {
            Some((f, _)) => used.push(f),
            None => break,
        }
    }
    used
}

fn highest_weights(
    data: &Array2<f64>,
    labels: &Array1<f64>,
    weights: &Array1<f64>,
    k: usize,
) -> Vec<usize> {
    let fit = ridge::fit_weighted(data.view(), labels.view(), weights.view(), SELECTION_ALPHA);
    let first = data.row(0);
    let mut ranked: Vec<(usize, f64)> = fit
        .coef
        .iter()
        .zip(first.iter())
        .map(|(&c, &x)| c * x)
        .enumerate()
        .collect();
    ranked.sort_by(|a, b| b.1.abs().total_cmp(&a.1.abs()));
    ranked.into_iter().take(k).map(|(f, _)| f).collect()
}
