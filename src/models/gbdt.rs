//! Gradient-boosted decision trees for binary classification.
//!
//! Trees are grown depth-first on pre-binned features (histogram split
//! finding) and fit Newton steps of the binomial log-loss. Thresholds are
//! stored in feature space, so prediction works on raw rows.

use crate::error::{BuildError, InputShapeError};
use ndarray::{Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::debug;

/// Upper bound on histogram bins per feature (bin ids are stored as `u8`).
pub const MAX_BINS: usize = 256;

const HESSIAN_FLOOR: f64 = 1e-150;
const MIN_SPLIT_GAIN: f64 = 1e-12;

/// Ensemble hyper-parameters
#[derive(Debug, Clone, PartialEq)]
pub struct BoostingParams {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub learning_rate: f64,
    pub min_samples_leaf: usize,
    pub max_bins: usize,
    pub l2_regularization: f64,
    pub seed: u64,
}

impl Default for BoostingParams {
    fn default() -> Self {
        Self {
            n_estimators: 200,
            max_depth: 10,
            learning_rate: 0.1,
            min_samples_leaf: 1,
            max_bins: 255,
            l2_regularization: 0.0,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// A single regression tree over raw feature values.
#[derive(Debug, Clone, PartialEq)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

impl RegressionTree {
    /// Caller guarantees `row` covers every feature the tree splits on.
    pub(crate) fn predict(&self, row: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match self.nodes[idx] {
                Node::Leaf { value } => return value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row[feature] <= threshold { left } else { right };
                }
            }
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], idx: usize) -> usize {
            match nodes[idx] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, left).max(walk(nodes, right)),
            }
        }
        walk(&self.nodes, 0)
    }
}

/// Per-feature bin boundaries. A value falls in bin `b` where `b` is the
/// number of thresholds strictly below it, so `bin <= b` iff
/// `value <= thresholds[b]`.
#[derive(Debug, Clone)]
struct BinMapper {
    thresholds: Vec<Vec<f64>>,
}

impl BinMapper {
    fn fit(data: &Array2<f64>, max_bins: usize) -> Self {
        let max_bins = max_bins.clamp(2, MAX_BINS);
        let thresholds = data
            .columns()
            .into_iter()
            .map(|col| column_thresholds(col, max_bins))
            .collect();
        Self { thresholds }
    }

    fn transform(&self, data: &Array2<f64>) -> Array2<u8> {
        Array2::from_shape_fn(data.dim(), |(i, j)| {
            self.thresholds[j].partition_point(|&t| t < data[[i, j]]) as u8
        })
    }

    fn n_bins(&self, feature: usize) -> usize {
        self.thresholds[feature].len() + 1
    }
}

fn column_thresholds(col: ArrayView1<f64>, max_bins: usize) -> Vec<f64> {
    let mut sorted: Vec<f64> = col.iter().copied().collect();
    sorted.sort_by(f64::total_cmp);
    let mut distinct = sorted.clone();
    distinct.dedup();

    if distinct.len() <= max_bins {
        return distinct.windows(2).map(|w| (w[0] + w[1]) / 2.0).collect();
    }

    let n = sorted.len();
    let mut cuts: Vec<f64> = (1..max_bins).map(|q| sorted[q * n / max_bins]).collect();
    cuts.dedup();
    // The maximum must land in the last bin, not on a threshold.
    if cuts.last() == sorted.last() {
        cuts.pop();
    }
    cuts
}

#[derive(Debug, Clone, Copy, Default)]
struct HistBin {
    grad: f64,
    hess: f64,
    count: usize,
}

impl HistBin {
    fn add(&mut self, other: &HistBin) {
        self.grad += other.grad;
        self.hess += other.hess;
        self.count += other.count;
    }

    fn sub(&self, other: &HistBin) -> HistBin {
        HistBin {
            grad: self.grad - other.grad,
            hess: self.hess - other.hess,
            count: self.count - other.count,
        }
    }
}

struct SplitCandidate {
    feature: usize,
    bin: usize,
    gain: f64,
}

/// Grows one tree on gradients/hessians of the current ensemble.
struct TreeGrower<'a> {
    binned: &'a Array2<u8>,
    mapper: &'a BinMapper,
    grad: &'a [f64],
    hess: &'a [f64],
    params: &'a BoostingParams,
    feature_order: Vec<usize>,
    nodes: Vec<Node>,
    leaf_outputs: &'a mut [f64],
}

impl<'a> TreeGrower<'a> {
    fn histogram(&self, indices: &[usize]) -> Vec<HistBin> {
        let n_features = self.binned.ncols();
        let mut hist = vec![HistBin::default(); n_features * MAX_BINS];
        for &i in indices {
            let row = self.binned.row(i);
            let (g, h) = (self.grad[i], self.hess[i]);
            for (f, &b) in row.iter().enumerate() {
                let bin = &mut hist[f * MAX_BINS + b as usize];
                bin.grad += g;
                bin.hess += h;
                bin.count += 1;
            }
        }
        hist
    }

    fn leaf_score(&self, grad: f64, hess: f64) -> f64 {
        let denom = hess + self.params.l2_regularization;
        if denom <= HESSIAN_FLOOR {
            0.0
        } else {
            grad * grad / denom
        }
    }

    fn leaf_value(&self, grad: f64, hess: f64) -> f64 {
        let denom = hess + self.params.l2_regularization;
        if denom <= HESSIAN_FLOOR {
            0.0
        } else {
            grad / denom
        }
    }

    fn best_split(&self, hist: &[HistBin], total: &HistBin) -> Option<SplitCandidate> {
        let parent = self.leaf_score(total.grad, total.hess);
        let min_leaf = self.params.min_samples_leaf.max(1);
        let mut best: Option<SplitCandidate> = None;

        for &f in &self.feature_order {
            let n_bins = self.mapper.n_bins(f);
            let bins = &hist[f * MAX_BINS..f * MAX_BINS + n_bins];
            let mut left = HistBin::default();
            for (b, bin) in bins.iter().enumerate().take(n_bins - 1) {
                left.add(bin);
                if left.count < min_leaf {
                    continue;
                }
                let right = total.sub(&left);
                if right.count < min_leaf {
                    break;
                }
                let gain = self.leaf_score(left.grad, left.hess)
                    + self.leaf_score(right.grad, right.hess)
                    - parent;
                if gain > MIN_SPLIT_GAIN && best.as_ref().map_or(true, |s| gain > s.gain) {
                    best = Some(SplitCandidate {
                        feature: f,
                        bin: b,
                        gain,
                    });
                }
            }
        }
        best
    }

    fn make_leaf(&mut self, indices: &[usize], total: &HistBin) -> usize {
        let value = self.leaf_value(total.grad, total.hess);
        for &i in indices {
            self.leaf_outputs[i] = value;
        }
        self.nodes.push(Node::Leaf { value });
        self.nodes.len() - 1
    }

    fn grow(&mut self, indices: &mut [usize], hist: Vec<HistBin>, depth: usize) -> usize {
        // Every row lands in exactly one bin of feature 0.
        let mut total = HistBin::default();
        for bin in &hist[..self.mapper.n_bins(0)] {
            total.add(bin);
        }

        let min_leaf = self.params.min_samples_leaf.max(1);
        if depth >= self.params.max_depth || indices.len() < 2 * min_leaf {
            return self.make_leaf(indices, &total);
        }
        let Some(split) = self.best_split(&hist, &total) else {
            return self.make_leaf(indices, &total);
        };

        let feature = split.feature;
        let bin = split.bin as u8;
        let mid = partition(indices, |i| self.binned[[i, feature]] <= bin);
        let (left_idx, right_idx) = indices.split_at_mut(mid);

        let (left_hist, right_hist) = if left_idx.len() <= right_idx.len() {
            let small = self.histogram(left_idx);
            let large = subtract(&hist, &small);
            (small, large)
        } else {
            let small = self.histogram(right_idx);
            let large = subtract(&hist, &small);
            (large, small)
        };
        drop(hist);

        let node = self.nodes.len();
        self.nodes.push(Node::Split {
            feature,
            threshold: self.mapper.thresholds[feature][split.bin],
            left: 0,
            right: 0,
        });
        let left = self.grow(left_idx, left_hist, depth + 1);
        let right = self.grow(right_idx, right_hist, depth + 1);
        if let Node::Split {
            left: l, right: r, ..
        } = &mut self.nodes[node]
        {
            *l = left;
            *r = right;
        }
        node
    }
}

fn subtract(parent: &[HistBin], child: &[HistBin]) -> Vec<HistBin> {
    parent.iter().zip(child).map(|(p, c)| p.sub(c)).collect()
}

/// Reorder so rows matching `pred` come first; returns their count.
fn partition(indices: &mut [usize], pred: impl Fn(usize) -> bool) -> usize {
    let mut mid = 0;
    for j in 0..indices.len() {
        if pred(indices[j]) {
            indices.swap(mid, j);
            mid += 1;
        }
    }
    mid
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Boosted tree ensemble predicting the probability of the positive class.
#[derive(Debug, Clone)]
pub struct GradientBoostingClassifier {
    init_score: f64,
    learning_rate: f64,
    trees: Vec<RegressionTree>,
    n_features: usize,
}

impl GradientBoostingClassifier {
    /// Fit on rows of `features` with boolean `labels`.
    pub fn fit(
        features: &Array2<f64>,
        labels: &[bool],
        params: &BoostingParams,
    ) -> Result<Self, BuildError> {
        if features.nrows() != labels.len() {
            return Err(BuildError::Training(format!(
                "{} feature rows but {} labels",
                features.nrows(),
                labels.len()
            )));
        }
        if labels.is_empty() {
            return Err(BuildError::Training("no training rows".to_string()));
        }
        let n = labels.len();
        let y: Vec<f64> = labels.iter().map(|&l| if l { 1.0 } else { 0.0 }).collect();

        let prior = (y.iter().sum::<f64>() / n.max(1) as f64).clamp(1e-15, 1.0 - 1e-15);
        let init_score = (prior / (1.0 - prior)).ln();

        let mapper = BinMapper::fit(features, params.max_bins);
        let binned = mapper.transform(features);
        let mut rng = StdRng::seed_from_u64(params.seed);

        let mut raw = vec![init_score; n];
        let mut grad = vec![0.0; n];
        let mut hess = vec![0.0; n];
        let mut leaf_outputs = vec![0.0; n];
        let mut trees = Vec::with_capacity(params.n_estimators);

        for round in 0..params.n_estimators {
            for i in 0..n {
                let p = sigmoid(raw[i]);
                grad[i] = y[i] - p;
                hess[i] = p * (1.0 - p);
            }

            let mut feature_order: Vec<usize> = (0..features.ncols()).collect();
            feature_order.shuffle(&mut rng);

            let mut indices: Vec<usize> = (0..n).collect();
            let mut grower = TreeGrower {
                binned: &binned,
                mapper: &mapper,
                grad: &grad,
                hess: &hess,
                params,
                feature_order,
                nodes: Vec::new(),
                leaf_outputs: &mut leaf_outputs,
            };
            let root_hist = grower.histogram(&indices);
            grower.grow(&mut indices, root_hist, 0);
            let tree = RegressionTree {
                nodes: grower.nodes,
            };

            for i in 0..n {
                raw[i] += params.learning_rate * leaf_outputs[i];
            }

            if (round + 1) % 50 == 0 {
                debug!(
                    trees = round + 1,
                    log_loss = log_loss(&raw, &y),
                    nodes = tree.node_count(),
                    "Boosting progress"
                );
            }
            trees.push(tree);
        }

        Ok(Self {
            init_score,
            learning_rate: params.learning_rate,
            trees,
            n_features: features.ncols(),
        })
    }

    /// Probability that `row` belongs to the positive class.
    pub fn predict_proba(&self, row: &[f64]) -> Result<f64, InputShapeError> {
        if row.len() != self.n_features {
            return Err(InputShapeError::Arity {
                expected: self.n_features,
                found: row.len(),
            });
        }
        Ok(self.predict_proba_unchecked(row))
    }

    /// Caller guarantees `row.len() == self.n_features()`.
    pub(crate) fn predict_proba_unchecked(&self, row: &[f64]) -> f64 {
        let raw = self.init_score
            + self.learning_rate * self.trees.iter().map(|t| t.predict(row)).sum::<f64>();
        sigmoid(raw)
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn trees(&self) -> &[RegressionTree] {
        &self.trees
    }
}

fn log_loss(raw: &[f64], y: &[f64]) -> f64 {
    let n = raw.len().max(1) as f64;
    raw.iter()
        .zip(y)
        .map(|(&r, &t)| {
            let p = sigmoid(r).clamp(1e-15, 1.0 - 1e-15);
            -(t * p.ln() + (1.0 - t) * (1.0 - p).ln())
        })
        .sum::<f64>()
        / n
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn small_params() -> BoostingParams {
        BoostingParams {
            n_estimators: 30,
            max_depth: 3,
            ..BoostingParams::default()
        }
    }

    #[test]
    fn test_thresholds_for_few_distinct_values() {
        let col = array![3.0, 1.0, 2.0, 1.0];
        let t = column_thresholds(col.view(), 255);
        assert_eq!(t, vec![1.5, 2.5]);
    }

    #[test]
    fn test_quantile_thresholds_are_bounded() {
        let col = ndarray::Array1::from_iter((0..1000).map(|i| i as f64));
        let t = column_thresholds(col.view(), 16);
        assert!(t.len() < 16);
        assert!(t.windows(2).all(|w| w[0] < w[1]));
        assert!(*t.last().unwrap() < 999.0);
    }

    #[test]
    fn test_binning_respects_thresholds() {
        let data = array![[1.0], [2.0], [3.0]];
        let mapper = BinMapper::fit(&data, 255);
        let binned = mapper.transform(&data);
        assert_eq!(binned.column(0).to_vec(), vec![0, 1, 2]);
    }

    #[test]
    fn test_partition() {
        let mut idx = vec![0, 1, 2, 3, 4, 5];
        let mid = partition(&mut idx, |i| i % 2 == 0);
        assert_eq!(mid, 3);
        assert!(idx[..3].iter().all(|i| i % 2 == 0));
    }

    #[test]
    fn test_learns_threshold_rule() {
        let features = Array2::from_shape_fn((200, 2), |(i, j)| if j == 0 { i as f64 } else { (i % 7) as f64 });
        let labels: Vec<bool> = (0..200).map(|i| i >= 120).collect();
        let model = GradientBoostingClassifier::fit(&features, &labels, &small_params()).unwrap();

        assert_eq!(model.n_trees(), 30);
        assert!(model.predict_proba(&[10.0, 3.0]).unwrap() < 0.1);
        assert!(model.predict_proba(&[180.0, 3.0]).unwrap() > 0.9);
        assert!(model.trees().iter().all(|t| t.depth() <= 3));
    }

    #[test]
    fn test_learns_interaction() {
        // Fraud only when both features are high; needs depth >= 2.
        let features = Array2::from_shape_fn((400, 2), |(i, j)| {
            let bit = if j == 0 { i % 2 } else { (i / 2) % 2 };
            bit as f64 + (i % 10) as f64 * 0.01
        });
        let labels: Vec<bool> = (0..400).map(|i| i % 2 == 1 && (i / 2) % 2 == 1).collect();
        let model = GradientBoostingClassifier::fit(&features, &labels, &small_params()).unwrap();

        assert!(model.predict_proba(&[1.05, 1.05]).unwrap() > 0.5);
        assert!(model.predict_proba(&[1.05, 0.05]).unwrap() < 0.5);
        assert!(model.predict_proba(&[0.05, 1.05]).unwrap() < 0.5);
        assert!(model.predict_proba(&[0.05, 0.05]).unwrap() < 0.5);
    }

    #[test]
    fn test_deterministic_fit() {
        let features = Array2::from_shape_fn((100, 3), |(i, j)| ((i * 7 + j * 13) % 17) as f64);
        let labels: Vec<bool> = (0..100).map(|i| (i * 7) % 17 > 8).collect();
        let a = GradientBoostingClassifier::fit(&features, &labels, &small_params()).unwrap();
        let b = GradientBoostingClassifier::fit(&features, &labels, &small_params()).unwrap();
        assert_eq!(a.trees(), b.trees());
    }

    #[test]
    fn test_shape_mismatches_are_errors() {
        let features = array![[0.0, 1.0], [1.0, 0.0], [2.0, 1.0]];
        let err = GradientBoostingClassifier::fit(&features, &[true, false], &small_params())
            .unwrap_err();
        assert!(matches!(err, BuildError::Training(_)));

        let model =
            GradientBoostingClassifier::fit(&features, &[false, true, true], &small_params())
                .unwrap();
        assert_eq!(
            model.predict_proba(&[1.0; 5]),
            Err(InputShapeError::Arity {
                expected: 2,
                found: 5
            })
        );
        assert!(model.predict_proba(&[1.0]).is_err());
    }

    #[test]
    fn test_probability_is_finite_far_outside_training_range() {
        let features = array![[0.0], [1.0], [2.0], [3.0]];
        let labels = [false, false, true, true];
        let model = GradientBoostingClassifier::fit(&features, &labels, &small_params()).unwrap();

        for x in [-1e12, 0.0, 1e12] {
            let p = model.predict_proba(&[x]).unwrap();
            assert!(p.is_finite() && (0.0..=1.0).contains(&p));
        }
    }
}
